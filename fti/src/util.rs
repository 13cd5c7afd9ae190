//! Small time helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Offset between the GPS epoch (1980-01-06) and the Unix epoch, seconds.
pub const GPS_UNIX_EPOCH_OFFSET_SEC: u64 = 315_964_800;

/// Current wall-clock time in microseconds since the Unix epoch.
///
/// On an embedded computer without an RTC this is time since boot until the
/// clock syncer has run.
pub fn time_usec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Convert an absolute GPS timestamp in nanoseconds to Unix seconds.
pub fn gps_to_unix_sec(gps_time_ns: u64) -> u64 {
    (GPS_UNIX_EPOCH_OFFSET_SEC * 1_000_000_000 + gps_time_ns) / 1_000_000_000
}

/// Convert a rate in Hz to the corresponding period.
pub fn hz_to_period(rate_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(rate_hz.max(1)))
}
