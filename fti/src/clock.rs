//! GPS-driven system clock correction.
//!
//! Flight computers without an RTC boot with a bogus wall clock, which makes
//! the `unix_time` column in the logs useless for correlating runs. Once the
//! INS has a GPS fix the daemon sets the OS clock from the GPS timestamp by
//! invoking `date +%s -s @<seconds>`.
//!
//! The set happens at most once per process lifetime: a successful run
//! latches the syncer. A failed or timed-out run clears the latch so the
//! next fix event retries.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use crate::util::gps_to_unix_sec;

/// GPS timestamps at or below this are uninitialized INS output, not a fix.
/// (Any current GPS time in nanoseconds is well above 1e18.)
pub const MIN_VALID_GPS_NS: u64 = 1_000_000_000_000_000_000;

/// How long the `date(1)` subprocess may run.
const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(2);

/// GPS fix notification from the VN-200 worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsFix {
    pub gps_time_ns: u64,
}

/// One-shot system clock setter.
pub struct ClockSync {
    synced: bool,
}

impl ClockSync {
    pub fn new() -> Self {
        Self { synced: false }
    }

    /// Consume fix events until the producer goes away.
    pub fn run(mut self, events: Receiver<GpsFix>) {
        while let Ok(fix) = events.recv() {
            self.handle(fix);
        }
    }

    fn handle(&mut self, fix: GpsFix) {
        if self.synced {
            return;
        }
        if fix.gps_time_ns <= MIN_VALID_GPS_NS {
            debug!(gps_time_ns = fix.gps_time_ns, "ignoring pre-fix GPS timestamp");
            return;
        }
        let unix_sec = gps_to_unix_sec(fix.gps_time_ns);
        // Latch optimistically; a failed run clears it below.
        self.synced = true;
        match set_system_clock(unix_sec) {
            Ok(()) => debug!(unix_sec, "system time set from GPS"),
            Err(e) => {
                warn!(unix_sec, error = %e, "failed to set system time, will retry");
                self.synced = false;
            }
        }
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

fn set_system_clock(unix_sec: u64) -> Result<(), String> {
    let mut child = Command::new("date")
        .arg("+%s")
        .arg("-s")
        .arg(format!("@{unix_sec}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("spawn failed: {e}"))?;

    let deadline = Instant::now() + SUBPROCESS_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return if status.success() {
                    Ok(())
                } else {
                    Err(format!("date exited with {status}"))
                };
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err("date timed out".to_string());
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(format!("wait failed: {e}")),
        }
    }
}
