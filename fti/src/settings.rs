//! Run configuration.
//!
//! Settings come from an INI file resolved in order: the `--config` path if
//! it exists, then `$HOME/.config/dfti/rc.ini`, then `/etc/dftirc`. No file
//! found is fatal. Unknown keys are ignored; missing keys take defaults.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;
use tracing::{debug, warn};

use sensors::Vn200Variant;

use crate::util::hz_to_period;
use crate::worker::{Baud, SerialConfig};
use crate::{DebugFlags, SensorSet};

/// System-wide fallback configuration file.
const SYSTEM_RC: &str = "/etc/dftirc";
/// Per-user configuration file, relative to `$HOME`.
const USER_RC: &str = ".config/dfti/rc.ini";

/// Default UDP state-server port.
pub const DEFAULT_SERVER_PORT: u16 = 2701;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("no valid configuration file found")]
    NoConfigFile,

    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },
}

/// Serial-port settings for one sensor.
#[derive(Debug, Clone, Default)]
pub struct PortSettings {
    pub port: String,
    pub baud: Baud,
}

impl PortSettings {
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            baud: self.baud,
        }
    }
}

/// `[mavlink]` section.
#[derive(Debug, Clone)]
pub struct MavlinkSettings {
    pub port: PortSettings,
    /// Desired telemetry stream rate, Hz.
    pub stream_rate_hz: u16,
    /// Prefer `MESSAGE_INTERVAL` over the deprecated `REQUEST_DATA_STREAM`.
    pub use_message_interval: bool,
    /// Hold logging until the first autopilot sample has arrived.
    pub wait_for_init: bool,
}

impl Default for MavlinkSettings {
    fn default() -> Self {
        Self {
            port: PortSettings::default(),
            stream_rate_hz: 10,
            use_message_interval: false,
            wait_for_init: false,
        }
    }
}

/// `[vn200]` section.
#[derive(Debug, Clone, Default)]
pub struct Vn200Settings {
    pub port: PortSettings,
    /// Hold logging until the INS reports a GPS fix.
    pub wait_for_gps: bool,
    /// The attached unit emits the extended (MagPres) packet.
    pub extended_output: bool,
}

impl Vn200Settings {
    pub fn variant(&self) -> Vn200Variant {
        if self.extended_output {
            Vn200Variant::Extended
        } else {
            Vn200Variant::Standard
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub enabled: bool,
    pub address: Ipv4Addr,
    pub port: u16,
    /// Send rate, Hz, clamped at load to half the log rate.
    pub rate_hz: u8,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            address: Ipv4Addr::LOCALHOST,
            port: DEFAULT_SERVER_PORT,
            rate_hz: 50,
        }
    }
}

/// Full run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub debug: DebugFlags,
    pub log_rate_hz: u16,
    pub flush_time_sec: u16,
    pub set_system_time: bool,
    /// Skip a sensor's log line on ticks where it has no new sample.
    pub wait_for_update: bool,
    /// Skip the whole tick unless every enabled high-rate sensor is fresh.
    pub wait_for_all_sensors: bool,
    pub sensors: SensorSet,
    pub server: ServerSettings,
    pub mavlink: MavlinkSettings,
    pub uadc: PortSettings,
    pub rio: PortSettings,
    pub vn200: Vn200Settings,
}

impl Settings {
    /// Resolve and load the configuration file.
    pub fn load(cli_path: Option<&Path>, debug: DebugFlags) -> Result<Self, SettingsError> {
        let path = resolve_rc_file(cli_path).ok_or(SettingsError::NoConfigFile)?;
        debug!(path = %path.display(), "loading configuration");
        let ini = Ini::load_from_file(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(Self::from_ini(&ini, debug))
    }

    pub(crate) fn from_ini(ini: &Ini, debug: DebugFlags) -> Self {
        let dfti = ini.section(Some("dfti"));
        let log_rate_hz = get_u16(dfti, "log_rate_hz", 100).max(1);
        let mut sensors = SensorSet::empty();
        sensors.set(SensorSet::AUTOPILOT, get_bool(dfti, "use_mavlink", false));
        sensors.set(SensorSet::UADC, get_bool(dfti, "use_uadc", false));
        sensors.set(SensorSet::VN200, get_bool(dfti, "use_vn200", false));
        sensors.set(SensorSet::RIO, get_bool(dfti, "use_rio", false));

        let server_sec = ini.section(Some("server"));
        let mut server = ServerSettings {
            enabled: get_bool(server_sec, "enabled", false),
            address: get_str(server_sec, "address", "127.0.0.1")
                .parse()
                .unwrap_or_else(|_| {
                    warn!("invalid server address, using 127.0.0.1");
                    Ipv4Addr::LOCALHOST
                }),
            port: get_u16(server_sec, "port", DEFAULT_SERVER_PORT),
            rate_hz: get_u16(server_sec, "rate_hz", 50).min(u8::MAX as u16) as u8,
        };
        // The state server must not outpace the logger.
        let max_rate = (log_rate_hz / 2).min(u8::MAX as u16) as u8;
        if server.rate_hz > max_rate {
            warn!(
                "server rate {} Hz exceeds log rate / 2, clamping to {} Hz",
                server.rate_hz, max_rate
            );
            server.rate_hz = max_rate;
        }

        let mav = ini.section(Some("mavlink"));
        let settings = Self {
            debug,
            log_rate_hz,
            flush_time_sec: get_u16(dfti, "flush_time_sec", 10).max(1),
            set_system_time: get_bool(dfti, "set_system_time", false),
            wait_for_update: get_bool(dfti, "wait_for_update", true),
            wait_for_all_sensors: get_bool(dfti, "wait_for_all_sensors", false),
            sensors,
            server,
            mavlink: MavlinkSettings {
                port: port_settings(mav),
                stream_rate_hz: get_u16(mav, "stream_rate", 10).max(1),
                use_message_interval: get_bool(mav, "use_message_interval", false),
                wait_for_init: get_bool(mav, "wait_for_init", false),
            },
            uadc: port_settings(ini.section(Some("uadc"))),
            rio: port_settings(ini.section(Some("rio"))),
            vn200: {
                let sec = ini.section(Some("vn200"));
                Vn200Settings {
                    port: port_settings(sec),
                    wait_for_gps: get_bool(sec, "wait_for_gps", false),
                    extended_output: get_bool(sec, "extended_output", false),
                }
            },
        };
        if debug.contains(DebugFlags::RC) {
            settings.dump();
        }
        settings
    }

    /// Period between log-writer ticks.
    pub fn log_period(&self) -> Duration {
        hz_to_period(u32::from(self.log_rate_hz))
    }

    /// Period between log flushes.
    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.flush_time_sec))
    }

    /// Period between state datagrams.
    pub fn send_period(&self) -> Duration {
        hz_to_period(u32::from(self.server.rate_hz))
    }

    fn dump(&self) {
        debug!("[dfti] log_rate_hz:         {}", self.log_rate_hz);
        debug!("[dfti] flush_time_sec:      {}", self.flush_time_sec);
        debug!("[dfti] set_system_time:     {}", self.set_system_time);
        debug!("[dfti] wait_for_update:     {}", self.wait_for_update);
        debug!("[dfti] wait_for_all_sensors:{}", self.wait_for_all_sensors);
        debug!("[dfti] sensors:             {:?}", self.sensors);
        debug!("[server] enabled:           {}", self.server.enabled);
        debug!("[server] address:           {}", self.server.address);
        debug!("[server] port:              {}", self.server.port);
        debug!("[server] rate_hz:           {}", self.server.rate_hz);
        debug!("[mavlink] serial_port:      {}", self.mavlink.port.port);
        debug!("[mavlink] stream_rate:      {}", self.mavlink.stream_rate_hz);
        debug!(
            "[mavlink] use_message_interval: {}",
            self.mavlink.use_message_interval
        );
        debug!("[uadc] serial_port:         {}", self.uadc.port);
        debug!("[rio] serial_port:          {}", self.rio.port);
        debug!("[vn200] serial_port:        {}", self.vn200.port.port);
        debug!("[vn200] wait_for_gps:       {}", self.vn200.wait_for_gps);
        debug!("[vn200] extended_output:    {}", self.vn200.extended_output);
    }
}

fn resolve_rc_file(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        warn!(path = %path.display(), "configuration file from command line not found");
    }
    if let Ok(home) = std::env::var("HOME") {
        let user_rc = Path::new(&home).join(USER_RC);
        if user_rc.exists() {
            return Some(user_rc);
        }
    }
    let sys_rc = Path::new(SYSTEM_RC);
    if sys_rc.exists() {
        return Some(sys_rc.to_path_buf());
    }
    None
}

fn port_settings(sec: Option<&Properties>) -> PortSettings {
    PortSettings {
        port: get_str(sec, "serial_port", ""),
        baud: Baud::from_u32(get_u32(sec, "baud_rate", 57_600)),
    }
}

fn get_str(sec: Option<&Properties>, key: &str, default: &str) -> String {
    sec.and_then(|p| p.get(key))
        .map(str::trim)
        .map(String::from)
        .unwrap_or_else(|| default.to_string())
}

fn get_bool(sec: Option<&Properties>, key: &str, default: bool) -> bool {
    match sec.and_then(|p| p.get(key)) {
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        None => default,
    }
}

fn get_u16(sec: Option<&Properties>, key: &str, default: u16) -> u16 {
    sec.and_then(|p| p.get(key))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn get_u32(sec: Option<&Properties>, key: &str, default: u32) -> u32 {
    sec.and_then(|p| p.get(key))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
