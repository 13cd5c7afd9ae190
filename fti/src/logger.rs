//! Data aggregation and CSV logging.
//!
//! The logger subscribes to every enabled worker, keeps the latest sample
//! per sensor together with a "fresh since last tick" bit, and writes one
//! line per active CSV on a periodic tick. A second, much slower timer
//! flushes the files to disk. Opening a log file is fatal if it fails;
//! write errors at tick time are logged and the writer stays live.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use crossbeam_channel::{select, tick, Receiver};
use thiserror::Error;
use tracing::{debug, warn};

use sensors::{RioData, UadcData, Vn200Data};

use crate::autopilot::ApData;
use crate::settings::Settings;
use crate::util::time_usec;
use crate::{DebugFlags, SensorSet};

/// CSV field delimiter.
const DELIM: char = ',';

#[derive(Error, Debug)]
pub enum LogOpenError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Sample receivers wired by the supervisor. Disabled sensors get a
/// `crossbeam_channel::never()` receiver.
pub struct LogStreams {
    pub autopilot: Receiver<ApData>,
    pub uadc: Receiver<UadcData>,
    pub vn200: Receiver<Vn200Data>,
    pub rio: Receiver<RioData>,
}

struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogFile {
    fn create(dir: &Path, name: &str, timestamp: &str) -> Result<Self, LogOpenError> {
        let path = dir.join(format!("{name}-{timestamp}.csv"));
        let file = File::create(&path).map_err(|source| LogOpenError::Open {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "opened log file");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.writer, "{line}") {
            warn!(path = %self.path.display(), error = %e, "log write failed");
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(path = %self.path.display(), error = %e, "log flush failed");
        }
    }
}

/// Aggregator and CSV writer for all enabled sensors.
pub struct Logger {
    debug: DebugFlags,
    sensors: SensorSet,
    wait_for_update: bool,
    wait_for_all_sensors: bool,
    wait_for_gps: bool,
    wait_for_init: bool,
    write_period: std::time::Duration,
    flush_period: std::time::Duration,

    autopilot_file: Option<LogFile>,
    uadc_file: Option<LogFile>,
    vn200_file: Option<LogFile>,
    rio_file: Option<LogFile>,

    autopilot: ApData,
    uadc: UadcData,
    vn200: Vn200Data,
    rio: RioData,
    fresh_autopilot: bool,
    fresh_uadc: bool,
    fresh_vn200: bool,
    fresh_rio: bool,

    first_write: bool,
    /// Column count for the RIO file, fixed by the first packet.
    rio_width: Option<usize>,
    /// Whether the extended VN-200 columns (MagPres) are logged.
    vn200_extended: bool,
    gps_seen: bool,
    autopilot_seen: bool,
}

impl Logger {
    /// Open the per-sensor log files for this run in the working directory.
    /// A file is only created for sensors that are enabled; any failure is
    /// fatal to the caller.
    pub fn open(settings: &Settings) -> Result<Self, LogOpenError> {
        Self::open_in(settings, Path::new("."))
    }

    /// Open the log files under `dir`.
    pub fn open_in(settings: &Settings, dir: &Path) -> Result<Self, LogOpenError> {
        let timestamp = Utc::now().format("%Y%m%dT%H%M").to_string();
        let open = |name: &str, wanted: bool| -> Result<Option<LogFile>, LogOpenError> {
            if wanted {
                LogFile::create(dir, name, &timestamp).map(Some)
            } else {
                Ok(None)
            }
        };
        Ok(Self {
            debug: settings.debug,
            sensors: settings.sensors,
            wait_for_update: settings.wait_for_update,
            wait_for_all_sensors: settings.wait_for_all_sensors,
            wait_for_gps: settings.sensors.contains(SensorSet::VN200) && settings.vn200.wait_for_gps,
            wait_for_init: settings.sensors.contains(SensorSet::AUTOPILOT)
                && settings.mavlink.wait_for_init,
            write_period: settings.log_period(),
            flush_period: settings.flush_period(),
            autopilot_file: open("autopilot", settings.sensors.contains(SensorSet::AUTOPILOT))?,
            uadc_file: open("uadc", settings.sensors.contains(SensorSet::UADC))?,
            vn200_file: open("vn200", settings.sensors.contains(SensorSet::VN200))?,
            rio_file: open("rio", settings.sensors.contains(SensorSet::RIO))?,
            autopilot: ApData::default(),
            uadc: UadcData::default(),
            vn200: Vn200Data::default(),
            rio: RioData::default(),
            fresh_autopilot: false,
            fresh_uadc: false,
            fresh_vn200: false,
            fresh_rio: false,
            first_write: true,
            rio_width: None,
            vn200_extended: settings.vn200.extended_output,
            gps_seen: false,
            autopilot_seen: false,
        })
    }

    /// Receive samples and write on the timers until every producer is gone.
    pub fn run(mut self, streams: LogStreams) {
        let write_tick = tick(self.write_period);
        let flush_tick = tick(self.flush_period);
        loop {
            select! {
                recv(streams.autopilot) -> msg => match msg {
                    Ok(data) => self.on_autopilot(data),
                    Err(_) => break,
                },
                recv(streams.uadc) -> msg => match msg {
                    Ok(data) => self.on_uadc(data),
                    Err(_) => break,
                },
                recv(streams.vn200) -> msg => match msg {
                    Ok(data) => self.on_vn200(data),
                    Err(_) => break,
                },
                recv(streams.rio) -> msg => match msg {
                    Ok(data) => self.on_rio(data),
                    Err(_) => break,
                },
                recv(write_tick) -> _ => self.write_data(),
                recv(flush_tick) -> _ => self.flush(),
            }
        }
        self.flush();
    }

    fn on_autopilot(&mut self, data: ApData) {
        self.autopilot = data;
        self.fresh_autopilot = true;
        self.autopilot_seen = true;
        if self.debug.contains(DebugFlags::DATA) {
            debug!(?data, "autopilot sample");
        }
    }

    fn on_uadc(&mut self, data: UadcData) {
        self.uadc = data;
        self.fresh_uadc = true;
        if self.debug.contains(DebugFlags::DATA) {
            debug!(?data, "uadc sample");
        }
    }

    fn on_vn200(&mut self, data: Vn200Data) {
        self.vn200 = data;
        self.fresh_vn200 = true;
        if data.gps_time_ns > 1_000_000_000_000_000_000 {
            self.gps_seen = true;
        }
        if self.debug.contains(DebugFlags::DATA) {
            debug!(?data, "vn200 sample");
        }
    }

    fn on_rio(&mut self, data: RioData) {
        if self.debug.contains(DebugFlags::DATA) {
            debug!(?data, "rio sample");
        }
        self.rio = data;
        self.fresh_rio = true;
    }

    /// One log tick: headers on the first pass, then a line per sensor that
    /// passes the gating rules.
    fn write_data(&mut self) {
        if self.first_write {
            self.write_headers();
            self.first_write = false;
        }
        // The RIO column count is only known once a packet has arrived, so
        // its header lags until then.
        if self.rio_width.is_none() && self.fresh_rio {
            let width = self.rio.values.len();
            self.rio_width = Some(width);
            if let Some(f) = self.rio_file.as_mut() {
                f.write_line(&rio_header(width));
            }
        }

        if self.wait_for_gps && !self.gps_seen {
            return;
        }
        if self.wait_for_init && !self.autopilot_seen {
            return;
        }
        // Strict gate: with `wait_for_all_sensors`, a tick writes nothing
        // unless every enabled high-rate sensor has new data.
        if self.wait_for_all_sensors {
            let uadc_ok = !self.sensors.contains(SensorSet::UADC) || self.fresh_uadc;
            let vn200_ok = !self.sensors.contains(SensorSet::VN200) || self.fresh_vn200;
            if !(uadc_ok && vn200_ok) {
                return;
            }
        }

        let ts = time_usec();
        if self.should_log(self.autopilot_file.is_some(), self.fresh_autopilot) {
            let line = autopilot_line(ts, &self.autopilot);
            self.autopilot_file.as_mut().unwrap().write_line(&line);
            self.fresh_autopilot = false;
        }
        if self.should_log(self.uadc_file.is_some(), self.fresh_uadc) {
            let line = uadc_line(ts, &self.uadc);
            self.uadc_file.as_mut().unwrap().write_line(&line);
            self.fresh_uadc = false;
        }
        if self.should_log(self.vn200_file.is_some(), self.fresh_vn200) {
            let line = vn200_line(ts, &self.vn200, self.vn200_extended);
            self.vn200_file.as_mut().unwrap().write_line(&line);
            self.fresh_vn200 = false;
        }
        if self.should_log(self.rio_file.is_some() && self.rio_width.is_some(), self.fresh_rio) {
            let line = rio_line(ts, &self.rio, self.rio_width.unwrap_or(0));
            self.rio_file.as_mut().unwrap().write_line(&line);
            self.fresh_rio = false;
        }
    }

    fn should_log(&self, file_open: bool, fresh: bool) -> bool {
        file_open && (!self.wait_for_update || fresh)
    }

    fn write_headers(&mut self) {
        if let Some(f) = self.autopilot_file.as_mut() {
            f.write_line(&autopilot_header());
        }
        if let Some(f) = self.uadc_file.as_mut() {
            f.write_line(&uadc_header());
        }
        if let Some(f) = self.vn200_file.as_mut() {
            f.write_line(&vn200_header(self.vn200_extended));
        }
        // RIO header is deferred; see `write_data`.
    }

    fn flush(&mut self) {
        for file in [
            self.autopilot_file.as_mut(),
            self.uadc_file.as_mut(),
            self.vn200_file.as_mut(),
            self.rio_file.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            file.flush();
        }
    }
}

fn join(fields: Vec<String>) -> String {
    fields.join(&DELIM.to_string())
}

fn autopilot_header() -> String {
    let mut cols = vec!["unix_time".to_string(), "rc_in_time".to_string()];
    cols.extend((1..=8).map(|i| format!("rc_in_{i}_pwm")));
    cols.push("rc_out_time".to_string());
    cols.extend((1..=8).map(|i| format!("rc_out_{i}_pwm")));
    join(cols)
}

fn autopilot_line(ts: u64, data: &ApData) -> String {
    let mut fields = vec![ts.to_string(), data.rc_in_time.to_string()];
    fields.extend(data.rc_in.iter().map(|v| v.to_string()));
    fields.push(data.rc_out_time.to_string());
    fields.extend(data.rc_out.iter().map(|v| v.to_string()));
    join(fields)
}

fn uadc_header() -> String {
    join(
        ["unix_time", "uadc_id", "ias_mps", "aoa_deg", "aos_deg", "alt_m", "pt_pa", "ps_pa"]
            .map(String::from)
            .to_vec(),
    )
}

fn uadc_line(ts: u64, data: &UadcData) -> String {
    // Two decimal places is all the wire format carries.
    join(vec![
        ts.to_string(),
        data.id.to_string(),
        format!("{:.2}", data.ias_mps),
        format!("{:.2}", data.aoa_deg),
        format!("{:.2}", data.aos_deg),
        data.alt_m.to_string(),
        data.pt_pa.to_string(),
        data.ps_pa.to_string(),
    ])
}

fn vn200_header(extended: bool) -> String {
    let mut cols: Vec<String> = [
        "unix_time",
        "gps_time_ns",
        "psi_deg",
        "theta_deg",
        "phi_deg",
        "quat_w",
        "quat_x",
        "quat_y",
        "quat_z",
        "p_rps",
        "q_rps",
        "r_rps",
        "lat_deg",
        "lon_deg",
        "alt_m",
        "Vx_mps",
        "Vy_mps",
        "Vz_mps",
        "Ax_mps2",
        "Ay_mps2",
        "Az_mps2",
    ]
    .map(String::from)
    .to_vec();
    if extended {
        cols.extend(
            ["Mx_gauss", "My_gauss", "Mz_gauss", "temp_c", "pressure_kpa"].map(String::from),
        );
    }
    join(cols)
}

fn vn200_line(ts: u64, data: &Vn200Data, extended: bool) -> String {
    let mut fields = vec![ts.to_string(), data.gps_time_ns.to_string()];
    fields.extend(data.euler_deg.iter().map(|v| format!("{v:.7}")));
    fields.extend(data.quaternion.iter().map(|v| format!("{v:.7}")));
    fields.extend(data.angular_rates_rps.iter().map(|v| format!("{v:.7}")));
    // Position is double precision on the wire; keep it in the log.
    fields.extend(data.pos_deg_deg_m.iter().map(|v| format!("{v:.15}")));
    fields.extend(data.vel_ned_mps.iter().map(|v| format!("{v:.7}")));
    fields.extend(data.accel_mps2.iter().map(|v| format!("{v:.7}")));
    if extended {
        let ext = data.mag_pres.unwrap_or_default();
        fields.extend(ext.mag_gauss.iter().map(|v| format!("{v:.7}")));
        fields.push(format!("{:.7}", ext.temp_c));
        fields.push(format!("{:.7}", ext.pressure_kpa));
    }
    join(fields)
}

fn rio_header(width: usize) -> String {
    let mut cols = vec!["unix_time".to_string()];
    cols.extend((0..width).map(|i| format!("rio_value_{i}")));
    join(cols)
}

fn rio_line(ts: u64, data: &RioData, width: usize) -> String {
    let mut fields = vec![ts.to_string()];
    fields.extend(
        (0..width).map(|i| format!("{:.7}", data.values.get(i).copied().unwrap_or(0.0))),
    );
    join(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensors::vn200::MagPres;

    fn field_count(line: &str) -> usize {
        line.split(DELIM).count()
    }

    #[test]
    fn test_line_field_counts_match_headers() {
        let ap = ApData::default();
        let uadc = UadcData::default();
        let vn = Vn200Data::default();
        let rio = RioData {
            values: vec![1.0, 2.0, 3.0],
        };

        assert_eq!(
            field_count(&autopilot_header()),
            field_count(&autopilot_line(1, &ap))
        );
        assert_eq!(field_count(&uadc_header()), field_count(&uadc_line(1, &uadc)));
        assert_eq!(
            field_count(&vn200_header(false)),
            field_count(&vn200_line(1, &vn, false))
        );
        assert_eq!(
            field_count(&vn200_header(true)),
            field_count(&vn200_line(1, &vn, true))
        );
        assert_eq!(
            field_count(&rio_header(3)),
            field_count(&rio_line(1, &rio, 3))
        );
    }

    #[test]
    fn test_autopilot_header_layout() {
        let h = autopilot_header();
        assert!(h.starts_with("unix_time,rc_in_time,rc_in_1_pwm"));
        assert!(h.contains("rc_in_8_pwm,rc_out_time,rc_out_1_pwm"));
        assert!(h.ends_with("rc_out_8_pwm"));
        assert_eq!(field_count(&h), 2 + 8 + 1 + 8);
    }

    #[test]
    fn test_vn200_line_formatting() {
        let data = Vn200Data {
            gps_time_ns: 42,
            euler_deg: [10.0, -5.0, 2.5],
            quaternion: [1.0, 0.0, 0.0, 0.0],
            angular_rates_rps: [0.1, 0.2, 0.3],
            pos_deg_deg_m: [30.628, -96.3344, 100.0],
            vel_ned_mps: [5.0, 0.0, 0.0],
            accel_mps2: [0.0, 0.0, -9.81],
            mag_pres: None,
        };
        let line = vn200_line(1_000_000, &data, false);
        let fields: Vec<&str> = line.split(DELIM).collect();
        assert_eq!(fields[0], "1000000");
        assert_eq!(fields[1], "42");
        // f32 fields carry 7 decimal places, position 15.
        assert_eq!(fields[2], "10.0000000");
        assert_eq!(fields[5], "1.0000000");
        assert_eq!(fields[12], "30.628000000000000");
        assert!(fields[20].starts_with("-9.81"));
        assert_eq!(fields[20].split('.').nth(1).unwrap().len(), 7);
    }

    #[test]
    fn test_vn200_extended_line_has_magpres_tail() {
        let data = Vn200Data {
            mag_pres: Some(MagPres {
                mag_gauss: [0.2, -0.1, 0.4],
                temp_c: 21.5,
                pressure_kpa: 101.25,
            }),
            ..Default::default()
        };
        let line = vn200_line(1, &data, true);
        assert!(line.ends_with("101.2500000"));
        assert_eq!(field_count(&line), 21 + 5);
    }

    #[test]
    fn test_uadc_line_two_decimals() {
        let data = UadcData {
            id: 42,
            ias_mps: 23.5,
            aoa_deg: 3.25,
            aos_deg: -1.1,
            alt_m: 152,
            pt_pa: 101_325,
            ps_pa: 100_000,
        };
        assert_eq!(
            uadc_line(7, &data),
            "7,42,23.50,3.25,-1.10,152,101325,100000"
        );
    }

    #[test]
    fn test_rio_line_pads_and_truncates_to_first_packet_width() {
        let short = RioData { values: vec![1.5] };
        let long = RioData {
            values: vec![1.0, 2.0, 3.0, 4.0],
        };
        assert_eq!(field_count(&rio_line(1, &short, 3)), 4);
        assert_eq!(field_count(&rio_line(1, &long, 3)), 4);
    }

    use crate::settings::Settings;
    use crate::DebugFlags;
    use ini::Ini;
    use std::path::PathBuf;

    fn test_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fti_logger_test_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_logger(config: &str, dir: &Path) -> Logger {
        let ini = Ini::load_from_str(config).unwrap();
        let settings = Settings::from_ini(&ini, DebugFlags::empty());
        Logger::open_in(&settings, dir).unwrap()
    }

    fn lines_of(dir: &Path, prefix: &str) -> Vec<String> {
        let entry = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .find(|e| e.file_name().to_string_lossy().starts_with(prefix))
            .unwrap_or_else(|| panic!("no {prefix} log file"));
        std::fs::read_to_string(entry.path())
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_partial_freshness_only_fresh_sensor_logs() {
        let dir = test_dir();
        let mut logger = test_logger(
            "[dfti]\nuse_uadc = true\nuse_vn200 = true\nwait_for_update = true\n",
            &dir,
        );
        logger.on_uadc(UadcData::default());
        logger.on_vn200(Vn200Data::default());
        logger.write_data();
        // Only the uADC has new data for the second tick.
        logger.on_uadc(UadcData {
            id: 2,
            ..Default::default()
        });
        logger.write_data();
        logger.flush();

        let uadc = lines_of(&dir, "uadc-");
        let vn200 = lines_of(&dir, "vn200-");
        assert_eq!(uadc.len(), 3, "header + two data lines");
        assert_eq!(vn200.len(), 2, "header + one data line");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wait_for_all_sensors_skips_whole_tick() {
        let dir = test_dir();
        let mut logger = test_logger(
            "[dfti]\nuse_uadc = true\nuse_vn200 = true\nwait_for_all_sensors = true\n",
            &dir,
        );
        // uADC fresh, VN-200 never updated: the tick writes nothing.
        logger.on_uadc(UadcData::default());
        logger.write_data();
        logger.flush();

        assert_eq!(lines_of(&dir, "uadc-").len(), 1, "header only");
        assert_eq!(lines_of(&dir, "vn200-").len(), 1, "header only");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rio_header_deferred_until_first_packet() {
        let dir = test_dir();
        let mut logger = test_logger("[dfti]\nuse_rio = true\n", &dir);
        logger.write_data();
        logger.flush();
        assert!(lines_of(&dir, "rio-").is_empty());

        logger.on_rio(RioData {
            values: vec![1.0, 2.0, 3.0],
        });
        logger.write_data();
        logger.flush();
        let lines = lines_of(&dir, "rio-");
        assert_eq!(lines[0], "unix_time,rio_value_0,rio_value_1,rio_value_2");
        assert_eq!(lines.len(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_disabled_sensors_create_no_files() {
        let dir = test_dir();
        let _logger = test_logger("[dfti]\nuse_uadc = true\n", &dir);
        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("uadc-"));
        assert!(names[0].ends_with(".csv"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
