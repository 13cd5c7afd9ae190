//! Thread orchestration.
//!
//! The supervisor reads the enabled-sensor set from the settings, constructs
//! one worker per sensor, wires each worker's broadcast channel to the
//! logger (always) and the state server (INS / ADS / RIO only), spawns
//! everything on its own thread, and owns shutdown: Ctrl-C raises a shared
//! flag, workers notice it within one read timeout, and their dropped
//! channels unwind the downstream threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{bounded, never, Receiver};
use tracing::{debug, info, warn};

use sensors::{RioDecoder, UadcDecoder, Vn200Decoder};

use crate::autopilot::AutopilotWorker;
use crate::broadcast::Broadcast;
use crate::clock::{ClockSync, GpsFix};
use crate::logger::{LogStreams, Logger};
use crate::server::{ServerStreams, StatePublisher};
use crate::settings::Settings;
use crate::worker::{SensorWorker, WorkerHandle};
use crate::SensorSet;

/// Queue depth for logger/server subscribers; deep enough to ride out a
/// slow tick without dropping at the configured sensor rates.
const SUBSCRIBER_QUEUE: usize = 64;
/// Queue depth for GPS fix events.
const FIX_QUEUE: usize = 8;

/// Run the daemon until shutdown. `logger` is constructed by the caller so
/// a log-open failure can map to the dedicated exit code before any thread
/// starts.
pub fn run(settings: Settings, logger: Logger) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut handles: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
    let mut workers: Vec<(&'static str, WorkerHandle)> = Vec::new();

    // Channel plumbing. Disabled sensors leave `never()` receivers behind so
    // the consumer select loops need no special cases.
    let mut log_streams = LogStreams {
        autopilot: never(),
        uadc: never(),
        vn200: never(),
        rio: never(),
    };
    let mut server_streams = ServerStreams {
        uadc: never(),
        vn200: never(),
        rio: never(),
    };
    let server_enabled = settings.server.enabled;

    let mut ap_channel = Broadcast::new("autopilot");
    let mut uadc_channel = Broadcast::new("uadc");
    let mut vn200_channel = Broadcast::new("vn200");
    let mut rio_channel = Broadcast::new("rio");

    if settings.sensors.contains(SensorSet::AUTOPILOT) {
        log_streams.autopilot = ap_channel.subscribe(SUBSCRIBER_QUEUE);
    }
    if settings.sensors.contains(SensorSet::UADC) {
        log_streams.uadc = uadc_channel.subscribe(SUBSCRIBER_QUEUE);
        if server_enabled {
            server_streams.uadc = uadc_channel.subscribe(SUBSCRIBER_QUEUE);
        }
    }
    if settings.sensors.contains(SensorSet::VN200) {
        log_streams.vn200 = vn200_channel.subscribe(SUBSCRIBER_QUEUE);
        if server_enabled {
            server_streams.vn200 = vn200_channel.subscribe(SUBSCRIBER_QUEUE);
        }
    }
    if settings.sensors.contains(SensorSet::RIO) {
        log_streams.rio = rio_channel.subscribe(SUBSCRIBER_QUEUE);
        if server_enabled {
            server_streams.rio = rio_channel.subscribe(SUBSCRIBER_QUEUE);
        }
    }

    // Logger thread.
    handles.push((
        "logger",
        thread::Builder::new()
            .name("logger".into())
            .spawn(move || logger.run(log_streams))
            .context("failed to spawn logger thread")?,
    ));

    // State server thread.
    if server_enabled {
        let dest = std::net::SocketAddr::from((settings.server.address, settings.server.port));
        let publisher = StatePublisher::open(dest, settings.send_period(), settings.debug)
            .context("failed to bind state server socket")?;
        info!(%dest, rate_hz = settings.server.rate_hz, "state server enabled");
        handles.push((
            "server",
            thread::Builder::new()
                .name("server".into())
                .spawn(move || publisher.run(server_streams))
                .context("failed to spawn server thread")?,
        ));
    }

    // Clock syncer thread, fed by the VN-200 worker's fix tap.
    let fix_tx = if settings.sensors.contains(SensorSet::VN200) && settings.set_system_time {
        let (tx, rx): (_, Receiver<GpsFix>) = bounded(FIX_QUEUE);
        handles.push((
            "clock",
            thread::Builder::new()
                .name("clock".into())
                .spawn(move || ClockSync::new().run(rx))
                .context("failed to spawn clock thread")?,
        ));
        Some(tx)
    } else {
        None
    };

    // Sensor worker threads.
    if settings.sensors.contains(SensorSet::AUTOPILOT) {
        let worker = AutopilotWorker::new(settings.mavlink.clone(), ap_channel, settings.debug);
        workers.push(("autopilot", worker.handle()));
        let flag = shutdown.clone();
        handles.push((
            "autopilot",
            thread::Builder::new()
                .name("autopilot".into())
                .spawn(move || worker.run(flag))
                .context("failed to spawn autopilot worker")?,
        ));
    }
    if settings.sensors.contains(SensorSet::UADC) {
        let worker = SensorWorker::new(
            "uadc",
            settings.uadc.serial_config(),
            UadcDecoder::new(),
            uadc_channel,
            settings.debug,
        );
        workers.push(("uadc", worker.handle()));
        let flag = shutdown.clone();
        handles.push((
            "uadc",
            thread::Builder::new()
                .name("uadc".into())
                .spawn(move || worker.run(flag))
                .context("failed to spawn uadc worker")?,
        ));
    }
    if settings.sensors.contains(SensorSet::VN200) {
        let mut worker = SensorWorker::new(
            "vn200",
            settings.vn200.port.serial_config(),
            Vn200Decoder::new(settings.vn200.variant()),
            vn200_channel,
            settings.debug,
        );
        workers.push(("vn200", worker.handle()));
        if let Some(tx) = fix_tx {
            worker = worker.with_tap(move |data: &sensors::Vn200Data| {
                if data.has_gps_fix() {
                    let _ = tx.try_send(GpsFix {
                        gps_time_ns: data.gps_time_ns,
                    });
                }
            });
        }
        let flag = shutdown.clone();
        handles.push((
            "vn200",
            thread::Builder::new()
                .name("vn200".into())
                .spawn(move || worker.run(flag))
                .context("failed to spawn vn200 worker")?,
        ));
    }
    if settings.sensors.contains(SensorSet::RIO) {
        let worker = SensorWorker::new(
            "rio",
            settings.rio.serial_config(),
            RioDecoder::new(),
            rio_channel,
            settings.debug,
        );
        workers.push(("rio", worker.handle()));
        let flag = shutdown.clone();
        handles.push((
            "rio",
            thread::Builder::new()
                .name("rio".into())
                .spawn(move || worker.run(flag))
                .context("failed to spawn rio worker")?,
        ));
    }

    info!(sensors = ?settings.sensors, "all threads started");

    // Shutdown path: Ctrl-C raises the flag; workers exit within one read
    // timeout, dropping their channels, which unwinds logger/server/clock.
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })
        .context("failed to install signal handler")?;
    }
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }
    info!("shutdown requested, stopping threads");
    for (name, handle) in &workers {
        debug!(worker = *name, state = ?handle.state(), "worker state at shutdown");
    }

    for (name, handle) in handles.into_iter().rev() {
        if handle.join().is_err() {
            warn!(thread = name, "thread panicked");
        }
    }
    info!("shutdown complete");
    Ok(())
}
