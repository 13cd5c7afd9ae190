//! Serial sensor workers.
//!
//! One worker per sensor: it owns the serial port, feeds raw bytes to the
//! protocol decoder, and publishes every validated sample on its broadcast
//! channel. The port is opened on the worker thread, not at construction,
//! so a missing device degrades to an idle worker instead of a failed
//! startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sensors::{Decoder, FrameError};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

use crate::broadcast::Broadcast;
use crate::DebugFlags;

/// Serial read timeout; bounds shutdown latency.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Supported baud rates. Anything else falls back to 57600.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Baud {
    #[default]
    B57600,
    B115200,
}

impl Baud {
    pub fn from_u32(value: u32) -> Self {
        match value {
            57_600 => Baud::B57600,
            115_200 => Baud::B115200,
            other => {
                warn!("unsupported baud rate {other}, falling back to 57600");
                Baud::B57600
            }
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Baud::B57600 => 57_600,
            Baud::B115200 => 115_200,
        }
    }
}

/// Serial port parameters for one sensor. Framing is always 8-N-1 with no
/// flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baud: Baud,
}

/// Worker lifecycle, observable from the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Constructed,
    Opening,
    Running,
    /// The port failed to open; the worker parks until shutdown.
    Idle,
    Closed,
}

/// Shared view of a worker's state.
#[derive(Clone)]
pub struct WorkerHandle(Arc<Mutex<WorkerState>>);

impl WorkerHandle {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(WorkerState::Constructed)))
    }

    pub fn state(&self) -> WorkerState {
        *self.0.lock().unwrap()
    }

    pub(crate) fn set(&self, state: WorkerState) {
        *self.0.lock().unwrap() = state;
    }
}

impl Default for WorkerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Open a sensor port with the standard framing and read timeout.
pub fn open_port(config: &SerialConfig) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(&config.port, config.baud.as_u32())
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
}

/// Park an idle or finished worker until the shutdown flag is raised.
pub fn park_until_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(READ_TIMEOUT);
    }
}

/// Generic decode-loop worker for the framed serial protocols.
pub struct SensorWorker<D: Decoder> {
    name: &'static str,
    config: SerialConfig,
    decoder: D,
    channel: Broadcast<D::Sample>,
    /// Called on every published sample; the VN-200 worker uses this to
    /// forward GPS-fix events to the clock syncer.
    tap: Option<Box<dyn FnMut(&D::Sample) + Send>>,
    handle: WorkerHandle,
    debug: DebugFlags,
}

impl<D: Decoder> SensorWorker<D>
where
    D::Sample: Clone,
{
    pub fn new(
        name: &'static str,
        config: SerialConfig,
        decoder: D,
        channel: Broadcast<D::Sample>,
        debug: DebugFlags,
    ) -> Self {
        Self {
            name,
            config,
            decoder,
            channel,
            tap: None,
            handle: WorkerHandle::new(),
            debug,
        }
    }

    /// Install a per-sample tap, invoked before the sample is published.
    pub fn with_tap(mut self, tap: impl FnMut(&D::Sample) + Send + 'static) -> Self {
        self.tap = Some(Box::new(tap));
        self
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Run the decode loop until shutdown. Consumes the worker; the port and
    /// channel drop on exit, which is what signals subscribers to finish.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        self.handle.set(WorkerState::Opening);
        let mut port = match open_port(&self.config) {
            Ok(p) => {
                info!(sensor = self.name, port = %self.config.port, "serial port open");
                p
            }
            Err(e) => {
                warn!(sensor = self.name, port = %self.config.port, error = %e,
                    "failed to open serial port, worker idle");
                self.handle.set(WorkerState::Idle);
                park_until_shutdown(&shutdown);
                self.handle.set(WorkerState::Closed);
                return;
            }
        };
        self.handle.set(WorkerState::Running);

        let mut bad_frames: u64 = 0;
        let mut buf = [0u8; 512];
        while !shutdown.load(Ordering::Relaxed) {
            let n = match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(sensor = self.name, error = %e, "serial read failed, worker stopping");
                    break;
                }
            };
            if self.debug.contains(DebugFlags::SERIAL) {
                debug!(sensor = self.name, bytes = n, "serial read");
            }
            self.decoder.feed(&buf[..n]);
            loop {
                match self.decoder.next() {
                    Ok(sample) => {
                        if let Some(tap) = self.tap.as_mut() {
                            tap(&sample);
                        }
                        self.channel.publish(sample);
                    }
                    Err(FrameError::NeedMoreBytes) => break,
                    Err(e) => {
                        bad_frames += 1;
                        if self.debug.contains(DebugFlags::SERIAL) {
                            debug!(sensor = self.name, error = %e, bad_frames,
                                "frame rejected");
                        }
                    }
                }
            }
        }

        if bad_frames > 0 {
            debug!(sensor = self.name, bad_frames, "rejected frame total");
        }
        self.handle.set(WorkerState::Closed);
    }
}
