//! MAVLink autopilot worker.
//!
//! The autopilot is read over MAVLink v1 to capture pilot commands and
//! commanded servo positions from the `RC_CHANNELS_RAW` and
//! `SERVO_OUTPUT_RAW` messages. Values are raw PPM pulse widths; 1000 µs is
//! 0% and 2000 µs is 100% on most transmitter/receiver combinations.
//!
//! Unlike the framed sensors this worker opens its port read-write: on the
//! first decoded message it latches the autopilot's system/component id and
//! asks for the two streams at the configured rate, either through the
//! `MESSAGE_INTERVAL` interface or the legacy `REQUEST_DATA_STREAM` one.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mavlink::dialects::common::{
    MavCmd, MavDataStream, MavMessage, COMMAND_LONG_DATA, REQUEST_DATA_STREAM_DATA,
};
use mavlink::error::MessageReadError;
use mavlink::peek_reader::PeekReader;
use mavlink::MavHeader;
use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcast;
use crate::settings::MavlinkSettings;
use crate::util::time_usec;
use crate::worker::{open_port, park_until_shutdown, WorkerHandle, WorkerState};
use crate::DebugFlags;

/// `RC_CHANNELS_RAW` message id.
const MSG_ID_RC_CHANNELS_RAW: u32 = 35;
/// `SERVO_OUTPUT_RAW` message id.
const MSG_ID_SERVO_OUTPUT_RAW: u32 = 36;

/// Combined RC input / servo output sample.
///
/// Published once per complete pair: a sample is emitted only when both
/// messages have arrived at least once since the previous emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApData {
    /// `time_boot_ms` of the contributing `RC_CHANNELS_RAW` message.
    pub rc_in_time: u32,
    /// RC input channels 1-8, PPM µs.
    pub rc_in: [u16; 8],
    /// `time_usec` of the contributing `SERVO_OUTPUT_RAW` message.
    pub rc_out_time: u32,
    /// Servo output channels 1-8, PPM µs.
    pub rc_out: [u16; 8],
}

/// Pairing state: local arrival timestamps (µs since epoch) of the two
/// messages, cleared after each emit.
#[derive(Debug, Default, Clone, Copy)]
struct PairTimestamps {
    rc_channels_raw: u64,
    servo_output_raw: u64,
}

impl PairTimestamps {
    fn complete(&self) -> bool {
        self.rc_channels_raw != 0 && self.servo_output_raw != 0
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

pub struct AutopilotWorker {
    settings: MavlinkSettings,
    channel: Broadcast<ApData>,
    handle: WorkerHandle,
    debug: DebugFlags,
    sequence: u8,
}

impl AutopilotWorker {
    pub fn new(settings: MavlinkSettings, channel: Broadcast<ApData>, debug: DebugFlags) -> Self {
        Self {
            settings,
            channel,
            handle: WorkerHandle::new(),
            debug,
            sequence: 0,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        self.handle.set(WorkerState::Opening);
        let port = match open_port(&self.settings.port.serial_config()) {
            Ok(p) => {
                info!(port = %self.settings.port.port, "autopilot serial port open");
                p
            }
            Err(e) => {
                warn!(port = %self.settings.port.port, error = %e,
                    "failed to open autopilot port, worker idle");
                self.handle.set(WorkerState::Idle);
                park_until_shutdown(&shutdown);
                self.handle.set(WorkerState::Closed);
                return;
            }
        };
        self.handle.set(WorkerState::Running);

        // The reader owns the port; outgoing commands go through
        // `reader_mut()` since the port is a single read-write handle.
        let mut reader = PeekReader::new(port);

        let mut have_first_msg = false;
        let mut target = (0u8, 0u8);
        let mut data = ApData::default();
        let mut timestamps = PairTimestamps::default();
        let mut decode_failures: u64 = 0;
        let mut last_reported_failures: u64 = 0;
        let mut unhandled: u64 = 0;

        while !shutdown.load(Ordering::Relaxed) {
            let (header, msg) = match mavlink::read_v1_msg::<MavMessage, _>(&mut reader) {
                Ok(pair) => pair,
                Err(MessageReadError::Io(e)) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(MessageReadError::Io(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(MessageReadError::Io(e)) => {
                    warn!(error = %e, "autopilot serial read failed, worker stopping");
                    break;
                }
                Err(_) => {
                    // A frame the decoder could not make sense of, most
                    // often a CRC failure after lost bytes. This is the
                    // caller-visible loss signal; the decoder keeps no
                    // drop counter of its own.
                    decode_failures += 1;
                    continue;
                }
            };

            if decode_failures != last_reported_failures {
                warn!(failures = decode_failures, "mavlink decode failures");
                last_reported_failures = decode_failures;
            }

            if !have_first_msg {
                target = (header.system_id, header.component_id);
                info!(
                    system_id = target.0,
                    component_id = target.1,
                    "autopilot detected, requesting streams"
                );
                self.setup_rates(&mut reader, target);
                have_first_msg = true;
            }

            match msg {
                MavMessage::HEARTBEAT(_) => {}
                MavMessage::RC_CHANNELS_RAW(rc) => {
                    data.rc_in_time = rc.time_boot_ms;
                    data.rc_in = [
                        rc.chan1_raw,
                        rc.chan2_raw,
                        rc.chan3_raw,
                        rc.chan4_raw,
                        rc.chan5_raw,
                        rc.chan6_raw,
                        rc.chan7_raw,
                        rc.chan8_raw,
                    ];
                    timestamps.rc_channels_raw = time_usec();
                    if self.debug.contains(DebugFlags::DATA) {
                        debug!(?rc, "rc channels");
                    }
                }
                MavMessage::SERVO_OUTPUT_RAW(servo) => {
                    data.rc_out_time = servo.time_usec;
                    data.rc_out = [
                        servo.servo1_raw,
                        servo.servo2_raw,
                        servo.servo3_raw,
                        servo.servo4_raw,
                        servo.servo5_raw,
                        servo.servo6_raw,
                        servo.servo7_raw,
                        servo.servo8_raw,
                    ];
                    timestamps.servo_output_raw = time_usec();
                    if self.debug.contains(DebugFlags::DATA) {
                        debug!(?servo, "servo outputs");
                    }
                }
                MavMessage::STATUSTEXT(status) => {
                    let text: String = status
                        .text
                        .iter()
                        .take_while(|&&b| b != 0)
                        .map(|&b| b as char)
                        .collect();
                    warn!(severity = ?status.severity, %text, "autopilot status");
                }
                MavMessage::COMMAND_ACK(ack) => {
                    debug!(command = ?ack.command, result = ?ack.result, "command ack");
                }
                MavMessage::MESSAGE_INTERVAL(interval) => {
                    debug!(
                        message_id = interval.message_id,
                        interval_us = interval.interval_us,
                        "message interval report"
                    );
                }
                other => {
                    unhandled += 1;
                    if self.debug.contains(DebugFlags::DATA) {
                        debug!(
                            message_id = mavlink::Message::message_id(&other),
                            unhandled,
                            "unhandled mavlink message"
                        );
                    }
                }
            }

            if timestamps.complete() {
                self.channel.publish(data);
                timestamps.reset();
            }
        }

        self.handle.set(WorkerState::Closed);
    }

    /// Ask the autopilot for the two streams this daemon records.
    fn setup_rates(&mut self, reader: &mut PeekReader<Box<dyn SerialPort>>, target: (u8, u8)) {
        let rate = self.settings.stream_rate_hz;
        if self.settings.use_message_interval {
            let interval_us = 1_000_000 / i32::from(rate.max(1));
            for msg_id in [MSG_ID_RC_CHANNELS_RAW, MSG_ID_SERVO_OUTPUT_RAW] {
                self.set_data_rate(reader, target, msg_id, interval_us);
                self.get_data_rate(reader, target, msg_id);
            }
        } else {
            self.request_stream(
                reader,
                target,
                MavDataStream::MAV_DATA_STREAM_RC_CHANNELS,
                rate,
                true,
            );
        }
    }

    /// Legacy stream request (`REQUEST_DATA_STREAM`).
    fn request_stream(
        &mut self,
        reader: &mut PeekReader<Box<dyn SerialPort>>,
        target: (u8, u8),
        stream: MavDataStream,
        rate_hz: u16,
        enabled: bool,
    ) {
        let msg = MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
            req_message_rate: rate_hz,
            target_system: target.0,
            target_component: target.1,
            req_stream_id: stream as u8,
            start_stop: enabled.into(),
        });
        self.send(reader, msg);
    }

    /// Set a per-message rate (`MAV_CMD_SET_MESSAGE_INTERVAL`). An interval
    /// of `-1` disables the message; `0` restores the default rate.
    fn set_data_rate(
        &mut self,
        reader: &mut PeekReader<Box<dyn SerialPort>>,
        target: (u8, u8),
        msg_id: u32,
        interval_us: i32,
    ) {
        let msg = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: msg_id as f32,
            param2: interval_us as f32,
            command: MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            target_system: target.0,
            target_component: target.1,
            ..Default::default()
        });
        self.send(reader, msg);
    }

    /// Query a per-message rate (`MAV_CMD_GET_MESSAGE_INTERVAL`); the reply
    /// arrives as a `MESSAGE_INTERVAL` message.
    fn get_data_rate(
        &mut self,
        reader: &mut PeekReader<Box<dyn SerialPort>>,
        target: (u8, u8),
        msg_id: u32,
    ) {
        let msg = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: msg_id as f32,
            command: MavCmd::MAV_CMD_GET_MESSAGE_INTERVAL,
            target_system: target.0,
            target_component: target.1,
            ..Default::default()
        });
        self.send(reader, msg);
    }

    fn send(&mut self, reader: &mut PeekReader<Box<dyn SerialPort>>, msg: MavMessage) {
        let header = MavHeader {
            system_id: 255,
            component_id: 0,
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);
        if let Err(e) = mavlink::write_v1_msg(reader.reader_mut(), header, &msg) {
            warn!(error = %e, "failed to send mavlink message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_completes_only_with_both_messages() {
        let mut ts = PairTimestamps::default();
        assert!(!ts.complete());
        ts.rc_channels_raw = 100;
        assert!(!ts.complete());
        // A second RC message does not complete the pair.
        ts.rc_channels_raw = 200;
        assert!(!ts.complete());
        ts.servo_output_raw = 250;
        assert!(ts.complete());
        ts.reset();
        assert!(!ts.complete());
        assert_eq!(ts.rc_channels_raw, 0);
        assert_eq!(ts.servo_output_raw, 0);
    }

    #[test]
    fn test_ap_data_defaults_to_zeroed_channels() {
        let d = ApData::default();
        assert_eq!(d.rc_in, [0; 8]);
        assert_eq!(d.rc_out, [0; 8]);
        assert_eq!(d.rc_in_time, 0);
        assert_eq!(d.rc_out_time, 0);
    }
}
