//! UDP vehicle-state publisher.
//!
//! For online system identification and similar consumers the daemon
//! publishes a minimum set of vehicle state as a POD struct with 1-byte
//! packing, sent as a single datagram at a fixed rate. State comes from the
//! INS, the air data system, and the control-effector RIOs; inactive sensors
//! leave their fields zero.
//!
//! The datagram uses the native byte order and no conversion is made to
//! network byte order: the intended consumer runs on the same airframe (or
//! at least the same architecture) and can cast the bytes straight onto the
//! struct. Receiving it from Python:
//!
//! ```text
//! fmt = '=Qffffffffffffffffff B ffffffffff'.replace(' ', '')
//! sock.bind((addr, 2701)); data, _ = sock.recvfrom(128)
//! unpacked = struct.unpack(fmt, data)
//! ```

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use bytemuck::{bytes_of, Pod, Zeroable};
use crossbeam_channel::{select, tick, Receiver};
use tracing::{debug, warn};

use sensors::{RioData, UadcData, Vn200Data};

use crate::DebugFlags;

/// Maximum number of RIO values carried in a datagram; extra values from a
/// wider RIO are dropped silently.
pub const STATE_DATA_SIZE: usize = 10;

/// Exact datagram length in bytes.
pub const STATE_DATA_LEN: usize = 113;

/// Packed vehicle-state record, written in place as samples arrive.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct StateData {
    /// INS GPS timestamp, ns since the GPS epoch.
    pub gps_time_ns: u64,
    /// INS Euler angles `[yaw, pitch, roll]`, deg.
    pub euler_deg: [f32; 3],
    /// INS attitude quaternion, scalar-first.
    pub quaternion: [f32; 4],
    /// INS body-axis angular rates, rad/s.
    pub angular_rates_rps: [f32; 3],
    /// INS body-axis accelerations, m/s².
    pub accel_mps2: [f32; 3],
    /// ADS indicated airspeed, m/s.
    pub ias_mps: f32,
    /// ADS angle-of-attack, deg.
    pub aoa_deg: f32,
    /// ADS sideslip angle, deg.
    pub aos_deg: f32,
    /// How many of `rio_values` are in use.
    pub num_rio_values: u8,
    /// RIO values, preallocated at the maximum width.
    pub rio_values: [f32; STATE_DATA_SIZE],
}

// SAFETY: StateData is repr(C, packed) with no padding and every field is
// itself plain old data.
unsafe impl Pod for StateData {}
// SAFETY: all-zero bytes are a valid StateData.
unsafe impl Zeroable for StateData {}

/// Sample receivers wired by the supervisor; the autopilot does not feed the
/// state server.
pub struct ServerStreams {
    pub uadc: Receiver<UadcData>,
    pub vn200: Receiver<Vn200Data>,
    pub rio: Receiver<RioData>,
}

/// UDP publisher for [`StateData`].
pub struct StatePublisher {
    socket: UdpSocket,
    dest: SocketAddr,
    period: Duration,
    state: StateData,
    debug: DebugFlags,
}

impl StatePublisher {
    /// Bind the outbound socket. The socket is unconnected; datagrams are
    /// addressed per send.
    pub fn open(dest: SocketAddr, period: Duration, debug: DebugFlags) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        Ok(Self {
            socket,
            dest,
            period,
            state: StateData::zeroed(),
            debug,
        })
    }

    /// Receive samples and transmit on the timer until every producer is
    /// gone. Send errors are logged; there is no retransmission.
    pub fn run(mut self, streams: ServerStreams) {
        let send_tick = tick(self.period);
        loop {
            select! {
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
                recv(send_tick) -> _ => self.send(),
            }
        }
    }

    fn on_uadc(&mut self, data: UadcData) {
        self.state.ias_mps = data.ias_mps;
        self.state.aoa_deg = data.aoa_deg;
        self.state.aos_deg = data.aos_deg;
    }

    fn on_vn200(&mut self, data: Vn200Data) {
        self.state.gps_time_ns = data.gps_time_ns;
        self.state.euler_deg = data.euler_deg;
        self.state.quaternion = data.quaternion;
        self.state.angular_rates_rps = data.angular_rates_rps;
        self.state.accel_mps2 = data.accel_mps2;
    }

    fn on_rio(&mut self, data: RioData) {
        let count = data.values.len().min(STATE_DATA_SIZE);
        // Assign the whole array: the struct is packed, so element slices
        // would take unaligned references.
        let mut values = [0.0f32; STATE_DATA_SIZE];
        values[..count].copy_from_slice(&data.values[..count]);
        self.state.num_rio_values = count as u8;
        self.state.rio_values = values;
    }

    fn send(&mut self) {
        match self.socket.send_to(bytes_of(&self.state), self.dest) {
            Ok(_) => {
                if self.debug.contains(DebugFlags::SERIAL) {
                    debug!(dest = %self.dest, "state datagram sent");
                }
            }
            Err(e) => warn!(dest = %self.dest, error = %e, "state datagram send failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_data_packed_size() {
        assert_eq!(std::mem::size_of::<StateData>(), STATE_DATA_LEN);
    }

    #[test]
    fn test_state_data_field_offsets() {
        // Offsets are part of the external interface; downstream consumers
        // unpack by position.
        let state = StateData::zeroed();
        let base = &state as *const StateData as usize;
        assert_eq!(std::ptr::addr_of!(state.gps_time_ns) as usize - base, 0);
        assert_eq!(std::ptr::addr_of!(state.euler_deg) as usize - base, 8);
        assert_eq!(std::ptr::addr_of!(state.quaternion) as usize - base, 20);
        assert_eq!(
            std::ptr::addr_of!(state.angular_rates_rps) as usize - base,
            36
        );
        assert_eq!(std::ptr::addr_of!(state.accel_mps2) as usize - base, 48);
        assert_eq!(std::ptr::addr_of!(state.ias_mps) as usize - base, 60);
        assert_eq!(std::ptr::addr_of!(state.aoa_deg) as usize - base, 64);
        assert_eq!(std::ptr::addr_of!(state.aos_deg) as usize - base, 68);
        assert_eq!(std::ptr::addr_of!(state.num_rio_values) as usize - base, 72);
        assert_eq!(std::ptr::addr_of!(state.rio_values) as usize - base, 73);
    }

    #[test]
    fn test_rio_values_clamped_to_capacity() {
        let mut publisher = test_publisher();
        let wide: Vec<f32> = (0..15).map(|i| i as f32).collect();
        publisher.on_rio(RioData { values: wide });
        assert_eq!(publisher.state.num_rio_values, 10);
        let values = publisher.state.rio_values;
        assert_eq!(values[9], 9.0);
    }

    #[test]
    fn test_rio_values_copied_in_order() {
        let mut publisher = test_publisher();
        publisher.on_rio(RioData {
            values: vec![1.5, -2.25, 3.0],
        });
        assert_eq!(publisher.state.num_rio_values, 3);
        let values = publisher.state.rio_values;
        assert_eq!(&values[..3], &[1.5, -2.25, 3.0]);
        assert_eq!(values[3], 0.0);
    }

    #[test]
    fn test_vn200_sample_updates_ins_block() {
        let mut publisher = test_publisher();
        publisher.on_vn200(Vn200Data {
            gps_time_ns: 7,
            euler_deg: [1.0, 2.0, 3.0],
            quaternion: [1.0, 0.0, 0.0, 0.0],
            ..Default::default()
        });
        assert_eq!({ publisher.state.gps_time_ns }, 7);
        assert_eq!({ publisher.state.euler_deg }, [1.0, 2.0, 3.0]);
        assert_eq!({ publisher.state.quaternion }, [1.0, 0.0, 0.0, 0.0]);
    }

    fn test_publisher() -> StatePublisher {
        StatePublisher::open(
            "127.0.0.1:2701".parse().unwrap(),
            Duration::from_millis(20),
            DebugFlags::empty(),
        )
        .unwrap()
    }
}
