//! FTI — onboard flight-test instrumentation daemon.
//!
//! Concurrently ingests telemetry from a MAVLink autopilot, an Aeroprobe
//! micro air data computer, a VectorNav VN-200 INS, and a generic remote I/O
//! microcontroller; logs time-stamped CSVs per sensor at a fixed cadence;
//! and publishes a packed vehicle-state datagram over UDP for downstream
//! consumers such as online system identification.

use bitflags::bitflags;

pub mod autopilot;
pub mod broadcast;
pub mod clock;
pub mod logger;
pub mod server;
pub mod settings;
pub mod supervisor;
pub mod util;
pub mod worker;

bitflags! {
    /// Debug output categories, set from the command line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u8 {
        /// Settings / configuration diagnostics.
        const RC = 1 << 0;
        /// Serial I/O diagnostics.
        const SERIAL = 1 << 1;
        /// Received sensor data dumps.
        const DATA = 1 << 2;
    }
}

bitflags! {
    /// Which sensors this run is configured with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SensorSet: u8 {
        /// MAVLink-based autopilot.
        const AUTOPILOT = 1 << 0;
        /// Micro air data computer.
        const UADC = 1 << 1;
        /// VN-200 INS.
        const VN200 = 1 << 2;
        /// Remote I/O microcontroller.
        const RIO = 1 << 3;
    }
}
