//! VectorNav VN-200 INS binary protocol.
//!
//! The VN-200 is configured to emit one binary output packet per solution,
//! with a header of
//!
//! - a sync byte (`0xFA`)
//! - the selected output groups (bitmask, 1 byte, group 1 only)
//! - a 16-bit bitmask of the selected fields within the group
//!
//! followed by the field payloads in group-1 field order and a trailing
//! CRC-16. Everything is little-endian and 1-byte packed. Two field
//! selections are supported:
//!
//! - [`Vn200Variant::Standard`] (102 bytes): TimeGps, YawPitchRoll,
//!   Quaternion, AngularRate, Position, Velocity, Accel.
//! - [`Vn200Variant::Extended`] (122 bytes): the same plus the MagPres block
//!   (magnetic field, temperature, static pressure), as emitted by older
//!   airframe installs.
//!
//! The VN-200 sends the quaternion scalar-last `[x, y, z, w]`; decoded
//! samples are always scalar-first `[w, x, y, z]`.

use crate::bytes::{read_f32_le, read_f32x3_le, read_f64x3_le, read_u16_le, read_u64_le};
use crate::checksum::crc16_vectornav;
use crate::{Decoder, FrameError};

/// Frame sync byte.
pub const SYNC: u8 = 0xFA;
/// Expected output-groups byte (group 1 only).
pub const OUTPUT_GROUPS: u8 = 0x01;

const OFF_FIELDS: usize = 2;
const OFF_TIME_GPS: usize = 4;
const OFF_EULER: usize = 12;
const OFF_QUAT: usize = 24;
const OFF_RATES: usize = 40;
const OFF_POS: usize = 52;
const OFF_VEL: usize = 76;
const OFF_ACCEL: usize = 88;
const OFF_MAG: usize = 100;
const OFF_TEMP: usize = 112;
const OFF_PRES: usize = 116;

/// Group-1 field bitmask for the standard packet.
pub const FIELDS_STANDARD: u16 = 0x01FA;
/// Group-1 field bitmask for the extended packet (adds MagPres).
pub const FIELDS_EXTENDED: u16 = 0x05FA;

/// Which field selection the attached unit is configured for.
///
/// Carried as configuration because both selections exist in the fleet; the
/// decoder cannot switch on the in-frame bitmask alone since deployed units
/// have been seen with stale masks after reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Vn200Variant {
    /// 102-byte packet without the MagPres block.
    #[default]
    Standard,
    /// 122-byte packet with magnetic field, temperature, and pressure.
    Extended,
}

impl Vn200Variant {
    /// Total frame length in bytes, sync through CRC.
    pub fn frame_len(self) -> usize {
        match self {
            Vn200Variant::Standard => 102,
            Vn200Variant::Extended => 122,
        }
    }

    /// The group-1 field bitmask this variant is configured with.
    pub fn fields(self) -> u16 {
        match self {
            Vn200Variant::Standard => FIELDS_STANDARD,
            Vn200Variant::Extended => FIELDS_EXTENDED,
        }
    }
}

/// MagPres block carried only by [`Vn200Variant::Extended`] packets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MagPres {
    /// Compensated magnetic field, Gauss.
    pub mag_gauss: [f32; 3],
    /// IMU temperature, °C.
    pub temp_c: f32,
    /// Static pressure, kPa.
    pub pressure_kpa: f32,
}

/// One decoded VN-200 INS sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vn200Data {
    /// Absolute nanoseconds since the GPS epoch, 1980-01-06 00:00 UTC.
    pub gps_time_ns: u64,
    /// Euler angles `[yaw, pitch, roll]`, degrees.
    pub euler_deg: [f32; 3],
    /// Attitude quaternion, body with respect to NED, scalar-first
    /// `[w, x, y, z]` (the wire order is scalar-last and is swapped here).
    pub quaternion: [f32; 4],
    /// Body-axis angular rates `[p, q, r]`, rad/s.
    pub angular_rates_rps: [f32; 3],
    /// Position `[latitude, longitude, altitude]` in deg / deg / m.
    pub pos_deg_deg_m: [f64; 3],
    /// NED velocity `[Vx, Vy, Vz]`, m/s.
    pub vel_ned_mps: [f32; 3],
    /// Body-axis accelerations `[Ax, Ay, Az]`, m/s², gravity included,
    /// bias-compensated by the onboard EKF.
    pub accel_mps2: [f32; 3],
    /// MagPres block, present on extended packets only.
    pub mag_pres: Option<MagPres>,
}

impl Vn200Data {
    /// True once the INS reports a nonzero position, which it only does with
    /// a GPS fix.
    pub fn has_gps_fix(&self) -> bool {
        self.pos_deg_deg_m[0].abs() > 0.0 || self.pos_deg_deg_m[1].abs() > 0.0
    }
}

/// Sliding decoder for VN-200 binary frames.
///
/// Scans for the sync byte, accumulates one frame length, and validates the
/// CRC before any field is extracted. A frame that fails validation is
/// consumed whole so the scan resumes at the next byte boundary past it.
#[derive(Debug)]
pub struct Vn200Decoder {
    variant: Vn200Variant,
    buf: Vec<u8>,
}

impl Vn200Decoder {
    pub fn new(variant: Vn200Variant) -> Self {
        Self {
            variant,
            buf: Vec::new(),
        }
    }

    pub fn variant(&self) -> Vn200Variant {
        self.variant
    }
}

impl Decoder for Vn200Decoder {
    type Sample = Vn200Data;

    fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next(&mut self) -> Result<Vn200Data, FrameError> {
        // Discard everything before the first sync byte.
        match self.buf.iter().position(|&b| b == SYNC) {
            Some(0) => {}
            Some(i) => {
                self.buf.drain(..i);
            }
            None => {
                self.buf.clear();
                return Err(FrameError::NeedMoreBytes);
            }
        }
        let len = self.variant.frame_len();
        if self.buf.len() < len {
            return Err(FrameError::NeedMoreBytes);
        }
        let result = parse_frame(&self.buf[..len], self.variant);
        self.buf.drain(..len);
        result
    }
}

fn parse_frame(frame: &[u8], variant: Vn200Variant) -> Result<Vn200Data, FrameError> {
    if frame[1] != OUTPUT_GROUPS {
        return Err(FrameError::StructurallyInvalid);
    }
    // CRC over everything after the sync byte, trailing CRC included,
    // verifies to zero.
    if crc16_vectornav(&frame[1..]) != 0 {
        return Err(FrameError::ChecksumMismatch);
    }

    // The bitmask is informational only; see `Vn200Variant`.
    let _fields = read_u16_le(frame, OFF_FIELDS).ok_or(FrameError::StructurallyInvalid)?;

    let inv = FrameError::StructurallyInvalid;
    let wire_quat = [
        read_f32_le(frame, OFF_QUAT).ok_or(inv)?,
        read_f32_le(frame, OFF_QUAT + 4).ok_or(inv)?,
        read_f32_le(frame, OFF_QUAT + 8).ok_or(inv)?,
        read_f32_le(frame, OFF_QUAT + 12).ok_or(inv)?,
    ];
    let mag_pres = match variant {
        Vn200Variant::Standard => None,
        Vn200Variant::Extended => Some(MagPres {
            mag_gauss: read_f32x3_le(frame, OFF_MAG).ok_or(inv)?,
            temp_c: read_f32_le(frame, OFF_TEMP).ok_or(inv)?,
            pressure_kpa: read_f32_le(frame, OFF_PRES).ok_or(inv)?,
        }),
    };
    Ok(Vn200Data {
        gps_time_ns: read_u64_le(frame, OFF_TIME_GPS).ok_or(inv)?,
        euler_deg: read_f32x3_le(frame, OFF_EULER).ok_or(inv)?,
        // Scalar-last on the wire, scalar-first in the sample.
        quaternion: [wire_quat[3], wire_quat[0], wire_quat[1], wire_quat[2]],
        angular_rates_rps: read_f32x3_le(frame, OFF_RATES).ok_or(inv)?,
        pos_deg_deg_m: read_f64x3_le(frame, OFF_POS).ok_or(inv)?,
        vel_ned_mps: read_f32x3_le(frame, OFF_VEL).ok_or(inv)?,
        accel_mps2: read_f32x3_le(frame, OFF_ACCEL).ok_or(inv)?,
        mag_pres,
    })
}

/// Encode a sample as a wire frame, CRC included.
///
/// The quaternion in `data` is scalar-first and is written scalar-last, so
/// `encode` followed by decoding reproduces `data` exactly.
pub fn encode(data: &Vn200Data, variant: Vn200Variant) -> Vec<u8> {
    let mut frame = Vec::with_capacity(variant.frame_len());
    frame.push(SYNC);
    frame.push(OUTPUT_GROUPS);
    frame.extend_from_slice(&variant.fields().to_le_bytes());
    frame.extend_from_slice(&data.gps_time_ns.to_le_bytes());
    for v in data.euler_deg {
        frame.extend_from_slice(&v.to_le_bytes());
    }
    for v in [
        data.quaternion[1],
        data.quaternion[2],
        data.quaternion[3],
        data.quaternion[0],
    ] {
        frame.extend_from_slice(&v.to_le_bytes());
    }
    for v in data.angular_rates_rps {
        frame.extend_from_slice(&v.to_le_bytes());
    }
    for v in data.pos_deg_deg_m {
        frame.extend_from_slice(&v.to_le_bytes());
    }
    for v in data.vel_ned_mps {
        frame.extend_from_slice(&v.to_le_bytes());
    }
    for v in data.accel_mps2 {
        frame.extend_from_slice(&v.to_le_bytes());
    }
    if variant == Vn200Variant::Extended {
        let ext = data.mag_pres.unwrap_or_default();
        for v in ext.mag_gauss {
            frame.extend_from_slice(&v.to_le_bytes());
        }
        frame.extend_from_slice(&ext.temp_c.to_le_bytes());
        frame.extend_from_slice(&ext.pressure_kpa.to_le_bytes());
    }
    let crc = crc16_vectornav(&frame[1..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    debug_assert_eq!(frame.len(), variant.frame_len());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vn200Data {
        Vn200Data {
            gps_time_ns: 1_700_000_000_000_000_000,
            euler_deg: [10.0, -5.0, 2.5],
            quaternion: [1.0, 0.0, 0.0, 0.0],
            angular_rates_rps: [0.1, 0.2, 0.3],
            pos_deg_deg_m: [30.6280, -96.3344, 100.0],
            vel_ned_mps: [5.0, 0.0, 0.0],
            accel_mps2: [0.0, 0.0, -9.81],
            mag_pres: None,
        }
    }

    #[test]
    fn test_frame_lengths() {
        assert_eq!(encode(&sample(), Vn200Variant::Standard).len(), 102);
        let mut ext = sample();
        ext.mag_pres = Some(MagPres {
            mag_gauss: [0.2, -0.1, 0.4],
            temp_c: 21.5,
            pressure_kpa: 101.3,
        });
        assert_eq!(encode(&ext, Vn200Variant::Extended).len(), 122);
    }

    #[test]
    fn test_standard_round_trip_bit_exact() {
        let frame = encode(&sample(), Vn200Variant::Standard);
        let mut dec = Vn200Decoder::new(Vn200Variant::Standard);
        dec.feed(&frame);
        let got = dec.next().unwrap();
        assert_eq!(got, sample());
    }

    #[test]
    fn test_extended_round_trip_bit_exact() {
        let mut data = sample();
        data.mag_pres = Some(MagPres {
            mag_gauss: [0.2, -0.1, 0.4],
            temp_c: 21.5,
            pressure_kpa: 101.3,
        });
        let frame = encode(&data, Vn200Variant::Extended);
        let mut dec = Vn200Decoder::new(Vn200Variant::Extended);
        dec.feed(&frame);
        assert_eq!(dec.next().unwrap(), data);
    }

    #[test]
    fn test_quaternion_scalar_position_on_wire() {
        // Identity attitude: wire order is [x, y, z, w] = [0, 0, 0, 1].
        let frame = encode(&sample(), Vn200Variant::Standard);
        let wire_w = f32::from_le_bytes(frame[36..40].try_into().unwrap());
        let wire_x = f32::from_le_bytes(frame[24..28].try_into().unwrap());
        assert_eq!(wire_w, 1.0);
        assert_eq!(wire_x, 0.0);

        let mut dec = Vn200Decoder::new(Vn200Variant::Standard);
        dec.feed(&frame);
        assert_eq!(dec.next().unwrap().quaternion, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_byte_at_a_time_matches_whole_frame() {
        let frame = encode(&sample(), Vn200Variant::Standard);
        let mut dec = Vn200Decoder::new(Vn200Variant::Standard);
        let mut decoded = Vec::new();
        for &b in &frame {
            dec.feed(&[b]);
            loop {
                match dec.next() {
                    Ok(d) => decoded.push(d),
                    Err(FrameError::NeedMoreBytes) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }
        assert_eq!(decoded, vec![sample()]);
    }

    #[test]
    fn test_sync_scan_skips_leading_noise() {
        let mut stream = vec![0x00, 0x42, 0x13];
        stream.extend_from_slice(&encode(&sample(), Vn200Variant::Standard));
        let mut dec = Vn200Decoder::new(Vn200Variant::Standard);
        dec.feed(&stream);
        assert_eq!(dec.next().unwrap(), sample());
    }

    #[test]
    fn test_corrupt_crc_discarded_next_frame_decodes() {
        let mut bad = encode(&sample(), Vn200Variant::Standard);
        bad[50] ^= 0x01;
        let mut second = sample();
        second.gps_time_ns += 5_000_000;
        let good = encode(&second, Vn200Variant::Standard);

        let mut dec = Vn200Decoder::new(Vn200Variant::Standard);
        dec.feed(&bad);
        dec.feed(&good);
        assert_eq!(dec.next(), Err(FrameError::ChecksumMismatch));
        assert_eq!(dec.next().unwrap(), second);
    }

    #[test]
    fn test_wrong_group_byte_is_structural() {
        let mut frame = encode(&sample(), Vn200Variant::Standard);
        frame[1] = 0x02;
        let mut dec = Vn200Decoder::new(Vn200Variant::Standard);
        dec.feed(&frame);
        assert_eq!(dec.next(), Err(FrameError::StructurallyInvalid));
    }

    #[test]
    fn test_gps_fix_detection() {
        let mut d = sample();
        assert!(d.has_gps_fix());
        d.pos_deg_deg_m = [0.0, 0.0, 0.0];
        assert!(!d.has_gps_fix());
        d.pos_deg_deg_m = [0.0, -96.0, 0.0];
        assert!(d.has_gps_fix());
    }
}
