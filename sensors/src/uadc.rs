//! Aeroprobe Micro Air Data Computer (uADC) protocol.
//!
//! The uADC emits fixed-width ASCII frames at up to 100 Hz:
//!
//! ```text
//! XXXXX, XX.XX, +XX.XX, +XX.XX, +XXXX, XXXXXX, XXXXXX, XX\r\n
//! ```
//!
//! with fields in order: sample number, indicated airspeed (m/s),
//! angle-of-attack (deg), sideslip angle (deg), pressure altitude (m),
//! total pressure (Pa), static pressure (Pa), and a checksum byte in hex.
//! The checksum is the byte-wise XOR of everything before the checksum
//! field. Every field sits at a fixed byte offset, so extraction is done on
//! slices rather than by splitting on commas.

use crate::checksum::{format_hex_byte, parse_hex_byte, xor_checksum};
use crate::{Decoder, FrameError};

/// Validated packet length, from the sequence id through the carriage
/// return. The line feed that terminates the line is byte 56.
pub const PACKET_LEN: usize = 56;
/// Full line length including the terminating line feed.
pub const LINE_LEN: usize = 57;
/// Offset of the two hex checksum characters; the XOR runs over bytes
/// `0..CHECKSUM_POS`.
pub const CHECKSUM_POS: usize = 53;

const ID_POS: usize = 0;
const ID_LEN: usize = 5;
const IAS_POS: usize = 7;
const IAS_LEN: usize = 5;
const AOA_POS: usize = 14;
const AOA_LEN: usize = 6;
const AOS_POS: usize = 22;
const AOS_LEN: usize = 6;
const ALT_POS: usize = 30;
const ALT_LEN: usize = 5;
const PT_POS: usize = 37;
const PT_LEN: usize = 6;
const PS_POS: usize = 45;
const PS_LEN: usize = 6;

/// One decoded uADC sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UadcData {
    /// Packet sequence number; wraps after 99999.
    pub id: u32,
    /// Indicated airspeed, m/s. The wire format is `XX.XX`, so the highest
    /// representable airspeed is 99.99 m/s.
    pub ias_mps: f32,
    /// Angle-of-attack, degrees (`+XX.XX`).
    pub aoa_deg: f32,
    /// Sideslip angle, degrees (`+XX.XX`).
    pub aos_deg: f32,
    /// Pressure altitude, m.
    pub alt_m: u16,
    /// Total pressure, Pa.
    pub pt_pa: u32,
    /// Static pressure, Pa.
    pub ps_pa: u32,
}

/// Sliding decoder for the uADC line protocol.
///
/// Frames are terminated by `\n`; the decoder consumes through each
/// terminator it finds, so a bad or short first line after attach is
/// discarded and every following line starts frame-aligned.
#[derive(Debug, Default)]
pub struct UadcDecoder {
    buf: Vec<u8>,
}

impl UadcDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for UadcDecoder {
    type Sample = UadcData;

    fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        // A line with no terminator this long is garbage (binary noise on
        // the wrong port); keep only a tail that could still hold a frame.
        if self.buf.len() > 8 * LINE_LEN && !self.buf.contains(&b'\n') {
            let keep = self.buf.len() - LINE_LEN;
            self.buf.drain(..keep);
        }
    }

    fn next(&mut self) -> Result<UadcData, FrameError> {
        let nl = match self.buf.iter().position(|&b| b == b'\n') {
            Some(i) => i,
            None => return Err(FrameError::NeedMoreBytes),
        };
        let result = parse_line(&self.buf[..=nl]);
        self.buf.drain(..=nl);
        result
    }
}

fn parse_line(line: &[u8]) -> Result<UadcData, FrameError> {
    if line.len() != LINE_LEN {
        return Err(FrameError::StructurallyInvalid);
    }
    let pkt = &line[..PACKET_LEN];
    let expected = parse_hex_byte(pkt[CHECKSUM_POS], pkt[CHECKSUM_POS + 1])
        .ok_or(FrameError::StructurallyInvalid)?;
    if xor_checksum(&pkt[..CHECKSUM_POS]) != expected {
        return Err(FrameError::ChecksumMismatch);
    }
    Ok(UadcData {
        id: field_u32(pkt, ID_POS, ID_LEN)?,
        ias_mps: field_f32(pkt, IAS_POS, IAS_LEN)?,
        aoa_deg: field_f32(pkt, AOA_POS, AOA_LEN)?,
        aos_deg: field_f32(pkt, AOS_POS, AOS_LEN)?,
        alt_m: field_u32(pkt, ALT_POS, ALT_LEN).map(|v| v.min(u16::MAX as u32) as u16)?,
        pt_pa: field_u32(pkt, PT_POS, PT_LEN)?,
        ps_pa: field_u32(pkt, PS_POS, PS_LEN)?,
    })
}

fn field_str(pkt: &[u8], pos: usize, len: usize) -> Result<&str, FrameError> {
    std::str::from_utf8(&pkt[pos..pos + len])
        .map(str::trim)
        .map_err(|_| FrameError::StructurallyInvalid)
}

fn field_f32(pkt: &[u8], pos: usize, len: usize) -> Result<f32, FrameError> {
    field_str(pkt, pos, len)?
        .parse()
        .map_err(|_| FrameError::StructurallyInvalid)
}

fn field_u32(pkt: &[u8], pos: usize, len: usize) -> Result<u32, FrameError> {
    // Integer fields carry an explicit sign on the wire; a negative value
    // (sensor below the reference altitude before zeroing) clamps to 0.
    let v: i64 = field_str(pkt, pos, len)?
        .parse()
        .map_err(|_| FrameError::StructurallyInvalid)?;
    Ok(v.clamp(0, u32::MAX as i64) as u32)
}

/// Encode a sample as a wire frame, checksum included.
pub fn encode(data: &UadcData) -> Vec<u8> {
    let body = format!(
        "{:05}, {:05.2}, {:+06.2}, {:+06.2}, {:+05}, {:06}, {:06}, ",
        data.id % 100_000,
        data.ias_mps,
        data.aoa_deg,
        data.aos_deg,
        data.alt_m,
        data.pt_pa,
        data.ps_pa
    );
    let mut frame = body.into_bytes();
    debug_assert_eq!(frame.len(), CHECKSUM_POS);
    frame.extend_from_slice(&format_hex_byte(xor_checksum(&frame)));
    frame.extend_from_slice(b"\r\n");
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn drain(dec: &mut UadcDecoder) -> Vec<Result<UadcData, FrameError>> {
        let mut out = Vec::new();
        loop {
            match dec.next() {
                Err(FrameError::NeedMoreBytes) => break,
                r => out.push(r),
            }
        }
        out
    }

    fn canonical() -> UadcData {
        UadcData {
            id: 42,
            ias_mps: 23.50,
            aoa_deg: 3.25,
            aos_deg: -1.10,
            alt_m: 152,
            pt_pa: 101_325,
            ps_pa: 100_000,
        }
    }

    #[test]
    fn test_encoded_frame_layout() {
        let frame = encode(&canonical());
        assert_eq!(frame.len(), LINE_LEN);
        assert!(frame.starts_with(b"00042, 23.50, +03.25, -01.10, +0152, 101325, 100000, "));
        assert!(frame.ends_with(b"\r\n"));
    }

    #[test]
    fn test_happy_path_round_trip() {
        let mut dec = UadcDecoder::new();
        dec.feed(&encode(&canonical()));
        let got = dec.next().unwrap();
        assert_eq!(got.id, 42);
        assert_relative_eq!(got.ias_mps, 23.50, epsilon = 1e-2);
        assert_relative_eq!(got.aoa_deg, 3.25, epsilon = 1e-2);
        assert_relative_eq!(got.aos_deg, -1.10, epsilon = 1e-2);
        assert_eq!(got.alt_m, 152);
        assert_eq!(got.pt_pa, 101_325);
        assert_eq!(got.ps_pa, 100_000);
        assert_eq!(dec.next(), Err(FrameError::NeedMoreBytes));
    }

    #[test]
    fn test_byte_at_a_time_matches_whole_frame() {
        let frame = encode(&canonical());
        let mut whole = UadcDecoder::new();
        whole.feed(&frame);
        let expected = drain(&mut whole);

        let mut dribble = UadcDecoder::new();
        let mut got = Vec::new();
        for &b in &frame {
            dribble.feed(&[b]);
            got.extend(drain(&mut dribble));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_frame_straddling_two_reads() {
        let frame = encode(&canonical());
        let mut dec = UadcDecoder::new();
        dec.feed(&frame[..20]);
        assert_eq!(dec.next(), Err(FrameError::NeedMoreBytes));
        dec.feed(&frame[20..]);
        assert_eq!(dec.next().unwrap().id, 42);
    }

    #[test]
    fn test_corrupt_checksum_discarded_next_frame_decodes() {
        let mut bad = encode(&canonical());
        bad[CHECKSUM_POS] = if bad[CHECKSUM_POS] == b'0' { b'1' } else { b'0' };
        let mut good = canonical();
        good.id = 43;

        let mut dec = UadcDecoder::new();
        dec.feed(&bad);
        dec.feed(&encode(&good));
        assert_eq!(dec.next(), Err(FrameError::ChecksumMismatch));
        assert_eq!(dec.next().unwrap().id, 43);
    }

    #[test]
    fn test_leading_garbage_is_discarded() {
        let mut dec = UadcDecoder::new();
        dec.feed(b"partial junk line\n");
        dec.feed(&encode(&canonical()));
        assert_eq!(dec.next(), Err(FrameError::StructurallyInvalid));
        assert_eq!(dec.next().unwrap().id, 42);
    }

    #[test]
    fn test_negative_altitude_clamps_to_zero() {
        let mut frame = encode(&canonical());
        frame[ALT_POS] = b'-';
        let cksum = format_hex_byte(xor_checksum(&frame[..CHECKSUM_POS]));
        frame[CHECKSUM_POS] = cksum[0];
        frame[CHECKSUM_POS + 1] = cksum[1];

        let mut dec = UadcDecoder::new();
        dec.feed(&frame);
        assert_eq!(dec.next().unwrap().alt_m, 0);
    }
}
