//! Generic remote I/O (RIO) microcontroller protocol.
//!
//! A RIO device reports a variable-length list of control-effector values as
//! an ASCII frame:
//!
//! ```text
//! $$$value_1$value_2$...$value_n$XX\r\n
//! ```
//!
//! The separator is `$`, the frame ends with CR/LF, and `XX` is the XOR of
//! every packet byte before the checksum field (separators included, CR/LF
//! excluded) in hex. The value count is whatever the device sends; consumers
//! that need a fixed-size view clamp it themselves.

use crate::checksum::{format_hex_byte, parse_hex_byte, xor_checksum};
use crate::{Decoder, FrameError};

/// Frame start marker.
pub const START: &[u8] = b"$$$";
/// Value separator.
pub const SEPARATOR: u8 = b'$';

/// One decoded RIO sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RioData {
    /// Reported values, in wire order.
    pub values: Vec<f32>,
}

/// Sliding decoder for the RIO line protocol.
#[derive(Debug, Default)]
pub struct RioDecoder {
    buf: Vec<u8>,
}

impl RioDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RioDecoder {
    type Sample = RioData;

    fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > 4096 && !self.buf.contains(&b'\n') {
            let keep = self.buf.len() - 512;
            self.buf.drain(..keep);
        }
    }

    fn next(&mut self) -> Result<RioData, FrameError> {
        let nl = match self.buf.iter().position(|&b| b == b'\n') {
            Some(i) => i,
            None => return Err(FrameError::NeedMoreBytes),
        };
        let result = parse_packet(&self.buf[..=nl]);
        self.buf.drain(..=nl);
        result
    }
}

fn parse_packet(line: &[u8]) -> Result<RioData, FrameError> {
    // Strip the terminator; tolerate a bare LF from a misconfigured device.
    let pkt = if line.ends_with(b"\r\n") {
        &line[..line.len() - 2]
    } else {
        &line[..line.len() - 1]
    };
    if pkt.len() < START.len() + 2 || !pkt.starts_with(START) {
        return Err(FrameError::StructurallyInvalid);
    }
    let cksum_pos = pkt.len() - 2;
    let expected =
        parse_hex_byte(pkt[cksum_pos], pkt[cksum_pos + 1]).ok_or(FrameError::StructurallyInvalid)?;
    if xor_checksum(&pkt[..cksum_pos]) != expected {
        return Err(FrameError::ChecksumMismatch);
    }

    // `$$$a$b$XX` splits to ["", "", "", "a", "b", "XX"]: drop the leading
    // empties from the start marker and pop the checksum field.
    let body = std::str::from_utf8(&pkt[START.len()..cksum_pos])
        .map_err(|_| FrameError::StructurallyInvalid)?;
    let mut values = Vec::new();
    for item in body.split(SEPARATOR as char) {
        if item.is_empty() {
            continue;
        }
        values.push(
            item.trim()
                .parse()
                .map_err(|_| FrameError::StructurallyInvalid)?,
        );
    }
    if values.is_empty() {
        return Err(FrameError::StructurallyInvalid);
    }
    Ok(RioData { values })
}

/// Encode a value list as a wire frame, checksum included.
pub fn encode(values: &[f32]) -> Vec<u8> {
    let mut frame = Vec::from(START);
    for v in values {
        frame.extend_from_slice(format!("{v}").as_bytes());
        frame.push(SEPARATOR);
    }
    frame.extend_from_slice(&format_hex_byte(xor_checksum(&frame)));
    frame.extend_from_slice(b"\r\n");
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Result<RioData, FrameError> {
        let mut dec = RioDecoder::new();
        dec.feed(bytes);
        dec.next()
    }

    #[test]
    fn test_three_value_round_trip() {
        let got = decode_one(&encode(&[1.5, -2.25, 3.0])).unwrap();
        assert_eq!(got.values, vec![1.5, -2.25, 3.0]);
    }

    #[test]
    fn test_variable_lengths_round_trip() {
        for n in 1..=20 {
            let values: Vec<f32> = (0..n).map(|i| i as f32 * 0.5).collect();
            let got = decode_one(&encode(&values)).unwrap();
            assert_eq!(got.values, values, "length {n}");
        }
    }

    #[test]
    fn test_byte_at_a_time_matches_whole_frame() {
        let frame = encode(&[4.0, 5.5]);
        let mut dec = RioDecoder::new();
        let mut got = None;
        for &b in &frame {
            dec.feed(&[b]);
            match dec.next() {
                Err(FrameError::NeedMoreBytes) => continue,
                r => got = Some(r),
            }
        }
        assert_eq!(got.unwrap().unwrap().values, vec![4.0, 5.5]);
    }

    #[test]
    fn test_corrupt_checksum_rejected() {
        let mut frame = encode(&[1.0, 2.0]);
        let pos = frame.len() - 4;
        frame[pos] = if frame[pos] == b'0' { b'1' } else { b'0' };
        assert_eq!(decode_one(&frame), Err(FrameError::ChecksumMismatch));
    }

    #[test]
    fn test_missing_start_marker_rejected() {
        let frame = encode(&[1.0]);
        assert_eq!(
            decode_one(&frame[1..]),
            Err(FrameError::StructurallyInvalid)
        );
    }

    #[test]
    fn test_recovers_after_bad_frame() {
        let mut dec = RioDecoder::new();
        dec.feed(b"$$$not-a-number$00\r\n");
        dec.feed(&encode(&[7.0]));
        assert!(dec.next().is_err());
        assert_eq!(dec.next().unwrap().values, vec![7.0]);
    }
}
