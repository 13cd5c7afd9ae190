//! Bounds-checked little-endian field readers.
//!
//! All binary sensor frames handled by this crate are little-endian on the
//! wire. These helpers read a fixed-size field at a byte offset and return
//! `None` when the slice is too short, so decoders never index past a
//! partial frame.

/// Read a little-endian `u16` at `offset`.
pub fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let b = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

/// Read a little-endian `u32` at `offset`.
pub fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let b = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Read a little-endian `u64` at `offset`.
pub fn read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    let b = buf.get(offset..offset + 8)?;
    Some(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

/// Read a little-endian `f32` at `offset`.
pub fn read_f32_le(buf: &[u8], offset: usize) -> Option<f32> {
    let b = buf.get(offset..offset + 4)?;
    Some(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Read a little-endian `f64` at `offset`.
pub fn read_f64_le(buf: &[u8], offset: usize) -> Option<f64> {
    let b = buf.get(offset..offset + 8)?;
    Some(f64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

/// Read three consecutive little-endian `f32` values at `offset`.
pub fn read_f32x3_le(buf: &[u8], offset: usize) -> Option<[f32; 3]> {
    Some([
        read_f32_le(buf, offset)?,
        read_f32_le(buf, offset + 4)?,
        read_f32_le(buf, offset + 8)?,
    ])
}

/// Read three consecutive little-endian `f64` values at `offset`.
pub fn read_f64x3_le(buf: &[u8], offset: usize) -> Option<[f64; 3]> {
    Some([
        read_f64_le(buf, offset)?,
        read_f64_le(buf, offset + 8)?,
        read_f64_le(buf, offset + 16)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_le_fields() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0xBEEFu16.to_le_bytes());
        buf.extend_from_slice(&1.5f32.to_le_bytes());
        buf.extend_from_slice(&(-2.25f64).to_le_bytes());

        assert_eq!(read_u16_le(&buf, 0), Some(0xBEEF));
        assert_eq!(read_f32_le(&buf, 2), Some(1.5));
        assert_eq!(read_f64_le(&buf, 6), Some(-2.25));
    }

    #[test]
    fn test_out_of_bounds_returns_none() {
        let buf = [0u8; 4];
        assert_eq!(read_u32_le(&buf, 1), None);
        assert_eq!(read_f64_le(&buf, 0), None);
        assert_eq!(read_u16_le(&buf, 3), None);
        assert_eq!(read_f32x3_le(&buf, 0), None);
    }
}
