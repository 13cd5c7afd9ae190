//! Sensor protocol parsing for flight-test instrumentation
//!
//! This crate provides the wire-level decoders for the serial sensors the
//! FTI daemon ingests:
//!
//! - [`uadc`] — Aeroprobe Micro Air Data Computer, fixed-width ASCII frames
//! - [`rio`] — generic remote I/O microcontroller, `$`-separated ASCII frames
//! - [`vn200`] — VectorNav VN-200 INS, packed little-endian binary frames
//!
//! Each protocol exposes a decoder value implementing [`Decoder`]: bytes go
//! in via [`Decoder::feed`], complete validated samples come out via
//! [`Decoder::next`]. The decoders own their framing state (partial frames,
//! resynchronization after a bad checksum) so callers can hand them arbitrary
//! read chunks, including one byte at a time.

pub mod bytes;
pub mod checksum;
mod error;
pub mod rio;
pub mod uadc;
pub mod vn200;

pub use error::FrameError;
pub use rio::{RioData, RioDecoder};
pub use uadc::{UadcData, UadcDecoder};
pub use vn200::{Vn200Data, Vn200Decoder, Vn200Variant};

/// Byte-stream frame decoder.
///
/// Implementations accumulate raw serial bytes and yield one decoded sample
/// per valid frame. [`next`](Decoder::next) is called in a loop after each
/// [`feed`](Decoder::feed); it returns [`FrameError::NeedMoreBytes`] once the
/// buffered input is exhausted. Any other error reports a frame that failed
/// validation — the decoder has already advanced past it, so the caller just
/// counts the failure and keeps polling.
pub trait Decoder {
    /// Decoded sample type produced by this protocol.
    type Sample;

    /// Append raw bytes read from the serial port.
    fn feed(&mut self, bytes: &[u8]);

    /// Try to decode the next frame from the buffered bytes.
    fn next(&mut self) -> Result<Self::Sample, FrameError>;
}
