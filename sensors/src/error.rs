use thiserror::Error;

/// Errors reported by the frame decoders.
///
/// Only [`NeedMoreBytes`](FrameError::NeedMoreBytes) is retryable: it means
/// the buffered input does not yet hold a complete frame. The other variants
/// describe a frame that was found and rejected; the decoder has already
/// advanced past it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer does not contain a complete frame yet.
    #[error("incomplete frame, need more bytes")]
    NeedMoreBytes,

    /// A complete frame was found but its checksum did not verify.
    #[error("frame checksum mismatch")]
    ChecksumMismatch,

    /// A complete frame was found but its structure is wrong (bad length,
    /// bad header byte, unparseable field).
    #[error("structurally invalid frame")]
    StructurallyInvalid,
}
