//! Error types for bit-level operations.

use thiserror::Error;

/// Errors raised by the bit reader/writer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitError {
    /// The reader ran out of input while refilling.
    #[error("unexpected end of bitstream")]
    UnexpectedEnd,

    /// A byte-aligned position was requested while mid-byte.
    #[error("bitstream position is not byte-aligned")]
    NotAligned,

    /// A read or write was requested with an unsupported bit count.
    #[error("invalid bit count: {0} (must be 1..=32)")]
    InvalidBitCount(u8),

    /// A size-field patch fell outside the written range.
    #[error("patch at byte {pos} out of range (buffer holds {len} bytes)")]
    PatchOutOfRange { pos: usize, len: usize },
}

/// Result type alias for bit-level operations.
pub type Result<T> = std::result::Result<T, BitError>;
