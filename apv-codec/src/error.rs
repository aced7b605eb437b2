//! Error types for the APV codec.

use apv_core::BitError;
use thiserror::Error;

/// Errors raised by the encoder, decoder and bitstream layers.
#[derive(Error, Debug)]
pub enum ApvError {
    /// Bad geometry, QP, buffer or other caller-supplied parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Profile or feature not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Framing/size mismatch, alignment violation or parse failure.
    #[error("malformed bitstream: {0}")]
    MalformedBitstream(String),

    /// A tile's encoded output exceeded its pre-allocated buffer share.
    #[error("tile {tile} output of {needed} bytes exceeds budget of {budget}")]
    OutOfBuffer {
        tile: usize,
        needed: usize,
        budget: usize,
    },

    /// A worker task failed to complete.
    #[error("worker failed: {0}")]
    WorkerFailed(String),

    /// The metadata table is full.
    #[error("metadata table full (capacity {capacity})")]
    MetadataFull { capacity: usize },

    /// Bit-level I/O failure; on the decode side this means truncated or
    /// misaligned input.
    #[error("bit I/O error: {0}")]
    Bit(#[from] BitError),
}

impl ApvError {
    /// Create an invalid-argument error.
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        ApvError::InvalidArgument(msg.into())
    }

    /// Create a malformed-bitstream error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        ApvError::MalformedBitstream(msg.into())
    }
}

/// Result type alias using [`ApvError`].
pub type Result<T> = std::result::Result<T, ApvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = ApvError::invalid_arg("width not macroblock aligned");
        assert_eq!(
            err.to_string(),
            "invalid argument: width not macroblock aligned"
        );

        let err = ApvError::OutOfBuffer {
            tile: 3,
            needed: 9000,
            budget: 8192,
        };
        assert!(err.to_string().contains("tile 3"));
    }

    #[test]
    fn bit_error_conversion() {
        let err: ApvError = BitError::UnexpectedEnd.into();
        assert!(matches!(err, ApvError::Bit(BitError::UnexpectedEnd)));
    }
}
