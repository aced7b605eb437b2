//! # APV Core
//!
//! Core building blocks shared by the APV encoder and decoder:
//! - Bit-level reading/writing with an accumulator register
//! - Planar frame buffer abstractions for high-bit-depth video
//! - Error types for bit-level operations

pub mod bitio;
pub mod error;
pub mod frame;

pub use bitio::{BitCounter, BitReader, BitSink, BitWriter};
pub use error::{BitError, Result};
pub use frame::{ChromaFormat, Frame, Plane, SharedFrame};
