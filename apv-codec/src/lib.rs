//! Block-based intra-only video codec for mezzanine-quality content.
//!
//! Fixed 8x8 integer transform blocks, per-tile independent coding, and an
//! adaptive-context entropy coder, all in integer arithmetic so encode and
//! decode reconstruct bit-identically. Frames split into a grid of tiles
//! that encode and decode in parallel; a closed-loop rate controller assigns
//! per-tile QPs against a bitrate target.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use apv_codec::{ApvDecoder, ApvEncoder, DecoderConfig, EncoderConfig, MetadataStore};
//! use apv_core::{ChromaFormat, Frame};
//!
//! let mut frame = Frame::new(64, 64, ChromaFormat::Yuv422, 10);
//! frame.fill(512);
//!
//! let mut encoder =
//!     ApvEncoder::new(EncoderConfig::new(64, 64, ChromaFormat::Yuv422).with_qp(24)).unwrap();
//! let mut metadata = MetadataStore::new();
//! let au = encoder.encode(&Arc::new(frame), &mut metadata).unwrap();
//!
//! let mut decoder = ApvDecoder::new(DecoderConfig::default()).unwrap();
//! let mut decoded_meta = MetadataStore::new();
//! let out = decoder.decode(&au.data, &mut decoded_meta).unwrap();
//! assert_eq!(out.frames.len(), 1);
//! ```

pub mod bitstream;
pub mod decoder;
pub mod encoder;
pub mod entropy;
pub mod error;
pub mod metadata;
pub mod quant;
pub mod rate;
pub mod tables;
pub mod tile;
pub mod transform;
pub mod types;

pub use decoder::{probe, ApvDecoder, DecodedAu, DecodedFrame, DecoderConfig};
pub use encoder::{ApvEncoder, EncodeStats, EncodedAu, EncoderConfig, RateMode};
pub use error::{ApvError, Result};
pub use metadata::{MetadataKey, MetadataStore};
pub use rate::RateControlConfig;
pub use tile::ThreadConfig;
pub use types::{PbuType, Profile, MAX_QP, MIN_QP};

pub use apv_core::{ChromaFormat, Frame, Plane, SharedFrame};
