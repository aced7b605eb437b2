//! Common types and constants for the APV codec.

use apv_core::ChromaFormat;

use crate::error::{ApvError, Result};

/// Transform block size in samples.
pub const BLOCK_SIZE: usize = 8;

/// log2 of [`BLOCK_SIZE`].
pub const LOG2_BLOCK: u32 = 3;

/// Macroblock size in luma samples; frame geometry is macroblock-aligned.
pub const MB_SIZE: u32 = 16;

/// Signed dynamic-range budget of transform coefficients, in bits.
pub const MAX_TX_DYNAMIC_RANGE: u32 = 15;

/// Base quantizer shift before bit-depth and QP terms.
pub const QUANT_SHIFT_BASE: u32 = 14;

/// Smallest valid quantization parameter.
pub const MIN_QP: u8 = 0;

/// Largest valid quantization parameter.
pub const MAX_QP: u8 = 63;

/// Coding profile identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// 4:2:2 sampling, 10-bit.
    Profile422_10,
    /// 4:4:4 sampling, 10-bit.
    Profile444_10,
    /// 4:4:4:4 sampling (with alpha), 10-bit.
    Profile4444_10,
    /// Monochrome, 10-bit.
    Profile400_10,
}

impl Profile {
    /// Wire value of `profile_idc`.
    pub fn to_idc(self) -> u8 {
        match self {
            Self::Profile422_10 => 33,
            Self::Profile444_10 => 44,
            Self::Profile4444_10 => 55,
            Self::Profile400_10 => 66,
        }
    }

    /// Parse a `profile_idc` wire value.
    pub fn from_idc(idc: u8) -> Result<Self> {
        match idc {
            33 => Ok(Self::Profile422_10),
            44 => Ok(Self::Profile444_10),
            55 => Ok(Self::Profile4444_10),
            66 => Ok(Self::Profile400_10),
            other => Err(ApvError::Unsupported(format!("profile_idc {other}"))),
        }
    }

    /// Chroma sampling structure this profile codes.
    pub fn chroma_format(self) -> ChromaFormat {
        match self {
            Self::Profile422_10 => ChromaFormat::Yuv422,
            Self::Profile444_10 => ChromaFormat::Yuv444,
            Self::Profile4444_10 => ChromaFormat::Yuv4444,
            Self::Profile400_10 => ChromaFormat::Monochrome,
        }
    }

    /// Profile that codes the given chroma sampling structure.
    pub fn for_chroma(chroma: ChromaFormat) -> Self {
        match chroma {
            ChromaFormat::Yuv422 => Self::Profile422_10,
            ChromaFormat::Yuv444 => Self::Profile444_10,
            ChromaFormat::Yuv4444 => Self::Profile4444_10,
            ChromaFormat::Monochrome => Self::Profile400_10,
        }
    }
}

/// Payload Block Unit type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PbuType {
    /// Primary coded frame.
    PrimaryFrame,
    /// Non-primary coded frame.
    NonPrimaryFrame,
    /// Reduced-resolution preview frame.
    PreviewFrame,
    /// Depth auxiliary frame.
    DepthFrame,
    /// Alpha auxiliary frame.
    AlphaFrame,
    /// Access-unit information.
    AuInfo,
    /// Metadata side-channel.
    Metadata,
    /// Filler bytes.
    Filler,
}

impl PbuType {
    /// Wire value of `pbu_type`.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::PrimaryFrame => 1,
            Self::NonPrimaryFrame => 2,
            Self::PreviewFrame => 25,
            Self::DepthFrame => 26,
            Self::AlphaFrame => 27,
            Self::AuInfo => 65,
            Self::Metadata => 66,
            Self::Filler => 67,
        }
    }

    /// Parse a `pbu_type` wire value.
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::PrimaryFrame),
            2 => Ok(Self::NonPrimaryFrame),
            25 => Ok(Self::PreviewFrame),
            26 => Ok(Self::DepthFrame),
            27 => Ok(Self::AlphaFrame),
            65 => Ok(Self::AuInfo),
            66 => Ok(Self::Metadata),
            67 => Ok(Self::Filler),
            other => Err(ApvError::malformed(format!("unknown pbu_type {other}"))),
        }
    }

    /// Whether this PBU carries a coded frame.
    pub fn is_frame(&self) -> bool {
        matches!(
            self,
            Self::PrimaryFrame
                | Self::NonPrimaryFrame
                | Self::PreviewFrame
                | Self::DepthFrame
                | Self::AlphaFrame
        )
    }
}

/// Validate a quantization parameter.
pub fn check_qp(qp: u8) -> Result<u8> {
    if qp > MAX_QP {
        return Err(ApvError::invalid_arg(format!(
            "qp {qp} out of range {MIN_QP}..={MAX_QP}"
        )));
    }
    Ok(qp)
}
