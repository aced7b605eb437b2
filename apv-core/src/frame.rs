//! Planar frame buffer abstractions for high-bit-depth video.
//!
//! Frames are owned by the caller and shared across the encoder/decoder
//! boundary through [`SharedFrame`] (an `Arc`); tiles take non-owning views
//! into the plane data.

use std::fmt;
use std::sync::Arc;

/// Chroma sampling structure of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaFormat {
    /// Single luma component.
    Monochrome,
    /// Luma plus half-horizontal-resolution chroma.
    Yuv422,
    /// Luma plus full-resolution chroma.
    Yuv444,
    /// Full-resolution chroma plus an alpha component.
    Yuv4444,
}

impl ChromaFormat {
    /// Number of coded components.
    pub fn num_components(&self) -> usize {
        match self {
            Self::Monochrome => 1,
            Self::Yuv422 | Self::Yuv444 => 3,
            Self::Yuv4444 => 4,
        }
    }

    /// Horizontal/vertical subsampling divisors for a component.
    pub fn subsampling(&self, component: usize) -> (u32, u32) {
        match self {
            Self::Yuv422 if component == 1 || component == 2 => (2, 1),
            _ => (1, 1),
        }
    }

    /// Wire value of `chroma_format_idc`.
    pub fn to_idc(self) -> u8 {
        match self {
            Self::Monochrome => 0,
            Self::Yuv422 => 2,
            Self::Yuv444 => 3,
            Self::Yuv4444 => 4,
        }
    }

    /// Parse a `chroma_format_idc` wire value.
    pub fn from_idc(idc: u8) -> Option<Self> {
        match idc {
            0 => Some(Self::Monochrome),
            2 => Some(Self::Yuv422),
            3 => Some(Self::Yuv444),
            4 => Some(Self::Yuv4444),
            _ => None,
        }
    }
}

impl fmt::Display for ChromaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monochrome => write!(f, "400"),
            Self::Yuv422 => write!(f, "422"),
            Self::Yuv444 => write!(f, "444"),
            Self::Yuv4444 => write!(f, "4444"),
        }
    }
}

/// One component plane of unsigned samples.
#[derive(Clone)]
pub struct Plane {
    /// Plane width in samples.
    pub width: u32,
    /// Plane height in samples.
    pub height: u32,
    /// Samples per row.
    pub stride: usize,
    data: Vec<u16>,
}

impl Plane {
    /// Allocate a zeroed plane.
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width as usize;
        Self {
            width,
            height,
            stride,
            data: vec![0; stride * height as usize],
        }
    }

    /// Sample data, row-major.
    pub fn data(&self) -> &[u16] {
        &self.data
    }

    /// Mutable sample data.
    pub fn data_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }

    /// One row of samples.
    pub fn row(&self, y: u32) -> &[u16] {
        let off = y as usize * self.stride;
        &self.data[off..off + self.width as usize]
    }

    /// One mutable row of samples.
    pub fn row_mut(&mut self, y: u32) -> &mut [u16] {
        let off = y as usize * self.stride;
        &mut self.data[off..off + self.width as usize]
    }

    /// Fill the plane with a constant sample value.
    pub fn fill(&mut self, value: u16) {
        self.data.fill(value);
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish()
    }
}

/// A multi-component video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    chroma: ChromaFormat,
    bit_depth: u8,
    planes: Vec<Plane>,
}

impl Frame {
    /// Allocate a zeroed frame. `bit_depth` must be 8..=12.
    pub fn new(width: u32, height: u32, chroma: ChromaFormat, bit_depth: u8) -> Self {
        let planes = (0..chroma.num_components())
            .map(|c| {
                let (sx, sy) = chroma.subsampling(c);
                Plane::new(width / sx, height / sy)
            })
            .collect();
        Self {
            width,
            height,
            chroma,
            bit_depth,
            planes,
        }
    }

    /// Frame width in luma samples.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in luma samples.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Chroma sampling structure.
    pub fn chroma_format(&self) -> ChromaFormat {
        self.chroma
    }

    /// Sample bit depth.
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// Number of component planes.
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Borrow a component plane.
    pub fn plane(&self, component: usize) -> Option<&Plane> {
        self.planes.get(component)
    }

    /// Borrow a component plane mutably.
    pub fn plane_mut(&mut self, component: usize) -> Option<&mut Plane> {
        self.planes.get_mut(component)
    }

    /// Fill every plane with a constant value.
    pub fn fill(&mut self, value: u16) {
        for p in &mut self.planes {
            p.fill(value);
        }
    }

    /// Maximum representable sample value for the frame's bit depth.
    pub fn max_sample(&self) -> u16 {
        (1u16 << self.bit_depth) - 1
    }
}

/// A reference-counted frame for sharing across the codec boundary.
pub type SharedFrame = Arc<Frame>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_components() {
        assert_eq!(ChromaFormat::Monochrome.num_components(), 1);
        assert_eq!(ChromaFormat::Yuv422.num_components(), 3);
        assert_eq!(ChromaFormat::Yuv4444.num_components(), 4);
    }

    #[test]
    fn chroma_idc_roundtrip() {
        for cf in [
            ChromaFormat::Monochrome,
            ChromaFormat::Yuv422,
            ChromaFormat::Yuv444,
            ChromaFormat::Yuv4444,
        ] {
            assert_eq!(ChromaFormat::from_idc(cf.to_idc()), Some(cf));
        }
        assert_eq!(ChromaFormat::from_idc(1), None);
    }

    #[test]
    fn frame_plane_dimensions() {
        let frame = Frame::new(64, 32, ChromaFormat::Yuv422, 10);
        assert_eq!(frame.num_planes(), 3);
        assert_eq!(frame.plane(0).unwrap().width, 64);
        assert_eq!(frame.plane(1).unwrap().width, 32);
        assert_eq!(frame.plane(1).unwrap().height, 32);
        assert_eq!(frame.max_sample(), 1023);
    }

    #[test]
    fn plane_rows_are_disjoint() {
        let mut p = Plane::new(8, 4);
        p.row_mut(2).fill(7);
        assert!(p.row(1).iter().all(|&s| s == 0));
        assert!(p.row(2).iter().all(|&s| s == 7));
    }
}
