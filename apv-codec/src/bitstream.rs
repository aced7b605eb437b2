//! Bitstream container: access units, payload block units, frame and tile
//! headers.
//!
//! Every structure is byte-aligned at its boundary and carries an explicit
//! length, so a reader can skip any unit without parsing its interior and a
//! decoder can seek straight to a tile. All multi-byte fields are big-endian.

use byteorder::{BigEndian, ByteOrder};

use apv_core::{BitReader, BitSink, BitWriter, ChromaFormat};

use crate::error::{ApvError, Result};
use crate::types::{PbuType, Profile, MAX_QP};

/// Byte value every filler PBU payload byte must carry.
pub const FILLER_BYTE: u8 = 0xFF;

/// Upper bound on tiles per frame accepted from a header.
pub const MAX_TILES: usize = 1 << 16;

/// Identity of a coded frame, shared by frame headers and AU-info entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub profile: Profile,
    pub level: u8,
    pub band: u8,
    /// Frame width in luma samples.
    pub width: u32,
    /// Frame height in luma samples.
    pub height: u32,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u8,
    /// Temporal spacing hint between this frame and the previous one.
    pub capture_time_distance: u8,
}

impl FrameInfo {
    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write(self.profile.to_idc() as u32, 8)?;
        w.write(self.level as u32, 8)?;
        w.write(self.band as u32, 8)?;
        w.write(self.width - 1, 32)?;
        w.write(self.height - 1, 32)?;
        w.write(self.chroma_format.to_idc() as u32, 8)?;
        w.write((self.bit_depth - 8) as u32, 8)?;
        w.write(self.capture_time_distance as u32, 8)?;
        Ok(())
    }

    fn read(r: &mut BitReader<'_>) -> Result<Self> {
        let profile = Profile::from_idc(r.read(8)? as u8)?;
        let level = r.read(8)? as u8;
        let band = r.read(8)? as u8;
        let width = r.read(32)?.wrapping_add(1);
        let height = r.read(32)?.wrapping_add(1);
        if width == 0 || height == 0 {
            return Err(ApvError::malformed("frame dimension overflow"));
        }
        let chroma_idc = r.read(8)? as u8;
        let chroma_format = ChromaFormat::from_idc(chroma_idc)
            .ok_or_else(|| ApvError::malformed(format!("chroma_format_idc {chroma_idc}")))?;
        if chroma_format != profile.chroma_format() {
            return Err(ApvError::malformed(format!(
                "chroma format {chroma_format} does not match profile_idc {}",
                profile.to_idc()
            )));
        }
        let bit_depth = r.read(8)? as u8 + 8;
        if bit_depth > 12 {
            return Err(ApvError::Unsupported(format!("bit depth {bit_depth}")));
        }
        let capture_time_distance = r.read(8)? as u8;
        Ok(Self {
            profile,
            level,
            band,
            width,
            height,
            chroma_format,
            bit_depth,
            capture_time_distance,
        })
    }
}

/// Optional colour description triplet carried by a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorDescription {
    pub primaries: u8,
    pub transfer: u8,
    pub matrix: u8,
}

/// Frame-level header preceding the tile payloads inside a frame PBU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub info: FrameInfo,
    pub color_description: Option<ColorDescription>,
    /// One 8x8 matrix per component, entries in 1..=255 coded minus one;
    /// `None` means the implicit flat matrix.
    pub qmatrix: Option<Vec<[u8; 64]>>,
    /// Tile width in macroblock units.
    pub tile_width_mb: u32,
    /// Tile height in macroblock units.
    pub tile_height_mb: u32,
    /// Per-tile byte sizes duplicated in the header for random access.
    pub tile_sizes: Option<Vec<u32>>,
}

impl FrameHeader {
    /// Serialize the header; leaves the writer byte-aligned.
    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        self.info.write(w)?;

        w.write1(self.color_description.is_some() as u32)?;
        w.write1(self.qmatrix.is_some() as u32)?;
        w.write1(self.tile_sizes.is_some() as u32)?;
        w.write(0, 5)?;

        if let Some(cd) = self.color_description {
            w.write(cd.primaries as u32, 8)?;
            w.write(cd.transfer as u32, 8)?;
            w.write(cd.matrix as u32, 8)?;
        }
        if let Some(mats) = &self.qmatrix {
            for mat in mats {
                for &v in mat.iter() {
                    let coded = v
                        .checked_sub(1)
                        .ok_or_else(|| ApvError::invalid_arg("zero quantization matrix entry"))?;
                    w.write(coded as u32, 8)?;
                }
            }
        }
        w.write(self.tile_width_mb - 1, 16)?;
        w.write(self.tile_height_mb - 1, 16)?;
        if let Some(sizes) = &self.tile_sizes {
            w.write(sizes.len() as u32, 16)?;
            for &s in sizes {
                w.write(s, 32)?;
            }
        }
        debug_assert!(w.is_aligned());
        Ok(())
    }

    /// Parse a header; leaves the reader byte-aligned at the first tile.
    pub fn read(r: &mut BitReader<'_>) -> Result<Self> {
        let info = FrameInfo::read(r)?;

        let has_color = r.read1()? == 1;
        let has_qmatrix = r.read1()? == 1;
        let has_tile_sizes = r.read1()? == 1;
        if r.read(5)? != 0 {
            return Err(ApvError::malformed("reserved frame-header bits set"));
        }

        let color_description = if has_color {
            Some(ColorDescription {
                primaries: r.read(8)? as u8,
                transfer: r.read(8)? as u8,
                matrix: r.read(8)? as u8,
            })
        } else {
            None
        };
        let qmatrix = if has_qmatrix {
            let mut mats = Vec::with_capacity(info.chroma_format.num_components());
            for _ in 0..info.chroma_format.num_components() {
                let mut mat = [0u8; 64];
                for v in mat.iter_mut() {
                    let coded = r.read(8)? as u8;
                    if coded == u8::MAX {
                        return Err(ApvError::malformed("quantization matrix value out of range"));
                    }
                    *v = coded + 1;
                }
                mats.push(mat);
            }
            Some(mats)
        } else {
            None
        };
        let tile_width_mb = r.read(16)? + 1;
        let tile_height_mb = r.read(16)? + 1;
        let tile_sizes = if has_tile_sizes {
            let count = r.read(16)? as usize;
            if count > MAX_TILES {
                return Err(ApvError::malformed(format!("{count} tiles in header")));
            }
            let mut sizes = Vec::with_capacity(count);
            for _ in 0..count {
                sizes.push(r.read(32)?);
            }
            Some(sizes)
        } else {
            None
        };
        Ok(Self {
            info,
            color_description,
            qmatrix,
            tile_width_mb,
            tile_height_mb,
            tile_sizes,
        })
    }
}

/// Tile-level header preceding the per-component coefficient payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileHeader {
    pub tile_index: u16,
    /// Byte size of each component's coefficient payload.
    pub data_sizes: Vec<u32>,
    /// QP per component.
    pub qps: Vec<u8>,
}

/// Writer-side positions of the size fields a tile header back-patches.
#[derive(Debug, Clone)]
pub struct TileHeaderPatch {
    start: usize,
    header_size_pos: usize,
    data_size_pos: Vec<usize>,
}

impl TileHeader {
    /// Wire size of a tile header for `num_components` components.
    pub fn wire_size(num_components: usize) -> usize {
        2 + 2 + num_components * 5 + 1
    }

    /// Serialize with placeholder sizes; the returned patch positions are
    /// filled in by [`TileHeader::patch`] once payload sizes are known.
    pub fn write(&self, w: &mut BitWriter) -> Result<TileHeaderPatch> {
        let start = w.byte_position()?;
        let header_size_pos = start;
        w.write(0, 16)?;
        w.write(self.tile_index as u32, 16)?;
        let mut data_size_pos = Vec::with_capacity(self.data_sizes.len());
        for &size in &self.data_sizes {
            data_size_pos.push(w.byte_position()?);
            w.write(size.wrapping_sub(1), 32)?;
        }
        for &qp in &self.qps {
            w.write(qp as u32, 8)?;
        }
        w.write(0, 8)?;
        let end = w.byte_position()?;
        w.patch_u16(header_size_pos, (end - start) as u16)?;
        Ok(TileHeaderPatch {
            start,
            header_size_pos,
            data_size_pos,
        })
    }

    /// Back-patch the final component payload sizes.
    pub fn patch(w: &mut BitWriter, patch: &TileHeaderPatch, data_sizes: &[u32]) -> Result<()> {
        let header_size = TileHeader::wire_size(data_sizes.len()) as u16;
        w.patch_u16(patch.header_size_pos, header_size)?;
        for (&pos, &size) in patch.data_size_pos.iter().zip(data_sizes.iter()) {
            w.patch_u32(pos, size.wrapping_sub(1))?;
        }
        debug_assert_eq!(patch.data_size_pos[0], patch.start + 4);
        Ok(())
    }

    /// Parse a tile header for a frame with `num_components` components.
    pub fn read(r: &mut BitReader<'_>, num_components: usize) -> Result<Self> {
        let header_size = r.read(16)? as usize;
        if header_size != Self::wire_size(num_components) {
            return Err(ApvError::malformed(format!(
                "tile header size {header_size}, expected {}",
                Self::wire_size(num_components)
            )));
        }
        let tile_index = r.read(16)? as u16;
        let mut data_sizes = Vec::with_capacity(num_components);
        for _ in 0..num_components {
            data_sizes.push(r.read(32)?.wrapping_add(1));
        }
        let mut qps = Vec::with_capacity(num_components);
        for _ in 0..num_components {
            let qp = r.read(8)? as u8;
            if qp > MAX_QP {
                return Err(ApvError::malformed(format!("tile qp {qp}")));
            }
            qps.push(qp);
        }
        if r.read(8)? != 0 {
            return Err(ApvError::malformed("reserved tile-header byte set"));
        }
        Ok(Self {
            tile_index,
            data_sizes,
            qps,
        })
    }
}

/// Fixed per-PBU prefix following the size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PbuHeader {
    pub pbu_type: PbuType,
    /// Correlates frames and metadata belonging to the same content group.
    pub group_id: u16,
}

/// Borrowed view of one PBU inside an access unit.
#[derive(Debug, Clone, Copy)]
pub struct RawPbu<'a> {
    pub header: PbuHeader,
    pub payload: &'a [u8],
}

/// Assembles PBUs into one size-prefixed access unit.
#[derive(Debug, Default)]
pub struct AuWriter {
    buf: Vec<u8>,
}

impl AuWriter {
    pub fn new() -> Self {
        // Reserve the au_size field, patched in finish().
        Self { buf: vec![0; 4] }
    }

    /// Append one PBU.
    pub fn push(&mut self, header: PbuHeader, payload: &[u8]) {
        let mut prefix = [0u8; 8];
        BigEndian::write_u32(&mut prefix[0..4], (payload.len() + 4) as u32);
        prefix[4] = header.pbu_type.to_u8();
        BigEndian::write_u16(&mut prefix[5..7], header.group_id);
        prefix[7] = 0;
        self.buf.extend_from_slice(&prefix);
        self.buf.extend_from_slice(payload);
    }

    /// Patch the access-unit size and return the finished bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let size = (self.buf.len() - 4) as u32;
        BigEndian::write_u32(&mut self.buf[0..4], size);
        self.buf
    }
}

/// Split one access unit into its PBUs without parsing payloads.
///
/// Returns the PBU list and the total byte length consumed, so callers can
/// iterate concatenated access units.
pub fn split_au(data: &[u8]) -> Result<(Vec<RawPbu<'_>>, usize)> {
    if data.len() < 4 {
        return Err(ApvError::malformed("access unit shorter than size field"));
    }
    let au_size = BigEndian::read_u32(&data[0..4]) as usize;
    let end = 4 + au_size;
    if end > data.len() {
        return Err(ApvError::malformed(format!(
            "access unit size {au_size} exceeds {} available bytes",
            data.len() - 4
        )));
    }

    let mut pbus = Vec::new();
    let mut off = 4;
    while off < end {
        if end - off < 4 {
            return Err(ApvError::malformed("trailing bytes shorter than PBU size"));
        }
        let pbu_size = BigEndian::read_u32(&data[off..off + 4]) as usize;
        off += 4;
        if pbu_size < 4 || pbu_size > end - off {
            return Err(ApvError::malformed(format!("pbu size {pbu_size}")));
        }
        let pbu_type = PbuType::from_u8(data[off])?;
        let group_id = BigEndian::read_u16(&data[off + 1..off + 3]);
        if data[off + 3] != 0 {
            return Err(ApvError::malformed("reserved PBU byte set"));
        }
        pbus.push(RawPbu {
            header: PbuHeader { pbu_type, group_id },
            payload: &data[off + 4..off + pbu_size],
        });
        off += pbu_size;
    }
    Ok((pbus, end))
}

/// Build a filler payload of `len` bytes.
pub fn filler_payload(len: usize) -> Vec<u8> {
    vec![FILLER_BYTE; len]
}

/// Validate a filler PBU payload.
pub fn check_filler(payload: &[u8]) -> Result<()> {
    if payload.iter().any(|&b| b != FILLER_BYTE) {
        return Err(ApvError::malformed("filler byte mismatch"));
    }
    Ok(())
}

/// One frame summarized inside an AU-info PBU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuFrameEntry {
    pub pbu_type: PbuType,
    pub group_id: u16,
    pub info: FrameInfo,
}

/// AU-info payload: a table of contents over the frames of an access unit,
/// readable without decoding any tile data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuInfo {
    pub frames: Vec<AuFrameEntry>,
}

impl AuInfo {
    /// Serialize to a PBU payload.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let mut w = BitWriter::new();
        w.write(self.frames.len() as u32, 16)?;
        for entry in &self.frames {
            w.write(entry.pbu_type.to_u8() as u32, 8)?;
            w.write(entry.group_id as u32, 16)?;
            w.write(0, 8)?;
            entry.info.write(&mut w)?;
        }
        Ok(w.finish())
    }

    /// Parse an AU-info PBU payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut r = BitReader::new(payload);
        let count = r.read(16)? as usize;
        let mut frames = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let pbu_type = PbuType::from_u8(r.read(8)? as u8)?;
            if !pbu_type.is_frame() {
                return Err(ApvError::malformed("AU-info entry is not a frame type"));
            }
            let group_id = r.read(16)? as u16;
            if r.read(8)? != 0 {
                return Err(ApvError::malformed("reserved AU-info byte set"));
            }
            let info = FrameInfo::read(&mut r)?;
            frames.push(AuFrameEntry {
                pbu_type,
                group_id,
                info,
            });
        }
        Ok(Self { frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::flat_qmatrix;

    fn sample_info() -> FrameInfo {
        FrameInfo {
            profile: Profile::Profile422_10,
            level: 30,
            band: 2,
            width: 1920,
            height: 1080,
            chroma_format: ChromaFormat::Yuv422,
            bit_depth: 10,
            capture_time_distance: 0,
        }
    }

    #[test]
    fn frame_header_roundtrip_minimal() {
        let header = FrameHeader {
            info: sample_info(),
            color_description: None,
            qmatrix: None,
            tile_width_mb: 16,
            tile_height_mb: 16,
            tile_sizes: None,
        };
        let mut w = BitWriter::new();
        header.write(&mut w).unwrap();
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        assert_eq!(FrameHeader::read(&mut r).unwrap(), header);
    }

    #[test]
    fn frame_header_roundtrip_full() {
        let mut mat = flat_qmatrix();
        mat[0] = 8;
        mat[63] = 32;
        let header = FrameHeader {
            info: sample_info(),
            color_description: Some(ColorDescription {
                primaries: 1,
                transfer: 13,
                matrix: 1,
            }),
            qmatrix: Some(vec![mat, flat_qmatrix(), flat_qmatrix()]),
            tile_width_mb: 8,
            tile_height_mb: 4,
            tile_sizes: Some(vec![1000, 2000, 3000]),
        };
        let mut w = BitWriter::new();
        header.write(&mut w).unwrap();
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        assert_eq!(FrameHeader::read(&mut r).unwrap(), header);
    }

    #[test]
    fn qmatrix_wire_byte_255_is_malformed() {
        let header = FrameHeader {
            info: FrameInfo {
                profile: Profile::Profile400_10,
                level: 30,
                band: 0,
                width: 64,
                height: 64,
                chroma_format: ChromaFormat::Monochrome,
                bit_depth: 10,
                capture_time_distance: 1,
            },
            color_description: None,
            qmatrix: Some(vec![flat_qmatrix()]),
            tile_width_mb: 4,
            tile_height_mb: 4,
            tile_sizes: None,
        };
        let mut w = BitWriter::new();
        header.write(&mut w).unwrap();
        let mut bytes = w.finish();

        // First matrix entry sits right after the 14 frame-info bytes and
        // the flag byte. Wire value 255 would decode to matrix value 256,
        // which the 8-bit entries cannot represent.
        bytes[15] = 0xFF;
        let mut r = BitReader::new(&bytes);
        assert!(matches!(
            FrameHeader::read(&mut r),
            Err(ApvError::MalformedBitstream(_))
        ));
    }

    #[test]
    fn zero_qmatrix_entry_does_not_serialize() {
        let mut mat = flat_qmatrix();
        mat[10] = 0;
        let header = FrameHeader {
            info: sample_info(),
            color_description: None,
            qmatrix: Some(vec![mat, flat_qmatrix(), flat_qmatrix()]),
            tile_width_mb: 4,
            tile_height_mb: 4,
            tile_sizes: None,
        };
        let mut w = BitWriter::new();
        assert!(header.write(&mut w).is_err());
    }

    #[test]
    fn frame_header_chroma_profile_mismatch() {
        let mut info = sample_info();
        info.chroma_format = ChromaFormat::Yuv444;
        let header = FrameHeader {
            info,
            color_description: None,
            qmatrix: None,
            tile_width_mb: 1,
            tile_height_mb: 1,
            tile_sizes: None,
        };
        let mut w = BitWriter::new();
        header.write(&mut w).unwrap();
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        assert!(matches!(
            FrameHeader::read(&mut r),
            Err(ApvError::MalformedBitstream(_))
        ));
    }

    #[test]
    fn tile_header_write_patch_read() {
        let header = TileHeader {
            tile_index: 7,
            data_sizes: vec![0, 0, 0],
            qps: vec![20, 22, 22],
        };
        let mut w = BitWriter::new();
        let patch = header.write(&mut w).unwrap();
        w.write_bytes(&[0xAA; 10]).unwrap();
        TileHeader::patch(&mut w, &patch, &[6, 3, 1]).unwrap();
        let bytes = w.finish();
        assert_eq!(bytes.len(), TileHeader::wire_size(3) + 10);

        let mut r = BitReader::new(&bytes);
        let parsed = TileHeader::read(&mut r, 3).unwrap();
        assert_eq!(parsed.tile_index, 7);
        assert_eq!(parsed.data_sizes, vec![6, 3, 1]);
        assert_eq!(parsed.qps, vec![20, 22, 22]);
    }

    #[test]
    fn tile_header_rejects_bad_size_and_qp() {
        let header = TileHeader {
            tile_index: 0,
            data_sizes: vec![1],
            qps: vec![10],
        };
        let mut w = BitWriter::new();
        header.write(&mut w).unwrap();
        let bytes = w.finish();

        // Parsing with the wrong component count trips the size check.
        let mut r = BitReader::new(&bytes);
        assert!(TileHeader::read(&mut r, 3).is_err());

        let header = TileHeader {
            tile_index: 0,
            data_sizes: vec![1],
            qps: vec![77],
        };
        let mut w = BitWriter::new();
        header.write(&mut w).unwrap();
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        assert!(TileHeader::read(&mut r, 1).is_err());
    }

    #[test]
    fn au_roundtrip() {
        let mut au = AuWriter::new();
        au.push(
            PbuHeader {
                pbu_type: PbuType::AuInfo,
                group_id: 1,
            },
            &[1, 2, 3],
        );
        au.push(
            PbuHeader {
                pbu_type: PbuType::PrimaryFrame,
                group_id: 1,
            },
            &[9; 100],
        );
        au.push(
            PbuHeader {
                pbu_type: PbuType::Filler,
                group_id: 0,
            },
            &filler_payload(5),
        );
        let bytes = au.finish();

        let (pbus, consumed) = split_au(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(pbus.len(), 3);
        assert_eq!(pbus[0].header.pbu_type, PbuType::AuInfo);
        assert_eq!(pbus[0].payload, &[1, 2, 3]);
        assert_eq!(pbus[1].header.pbu_type, PbuType::PrimaryFrame);
        assert_eq!(pbus[1].payload.len(), 100);
        check_filler(pbus[2].payload).unwrap();
    }

    #[test]
    fn truncated_au_is_malformed() {
        let mut au = AuWriter::new();
        au.push(
            PbuHeader {
                pbu_type: PbuType::PrimaryFrame,
                group_id: 0,
            },
            &[0; 50],
        );
        let bytes = au.finish();
        assert!(split_au(&bytes[..bytes.len() - 1]).is_err());
        assert!(split_au(&bytes[..2]).is_err());
    }

    #[test]
    fn corrupt_filler_is_malformed() {
        let mut payload = filler_payload(8);
        payload[3] = 0;
        assert!(check_filler(&payload).is_err());
    }

    #[test]
    fn au_info_roundtrip() {
        let info = AuInfo {
            frames: vec![AuFrameEntry {
                pbu_type: PbuType::PrimaryFrame,
                group_id: 42,
                info: sample_info(),
            }],
        };
        let payload = info.to_payload().unwrap();
        assert_eq!(AuInfo::from_payload(&payload).unwrap(), info);
    }
}
