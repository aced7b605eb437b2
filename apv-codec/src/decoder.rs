//! Frame decoder: access-unit parsing and tile-parallel reconstruction.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use apv_core::{BitReader, ChromaFormat, Frame};

use crate::bitstream::{
    check_filler, split_au, AuFrameEntry, AuInfo, FrameHeader, RawPbu, TileHeader,
};
use crate::entropy::{decode_block, EntropyContext};
use crate::error::{ApvError, Result};
use crate::metadata::{verify_frame_hash, MetadataStore};
use crate::quant::build_dequant_scale;
use crate::tables::{dezigzag, flat_qmatrix};
use crate::tile::{compute_tile_grid, ThreadConfig, TileGeometry, TilePool};
use crate::transform::{select_kernels, BlockKernels};
use crate::types::{PbuType, MB_SIZE};

/// Decoder configuration.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub threads: ThreadConfig,
    /// Fail on a reconstruction-hash mismatch instead of only reporting it.
    pub verify_hash: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            threads: ThreadConfig::default(),
            verify_hash: true,
        }
    }
}

impl DecoderConfig {
    pub fn with_threads(mut self, threads: ThreadConfig) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_verify_hash(mut self, verify: bool) -> Self {
        self.verify_hash = verify;
        self
    }
}

/// One decoded frame with its framing identity.
#[derive(Debug)]
pub struct DecodedFrame {
    pub frame: Frame,
    pub pbu_type: PbuType,
    pub group_id: u16,
    /// Result of the metadata hash check; `None` when no hash was carried.
    pub hash_ok: Option<bool>,
}

/// Result of decoding one access unit.
#[derive(Debug)]
pub struct DecodedAu {
    pub frames: Vec<DecodedFrame>,
    /// Bytes consumed from the input, for iterating concatenated AUs.
    pub consumed: usize,
}

/// Intra-only tile-parallel decoder.
pub struct ApvDecoder {
    config: DecoderConfig,
    kernels: Arc<dyn BlockKernels>,
    pool: TilePool,
}

impl ApvDecoder {
    pub fn new(config: DecoderConfig) -> Result<Self> {
        let pool = TilePool::new(&config.threads)?;
        Ok(Self {
            config,
            kernels: select_kernels(),
            pool,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode one access unit from the front of `data`.
    ///
    /// Metadata PBUs are merged into `metadata`; frames carrying a
    /// reconstruction hash are checked against it.
    pub fn decode(&mut self, data: &[u8], metadata: &mut MetadataStore) -> Result<DecodedAu> {
        let (pbus, consumed) = split_au(data)?;

        // Non-frame PBUs first, so hashes arriving after their frame in the
        // AU are still seen.
        for pbu in &pbus {
            match pbu.header.pbu_type {
                PbuType::Metadata => {
                    metadata.merge_payload(pbu.header.group_id, pbu.payload)?;
                }
                PbuType::Filler => check_filler(pbu.payload)?,
                PbuType::AuInfo => {
                    AuInfo::from_payload(pbu.payload)?;
                }
                _ => {}
            }
        }

        let mut frames = Vec::new();
        for pbu in &pbus {
            if !pbu.header.pbu_type.is_frame() {
                continue;
            }
            let frame = self.decode_frame(pbu.payload)?;
            let hash_ok = verify_frame_hash(metadata, pbu.header.group_id, &frame)?;
            if self.config.verify_hash && hash_ok == Some(false) {
                return Err(ApvError::malformed("reconstruction hash mismatch"));
            }
            frames.push(DecodedFrame {
                frame,
                pbu_type: pbu.header.pbu_type,
                group_id: pbu.header.group_id,
                hash_ok,
            });
        }
        debug!(frames = frames.len(), bytes = consumed, "access unit decoded");
        Ok(DecodedAu { frames, consumed })
    }

    fn decode_frame(&self, payload: &[u8]) -> Result<Frame> {
        let mut r = BitReader::new(payload);
        let header = FrameHeader::read(&mut r)?;
        let info = header.info;
        if info.width % MB_SIZE != 0 || info.height % MB_SIZE != 0 {
            return Err(ApvError::malformed(format!(
                "frame {}x{} not macroblock-aligned",
                info.width, info.height
            )));
        }
        let tiles = compute_tile_grid(
            info.width,
            info.height,
            header.tile_width_mb,
            header.tile_height_mb,
        )
        .map_err(|e| ApvError::malformed(e.to_string()))?;

        // Tiles follow the header as size-prefixed byte ranges.
        let mut off = r.byte_position()?;
        let mut slices = Vec::with_capacity(tiles.len());
        for tile in &tiles {
            if payload.len() - off < 4 {
                return Err(ApvError::malformed("missing tile size prefix"));
            }
            let size = BigEndian::read_u32(&payload[off..off + 4]) as usize;
            off += 4;
            if size > payload.len() - off {
                return Err(ApvError::malformed(format!(
                    "tile {} size {size} exceeds remaining payload",
                    tile.index
                )));
            }
            if let Some(declared) = header.tile_sizes.as_ref().and_then(|s| s.get(tile.index)) {
                if *declared as usize != size {
                    return Err(ApvError::malformed("header tile size mismatch"));
                }
            }
            slices.push(&payload[off..off + size]);
            off += size;
        }
        if off != payload.len() {
            return Err(ApvError::malformed("trailing bytes after last tile"));
        }

        let chroma = info.chroma_format;
        let qmatrices: Vec<[u8; 64]> = match &header.qmatrix {
            Some(mats) => mats.clone(),
            None => vec![flat_qmatrix(); chroma.num_components()],
        };

        // Tiles decode into private buffers; the blit below is the only
        // writer of the output frame.
        let kernels = Arc::clone(&self.kernels);
        let decoded = self.pool.run_tiles(tiles.len(), |idx| {
            decode_tile(
                slices[idx],
                &tiles[idx],
                chroma,
                info.bit_depth,
                &qmatrices,
                kernels.as_ref(),
            )
        })?;

        let mut frame = Frame::new(info.width, info.height, chroma, info.bit_depth);
        for (tile, planes) in tiles.iter().zip(decoded.iter()) {
            for (c, samples) in planes.iter().enumerate() {
                let (ox, oy, tw, th) = tile.component_rect(chroma, c);
                if let Some(plane) = frame.plane_mut(c) {
                    for y in 0..th {
                        let src = &samples[(y * tw) as usize..((y + 1) * tw) as usize];
                        let dst = &mut plane.row_mut(oy + y)[ox as usize..(ox + tw) as usize];
                        dst.copy_from_slice(src);
                    }
                }
            }
        }
        Ok(frame)
    }
}

fn decode_tile(
    data: &[u8],
    tile: &TileGeometry,
    chroma: ChromaFormat,
    bit_depth: u8,
    qmatrices: &[[u8; 64]],
    kernels: &dyn BlockKernels,
) -> Result<Vec<Vec<u16>>> {
    let ncomp = chroma.num_components();
    let mut r = BitReader::new(data);
    let header = TileHeader::read(&mut r, ncomp)?;
    if header.tile_index as usize != tile.index {
        return Err(ApvError::malformed(format!(
            "tile index {} where {} was expected",
            header.tile_index, tile.index
        )));
    }

    let mid = 1i32 << (bit_depth - 1);
    let max_sample = ((1u32 << bit_depth) - 1) as i32;
    let mut off = TileHeader::wire_size(ncomp);
    let mut planes = Vec::with_capacity(ncomp);

    for c in 0..ncomp {
        let size = header.data_sizes[c] as usize;
        if size > data.len() - off {
            return Err(ApvError::malformed(format!(
                "component {c} payload of {size} bytes exceeds tile data"
            )));
        }
        let sub = &data[off..off + size];
        off += size;

        let qp = header.qps[c];
        let dqscale = build_dequant_scale(qp, &qmatrices[c]);
        let (_, _, tw, th) = tile.component_rect(chroma, c);
        let mut recon = vec![0u16; (tw * th) as usize];
        let mut ctx = EntropyContext::new();
        let mut cr = BitReader::new(sub);

        let mut zz = [0i16; 64];
        let mut dq = [0i16; 64];
        let mut rec = [0i16; 64];
        for by in (0..th).step_by(8) {
            for bx in (0..tw).step_by(8) {
                decode_block(&mut cr, &mut zz, &mut ctx)?;
                let levels = dezigzag(&zz);
                kernels.dequantize(&levels, &mut dq, &dqscale, qp, bit_depth);
                kernels.inverse(&dq, &mut rec, bit_depth);
                for row in 0..8u32 {
                    for col in 0..8u32 {
                        let v = (rec[(row * 8 + col) as usize] as i32 + mid).clamp(0, max_sample);
                        recon[((by + row) * tw + bx + col) as usize] = v as u16;
                    }
                }
            }
        }
        planes.push(recon);
    }
    if off != data.len() {
        return Err(ApvError::malformed("trailing bytes after tile components"));
    }
    Ok(planes)
}

/// Extract access-unit contents without decoding any tile data.
///
/// Prefers the AU-info PBU when present; otherwise the table is rebuilt from
/// the frame headers alone.
pub fn probe(data: &[u8]) -> Result<AuInfo> {
    let (pbus, _) = split_au(data)?;
    for pbu in &pbus {
        if pbu.header.pbu_type == PbuType::AuInfo {
            return AuInfo::from_payload(pbu.payload);
        }
    }
    let mut frames = Vec::new();
    for pbu in &pbus {
        if !pbu.header.pbu_type.is_frame() {
            continue;
        }
        frames.push(frame_entry(pbu)?);
    }
    Ok(AuInfo { frames })
}

fn frame_entry(pbu: &RawPbu<'_>) -> Result<AuFrameEntry> {
    let mut r = BitReader::new(pbu.payload);
    let header = FrameHeader::read(&mut r)?;
    Ok(AuFrameEntry {
        pbu_type: pbu.header.pbu_type,
        group_id: pbu.header.group_id,
        info: header.info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{ApvEncoder, EncoderConfig};
    use std::sync::Arc;

    fn encode_one(config: EncoderConfig, fill: u16) -> (Vec<u8>, MetadataStore) {
        let mut frame = Frame::new(config.width, config.height, config.chroma_format, 10);
        frame.fill(fill);
        let frame = Arc::new(frame);
        let mut enc = ApvEncoder::new(config).unwrap();
        let mut meta = MetadataStore::new();
        let au = enc.encode(&frame, &mut meta).unwrap();
        (au.data, meta)
    }

    #[test]
    fn decode_rejects_garbage() {
        let mut dec = ApvDecoder::new(DecoderConfig::default()).unwrap();
        let mut meta = MetadataStore::new();
        assert!(dec.decode(&[0, 0], &mut meta).is_err());
        assert!(dec.decode(&[0xFF; 64], &mut meta).is_err());
    }

    #[test]
    fn decode_rejects_truncation() {
        let (data, _) = encode_one(EncoderConfig::new(32, 32, ChromaFormat::Monochrome), 500);
        let mut dec = ApvDecoder::new(DecoderConfig::default()).unwrap();
        for cut in [data.len() - 1, data.len() / 2, 5] {
            let mut meta = MetadataStore::new();
            assert!(dec.decode(&data[..cut], &mut meta).is_err(), "cut {cut}");
        }
    }

    #[test]
    fn corrupted_tile_payload_fails() {
        let (mut data, _) = encode_one(EncoderConfig::new(32, 32, ChromaFormat::Monochrome), 500);
        // Stomp on bytes near the end, inside the coded tile data.
        let n = data.len();
        for b in &mut data[n - 6..] {
            *b ^= 0xA5;
        }
        let mut dec = ApvDecoder::new(DecoderConfig::default()).unwrap();
        let mut meta = MetadataStore::new();
        // Either a parse failure or a structural mismatch; never a panic.
        let _ = dec.decode(&data, &mut meta);
    }

    #[test]
    fn hash_mismatch_is_detected() {
        let (data, _) = encode_one(
            EncoderConfig::new(32, 32, ChromaFormat::Monochrome).with_frame_hash(true),
            700,
        );
        let mut dec = ApvDecoder::new(DecoderConfig::default()).unwrap();
        let mut meta = MetadataStore::new();
        let out = dec.decode(&data, &mut meta).unwrap();
        assert_eq!(out.frames[0].hash_ok, Some(true));
    }

    #[test]
    fn probe_reads_au_info() {
        let (data, _) = encode_one(EncoderConfig::new(64, 32, ChromaFormat::Yuv422), 300);
        let info = probe(&data).unwrap();
        assert_eq!(info.frames.len(), 1);
        assert_eq!(info.frames[0].info.width, 64);
        assert_eq!(info.frames[0].info.height, 32);
        assert_eq!(info.frames[0].info.chroma_format, ChromaFormat::Yuv422);
    }
}
