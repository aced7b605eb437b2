//! Frame encoder: tile-parallel transform/quantize/entropy-code pipeline,
//! access-unit assembly, rate control and reconstruction.

use std::sync::Arc;

use tracing::debug;

use apv_core::{BitCounter, BitSink, BitWriter, ChromaFormat, Frame, SharedFrame};

use crate::bitstream::{
    AuFrameEntry, AuInfo, AuWriter, FrameHeader, FrameInfo, PbuHeader, TileHeader,
};
use crate::entropy::{encode_block, EntropyContext};
use crate::error::{ApvError, Result};
use crate::metadata::{store_frame_hash, MetadataStore};
use crate::quant::{
    build_dequant_scale, build_quant_scale, quant_shift, DEADZONE_CANDIDATES_CHROMA,
    DEADZONE_CANDIDATES_LUMA, DEADZONE_FAST,
};
use crate::rate::{rdo_lambda, RateControlConfig, RateController};
use crate::tables::{flat_qmatrix, zigzag};
use crate::tile::{compute_tile_grid, ThreadConfig, TileGeometry, TilePool};
use crate::transform::{select_kernels, BlockKernels};
use crate::types::{check_qp, PbuType, Profile, MB_SIZE};

/// How the encoder picks QPs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateMode {
    /// Fixed QP for every tile.
    ConstantQp(u8),
    /// Closed-loop average-bitrate targeting.
    Abr(RateControlConfig),
}

/// Encoder configuration, built up with `with_` methods.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u8,
    pub level: u8,
    pub band: u8,
    pub rate: RateMode,
    /// Tile extent in macroblock units.
    pub tile_width_mb: u32,
    pub tile_height_mb: u32,
    pub threads: ThreadConfig,
    /// Distortion-optimized deadzone search instead of the fast quantizer.
    pub rdo: bool,
    /// Embed per-plane reconstruction hashes as metadata.
    pub frame_hash: bool,
    /// Per-component quantization matrices; `None` means the flat matrix.
    pub qmatrix: Option<Vec<[u8; 64]>>,
    pub group_id: u16,
    pub capture_time_distance: u8,
}

impl EncoderConfig {
    pub fn new(width: u32, height: u32, chroma_format: ChromaFormat) -> Self {
        Self {
            width,
            height,
            chroma_format,
            bit_depth: 10,
            level: 30,
            band: 0,
            rate: RateMode::ConstantQp(26),
            tile_width_mb: 16,
            tile_height_mb: 16,
            threads: ThreadConfig::default(),
            rdo: false,
            frame_hash: false,
            qmatrix: None,
            group_id: 1,
            capture_time_distance: 1,
        }
    }

    pub fn with_bit_depth(mut self, bit_depth: u8) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    pub fn with_qp(mut self, qp: u8) -> Self {
        self.rate = RateMode::ConstantQp(qp);
        self
    }

    pub fn with_bitrate(mut self, bitrate_bps: u64, fps_num: u32, fps_den: u32) -> Self {
        self.rate = RateMode::Abr(RateControlConfig {
            bitrate_bps,
            fps_num,
            fps_den,
        });
        self
    }

    pub fn with_tile_size_mb(mut self, width_mb: u32, height_mb: u32) -> Self {
        self.tile_width_mb = width_mb;
        self.tile_height_mb = height_mb;
        self
    }

    pub fn with_threads(mut self, threads: ThreadConfig) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_rdo(mut self, rdo: bool) -> Self {
        self.rdo = rdo;
        self
    }

    pub fn with_frame_hash(mut self, frame_hash: bool) -> Self {
        self.frame_hash = frame_hash;
        self
    }

    pub fn with_qmatrix(mut self, qmatrix: Vec<[u8; 64]>) -> Self {
        self.qmatrix = Some(qmatrix);
        self
    }

    pub fn with_group_id(mut self, group_id: u16) -> Self {
        self.group_id = group_id;
        self
    }

    /// Profile implied by the chroma format.
    pub fn profile(&self) -> Profile {
        Profile::for_chroma(self.chroma_format)
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ApvError::invalid_arg("zero frame dimension"));
        }
        if self.width % MB_SIZE != 0 || self.height % MB_SIZE != 0 {
            return Err(ApvError::invalid_arg(format!(
                "frame {}x{} not macroblock-aligned",
                self.width, self.height
            )));
        }
        if !(8..=12).contains(&self.bit_depth) {
            return Err(ApvError::invalid_arg(format!(
                "bit depth {} outside 8..=12",
                self.bit_depth
            )));
        }
        if let RateMode::ConstantQp(qp) = self.rate {
            check_qp(qp)?;
        }
        if let Some(mats) = &self.qmatrix {
            if mats.len() != self.chroma_format.num_components() {
                return Err(ApvError::invalid_arg(
                    "quantization matrix count does not match component count",
                ));
            }
            if mats.iter().any(|m| m.contains(&0)) {
                return Err(ApvError::invalid_arg("zero quantization matrix entry"));
            }
        }
        Ok(())
    }

    fn frame_info(&self) -> FrameInfo {
        FrameInfo {
            profile: self.profile(),
            level: self.level,
            band: self.band,
            width: self.width,
            height: self.height,
            chroma_format: self.chroma_format,
            bit_depth: self.bit_depth,
            capture_time_distance: self.capture_time_distance,
        }
    }
}

/// Per-frame encode statistics.
#[derive(Debug, Clone)]
pub struct EncodeStats {
    pub frame_index: u64,
    pub au_bytes: usize,
    pub picture_qp: u8,
    pub tile_qps: Vec<u8>,
}

/// One encoded access unit plus the encoder's own reconstruction.
#[derive(Debug)]
pub struct EncodedAu {
    pub data: Vec<u8>,
    /// Reconstruction after quantization, identical to what a decoder
    /// produces from `data`.
    pub recon: Frame,
    pub stats: EncodeStats,
}

/// Intra-only tile-parallel encoder.
pub struct ApvEncoder {
    config: EncoderConfig,
    kernels: Arc<dyn BlockKernels>,
    pool: TilePool,
    tiles: Vec<TileGeometry>,
    rate: Option<RateController>,
    frame_index: u64,
}

struct EncodedTile {
    bytes: Vec<u8>,
    /// Reconstructed samples per component, tile-local and row-major.
    planes: Vec<Vec<u16>>,
}

impl ApvEncoder {
    pub fn new(config: EncoderConfig) -> Result<Self> {
        config.validate()?;
        let tiles = compute_tile_grid(
            config.width,
            config.height,
            config.tile_width_mb,
            config.tile_height_mb,
        )?;
        let rate = match config.rate {
            RateMode::ConstantQp(_) => None,
            RateMode::Abr(rc) => Some(RateController::new(rc)?),
        };
        let pool = TilePool::new(&config.threads)?;
        debug!(
            width = config.width,
            height = config.height,
            tiles = tiles.len(),
            threads = pool.num_threads(),
            "encoder created"
        );
        Ok(Self {
            config,
            kernels: select_kernels(),
            pool,
            tiles,
            rate,
            frame_index: 0,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Switch to constant-QP coding.
    pub fn set_qp(&mut self, qp: u8) -> Result<()> {
        check_qp(qp)?;
        self.config.rate = RateMode::ConstantQp(qp);
        self.rate = None;
        Ok(())
    }

    /// Switch to (or retune) bitrate-targeted coding. Resets the model.
    pub fn set_bitrate(&mut self, rc: RateControlConfig) -> Result<()> {
        self.rate = Some(RateController::new(rc)?);
        self.config.rate = RateMode::Abr(rc);
        Ok(())
    }

    pub fn set_frame_hash(&mut self, enable: bool) {
        self.config.frame_hash = enable;
    }

    /// Encode one frame into one access unit.
    ///
    /// Metadata entries already present for the configured group id travel in
    /// the access unit's metadata PBU, alongside the reconstruction hash when
    /// enabled.
    pub fn encode(&mut self, frame: &SharedFrame, metadata: &mut MetadataStore) -> Result<EncodedAu> {
        self.check_frame(frame)?;
        let chroma = self.config.chroma_format;
        let bit_depth = self.config.bit_depth;

        let tile_pixels: Vec<u64> = self.tiles.iter().map(|t| t.total_samples(chroma)).collect();

        // QP assignment: fixed, or planned from the complexity pass.
        let (tile_qps, picture_qp, target_bits) = match (&self.rate, self.config.rate) {
            (Some(rc), _) => {
                let kernels = Arc::clone(&self.kernels);
                let tiles = &self.tiles;
                let costs = self.pool.run_tiles(tiles.len(), |idx| {
                    Ok(tile_cost(frame, &tiles[idx], chroma, bit_depth, kernels.as_ref()))
                })?;
                let plan = rc.plan_frame(&costs, &tile_pixels)?;
                (plan.tile_qps, plan.picture_qp, Some(plan.target_bits))
            }
            (None, RateMode::ConstantQp(qp)) => (vec![qp; self.tiles.len()], qp, None),
            (None, RateMode::Abr(_)) => {
                return Err(ApvError::invalid_arg("ABR mode without rate controller"))
            }
        };

        let qmatrices: Vec<[u8; 64]> = match &self.config.qmatrix {
            Some(mats) => mats.clone(),
            None => vec![flat_qmatrix(); chroma.num_components()],
        };

        // Every tile writes into a private buffer capped at its share of the
        // output budget.
        let kernels = Arc::clone(&self.kernels);
        let tiles = &self.tiles;
        let config = &self.config;
        let encoded = self.pool.run_tiles(tiles.len(), |idx| {
            let budget = tile_pixels[idx] as usize * 4 + 1024;
            encode_tile(
                frame,
                &tiles[idx],
                chroma,
                bit_depth,
                tile_qps[idx],
                &qmatrices,
                kernels.as_ref(),
                config.rdo,
                budget,
            )
        })?;

        // Assemble the frame payload: header, then size-prefixed tiles in
        // index order.
        let mut payload = BitWriter::new();
        let header = FrameHeader {
            info: self.config.frame_info(),
            color_description: None,
            qmatrix: self.config.qmatrix.clone(),
            tile_width_mb: self.config.tile_width_mb,
            tile_height_mb: self.config.tile_height_mb,
            tile_sizes: None,
        };
        header.write(&mut payload)?;
        for tile in &encoded {
            payload.write(tile.bytes.len() as u32, 32)?;
            payload.write_bytes(&tile.bytes)?;
        }
        let payload = payload.finish();

        let recon = self.blit_recon(&encoded);
        if self.config.frame_hash {
            store_frame_hash(metadata, self.config.group_id, &recon)?;
        }

        let mut au = AuWriter::new();
        let au_info = AuInfo {
            frames: vec![AuFrameEntry {
                pbu_type: PbuType::PrimaryFrame,
                group_id: self.config.group_id,
                info: self.config.frame_info(),
            }],
        };
        au.push(
            PbuHeader {
                pbu_type: PbuType::AuInfo,
                group_id: self.config.group_id,
            },
            &au_info.to_payload()?,
        );
        au.push(
            PbuHeader {
                pbu_type: PbuType::PrimaryFrame,
                group_id: self.config.group_id,
            },
            &payload,
        );
        if let Some(meta_payload) = metadata.to_payload(self.config.group_id) {
            au.push(
                PbuHeader {
                    pbu_type: PbuType::Metadata,
                    group_id: self.config.group_id,
                },
                &meta_payload,
            );
        }
        let data = au.finish();

        if let (Some(rc), Some(target)) = (self.rate.as_mut(), target_bits) {
            rc.update(target, data.len() as u64 * 8);
        }

        let stats = EncodeStats {
            frame_index: self.frame_index,
            au_bytes: data.len(),
            picture_qp,
            tile_qps,
        };
        debug!(
            frame = stats.frame_index,
            bytes = stats.au_bytes,
            qp = stats.picture_qp,
            "frame encoded"
        );
        self.frame_index += 1;
        Ok(EncodedAu { data, recon, stats })
    }

    fn check_frame(&self, frame: &Frame) -> Result<()> {
        if frame.width() != self.config.width
            || frame.height() != self.config.height
            || frame.chroma_format() != self.config.chroma_format
            || frame.bit_depth() != self.config.bit_depth
        {
            return Err(ApvError::invalid_arg(format!(
                "frame {}x{} {} {}-bit does not match encoder configuration",
                frame.width(),
                frame.height(),
                frame.chroma_format(),
                frame.bit_depth()
            )));
        }
        Ok(())
    }

    fn blit_recon(&self, encoded: &[EncodedTile]) -> Frame {
        let mut recon = Frame::new(
            self.config.width,
            self.config.height,
            self.config.chroma_format,
            self.config.bit_depth,
        );
        for (tile, out) in self.tiles.iter().zip(encoded.iter()) {
            for (c, samples) in out.planes.iter().enumerate() {
                let (ox, oy, tw, th) = tile.component_rect(self.config.chroma_format, c);
                if let Some(plane) = recon.plane_mut(c) {
                    for y in 0..th {
                        let src = &samples[(y * tw) as usize..((y + 1) * tw) as usize];
                        let dst = &mut plane.row_mut(oy + y)[ox as usize..(ox + tw) as usize];
                        dst.copy_from_slice(src);
                    }
                }
            }
        }
        recon
    }
}

/// Complexity cost of one tile: Hadamard energy summed over every 8x8 block
/// of every component.
fn tile_cost(
    frame: &Frame,
    tile: &TileGeometry,
    chroma: ChromaFormat,
    bit_depth: u8,
    kernels: &dyn BlockKernels,
) -> u64 {
    let mid = 1i32 << (bit_depth - 1);
    let mut total = 0u64;
    for c in 0..chroma.num_components() {
        let Some(plane) = frame.plane(c) else { continue };
        let (ox, oy, tw, th) = tile.component_rect(chroma, c);
        let mut block = [0i16; 64];
        for by in (0..th).step_by(8) {
            for bx in (0..tw).step_by(8) {
                load_block(plane, ox + bx, oy + by, mid, &mut block);
                total += kernels.cost(&block);
            }
        }
    }
    total
}

#[inline]
fn load_block(plane: &apv_core::Plane, x: u32, y: u32, mid: i32, block: &mut [i16; 64]) {
    for row in 0..8u32 {
        let src = plane.row(y + row);
        for col in 0..8u32 {
            block[(row * 8 + col) as usize] = (src[(x + col) as usize] as i32 - mid) as i16;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_tile(
    frame: &Frame,
    tile: &TileGeometry,
    chroma: ChromaFormat,
    bit_depth: u8,
    qp: u8,
    qmatrices: &[[u8; 64]],
    kernels: &dyn BlockKernels,
    rdo: bool,
    budget: usize,
) -> Result<EncodedTile> {
    let ncomp = chroma.num_components();
    let mut w = BitWriter::with_capacity(budget.min(1 << 20));
    let header = TileHeader {
        tile_index: tile.index as u16,
        data_sizes: vec![0; ncomp],
        qps: vec![qp; ncomp],
    };
    let patch = header.write(&mut w)?;

    let mid = 1i32 << (bit_depth - 1);
    let max_sample = ((1u32 << bit_depth) - 1) as i32;
    let shift = quant_shift(qp, bit_depth);
    let mut data_sizes = vec![0u32; ncomp];
    let mut planes = Vec::with_capacity(ncomp);

    for c in 0..ncomp {
        let plane = frame
            .plane(c)
            .ok_or_else(|| ApvError::invalid_arg(format!("missing component {c}")))?;
        let (ox, oy, tw, th) = tile.component_rect(chroma, c);
        let qscale = build_quant_scale(qp, &qmatrices[c]);
        let dqscale = build_dequant_scale(qp, &qmatrices[c]);
        let lambda = rdo_lambda(qp, c > 0);

        let mut ctx = EntropyContext::new();
        let mut recon = vec![0u16; (tw * th) as usize];
        let start = w.byte_position()?;

        let mut block = [0i16; 64];
        let mut coef = [0i16; 64];
        let mut levels = [0i16; 64];
        let mut dq = [0i16; 64];
        let mut rec = [0i16; 64];
        for by in (0..th).step_by(8) {
            for bx in (0..tw).step_by(8) {
                load_block(plane, ox + bx, oy + by, mid, &mut block);
                kernels.forward(&block, &mut coef, bit_depth);

                if rdo {
                    levels = rdo_quantize(
                        &block, &coef, &qscale, &dqscale, shift, qp, bit_depth, lambda, &ctx,
                        kernels, c > 0,
                    )?;
                } else {
                    kernels.quantize(&coef, &mut levels, &qscale, shift, DEADZONE_FAST);
                }
                encode_block(&mut w, &zigzag(&levels), &mut ctx)?;

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
        w.align();
        let end = w.byte_position()?;
        data_sizes[c] = (end - start) as u32;
        planes.push(recon);
    }

    TileHeader::patch(&mut w, &patch, &data_sizes)?;
    let bytes = w.finish();
    if bytes.len() > budget {
        return Err(ApvError::OutOfBuffer {
            tile: tile.index,
            needed: bytes.len(),
            budget,
        });
    }
    Ok(EncodedTile { bytes, planes })
}

/// Deadzone candidate search: quantize under each candidate, probe the bit
/// cost against a copy of the entropy context, and keep the candidate with
/// the lowest `lambda * bits + SSE` against the original residual.
#[allow(clippy::too_many_arguments)]
fn rdo_quantize(
    block: &[i16; 64],
    coef: &[i16; 64],
    qscale: &[i32; 64],
    dqscale: &[i32; 64],
    shift: u32,
    qp: u8,
    bit_depth: u8,
    lambda: f64,
    ctx: &EntropyContext,
    kernels: &dyn BlockKernels,
    is_chroma: bool,
) -> Result<[i16; 64]> {
    let candidates: &[u32] = if is_chroma {
        &DEADZONE_CANDIDATES_CHROMA
    } else {
        &DEADZONE_CANDIDATES_LUMA
    };

    let mut best_levels = [0i16; 64];
    let mut best_cost = f64::INFINITY;
    let mut levels = [0i16; 64];
    let mut dq = [0i16; 64];
    let mut rec = [0i16; 64];
    for &deadzone in candidates {
        kernels.quantize(coef, &mut levels, qscale, shift, deadzone);

        let mut probe = BitCounter::new();
        let mut probe_ctx = ctx.clone();
        encode_block(&mut probe, &zigzag(&levels), &mut probe_ctx)?;

        kernels.dequantize(&levels, &mut dq, dqscale, qp, bit_depth);
        kernels.inverse(&dq, &mut rec, bit_depth);
        let sse: f64 = block
            .iter()
            .zip(rec.iter())
            .map(|(&a, &b)| {
                let d = (a as i32 - b as i32) as f64;
                d * d
            })
            .sum();

        let cost = lambda * probe.bit_len() as f64 + sse;
        if cost < best_cost {
            best_cost = cost;
            best_levels = levels;
        }
    }
    Ok(best_levels)
}
