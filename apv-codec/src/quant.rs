//! Scalar quantization and dequantization of transform coefficients.
//!
//! `level = sign(c) * ((|c| * scale[i] + offset) >> shift)` with
//! `shift = 14 + (15 - bit_depth - 3) + qp/6`; the deadzone `offset` is a
//! fraction of `1 << shift` expressed in 1/256ths. Dequantization is the
//! inverse affine map, saturated to signed 16 bits at every stage so encoder
//! and decoder reconstruct bit-identically.

use crate::tables::{DEQUANT_STEP, QUANT_STEP};
use crate::types::{LOG2_BLOCK, MAX_TX_DYNAMIC_RANGE, QUANT_SHIFT_BASE};

/// Deadzone used on the non-RDO encode path, in 1/256ths of a step.
pub const DEADZONE_FAST: u32 = 85;

/// Deadzone candidates probed by the distortion-optimized luma path.
pub const DEADZONE_CANDIDATES_LUMA: [u32; 5] = [64, 80, 96, 112, 128];

/// Deadzone candidates probed by the distortion-optimized chroma path.
pub const DEADZONE_CANDIDATES_CHROMA: [u32; 3] = [85, 101, 117];

/// Right-shift applied by the quantizer for a given QP and bit depth.
pub fn quant_shift(qp: u8, bit_depth: u8) -> u32 {
    QUANT_SHIFT_BASE + (MAX_TX_DYNAMIC_RANGE - bit_depth as u32 - LOG2_BLOCK) + qp as u32 / 6
}

/// Per-coefficient forward scale: `(quant_step << 4) / qmatrix[i]`.
///
/// The flat matrix of 16 reduces this to the bare quantizer step.
pub fn build_quant_scale(qp: u8, qmatrix: &[u8; 64]) -> [i32; 64] {
    let step = QUANT_STEP[qp as usize % 6];
    let mut scale = [0i32; 64];
    for (s, &m) in scale.iter_mut().zip(qmatrix.iter()) {
        *s = (step << 4) / m as i32;
    }
    scale
}

/// Per-coefficient inverse scale: `dequant_step * qmatrix[i]`.
pub fn build_dequant_scale(qp: u8, qmatrix: &[u8; 64]) -> [i32; 64] {
    let step = DEQUANT_STEP[qp as usize % 6];
    let mut scale = [0i32; 64];
    for (s, &m) in scale.iter_mut().zip(qmatrix.iter()) {
        *s = step * m as i32;
    }
    scale
}

/// Quantize a coefficient block.
pub fn quantize(
    coef: &[i16; 64],
    levels: &mut [i16; 64],
    scale: &[i32; 64],
    shift: u32,
    deadzone: u32,
) {
    let offset = ((deadzone as i64) << shift) >> 8;
    for i in 0..64 {
        let c = coef[i] as i64;
        let lev = ((c.unsigned_abs() as i64 * scale[i] as i64 + offset) >> shift)
            .clamp(0, i16::MAX as i64);
        levels[i] = if c < 0 { -(lev as i16) } else { lev as i16 };
    }
}

/// Dequantize a level block back to coefficients.
pub fn dequantize(levels: &[i16; 64], coef: &mut [i16; 64], scale: &[i32; 64], qp: u8, bit_depth: u8) {
    let shift = bit_depth as u32 - 2;
    let add = 1i64 << (shift - 1);
    let qp_scale = qp as u32 / 6;
    for i in 0..64 {
        let v = ((levels[i] as i64 * scale[i] as i64) << qp_scale).saturating_add(add) >> shift;
        coef[i] = v.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::flat_qmatrix;

    #[test]
    fn shift_tracks_qp_and_depth() {
        assert_eq!(quant_shift(0, 10), 16);
        assert_eq!(quant_shift(6, 10), 17);
        assert_eq!(quant_shift(0, 8), 18);
        assert_eq!(quant_shift(63, 12), 24);
    }

    #[test]
    fn flat_matrix_scale_is_bare_step() {
        let scale = build_quant_scale(5, &flat_qmatrix());
        assert!(scale.iter().all(|&s| s == QUANT_STEP[5]));
        let dq = build_dequant_scale(5, &flat_qmatrix());
        assert!(dq.iter().all(|&s| s == DEQUANT_STEP[5] * 16));
    }

    #[test]
    fn quantize_dequantize_roundtrip_is_close() {
        let qmat = flat_qmatrix();
        for qp in [0u8, 10, 20, 35, 51] {
            let bd = 10u8;
            let shift = quant_shift(qp, bd);
            let qs = build_quant_scale(qp, &qmat);
            let dqs = build_dequant_scale(qp, &qmat);

            let mut coef = [0i16; 64];
            for (i, c) in coef.iter_mut().enumerate() {
                *c = ((i as i32 * 211) % 4001 - 2000) as i16;
            }
            let mut levels = [0i16; 64];
            quantize(&coef, &mut levels, &qs, shift, DEADZONE_FAST);
            let mut recon = [0i16; 64];
            dequantize(&levels, &mut recon, &dqs, qp, bd);

            // Error bounded by one quantizer step.
            let step = 1i32 << (shift as i32 - 16);
            let tolerance = (DEQUANT_STEP[qp as usize % 6] * 16) >> (bd as i32 - 2 - qp as i32 / 6).max(0);
            let bound = tolerance.max(step).max(1) * 2;
            for (c, r) in coef.iter().zip(recon.iter()) {
                assert!(
                    ((c - r) as i32).abs() <= bound,
                    "qp={qp} coef={c} recon={r} bound={bound}"
                );
            }
        }
    }

    #[test]
    fn quantize_idempotent_on_reconstruction() {
        // quantize(dequantize(levels)) must reproduce the levels.
        let qmat = flat_qmatrix();
        for qp in [0u8, 17, 34, 51] {
            let bd = 10u8;
            let shift = quant_shift(qp, bd);
            let qs = build_quant_scale(qp, &qmat);
            let dqs = build_dequant_scale(qp, &qmat);

            let mut levels = [0i16; 64];
            for (i, l) in levels.iter_mut().enumerate() {
                *l = (i as i16 % 19) - 9;
            }
            let mut recon = [0i16; 64];
            dequantize(&levels, &mut recon, &dqs, qp, bd);
            let mut requant = [0i16; 64];
            quantize(&recon, &mut requant, &qs, shift, 128);
            assert_eq!(levels, requant, "qp={qp}");
        }
    }

    #[test]
    fn deadzone_widens_zero_bin() {
        let qmat = flat_qmatrix();
        let qp = 30u8;
        let shift = quant_shift(qp, 10);
        let qs = build_quant_scale(qp, &qmat);

        let coef = [37i16; 64];
        let mut narrow = [0i16; 64];
        let mut wide = [0i16; 64];
        quantize(&coef, &mut narrow, &qs, shift, 0);
        quantize(&coef, &mut wide, &qs, shift, 128);
        // A half-step deadzone can only keep levels the same or raise them.
        for (n, w) in narrow.iter().zip(wide.iter()) {
            assert!(w >= n);
        }
    }
}
