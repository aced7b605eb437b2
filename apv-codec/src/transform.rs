//! Fixed 8x8 separable integer transform and the block-kernel dispatch.
//!
//! The forward transform runs a row pass then a column pass, each an
//! even/odd butterfly (`E[k] = x[k] + x[7-k]`, `O[k] = x[k] - x[7-k]`)
//! against the fixed integer basis, with a rounding add and right shift per
//! pass. Shift amounts depend on bit depth so coefficient dynamic range stays
//! within the 15-bit signed budget. The inverse is the algebraic mirror with
//! its own bit-depth-dependent shift on the second pass.

use std::sync::Arc;

use crate::quant;
use crate::tables::TX_BASIS;
use crate::types::LOG2_BLOCK;

#[inline]
fn clip16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// One forward butterfly pass over an 8-sample line.
fn forward_pass(line: &[i32; 8], out: &mut [i32; 8], shift: u32) {
    let add = 1i32 << (shift - 1);

    let mut e = [0i32; 4];
    let mut o = [0i32; 4];
    for k in 0..4 {
        e[k] = line[k] + line[7 - k];
        o[k] = line[k] - line[7 - k];
    }
    let ee = [e[0] + e[3], e[1] + e[2]];
    let eo = [e[0] - e[3], e[1] - e[2]];

    out[0] = (TX_BASIS[0][0] * (ee[0] + ee[1]) + add) >> shift;
    out[4] = (TX_BASIS[4][0] * (ee[0] - ee[1]) + add) >> shift;
    out[2] = (TX_BASIS[2][0] * eo[0] + TX_BASIS[2][1] * eo[1] + add) >> shift;
    out[6] = (TX_BASIS[6][0] * eo[0] + TX_BASIS[6][1] * eo[1] + add) >> shift;
    for (row, slot) in [(1usize, 1usize), (3, 3), (5, 5), (7, 7)] {
        let b = &TX_BASIS[row];
        out[slot] = (b[0] * o[0] + b[1] * o[1] + b[2] * o[2] + b[3] * o[3] + add) >> shift;
    }
}

/// One inverse butterfly pass over an 8-coefficient line.
fn inverse_pass(line: &[i32; 8], out: &mut [i32; 8], shift: u32) {
    let add = 1i32 << (shift - 1);

    let mut o = [0i32; 4];
    for (k, ok) in o.iter_mut().enumerate() {
        *ok = TX_BASIS[1][k] * line[1]
            + TX_BASIS[3][k] * line[3]
            + TX_BASIS[5][k] * line[5]
            + TX_BASIS[7][k] * line[7];
    }
    let eo = [
        TX_BASIS[2][0] * line[2] + TX_BASIS[6][0] * line[6],
        TX_BASIS[2][1] * line[2] + TX_BASIS[6][1] * line[6],
    ];
    let ee = [
        TX_BASIS[0][0] * line[0] + TX_BASIS[4][0] * line[4],
        TX_BASIS[0][0] * line[0] + TX_BASIS[4][1] * line[4],
    ];
    let e = [ee[0] + eo[0], ee[1] + eo[1], ee[1] - eo[1], ee[0] - eo[0]];

    for k in 0..4 {
        out[k] = (e[k] + o[k] + add) >> shift;
        out[7 - k] = (e[k] - o[k] + add) >> shift;
    }
}

/// Forward 8x8 transform of a mid-level-removed residual block.
pub fn forward_transform(block: &[i16; 64], coef: &mut [i16; 64], bit_depth: u8) {
    let shift1 = LOG2_BLOCK + bit_depth as u32 - 9;
    let shift2 = LOG2_BLOCK + 6;

    let mut tmp = [0i32; 64];
    let mut line = [0i32; 8];
    let mut out = [0i32; 8];

    for r in 0..8 {
        for c in 0..8 {
            line[c] = block[r * 8 + c] as i32;
        }
        forward_pass(&line, &mut out, shift1);
        tmp[r * 8..r * 8 + 8].copy_from_slice(&out);
    }
    for c in 0..8 {
        for r in 0..8 {
            line[r] = tmp[r * 8 + c];
        }
        forward_pass(&line, &mut out, shift2);
        for (k, &v) in out.iter().enumerate() {
            coef[k * 8 + c] = clip16(v);
        }
    }
}

/// Inverse 8x8 transform back to the spatial residual.
pub fn inverse_transform(coef: &[i16; 64], block: &mut [i16; 64], bit_depth: u8) {
    let shift1 = 7u32;
    let shift2 = 20 - bit_depth as u32;

    let mut tmp = [0i32; 64];
    let mut line = [0i32; 8];
    let mut out = [0i32; 8];

    for c in 0..8 {
        for k in 0..8 {
            line[k] = coef[k * 8 + c] as i32;
        }
        inverse_pass(&line, &mut out, shift1);
        for (r, &v) in out.iter().enumerate() {
            tmp[r * 8 + c] = clip16(v) as i32;
        }
    }
    for r in 0..8 {
        line.copy_from_slice(&tmp[r * 8..r * 8 + 8]);
        inverse_pass(&line, &mut out, shift2);
        for (c, &v) in out.iter().enumerate() {
            block[r * 8 + c] = clip16(v);
        }
    }
}

/// DC-removed Hadamard energy of an 8x8 block, the rate controller's
/// complexity proxy.
pub fn hadamard_cost(block: &[i16; 64]) -> u64 {
    let mut m = [0i32; 64];
    for (dst, &src) in m.iter_mut().zip(block.iter()) {
        *dst = src as i32;
    }

    // Rows then columns of the 8-point fast Walsh-Hadamard butterfly.
    for r in 0..8 {
        hadamard8(&mut m, r * 8, 1);
    }
    for c in 0..8 {
        hadamard8(&mut m, c, 8);
    }

    let satd: u64 = m.iter().map(|&v| v.unsigned_abs() as u64).sum();
    let dc = m[0].unsigned_abs() as u64;
    (satd - dc) >> 2
}

fn hadamard8(m: &mut [i32; 64], base: usize, stride: usize) {
    let mut v = [0i32; 8];
    for (k, vk) in v.iter_mut().enumerate() {
        *vk = m[base + k * stride];
    }
    for step in [1usize, 2, 4] {
        let mut next = [0i32; 8];
        for group in (0..8).step_by(step * 2) {
            for k in 0..step {
                next[group + k] = v[group + k] + v[group + step + k];
                next[group + step + k] = v[group + k] - v[group + step + k];
            }
        }
        v = next;
    }
    for (k, &vk) in v.iter().enumerate() {
        m[base + k * stride] = vk;
    }
}

/// The abstract block-operation set behind which accelerated backends can sit.
///
/// A backend is selected once at encoder/decoder construction and never
/// re-selected mid-run; tiles share the selected backend immutably.
pub trait BlockKernels: Send + Sync {
    /// Forward transform of a residual block.
    fn forward(&self, block: &[i16; 64], coef: &mut [i16; 64], bit_depth: u8);
    /// Inverse transform of a coefficient block.
    fn inverse(&self, coef: &[i16; 64], block: &mut [i16; 64], bit_depth: u8);
    /// Scalar quantization against a per-coefficient scale table.
    fn quantize(
        &self,
        coef: &[i16; 64],
        levels: &mut [i16; 64],
        scale: &[i32; 64],
        shift: u32,
        deadzone: u32,
    );
    /// Inverse of [`BlockKernels::quantize`].
    fn dequantize(
        &self,
        levels: &[i16; 64],
        coef: &mut [i16; 64],
        scale: &[i32; 64],
        qp: u8,
        bit_depth: u8,
    );
    /// Complexity cost of a block for rate control.
    fn cost(&self, block: &[i16; 64]) -> u64;
}

/// Reference scalar implementation of [`BlockKernels`].
#[derive(Debug, Default)]
pub struct ReferenceKernels;

impl BlockKernels for ReferenceKernels {
    fn forward(&self, block: &[i16; 64], coef: &mut [i16; 64], bit_depth: u8) {
        forward_transform(block, coef, bit_depth);
    }

    fn inverse(&self, coef: &[i16; 64], block: &mut [i16; 64], bit_depth: u8) {
        inverse_transform(coef, block, bit_depth);
    }

    fn quantize(
        &self,
        coef: &[i16; 64],
        levels: &mut [i16; 64],
        scale: &[i32; 64],
        shift: u32,
        deadzone: u32,
    ) {
        quant::quantize(coef, levels, scale, shift, deadzone);
    }

    fn dequantize(
        &self,
        levels: &[i16; 64],
        coef: &mut [i16; 64],
        scale: &[i32; 64],
        qp: u8,
        bit_depth: u8,
    ) {
        quant::dequantize(levels, coef, scale, qp, bit_depth);
    }

    fn cost(&self, block: &[i16; 64]) -> u64 {
        hadamard_cost(block)
    }
}

/// Select the block-kernel backend for this host.
///
/// Only the reference scalar backend exists in this crate; accelerated
/// implementations plug in behind the same trait.
pub fn select_kernels() -> Arc<dyn BlockKernels> {
    Arc::new(ReferenceKernels)
}
