//! Fixed coding tables: scan order, transform basis, quantizer steps.

/// Zig-zag scan order for an 8x8 block (raster index per scan position).
pub const ZIGZAG_SCAN: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Fixed integer basis of the 8-point transform, rows = frequency.
pub const TX_BASIS: [[i32; 8]; 8] = [
    [64, 64, 64, 64, 64, 64, 64, 64],
    [89, 75, 50, 18, -18, -50, -75, -89],
    [83, 36, -36, -83, -83, -36, 36, 83],
    [75, -18, -89, -50, 50, 89, 18, -75],
    [64, -64, -64, 64, 64, -64, -64, 64],
    [50, -89, 18, 75, -75, -18, 89, -50],
    [36, -83, 83, -36, -36, 83, -83, 36],
    [18, -50, 75, -89, 89, -75, 50, -18],
];

/// Quantizer step multipliers indexed by `qp % 6`.
pub const QUANT_STEP: [i32; 6] = [26214, 23302, 20560, 18396, 16384, 14564];

/// Dequantizer step multipliers indexed by `qp % 6`.
///
/// `QUANT_STEP[r] * DEQUANT_STEP[r]` is ~2^20 for every `r`, which is what
/// makes quantize/dequantize a near-inverse pair.
pub const DEQUANT_STEP: [i32; 6] = [40, 45, 51, 57, 64, 72];

/// Value of every entry of the implicit flat quantization matrix.
pub const FLAT_QMATRIX_VALUE: u8 = 16;

/// The implicit flat quantization matrix.
pub const fn flat_qmatrix() -> [u8; 64] {
    [FLAT_QMATRIX_VALUE; 64]
}

/// Reorder a raster-order block into zig-zag scan order.
pub fn zigzag(block: &[i16; 64]) -> [i16; 64] {
    let mut out = [0i16; 64];
    for (scan, &raster) in ZIGZAG_SCAN.iter().enumerate() {
        out[scan] = block[raster];
    }
    out
}

/// Reorder a zig-zag-ordered block back to raster order.
pub fn dezigzag(zz: &[i16; 64]) -> [i16; 64] {
    let mut out = [0i16; 64];
    for (scan, &raster) in ZIGZAG_SCAN.iter().enumerate() {
        out[raster] = zz[scan];
    }
    out
}
