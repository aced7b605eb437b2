//! Closed-loop rate control.
//!
//! A power-law model `lambda = (alpha/256) * (cost_pp / bits_pp)^beta` maps a
//! complexity/budget ratio to a Lagrangian lambda, and a fixed logarithmic
//! mapping converts lambda to a QP. `alpha` and `beta` persist across frames
//! and are nudged after every frame from the log-ratio of spent to targeted
//! bits; this is an exponential-smoothing control loop, not a closed-form
//! solve. Only the encoder runs it; nothing here is decoder-observable.

use tracing::debug;

use crate::error::{ApvError, Result};
use crate::types::{MAX_QP, MIN_QP};

const ALPHA_INIT: f64 = 819.2;
const BETA_INIT: f64 = 1.367;
const ALPHA_MIN: f64 = 25.6;
const ALPHA_MAX: f64 = 12800.0;
const BETA_MIN: f64 = 0.5;
const BETA_MAX: f64 = 3.0;
const LAMBDA_MIN: f64 = 0.1;
const LAMBDA_MAX: f64 = 10000.0;
/// Step sizes of the post-frame model update.
const ALPHA_RATE: f64 = 0.25;
const BETA_RATE: f64 = 0.05;
/// Largest log bit-ratio a single frame may feed into the model.
const MAX_LOG_RATIO: f64 = 1.0;
/// Fixed offset applied after the lambda-to-QP mapping.
const QP_OFFSET: i32 = 2;
/// Tile QP may stray this far from the picture QP.
pub const TILE_QP_RANGE: i32 = 2;
/// Chroma RDO lambda scale relative to luma.
const CHROMA_LAMBDA_SCALE: f64 = 0.5;

/// Bitrate target of an ABR encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateControlConfig {
    /// Target bitrate in bits per second.
    pub bitrate_bps: u64,
    pub fps_num: u32,
    pub fps_den: u32,
}

impl RateControlConfig {
    fn validate(&self) -> Result<()> {
        if self.bitrate_bps == 0 || self.fps_num == 0 || self.fps_den == 0 {
            return Err(ApvError::invalid_arg("bitrate and fps must be nonzero"));
        }
        Ok(())
    }
}

/// Per-frame QP assignment computed by [`RateController::plan_frame`].
#[derive(Debug, Clone)]
pub struct FramePlan {
    pub picture_qp: u8,
    pub picture_lambda: f64,
    /// Bit budget per tile, proportional to tile complexity.
    pub tile_target_bits: Vec<f64>,
    /// QP per tile, clamped to `picture_qp` ± [`TILE_QP_RANGE`].
    pub tile_qps: Vec<u8>,
    /// Total frame bit budget.
    pub target_bits: f64,
}

/// Alpha/beta model state persisting across frames.
#[derive(Debug, Clone)]
pub struct RateController {
    alpha: f64,
    beta: f64,
    target_bits_per_frame: f64,
}

impl RateController {
    pub fn new(config: RateControlConfig) -> Result<Self> {
        config.validate()?;
        let fps = config.fps_num as f64 / config.fps_den as f64;
        Ok(Self {
            alpha: ALPHA_INIT,
            beta: BETA_INIT,
            target_bits_per_frame: config.bitrate_bps as f64 / fps,
        })
    }

    /// Model lambda for a complexity-per-pixel over bits-per-pixel ratio.
    fn model_lambda(&self, cost_pp: f64, bits_pp: f64) -> f64 {
        let ratio = (cost_pp.max(1e-6) / bits_pp.max(1e-6)).max(1e-6);
        ((self.alpha / 256.0) * ratio.powf(self.beta)).clamp(LAMBDA_MIN, LAMBDA_MAX)
    }

    /// Assign the picture QP and per-tile QPs for one frame.
    ///
    /// `tile_costs` are the per-tile Hadamard complexity costs and
    /// `tile_pixels` the matching pixel counts (all components).
    pub fn plan_frame(&self, tile_costs: &[u64], tile_pixels: &[u64]) -> Result<FramePlan> {
        if tile_costs.is_empty() || tile_costs.len() != tile_pixels.len() {
            return Err(ApvError::invalid_arg("tile cost/pixel tables mismatch"));
        }
        let total_cost: f64 = tile_costs.iter().map(|&c| c as f64).sum();
        let total_pixels: f64 = tile_pixels.iter().map(|&p| p as f64).sum();
        let target_bits = self.target_bits_per_frame;

        let picture_lambda =
            self.model_lambda(total_cost / total_pixels, target_bits / total_pixels);
        let picture_qp = qp_from_lambda(picture_lambda);

        let mut tile_target_bits = Vec::with_capacity(tile_costs.len());
        let mut tile_qps = Vec::with_capacity(tile_costs.len());
        for (&cost, &pixels) in tile_costs.iter().zip(tile_pixels.iter()) {
            // Flat frames get a budget share by area instead of complexity.
            let share = if total_cost > 0.0 {
                cost as f64 / total_cost
            } else {
                pixels as f64 / total_pixels
            };
            let bits = target_bits * share;
            let lambda = self.model_lambda(cost as f64 / pixels as f64, bits / pixels as f64);
            let qp = (qp_from_lambda(lambda) as i32)
                .clamp(picture_qp as i32 - TILE_QP_RANGE, picture_qp as i32 + TILE_QP_RANGE)
                .clamp(MIN_QP as i32, MAX_QP as i32) as u8;
            tile_target_bits.push(bits);
            tile_qps.push(qp);
        }
        Ok(FramePlan {
            picture_qp,
            picture_lambda,
            tile_target_bits,
            tile_qps,
            target_bits,
        })
    }

    /// Fold one frame's observed bit usage back into the model.
    pub fn update(&mut self, target_bits: f64, actual_bits: u64) {
        if target_bits <= 0.0 || actual_bits == 0 {
            return;
        }
        // Positive when the frame overshot its budget.
        let log_ratio = (actual_bits as f64 / target_bits)
            .ln()
            .clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO);
        self.alpha = (self.alpha * (ALPHA_RATE * log_ratio).exp()).clamp(ALPHA_MIN, ALPHA_MAX);
        self.beta = (self.beta + BETA_RATE * log_ratio).clamp(BETA_MIN, BETA_MAX);
        debug!(
            target = target_bits,
            actual = actual_bits,
            alpha = self.alpha,
            beta = self.beta,
            "rate model update"
        );
    }

    /// Per-frame bit budget.
    pub fn target_bits_per_frame(&self) -> f64 {
        self.target_bits_per_frame
    }
}

/// Lagrangian lambda for a QP, used by the RDO quantizer search.
pub fn rdo_lambda(qp: u8, is_chroma: bool) -> f64 {
    let lambda = 0.57 * ((qp as f64 - 12.0) / 3.0).exp2();
    if is_chroma {
        lambda * CHROMA_LAMBDA_SCALE
    } else {
        lambda
    }
}

/// Invert the QP-to-lambda mapping and apply the fixed picture offset.
fn qp_from_lambda(lambda: f64) -> u8 {
    let qp = 12.0 + 3.0 * (lambda / 0.57).log2();
    (qp.round() as i32 + QP_OFFSET).clamp(MIN_QP as i32, MAX_QP as i32) as u8
}
