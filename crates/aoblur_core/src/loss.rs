//! Confidence-weighted losses comparing a filter output with the reference.
//!
//! Both losses receive the target as a stacked (reference, confidence)
//! [`LossTarget`] and split it before use. Prediction and reference are
//! multiplied by the confidence before they are compared, so pixels with zero
//! confidence cannot contribute.

use ndarray::{s, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{AoError, AoResult};
use crate::float_trait::AoFloat;
use crate::frame::LossTarget;

/// Default SSIM patch edge length
const DEFAULT_SSIM_PATCH: usize = 9;

/// Default stabilizing constant of the SSIM ratio
const DEFAULT_SSIM_STABILITY: f64 = 1e-4;

/// Penalty factor on positive (over-bright) residuals of the asymmetric loss
const ASYMMETRIC_FACTOR: f64 = 2.0;

/// A loss over a prediction and a stacked target.
pub trait AoLoss {
    fn evaluate<S: AoFloat, F: AoFloat>(
        &self,
        prediction: ArrayView2<S>,
        target: &LossTarget<F>,
    ) -> AoResult<S>;
}

fn check_target_shape<S: AoFloat, F: AoFloat>(
    prediction: &ArrayView2<S>,
    target: &LossTarget<F>,
) -> AoResult<()> {
    if prediction.dim() != target.dim() {
        let (rows, cols) = target.dim();
        return Err(AoError::ShapeMismatch {
            what: "prediction",
            expected: vec![rows, cols],
            found: prediction.shape().to_vec(),
        });
    }
    Ok(())
}

// =============================================================================
// Confidence-weighted squared error
// =============================================================================

/// Mean of squared confidence-weighted residuals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightedSquaredError {
    /// Double positive residuals (prediction brighter than reference). Default: true
    pub asymmetric: bool,
    /// Residual magnitudes below this are ignored. Default: 0.0
    pub residual_floor: f64,
}

impl Default for WeightedSquaredError {
    fn default() -> Self {
        Self {
            asymmetric: true,
            residual_floor: 0.0,
        }
    }
}

impl AoLoss for WeightedSquaredError {
    fn evaluate<S: AoFloat, F: AoFloat>(
        &self,
        prediction: ArrayView2<S>,
        target: &LossTarget<F>,
    ) -> AoResult<S> {
        check_target_shape(&prediction, target)?;
        let (reference, confidence) = target.split();

        let factor = S::from_f64_c(ASYMMETRIC_FACTOR);
        let floor = S::from_f64_c(self.residual_floor);
        let use_floor = self.residual_floor > 0.0;
        let mut total = S::zero();

        Zip::from(&prediction)
            .and(&reference)
            .and(&confidence)
            .for_each(|&p, &r, &w| {
                let w = S::cast(w);
                let mut residual = w * p - w * S::cast(r);
                if self.asymmetric && residual > S::zero() {
                    residual = residual * factor;
                }
                let mut magnitude = residual.abs();
                if use_floor {
                    magnitude = (magnitude - floor).max(S::zero());
                }
                total += magnitude * magnitude;
            });

        Ok(total / S::usize_as(prediction.len().max(1)))
    }
}

// =============================================================================
// Structural similarity
// =============================================================================

/// `1 - mean(ssim)` over square patches of the confidence-weighted images,
/// with `ssim = (cov + C) / (std_p * std_r + C)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralSimilarity {
    /// Patch edge length; shrunk to the image size for small images. Default: 9
    pub patch_size: usize,
    /// Distance between neighbouring patch origins. Default: 1
    pub stride: usize,
    /// Stabilizing constant C. Default: 1e-4
    pub stability: f64,
}

impl Default for StructuralSimilarity {
    fn default() -> Self {
        Self {
            patch_size: DEFAULT_SSIM_PATCH,
            stride: 1,
            stability: DEFAULT_SSIM_STABILITY,
        }
    }
}

/// Smallest variance passed to `sqrt`; keeps the derivative `1 / (2 sqrt)` bounded.
const SSIM_VARIANCE_FLOOR: f64 = 1e-12;

/// `sqrt(max(var, floor))` for var > 0, exactly zero otherwise.
#[inline]
fn std_from_var<S: AoFloat>(var: S) -> S {
    if var > S::zero() {
        var.max(S::from_f64_c(SSIM_VARIANCE_FLOOR)).sqrt()
    } else {
        S::zero()
    }
}

impl StructuralSimilarity {
    /// SSIM ratio of one pair of equally sized patches.
    fn patch_ssim<S: AoFloat>(&self, x: ArrayView2<S>, y: ArrayView2<S>) -> S {
        let n = S::usize_as(x.len());
        let c = S::from_f64_c(self.stability);
        let mean_x = x.iter().copied().sum::<S>() / n;
        let mean_y = y.iter().copied().sum::<S>() / n;

        let mut var_x = S::zero();
        let mut var_y = S::zero();
        let mut cov = S::zero();
        Zip::from(&x).and(&y).for_each(|&a, &b| {
            let dx = a - mean_x;
            let dy = b - mean_y;
            var_x += dx * dx;
            var_y += dy * dy;
            cov += dx * dy;
        });
        var_x /= n;
        var_y /= n;
        cov /= n;

        (cov + c) / (std_from_var(var_x) * std_from_var(var_y) + c)
    }
}

impl AoLoss for StructuralSimilarity {
    fn evaluate<S: AoFloat, F: AoFloat>(
        &self,
        prediction: ArrayView2<S>,
        target: &LossTarget<F>,
    ) -> AoResult<S> {
        check_target_shape(&prediction, target)?;
        let (reference, confidence) = target.split();
        let (rows, cols) = prediction.dim();
        if rows == 0 || cols == 0 {
            return Ok(S::zero());
        }

        let mut weighted_pred = prediction.to_owned();
        let mut weighted_ref = weighted_pred.clone();
        Zip::from(&mut weighted_pred)
            .and(&mut weighted_ref)
            .and(&reference)
            .and(&confidence)
            .for_each(|p, r, &ref_val, &w| {
                let w = S::cast(w);
                *p = *p * w;
                *r = S::cast(ref_val) * w;
            });

        let patch = self.patch_size.min(rows).min(cols);
        let stride = self.stride.max(1);
        let mut total = S::zero();
        let mut count = 0usize;

        for r0 in (0..=rows - patch).step_by(stride) {
            for c0 in (0..=cols - patch).step_by(stride) {
                total += self.patch_ssim(
                    weighted_pred.slice(s![r0..r0 + patch, c0..c0 + patch]),
                    weighted_ref.slice(s![r0..r0 + patch, c0..c0 + patch]),
                );
                count += 1;
            }
        }

        Ok(S::one() - total / S::usize_as(count))
    }
}

// =============================================================================
// Selection
// =============================================================================

/// The loss used by a fit, chosen per experiment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossFunction {
    WeightedSquaredError(WeightedSquaredError),
    StructuralSimilarity(StructuralSimilarity),
}

impl Default for LossFunction {
    fn default() -> Self {
        LossFunction::WeightedSquaredError(WeightedSquaredError::default())
    }
}

impl LossFunction {
    /// Validate the settings of the selected loss.
    pub fn validate(&self) -> AoResult<()> {
        match self {
            LossFunction::WeightedSquaredError(l) => {
                if !l.residual_floor.is_finite() || l.residual_floor < 0.0 {
                    return Err(AoError::InvalidConfig(
                        "residual_floor must be finite and >= 0".to_string(),
                    ));
                }
            }
            LossFunction::StructuralSimilarity(l) => {
                if l.patch_size == 0 {
                    return Err(AoError::InvalidConfig("patch_size must be > 0".to_string()));
                }
                if l.stride == 0 {
                    return Err(AoError::InvalidConfig("stride must be > 0".to_string()));
                }
                if l.stability.is_nan() || l.stability <= 0.0 {
                    return Err(AoError::InvalidConfig("stability must be > 0".to_string()));
                }
            }
        }
        Ok(())
    }
}

impl AoLoss for LossFunction {
    fn evaluate<S: AoFloat, F: AoFloat>(
        &self,
        prediction: ArrayView2<S>,
        target: &LossTarget<F>,
    ) -> AoResult<S> {
        match self {
            LossFunction::WeightedSquaredError(l) => l.evaluate(prediction, target),
            LossFunction::StructuralSimilarity(l) => l.evaluate(prediction, target),
        }
    }
}
