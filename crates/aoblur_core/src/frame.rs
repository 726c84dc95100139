//! In-memory AO buffers for one scene or one slice of a scene.

use ndarray::{stack, Array2, Array3, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{AoError, AoResult};
use crate::float_trait::AoFloat;

/// Four aligned single-channel buffers of one scene.
///
/// Construction validates the invariants every later stage relies on:
/// identical shapes, finite values, and strictly positive depth.
#[derive(Debug, Clone)]
pub struct Frame<F: AoFloat> {
    bright: Array2<F>,
    dark: Array2<F>,
    depth: Array2<F>,
    reference: Array2<F>,
}

impl<F: AoFloat> Frame<F> {
    pub fn new(
        bright: Array2<F>,
        dark: Array2<F>,
        depth: Array2<F>,
        reference: Array2<F>,
    ) -> AoResult<Self> {
        let dim = bright.dim();
        check_shape("dark", dim, dark.dim())?;
        check_shape("depth", dim, depth.dim())?;
        check_shape("reference", dim, reference.dim())?;

        check_finite("bright", bright.view())?;
        check_finite("dark", dark.view())?;
        check_finite("reference", reference.view())?;
        check_depth(depth.view())?;

        Ok(Self {
            bright,
            dark,
            depth,
            reference,
        })
    }

    /// Frame without ground truth, for pure evaluation. The reference is
    /// filled with the bright buffer.
    pub fn without_reference(
        bright: Array2<F>,
        dark: Array2<F>,
        depth: Array2<F>,
    ) -> AoResult<Self> {
        let reference = bright.clone();
        Self::new(bright, dark, depth, reference)
    }

    /// (rows, cols)
    #[inline]
    pub fn dim(&self) -> (usize, usize) {
        self.bright.dim()
    }

    pub fn bright(&self) -> ArrayView2<'_, F> {
        self.bright.view()
    }

    pub fn dark(&self) -> ArrayView2<'_, F> {
        self.dark.view()
    }

    pub fn depth(&self) -> ArrayView2<'_, F> {
        self.depth.view()
    }

    pub fn reference(&self) -> ArrayView2<'_, F> {
        self.reference.view()
    }

    /// Per-pixel confidence weight for fitting.
    pub fn confidence(&self, config: &TargetConfig) -> Array2<F> {
        let floor = F::from_f64_c(config.floor);
        let mut conf = &self.bright - &self.dark;
        conf.mapv_inplace(|d| d.max(floor));
        if config.mode == ConfidenceMode::Squared {
            conf.mapv_inplace(|c| c * c);
        }
        conf
    }

    /// Stacked (reference, confidence) target for the loss functions.
    pub fn loss_target(&self, config: &TargetConfig) -> AoResult<LossTarget<F>> {
        let confidence = self.confidence(config);
        LossTarget::new(self.reference.view(), confidence.view())
    }
}

/// How the per-pixel confidence is derived from `bright - dark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfidenceMode {
    /// `max(bright - dark, floor)`
    #[default]
    Linear,
    /// `max(bright - dark, floor)^2`
    Squared,
}

/// Configuration of the loss target construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub mode: ConfidenceMode,
    /// Lower bound applied to `bright - dark` before squaring. Default: 0.0
    pub floor: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            mode: ConfidenceMode::Linear,
            floor: 0.0,
        }
    }
}

impl TargetConfig {
    /// Validate the configuration parameters.
    pub fn validate(&self) -> AoResult<()> {
        if !self.floor.is_finite() || self.floor < 0.0 {
            return Err(AoError::InvalidConfig(format!(
                "target floor must be finite and >= 0, got {}",
                self.floor
            )));
        }
        Ok(())
    }
}

/// Reference and confidence stacked along axis 0: shape (2, rows, cols).
#[derive(Debug, Clone)]
pub struct LossTarget<F: AoFloat> {
    stacked: Array3<F>,
}

/// Channel of the reference values in a [`LossTarget`].
pub const TARGET_REFERENCE: usize = 0;

/// Channel of the confidence weights in a [`LossTarget`].
pub const TARGET_CONFIDENCE: usize = 1;

impl<F: AoFloat> LossTarget<F> {
    pub fn new<'a>(
        reference: ArrayView2<'a, F>,
        confidence: ArrayView2<'a, F>,
    ) -> AoResult<Self> {
        check_shape("confidence", reference.dim(), confidence.dim())?;
        let stacked = stack(Axis(0), &[reference, confidence]).map_err(|_| {
            AoError::ShapeMismatch {
                what: "loss target",
                expected: reference.shape().to_vec(),
                found: confidence.shape().to_vec(),
            }
        })?;
        Ok(Self { stacked })
    }

    /// Wrap an already stacked (2, rows, cols) array.
    pub fn from_stacked(stacked: Array3<F>) -> AoResult<Self> {
        if stacked.dim().0 != 2 {
            let (_, rows, cols) = stacked.dim();
            return Err(AoError::ShapeMismatch {
                what: "loss target",
                expected: vec![2, rows, cols],
                found: stacked.shape().to_vec(),
            });
        }
        Ok(Self { stacked })
    }

    pub fn stacked(&self) -> ArrayView3<'_, F> {
        self.stacked.view()
    }

    /// Split into (reference, confidence).
    pub fn split(&self) -> (ArrayView2<'_, F>, ArrayView2<'_, F>) {
        (
            self.stacked.index_axis(Axis(0), TARGET_REFERENCE),
            self.stacked.index_axis(Axis(0), TARGET_CONFIDENCE),
        )
    }

    pub fn dim(&self) -> (usize, usize) {
        let (_, rows, cols) = self.stacked.dim();
        (rows, cols)
    }
}

/// A scene rendered as slices: four aligned (slices, rows, cols) arrays.
#[derive(Debug, Clone)]
pub struct FrameStack<F: AoFloat> {
    bright: Array3<F>,
    dark: Array3<F>,
    depth: Array3<F>,
    reference: Array3<F>,
}

impl<F: AoFloat> FrameStack<F> {
    pub fn new(
        bright: Array3<F>,
        dark: Array3<F>,
        depth: Array3<F>,
        reference: Array3<F>,
    ) -> AoResult<Self> {
        let dim = bright.dim();
        for (what, other) in [
            ("dark", dark.dim()),
            ("depth", depth.dim()),
            ("reference", reference.dim()),
        ] {
            if other != dim {
                return Err(AoError::ShapeMismatch {
                    what,
                    expected: vec![dim.0, dim.1, dim.2],
                    found: vec![other.0, other.1, other.2],
                });
            }
        }
        for i in 0..dim.0 {
            check_finite("bright", bright.index_axis(Axis(0), i))?;
            check_finite("dark", dark.index_axis(Axis(0), i))?;
            check_finite("reference", reference.index_axis(Axis(0), i))?;
            check_depth(depth.index_axis(Axis(0), i))?;
        }
        Ok(Self {
            bright,
            dark,
            depth,
            reference,
        })
    }

    pub fn num_slices(&self) -> usize {
        self.bright.dim().0
    }

    /// (slices, rows, cols)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.bright.dim()
    }

    /// Copy out one slice as a frame, or `None` past the end.
    pub fn slice(&self, index: usize) -> Option<Frame<F>> {
        if index >= self.num_slices() {
            return None;
        }
        // Already validated as part of the stack.
        Some(Frame {
            bright: self.bright.index_axis(Axis(0), index).to_owned(),
            dark: self.dark.index_axis(Axis(0), index).to_owned(),
            depth: self.depth.index_axis(Axis(0), index).to_owned(),
            reference: self.reference.index_axis(Axis(0), index).to_owned(),
        })
    }

    pub fn frames(&self) -> impl Iterator<Item = Frame<F>> + '_ {
        (0..self.num_slices()).filter_map(move |i| self.slice(i))
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

fn check_shape(what: &'static str, expected: (usize, usize), found: (usize, usize)) -> AoResult<()> {
    if expected != found {
        return Err(AoError::ShapeMismatch {
            what,
            expected: vec![expected.0, expected.1],
            found: vec![found.0, found.1],
        });
    }
    Ok(())
}

fn check_finite<F: AoFloat>(what: &'static str, data: ArrayView2<F>) -> AoResult<()> {
    match data.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((row, col), _)) => Err(AoError::NonFiniteValue { what, row, col }),
        None => Ok(()),
    }
}

fn check_depth<F: AoFloat>(depth: ArrayView2<F>) -> AoResult<()> {
    check_finite("depth", depth)?;
    match depth.indexed_iter().find(|&(_, &v)| v <= F::zero()) {
        Some(((row, col), &value)) => Err(AoError::NonPositiveDepth {
            row,
            col,
            value: value.to_f64_c(),
        }),
        None => Ok(()),
    }
}
