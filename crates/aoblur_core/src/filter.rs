//! Depth-guided AO denoiser: separable bilateral means plus deviation blend.
//!
//! ## Pipeline
//!
//! 1. Row pass: depth/spatial weighted means of bright and dark
//! 2. Column pass over the row-pass output, weights from the original depth
//! 3. Deviation blend of the raw buffers, clamped between bright and dark

use ndarray::{s, Array2, Array3, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::autodiff::Dual;
use crate::blend::deviation_blend;
use crate::error::{AoError, AoResult};
use crate::float_trait::AoFloat;
use crate::frame::{Frame, FrameStack};
use crate::params::{FilterParams, ParameterVector};
use crate::separable::separable_pass;

// =============================================================================
// Constants
// =============================================================================

/// Default window radius (window length 2R+1 = 5)
const DEFAULT_RADIUS: usize = 2;

/// Largest accepted window radius
const MAX_RADIUS: usize = 20;

/// Floor on the weight normalization denominator
const DEFAULT_WEIGHT_EPSILON: f64 = 1e-8;

/// Floor applied to deviations before taking logarithms
const DEFAULT_POWER_EPSILON: f64 = 1e-8;

// =============================================================================
// Configuration
// =============================================================================

/// Fixed (not learned) settings of the filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Window radius R. Default: 2
    pub radius: usize,
    /// Floor on the sum of tap weights. Default: 1e-8
    pub weight_epsilon: f64,
    /// Floor on deviations inside the power. Default: 1e-8
    pub power_epsilon: f64,
    /// When false the filter returns the bright buffer unchanged. Default: true
    pub enabled: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            weight_epsilon: DEFAULT_WEIGHT_EPSILON,
            power_epsilon: DEFAULT_POWER_EPSILON,
            enabled: true,
        }
    }
}

impl FilterConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> AoResult<()> {
        if self.radius == 0 || self.radius > MAX_RADIUS {
            return Err(AoError::InvalidConfig(format!(
                "radius must be in 1..={}, got {}",
                MAX_RADIUS, self.radius
            )));
        }
        if self.weight_epsilon.is_nan() || self.weight_epsilon <= 0.0 {
            return Err(AoError::InvalidConfig("weight_epsilon must be > 0".to_string()));
        }
        if self.power_epsilon.is_nan() || self.power_epsilon <= 0.0 {
            return Err(AoError::InvalidConfig("power_epsilon must be > 0".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Forward pass
// =============================================================================

/// Run the full filter on raw buffers with parameters already in scalar type `S`.
///
/// Inputs share one shape and `depth` is strictly positive; [`Frame`] checks
/// both. The forward pass is pure: the same inputs give bit-identical output.
pub fn bilateral_forward<S: AoFloat>(
    bright: ArrayView2<S>,
    dark: ArrayView2<S>,
    depth: ArrayView2<S>,
    params: &FilterParams<S>,
    config: &FilterConfig,
) -> Array2<S> {
    if !config.enabled {
        return bright.to_owned();
    }

    let weight_epsilon = S::from_f64_c(config.weight_epsilon);
    let power_epsilon = S::from_f64_c(config.power_epsilon);

    let means = separable_pass(bright, dark, depth, config.radius, params, weight_epsilon);
    deviation_blend(
        bright,
        dark,
        means.bright.view(),
        means.dark.view(),
        params,
        power_epsilon,
    )
}

/// Convert a buffer into another scalar type, e.g. frame data into dual constants.
pub fn lift<F: AoFloat, S: AoFloat>(data: ArrayView2<F>) -> Array2<S> {
    data.mapv(S::cast::<F>)
}

/// Forward pass of `frame` in dual numbers seeded from `params`.
///
/// The output carries the derivative of every pixel with respect to every
/// parameter.
pub fn forward_dual<F: AoFloat>(
    frame: &Frame<F>,
    params: &ParameterVector,
    config: &FilterConfig,
) -> Array2<Dual> {
    let bright: Array2<Dual> = lift(frame.bright());
    let dark: Array2<Dual> = lift(frame.dark());
    let depth: Array2<Dual> = lift(frame.depth());
    bilateral_forward(
        bright.view(),
        dark.view(),
        depth.view(),
        &params.as_dual_params(),
        config,
    )
}

// =============================================================================
// Evaluation front end
// =============================================================================

/// A configured filter with a fixed, read-only parameter vector.
#[derive(Debug, Clone)]
pub struct BilateralFilter {
    config: FilterConfig,
    params: ParameterVector,
}

impl Default for BilateralFilter {
    fn default() -> Self {
        Self {
            config: FilterConfig::default(),
            params: ParameterVector::default(),
        }
    }
}

impl BilateralFilter {
    pub fn new(config: FilterConfig, params: ParameterVector) -> AoResult<Self> {
        config.validate()?;
        Ok(Self { config, params })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn params(&self) -> &ParameterVector {
        &self.params
    }

    /// Denoise one frame in the frame's own precision.
    pub fn apply<F: AoFloat>(&self, frame: &Frame<F>) -> Array2<F> {
        bilateral_forward(
            frame.bright(),
            frame.dark(),
            frame.depth(),
            &self.params.as_filter_params(),
            &self.config,
        )
    }

    /// Denoise every slice of a stack in parallel; output is (slices, rows, cols).
    pub fn apply_stack<F: AoFloat>(&self, stack: &FrameStack<F>) -> Array3<F> {
        let (n, rows, cols) = stack.dim();

        let results: Vec<Array2<F>> = (0..n)
            .into_par_iter()
            .filter_map(|i| stack.slice(i))
            .map(|frame| self.apply(&frame))
            .collect();

        let mut output = Array3::<F>::zeros((n, rows, cols));
        for (i, res) in results.into_iter().enumerate() {
            output.slice_mut(s![i, .., ..]).assign(&res);
        }
        output
    }
}
