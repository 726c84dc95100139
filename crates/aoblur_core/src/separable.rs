//! Two 1D bilateral passes standing in for one 2D pass.
//!
//! The row pass filters the raw bright/dark buffers; the column pass filters
//! the row-pass output. Both passes weight their taps against the original
//! depth buffer along their own axis. This is cheaper than a joint 2D window
//! (O(R) instead of O(R^2) per pixel) but is not equivalent to it: the weight
//! of a diagonal neighbour is a product of two 1D weights taken through an
//! intermediate pixel.

use ndarray::{Array2, ArrayView2};

use crate::float_trait::AoFloat;
use crate::kernel::combined_weights;
use crate::params::FilterParams;
use crate::reduce::{normalize_weights, weighted_sum};
use crate::window::{neighbor_window, FilterAxis};

/// Bright and dark buffers after filtering.
#[derive(Debug, Clone)]
pub struct FilteredPair<S: AoFloat> {
    pub bright: Array2<S>,
    pub dark: Array2<S>,
}

/// Filter bright and dark along one axis with one shared set of weights.
///
/// The weights depend only on `depth` and the parameters, so they are
/// computed and normalized once and applied to both channels.
pub fn axis_pass<S: AoFloat>(
    bright: ArrayView2<S>,
    dark: ArrayView2<S>,
    depth: ArrayView2<S>,
    radius: usize,
    axis: FilterAxis,
    params: &FilterParams<S>,
    weight_epsilon: S,
) -> FilteredPair<S> {
    let weights = combined_weights(depth, radius, axis, params);
    let weights = normalize_weights(weights.view(), weight_epsilon);

    let bright_window = neighbor_window(bright, radius, axis);
    let dark_window = neighbor_window(dark, radius, axis);

    FilteredPair {
        bright: weighted_sum(bright_window.view(), weights.view()),
        dark: weighted_sum(dark_window.view(), weights.view()),
    }
}

/// Row pass followed by column pass. Returns the filtered means of bright and dark.
pub fn separable_pass<S: AoFloat>(
    bright: ArrayView2<S>,
    dark: ArrayView2<S>,
    depth: ArrayView2<S>,
    radius: usize,
    params: &FilterParams<S>,
    weight_epsilon: S,
) -> FilteredPair<S> {
    let [first, second] = FilterAxis::PASS_ORDER;
    let intermediate = axis_pass(bright, dark, depth, radius, first, params, weight_epsilon);
    axis_pass(
        intermediate.bright.view(),
        intermediate.dark.view(),
        depth,
        radius,
        second,
        params,
        weight_epsilon,
    )
}
