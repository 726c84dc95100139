//! Edge-aware tap weights: depth similarity times spatial distance.

use ndarray::{Array1, Array3, ArrayView2, ArrayView3, Axis, Zip};

use crate::float_trait::AoFloat;
use crate::params::FilterParams;
use crate::window::{neighbor_window, window_offsets, FilterAxis};

/// Upper bound on the relative depth difference of a tap.
const MAX_RELATIVE_DEPTH: f64 = 1.0;

/// Relative depth of every tap against its window centre:
/// `min(|depth_tap / depth_center - 1|, 1)`.
///
/// `depth_window` has shape (rows, cols, taps) and `depth` is the unpadded
/// centre buffer, which must be strictly positive. Zero-padded taps land at
/// the clamp value of 1.
pub fn relative_depth<S: AoFloat>(depth_window: ArrayView3<S>, depth: ArrayView2<S>) -> Array3<S> {
    let one = S::one();
    let cap = S::from_f64_c(MAX_RELATIVE_DEPTH);
    let mut relative = depth_window.to_owned();

    Zip::from(relative.lanes_mut(Axis(2)))
        .and(&depth)
        .for_each(|mut taps, &center| {
            taps.mapv_inplace(|d| (d / center - one).abs().min(cap));
        });

    relative
}

/// Gaussian of the relative depth: `exp(-rel^2 / (2 * depth_variance))`.
pub fn depth_weights<S: AoFloat>(relative: ArrayView3<S>, depth_variance: S) -> Array3<S> {
    let scale = -(S::one() / (S::from_f64_c(2.0) * depth_variance));
    relative.mapv(|rel| (rel * rel * scale).exp())
}

/// Gaussian of the tap offset: `exp(-offset^2 / (2 * spatial_variance))`.
/// Identical for every pixel.
pub fn spatial_weights<S: AoFloat>(radius: usize, spatial_variance: S) -> Array1<S> {
    let scale = -(S::one() / (S::from_f64_c(2.0) * spatial_variance));
    window_offsets(radius)
        .map(|offset| {
            let o = S::isize_as(offset);
            (o * o * scale).exp()
        })
        .collect()
}

/// Combined (unnormalized) weight of every tap of every pixel along `axis`.
///
/// Output shape is (rows, cols, 2R+1).
pub fn combined_weights<S: AoFloat>(
    depth: ArrayView2<S>,
    radius: usize,
    axis: FilterAxis,
    params: &FilterParams<S>,
) -> Array3<S> {
    let depth_window = neighbor_window(depth, radius, axis);
    let relative = relative_depth(depth_window.view(), depth);
    let mut weights = depth_weights(relative.view(), params.depth_variance);
    let spatial = spatial_weights(radius, params.spatial_variance);

    for mut taps in weights.lanes_mut(Axis(2)) {
        taps *= &spatial;
    }

    weights
}
