//! Normalized weighted reduction of a window to one value per pixel.

use ndarray::{Array2, Array3, ArrayView3, Axis, Zip};

use crate::float_trait::AoFloat;

/// Normalize the taps of every pixel to sum to one.
///
/// The denominator is floored at `epsilon`, so a pixel whose weights all
/// underflow reduces to (nearly) zero instead of dividing by zero.
pub fn normalize_weights<S: AoFloat>(weights: ArrayView3<S>, epsilon: S) -> Array3<S> {
    let mut normalized = weights.to_owned();
    for mut taps in normalized.lanes_mut(Axis(2)) {
        let total: S = taps.iter().copied().sum();
        let inv = S::one() / total.max(epsilon);
        taps.mapv_inplace(|w| w * inv);
    }
    normalized
}

/// Weighted sum of `values` along the tap axis.
///
/// Both inputs have shape (rows, cols, taps); `weights` is expected to be
/// normalized already.
pub fn weighted_sum<S: AoFloat>(values: ArrayView3<S>, weights: ArrayView3<S>) -> Array2<S> {
    let (rows, cols, _) = values.dim();
    let mut out = Array2::zeros((rows, cols));

    Zip::from(&mut out)
        .and(values.lanes(Axis(2)))
        .and(weights.lanes(Axis(2)))
        .for_each(|o, v, w| {
            *o = v.iter().zip(w.iter()).map(|(&a, &b)| a * b).sum();
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_normalized_weights_sum_to_one() {
        let w = Array3::from_shape_fn((3, 4, 5), |(r, c, k)| 0.1 + (r + 2 * c + k) as f64);
        let n = normalize_weights(w.view(), 1e-8);
        for taps in n.lanes(Axis(2)) {
            assert!(approx_eq(taps.sum(), 1.0, 1e-12));
        }
    }

    #[test]
    fn test_vanishing_weights_floor() {
        let w = Array3::from_elem((1, 1, 3), 0.0f64);
        let n = normalize_weights(w.view(), 1e-8);
        assert!(n.iter().all(|v| v.is_finite()));
        assert!(n.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_weighted_sum() {
        let values = Array3::from_shape_vec((1, 2, 3), vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let weights =
            Array3::from_shape_vec((1, 2, 3), vec![0.5f64, 0.5, 0.0, 0.0, 0.0, 1.0]).unwrap();
        let out = weighted_sum(values.view(), weights.view());
        assert!(approx_eq(out[[0, 0]], 1.5, 1e-15));
        assert!(approx_eq(out[[0, 1]], 6.0, 1e-15));
    }

    #[test]
    fn test_uniform_weights_are_a_mean() {
        let values = Array3::from_shape_fn((2, 2, 4), |(r, c, k)| (r * 8 + c * 4 + k) as f32);
        let weights = normalize_weights(Array3::from_elem((2, 2, 4), 3.0f32).view(), 1e-8);
        let out = weighted_sum(values.view(), weights.view());
        for ((r, c), &v) in out.indexed_iter() {
            let base = (r * 8 + c * 4) as f32;
            assert!((v - (base + 1.5)).abs() < 1e-5);
        }
    }
}
