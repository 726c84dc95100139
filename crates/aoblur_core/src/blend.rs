//! Deviation-driven blend of the raw bright and dark estimates.
//!
//! Each source's local deviation from its filtered mean measures how noisy it
//! is around a pixel. The blend hands each source the *other* source's
//! normalized deviation as its weight: the smoother source dominates.

use ndarray::{Array2, ArrayView2, Zip};

use crate::float_trait::AoFloat;
use crate::params::FilterParams;

/// `max(x, eps)^exponent`, computed as `exp(exponent * ln(max(x, eps)))` so
/// it stays defined at zero and for fractional exponents.
#[inline]
pub fn deviation_power<S: AoFloat>(x: S, exponent: S, epsilon: S) -> S {
    (exponent * x.max(epsilon).ln()).exp()
}

/// Normalized deviation weights of one pixel, `(w_bright, w_dark)`.
#[inline]
pub fn blend_weights<S: AoFloat>(
    bright: S,
    dark: S,
    bright_mean: S,
    dark_mean: S,
    params: &FilterParams<S>,
    power_epsilon: S,
) -> (S, S) {
    let dev_bright = deviation_power((bright - bright_mean).abs(), params.dev_exponent, power_epsilon)
        * params.contrast_enhance;
    let dev_dark = deviation_power((dark - dark_mean).abs(), params.dev_exponent, power_epsilon)
        .max(params.dark_epsilon);

    let inv_total = S::one() / (dev_bright + dev_dark);
    (dev_bright * inv_total, dev_dark * inv_total)
}

/// Blend one pixel and clamp it between the two raw inputs.
#[inline]
pub fn blend_pixel<S: AoFloat>(
    bright: S,
    dark: S,
    bright_mean: S,
    dark_mean: S,
    params: &FilterParams<S>,
    power_epsilon: S,
) -> S {
    let (w_bright, w_dark) =
        blend_weights(bright, dark, bright_mean, dark_mean, params, power_epsilon);
    // Cross weighting: low own deviation => high weight on own value.
    let blended = w_dark * bright + w_bright * dark;
    blended.clamp_to(bright.min(dark), bright.max(dark))
}

/// Blend whole buffers. All four inputs share one shape.
pub fn deviation_blend<S: AoFloat>(
    bright: ArrayView2<S>,
    dark: ArrayView2<S>,
    bright_mean: ArrayView2<S>,
    dark_mean: ArrayView2<S>,
    params: &FilterParams<S>,
    power_epsilon: S,
) -> Array2<S> {
    let mut out = Array2::zeros(bright.raw_dim());
    Zip::from(&mut out)
        .and(&bright)
        .and(&dark)
        .and(&bright_mean)
        .and(&dark_mean)
        .for_each(|o, &b, &d, &bm, &dm| {
            *o = blend_pixel(b, d, bm, dm, params, power_epsilon);
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;
    use crate::params::{ParamId, ParameterVector};
    use ndarray::Array2;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    fn params() -> FilterParams<f64> {
        ParameterVector::default().as_filter_params()
    }

    #[test]
    fn test_deviation_power() {
        assert!(approx_eq(deviation_power(0.25f64, 0.5, 1e-8), 0.5, 1e-12));
        assert!(approx_eq(deviation_power(0.3f64, 1.0, 1e-8), 0.3, 1e-12));
        // Zero input is floored instead of producing ln(0)
        let at_zero = deviation_power(0.0f64, 2.0, 1e-4);
        assert!(approx_eq(at_zero, 1e-8, 1e-15));
    }

    #[test]
    fn test_weights_sum_to_one() {
        let p = params();
        let (wb, wd) = blend_weights(0.7, 0.3, 0.5, 0.35, &p, 1e-8);
        assert!(approx_eq(wb + wd, 1.0, 1e-12));
        // dev_bright = 0.2, dev_dark = 0.05
        assert!(approx_eq(wb, 0.8, 1e-12));
        assert!(approx_eq(wd, 0.2, 1e-12));
    }

    #[test]
    fn test_cross_weighting() {
        // Bright is far from its mean (noisy), dark sits on its mean (smooth):
        // the result must lean towards dark.
        let p = params();
        let out = blend_pixel(0.9, 0.4, 0.5, 0.4, &p, 1e-8);
        // dev_bright = 0.4, dev_dark floored to 0.01
        let wb = 0.4 / 0.41;
        let wd = 0.01 / 0.41;
        assert!(approx_eq(out, wd * 0.9 + wb * 0.4, 1e-12));
        assert!(out < 0.45);
    }

    #[test]
    fn test_contrast_enhance_shifts_towards_dark_value() {
        let mut pv = ParameterVector::default();
        let base = blend_pixel(0.8, 0.2, 0.6, 0.3, &pv.as_filter_params::<f64>(), 1e-8);
        pv.set(ParamId::ContrastEnhance, 4.0).unwrap();
        let boosted = blend_pixel(0.8, 0.2, 0.6, 0.3, &pv.as_filter_params::<f64>(), 1e-8);
        // A larger bright deviation weight lands on the dark value
        assert!(boosted < base);
    }

    #[test]
    fn test_equal_inputs_pass_through() {
        let p = params();
        for v in [0.0, 0.13, 0.5, 1.0] {
            assert_eq!(blend_pixel(v, v, 0.9, 0.1, &p, 1e-8), v);
        }
    }

    #[test]
    fn test_output_within_inputs() {
        let p = params();
        let bright = Array2::from_shape_fn((4, 4), |(r, c)| 0.1 * ((r * 4 + c) % 9) as f64);
        let dark = Array2::from_shape_fn((4, 4), |(r, c)| 0.05 * ((r + 3 * c) % 13) as f64);
        let bm = bright.mapv(|v| v * 0.5 + 0.2);
        let dm = dark.mapv(|v| 1.0 - v);
        let out = deviation_blend(bright.view(), dark.view(), bm.view(), dm.view(), &p, 1e-8);
        for ((r, c), &v) in out.indexed_iter() {
            let (b, d) = (bright[[r, c]], dark[[r, c]]);
            assert!(v >= b.min(d) && v <= b.max(d), "({}, {}) = {} not in [{}, {}]", r, c, v, b, d);
        }
    }

    #[test]
    fn test_contrast_gradient_sign() {
        // d out / d contrast_enhance is negative when bright > dark
        let dual = ParameterVector::default().as_dual_params();
        let out = blend_pixel(
            Dual::constant(0.8),
            Dual::constant(0.5),
            Dual::constant(0.5),
            Dual::constant(0.45),
            &dual,
            Dual::constant(1e-8),
        );
        assert!(out.grad[ParamId::ContrastEnhance.index()] < 0.0);
        assert!(out.grad[ParamId::DarkEpsilon.index()] == 0.0);
    }
}
