//! Scalar abstraction for the filter pipeline.
//!
//! Every stage of the filter is written once, generic over [`AoFloat`], and
//! runs either on plain `f32`/`f64` (evaluation) or on [`Dual`](crate::autodiff::Dual)
//! numbers (fitting), where the same arithmetic also carries the gradient
//! with respect to the filter parameters.

use num_traits::{FromPrimitive, Num, NumAssign};
use std::fmt::Debug;
use std::iter::Sum;
use std::ops::Neg;

/// Trait alias for scalar types the filter and losses can run on.
///
/// This trait combines all the bounds needed for the pipeline:
/// - Basic arithmetic (Num, NumAssign, Neg)
/// - Ordering for clamps (PartialOrd)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Debug printing
///
/// The elementary functions are trait methods rather than `num_traits::Float`
/// so that a dual number only has to provide what the filter actually uses.
pub trait AoFloat:
    Copy
    + PartialOrd
    + Num
    + NumAssign
    + Neg<Output = Self>
    + FromPrimitive
    + Sum
    + Debug
    + Send
    + Sync
    + 'static
{
    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;

    /// Create a value from an isize constant.
    fn isize_as(val: isize) -> Self;

    /// The primal value as f64, dropping any derivative information.
    fn to_f64_c(self) -> f64;

    fn exp(self) -> Self;

    fn ln(self) -> Self;

    fn abs(self) -> Self;

    fn sqrt(self) -> Self;

    /// Larger of the two values. On ties the receiver wins.
    fn max(self, other: Self) -> Self;

    /// Smaller of the two values. On ties the receiver wins.
    fn min(self, other: Self) -> Self;

    fn is_finite(self) -> bool;

    /// Re-express a value of another scalar type in this one.
    #[inline]
    fn cast<G: AoFloat>(val: G) -> Self {
        Self::from_f64_c(val.to_f64_c())
    }

    /// Clamp into `[lo, hi]`. The caller guarantees `lo <= hi`.
    #[inline]
    fn clamp_to(self, lo: Self, hi: Self) -> Self {
        self.max(lo).min(hi)
    }
}

macro_rules! impl_ao_float {
    ($t:ty) => {
        impl AoFloat for $t {
            #[inline]
            fn from_f64_c(val: f64) -> Self {
                val as $t
            }

            #[inline]
            fn usize_as(val: usize) -> Self {
                val as $t
            }

            #[inline]
            fn isize_as(val: isize) -> Self {
                val as $t
            }

            #[inline]
            fn to_f64_c(self) -> f64 {
                self as f64
            }

            #[inline]
            fn exp(self) -> Self {
                <$t>::exp(self)
            }

            #[inline]
            fn ln(self) -> Self {
                <$t>::ln(self)
            }

            #[inline]
            fn abs(self) -> Self {
                <$t>::abs(self)
            }

            #[inline]
            fn sqrt(self) -> Self {
                <$t>::sqrt(self)
            }

            #[inline]
            fn max(self, other: Self) -> Self {
                if other > self {
                    other
                } else {
                    self
                }
            }

            #[inline]
            fn min(self, other: Self) -> Self {
                if other < self {
                    other
                } else {
                    self
                }
            }

            #[inline]
            fn is_finite(self) -> bool {
                <$t>::is_finite(self)
            }
        }
    };
}

impl_ao_float!(f32);
impl_ao_float!(f64);
