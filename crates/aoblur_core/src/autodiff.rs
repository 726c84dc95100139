//! Forward-mode automatic differentiation over the filter parameters.
//!
//! A [`Dual`] carries a primal `f64` value together with its partial
//! derivatives with respect to each entry of the
//! [`ParameterVector`](crate::params::ParameterVector). Seeding the
//! parameters as variables and the frame data as constants, then running the
//! ordinary forward pass and loss, yields the loss and its full gradient in a
//! single sweep. With only a handful of parameters this is cheaper and far
//! simpler than recording a reverse-mode tape.

use num_traits::{FromPrimitive, Num, One, Zero};
use std::cmp::Ordering;
use std::iter::Sum;
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

use crate::float_trait::AoFloat;
use crate::params::NUM_PARAMS;

/// Dual number: value plus gradient with respect to every filter parameter.
#[derive(Debug, Clone, Copy)]
pub struct Dual {
    pub value: f64,
    pub grad: [f64; NUM_PARAMS],
}

impl Dual {
    /// A value that does not depend on any parameter.
    #[inline]
    pub const fn constant(value: f64) -> Self {
        Self {
            value,
            grad: [0.0; NUM_PARAMS],
        }
    }

    /// The independent variable for parameter slot `index`.
    #[inline]
    pub fn variable(value: f64, index: usize) -> Self {
        let mut grad = [0.0; NUM_PARAMS];
        grad[index] = 1.0;
        Self { value, grad }
    }

    /// Apply a scalar function given its value and derivative at `self.value`.
    #[inline]
    fn chain(self, value: f64, derivative: f64) -> Self {
        let mut grad = self.grad;
        for g in grad.iter_mut() {
            *g *= derivative;
        }
        Self { value, grad }
    }

    #[inline]
    fn combine(value: f64, a: [f64; NUM_PARAMS], wa: f64, b: [f64; NUM_PARAMS], wb: f64) -> Self {
        let mut grad = [0.0; NUM_PARAMS];
        for i in 0..NUM_PARAMS {
            grad[i] = wa * a[i] + wb * b[i];
        }
        Self { value, grad }
    }
}

impl PartialEq for Dual {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl PartialOrd for Dual {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

impl Add for Dual {
    type Output = Dual;

    #[inline]
    fn add(self, rhs: Dual) -> Dual {
        Dual::combine(self.value + rhs.value, self.grad, 1.0, rhs.grad, 1.0)
    }
}

impl Sub for Dual {
    type Output = Dual;

    #[inline]
    fn sub(self, rhs: Dual) -> Dual {
        Dual::combine(self.value - rhs.value, self.grad, 1.0, rhs.grad, -1.0)
    }
}

impl Mul for Dual {
    type Output = Dual;

    #[inline]
    fn mul(self, rhs: Dual) -> Dual {
        Dual::combine(
            self.value * rhs.value,
            self.grad,
            rhs.value,
            rhs.grad,
            self.value,
        )
    }
}

impl Div for Dual {
    type Output = Dual;

    #[inline]
    fn div(self, rhs: Dual) -> Dual {
        let inv = 1.0 / rhs.value;
        let value = self.value * inv;
        // d(a/b) = da/b - a*db/b^2
        Dual::combine(value, self.grad, inv, rhs.grad, -value * inv)
    }
}

impl Rem for Dual {
    type Output = Dual;

    #[inline]
    fn rem(self, rhs: Dual) -> Dual {
        let q = (self.value / rhs.value).trunc();
        Dual::combine(self.value % rhs.value, self.grad, 1.0, rhs.grad, -q)
    }
}

impl Neg for Dual {
    type Output = Dual;

    #[inline]
    fn neg(self) -> Dual {
        self.chain(-self.value, -1.0)
    }
}

impl AddAssign for Dual {
    #[inline]
    fn add_assign(&mut self, rhs: Dual) {
        *self = *self + rhs;
    }
}

impl SubAssign for Dual {
    #[inline]
    fn sub_assign(&mut self, rhs: Dual) {
        *self = *self - rhs;
    }
}

impl MulAssign for Dual {
    #[inline]
    fn mul_assign(&mut self, rhs: Dual) {
        *self = *self * rhs;
    }
}

impl DivAssign for Dual {
    #[inline]
    fn div_assign(&mut self, rhs: Dual) {
        *self = *self / rhs;
    }
}

impl RemAssign for Dual {
    #[inline]
    fn rem_assign(&mut self, rhs: Dual) {
        *self = *self % rhs;
    }
}

impl Sum for Dual {
    fn sum<I: Iterator<Item = Dual>>(iter: I) -> Dual {
        iter.fold(Dual::zero(), |acc, x| acc + x)
    }
}

// =============================================================================
// num_traits plumbing
// =============================================================================

impl Zero for Dual {
    #[inline]
    fn zero() -> Self {
        Dual::constant(0.0)
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.value == 0.0
    }
}

impl One for Dual {
    #[inline]
    fn one() -> Self {
        Dual::constant(1.0)
    }
}

impl Num for Dual {
    type FromStrRadixErr = <f64 as Num>::FromStrRadixErr;

    fn from_str_radix(s: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        <f64 as Num>::from_str_radix(s, radix).map(Dual::constant)
    }
}

impl FromPrimitive for Dual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Dual::constant(n as f64))
    }

    fn from_u64(n: u64) -> Option<Self> {
        Some(Dual::constant(n as f64))
    }

    fn from_f64(n: f64) -> Option<Self> {
        Some(Dual::constant(n))
    }
}

impl AoFloat for Dual {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        Dual::constant(val)
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        Dual::constant(val as f64)
    }

    #[inline]
    fn isize_as(val: isize) -> Self {
        Dual::constant(val as f64)
    }

    #[inline]
    fn to_f64_c(self) -> f64 {
        self.value
    }

    #[inline]
    fn exp(self) -> Self {
        let e = self.value.exp();
        self.chain(e, e)
    }

    #[inline]
    fn ln(self) -> Self {
        self.chain(self.value.ln(), 1.0 / self.value)
    }

    #[inline]
    fn abs(self) -> Self {
        if self.value < 0.0 {
            -self
        } else {
            self
        }
    }

    #[inline]
    fn sqrt(self) -> Self {
        let s = self.value.sqrt();
        self.chain(s, 0.5 / s)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        if other.value > self.value {
            other
        } else {
            self
        }
    }

    #[inline]
    fn min(self, other: Self) -> Self {
        if other.value < self.value {
            other
        } else {
            self
        }
    }

    #[inline]
    fn is_finite(self) -> bool {
        self.value.is_finite() && self.grad.iter().all(|g| g.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    /// Central finite difference of `f` around `x` in slot 0.
    fn numeric_derivative(f: impl Fn(Dual) -> Dual, x: f64) -> f64 {
        let h = 1e-6;
        let hi = f(Dual::constant(x + h)).value;
        let lo = f(Dual::constant(x - h)).value;
        (hi - lo) / (2.0 * h)
    }

    fn check(f: impl Fn(Dual) -> Dual + Copy, x: f64) {
        let exact = f(Dual::variable(x, 0)).grad[0];
        let numeric = numeric_derivative(f, x);
        assert!(
            approx_eq(exact, numeric, 1e-5),
            "at x={x}: dual={exact}, finite difference={numeric}"
        );
    }

    #[test]
    fn test_constant_has_zero_gradient() {
        let c = Dual::constant(3.0);
        assert_eq!(c.grad, [0.0; NUM_PARAMS]);
        let v = Dual::variable(3.0, 2);
        assert_eq!(v.grad[2], 1.0);
        assert_eq!(v.grad.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_product_and_quotient_rules() {
        check(|x| x * x * Dual::constant(3.0), 1.7);
        check(|x| Dual::constant(2.0) / x, 0.8);
        check(|x| (x + Dual::constant(1.0)) / (x * x), 1.3);
        check(|x| x - Dual::constant(5.0) * x, -0.4);
    }

    #[test]
    fn test_elementary_functions() {
        check(|x| AoFloat::exp(-x * x), 0.6);
        check(|x| AoFloat::ln(x), 2.5);
        check(|x| AoFloat::sqrt(x), 0.3);
        check(|x| AoFloat::exp(Dual::constant(1.5) * AoFloat::ln(x)), 0.7);
    }

    #[test]
    fn test_abs_follows_branch() {
        let neg = AoFloat::abs(Dual::variable(-2.0, 0));
        assert_eq!(neg.value, 2.0);
        assert_eq!(neg.grad[0], -1.0);

        let pos = AoFloat::abs(Dual::variable(2.0, 0));
        assert_eq!(pos.grad[0], 1.0);
    }

    #[test]
    fn test_min_max_select_gradient() {
        let a = Dual::variable(1.0, 0);
        let b = Dual::variable(2.0, 1);
        let hi = AoFloat::max(a, b);
        assert_eq!(hi.value, 2.0);
        assert_eq!(hi.grad[1], 1.0);
        assert_eq!(hi.grad[0], 0.0);

        let lo = AoFloat::min(a, b);
        assert_eq!(lo.grad[0], 1.0);
        assert_eq!(lo.grad[1], 0.0);
    }

    #[test]
    fn test_multivariate_gradient() {
        // f(a, b) = a^2 * b  => df/da = 2ab, df/db = a^2
        let a = Dual::variable(3.0, 0);
        let b = Dual::variable(0.5, 3);
        let f = a * a * b;
        assert!(approx_eq(f.value, 4.5, 1e-12));
        assert!(approx_eq(f.grad[0], 3.0, 1e-12));
        assert!(approx_eq(f.grad[3], 9.0, 1e-12));
        assert_eq!(f.grad[1], 0.0);
    }

    #[test]
    fn test_sum_and_assign_ops() {
        let xs = [Dual::variable(1.0, 0), Dual::variable(2.0, 0), Dual::constant(4.0)];
        let total: Dual = xs.iter().copied().sum();
        assert_eq!(total.value, 7.0);
        assert_eq!(total.grad[0], 2.0);

        let mut acc = Dual::variable(2.0, 1);
        acc *= Dual::constant(3.0);
        acc -= Dual::constant(1.0);
        acc /= Dual::constant(5.0);
        assert!(approx_eq(acc.value, 1.0, 1e-12));
        assert!(approx_eq(acc.grad[1], 0.6, 1e-12));
    }

    #[test]
    fn test_ordering_ignores_gradient() {
        let a = Dual::variable(1.0, 0);
        let b = Dual::constant(1.0);
        assert_eq!(a, b);
        assert!(Dual::constant(0.5) < a);
    }
}
