//! Numeric abstraction shared by the plain and derivative-carrying solves.
//!
//! The whole merge/solve/combine pipeline is written once against
//! [`Scalar`]. It is instantiated with `f64` for plain values and with
//! [`Dual64`] to carry one tangent direction through every operation.
//!
//! There is no `Div` bound. Quotients are written as `a * b.recip()` so that
//! the value part of a [`Dual64`] is rounded exactly like the `f64` result.

use std::fmt::Debug;
use std::ops::{Add, Mul, Neg, Sub};

use num_dual::{Dual64, DualNum};

/// A real number, possibly augmented with derivative information.
pub trait Scalar:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
{
    /// A constant (zero derivative).
    fn from_f64(value: f64) -> Self;

    /// The non-derivative component.
    fn value(self) -> f64;

    /// Multiplicative inverse.
    fn recip(self) -> Self;

    /// Exponential function.
    fn exp(self) -> Self;

    /// Square root.
    fn sqrt(self) -> Self;
}

impl Scalar for f64 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn value(self) -> f64 {
        self
    }

    #[inline]
    fn recip(self) -> Self {
        1.0 / self
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
}

impl Scalar for Dual64 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        Dual64::new(value, 0.0)
    }

    #[inline]
    fn value(self) -> f64 {
        self.re
    }

    #[inline]
    fn recip(self) -> Self {
        DualNum::recip(&self)
    }

    #[inline]
    fn exp(self) -> Self {
        DualNum::exp(&self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        DualNum::sqrt(&self)
    }
}

/// Promote a slice of plain values to constant duals.
pub(crate) fn constants(values: &[f64]) -> Vec<Dual64> {
    values.iter().map(|&v| <Dual64 as Scalar>::from_f64(v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dual_value_matches_plain_value() {
        let x = 0.37_f64;
        let y = 2.9_f64;
        let plain = (x * y.recip()).exp() + (x * y).sqrt() - x;

        let xd = Dual64::new(x, 1.0);
        let yd = <Dual64 as Scalar>::from_f64(y);
        let dual = (xd * yd.recip()).exp() + (xd * yd).sqrt() - xd;

        assert_eq!(dual.value(), plain);
    }

    #[test]
    fn dual_derivatives_follow_chain_rule() {
        let x = Dual64::new(1.5, 1.0);
        assert_relative_eq!(x.exp().eps, 1.5_f64.exp());
        assert_relative_eq!(x.sqrt().eps, 0.5 / 1.5_f64.sqrt());
        assert_relative_eq!(x.recip().eps, -1.0 / (1.5 * 1.5));
    }
}
