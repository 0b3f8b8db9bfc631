//! Per-precision arithmetic for the fused kernels
//!
//! Every score precision provides the two operations the kernels combine
//! values with, plus the conversion of the configured `factor` into that
//! precision. Reduced precisions round (f16) or wrap (i8) after every
//! operation, matching what the device kernels do.

use half::f16;

use crate::dtype::TensorDType;

/// Element type a fused kernel can compute in
pub trait Element: TensorDType + PartialEq + std::fmt::Debug {
    /// Convert the configured scale factor into this precision, once per launch
    fn from_factor(factor: f32) -> Self;

    fn add(self, rhs: Self) -> Self;

    fn mul(self, rhs: Self) -> Self;
}

impl Element for f32 {
    fn from_factor(factor: f32) -> Self {
        factor
    }

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }
}

impl Element for f16 {
    fn from_factor(factor: f32) -> Self {
        f16::from_f32(factor)
    }

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }
}

impl Element for i8 {
    fn from_factor(factor: f32) -> Self {
        truncate_factor_i8(factor)
    }

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.wrapping_mul(rhs)
    }
}

/// Truncate a factor to 8 bits: round toward zero, then keep the low byte.
///
/// Out-of-range factors wrap (300.0 -> 44, -200.0 -> 56); they are neither
/// rejected nor saturated. Wrapping after each i8 operation gives the same
/// low byte as computing in `int` and truncating once on store.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn truncate_factor_i8(factor: f32) -> i8 {
    let truncated = factor as i64;
    let narrowed = truncated as i8;
    if i64::from(narrowed) != truncated {
        log::debug!("int8 factor {factor} truncated to {narrowed}");
    }
    narrowed
}

/// Variant 2 combination: `c2c + factor * (c2p + p2c)`
#[inline]
#[must_use]
pub fn bias_combine<T: Element>(c2c: T, c2p: T, p2c: T, factor: T) -> T {
    c2c.add(factor.mul(c2p.add(p2c)))
}

/// Variant 1 combination of the two gathered scores
#[inline]
#[must_use]
pub fn gather_combine<T: Element>(first: T, second: T) -> T {
    first.add(second)
}
