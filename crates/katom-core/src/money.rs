//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Floating Point vs Integer                           │
//! │                                                                         │
//! │  f64:   0.1 + 0.2 = 0.30000000000000004      ✗ drifts                  │
//! │  i64:   10 + 20   = 30 (satang)              ✓ exact                   │
//! │                                                                         │
//! │  Percent discounts are computed in i128 over basis points and rounded  │
//! │  exactly once, half to even, back to the minor unit.                   │
//! │                                                                         │
//! │  Operators saturate. Totals built from client input use the checked_*  │
//! │  methods so an overflow is reported instead of clamped.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use katom_core::money::{Money, Percent};
//!
//! let subtotal = Money::from_cents(100_000); // 1,000.00
//! let discount = subtotal.percent_of(Percent::from_bps(1000)); // 10%
//! assert_eq!(discount.cents(), 10_000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// Signed so that variances and reversals can be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// ```rust
    /// use katom_core::money::Money;
    ///
    /// assert_eq!(Money::from_major_minor(10, 50).cents(), 1050);
    /// assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    /// ```
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the value, or zero if it is negative.
    ///
    /// Discounts and final totals are never allowed below zero.
    #[inline]
    pub const fn floor_zero(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            Money(self.0)
        }
    }

    /// Multiplies a unit price by a quantity, saturating at the i64 bounds.
    ///
    /// ```rust
    /// use katom_core::money::Money;
    ///
    /// let line = Money::from_cents(2_500).multiply_quantity(3);
    /// assert_eq!(line.cents(), 7_500);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }

    /// `None` when the product does not fit in i64.
    ///
    /// ```rust
    /// use katom_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(2_500).checked_multiply_quantity(3), Some(Money::from_cents(7_500)));
    /// assert_eq!(Money::from_cents(i64::MAX / 2 + 1).checked_multiply_quantity(2), None);
    /// ```
    #[inline]
    pub const fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    #[inline]
    pub const fn checked_sub(&self, other: Money) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Sums an iterator, `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(iter: I) -> Option<Self> {
        iter.into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }

    /// Computes `self × percent`, rounded half to even.
    ///
    /// ## Rounding
    /// ```text
    /// 12.345 → 12.34   (half, previous digit even → stay)
    /// 12.355 → 12.36   (half, previous digit odd  → up)
    /// 12.346 → 12.35   (above half → up)
    /// ```
    pub fn percent_of(&self, percent: Percent) -> Money {
        let numerator = self.0 as i128 * percent.bps() as i128;
        let rounded = div_round_half_even(numerator, 10_000);
        Money::from_cents(rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

/// Integer division rounding half to even. `denominator` must be positive.
fn div_round_half_even(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator.div_euclid(denominator);
    let remainder = numerator.rem_euclid(denominator);
    let twice = remainder * 2;

    if twice > denominator || (twice == denominator && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    }
}

// =============================================================================
// Percent
// =============================================================================

/// A percentage in basis points (1 bp = 0.01%).
///
/// `1000` = 10%, `10000` = 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Percent(u32);

impl Percent {
    /// Full discount.
    pub const HUNDRED: Percent = Percent(10_000);

    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Percent(bps)
    }

    /// Whole-number percentage (`10` = 10%).
    #[inline]
    pub const fn from_whole(pct: u32) -> Self {
        Percent(pct * 100)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Two-decimal rendering for logs and messages.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_sub(other.0);
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
