//! Money type backed by decimal arithmetic.
//!
//! The storefront operates in a single currency (USD). Amounts are stored
//! in dollars with two decimal places; construction normalizes the scale so
//! that equality and cent conversion behave predictably.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Sub};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Money`] value.
#[derive(thiserror::Error, Debug, Clone)]
pub enum MoneyError {
    /// The input string is not a valid decimal number.
    #[error("invalid money amount: {0}")]
    Invalid(String),
}

/// A USD amount with cent precision.
///
/// ```
/// use thistle_core::Money;
///
/// let price = Money::from_cents(10_400);
/// assert_eq!(price.to_string(), "$104.00");
/// assert_eq!(price.cents(), 10_400);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero dollars.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a money value from a decimal dollar amount.
    ///
    /// The amount is rounded to cents (midpoint away from zero).
    #[must_use]
    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Create a money value from an integer number of cents.
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// Parse a money value from a decimal string (e.g. `"58.00"`).
    ///
    /// # Errors
    ///
    /// Returns `MoneyError::Invalid` if the string is not a decimal number.
    pub fn parse(s: &str) -> Result<Self, MoneyError> {
        let amount: Decimal = s
            .trim()
            .parse()
            .map_err(|_| MoneyError::Invalid(s.to_owned()))?;
        Ok(Self::new(amount))
    }

    /// The dollar amount as a decimal.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// The amount in whole cents.
    ///
    /// Saturates at `i64::MAX` on overflow (unreachable for realistic
    /// order totals).
    #[must_use]
    pub fn cents(&self) -> i64 {
        (self.0 * Decimal::ONE_HUNDRED).to_i64().unwrap_or(i64::MAX)
    }

    /// Whether the amount is strictly greater than zero.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Whether the amount is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Multiply a unit price by a quantity.
    #[must_use]
    pub fn times(&self, quantity: u32) -> Self {
        Self(self.0 * Decimal::from(quantity))
    }

    /// Format without the currency symbol (e.g. `"58.00"`), as payment
    /// providers expect in `value` fields.
    #[must_use]
    pub fn to_unit_string(&self) -> String {
        format!("{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self::new(amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let m = Money::from_cents(5_800);
        assert_eq!(m.to_string(), "$58.00");
        assert_eq!(m.cents(), 5_800);
    }

    #[test]
    fn test_new_rounds_to_cents() {
        let m = Money::new("80.0799999".parse().unwrap());
        assert_eq!(m.cents(), 8_008);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Money::parse("104").unwrap(), Money::from_cents(10_400));
        assert_eq!(Money::parse(" 58.00 ").unwrap(), Money::from_cents(5_800));
        assert!(Money::parse("not-money").is_err());
    }

    #[test]
    fn test_times_and_sum() {
        let unit = Money::from_cents(10_400);
        assert_eq!(unit.times(2), Money::from_cents(20_800));

        let total: Money = [Money::from_cents(100), Money::from_cents(250)]
            .into_iter()
            .sum();
        assert_eq!(total, Money::from_cents(350));
    }

    #[test]
    fn test_unit_string() {
        assert_eq!(Money::from_cents(5_800).to_unit_string(), "58.00");
        assert_eq!(Money::from_cents(5).to_unit_string(), "0.05");
    }

    #[test]
    fn test_ordering() {
        assert!(Money::from_cents(1_000_001) > Money::from_cents(1_000_000));
        assert!(Money::ZERO.is_zero());
        assert!(!Money::ZERO.is_positive());
        assert!(Money::from_cents(1).is_positive());
    }
}
