//! Member pricing.
//!
//! Members get either a curated override price for specific
//! `(product, size)` keys or a flat 23% discount, rounded to cents. A
//! member price can never exceed the base price, whatever the override
//! table says.

use std::collections::HashMap;

use rust_decimal::Decimal;

use thistle_core::{Money, MoneyError};

/// Multiplier applied to the base price when no override exists.
const MEMBER_MULTIPLIER: Decimal = Decimal::from_parts(77, 0, 0, false, 2);

/// Errors parsing the override table.
#[derive(Debug, thiserror::Error)]
pub enum PriceBookError {
    #[error("override table is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("override for {key} is not a price: {source}")]
    Price { key: String, source: MoneyError },
}

/// Member price override table keyed by `(product, size)`.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    overrides: HashMap<(String, String), Money>,
}

impl PriceBook {
    /// Parse the configured override table.
    ///
    /// The wire shape is a JSON object of `"product|size": "price"`, e.g.
    /// `{"BPC-157|10mg": "79.00"}`. `None` yields an empty book.
    ///
    /// # Errors
    ///
    /// Returns `PriceBookError` if the JSON or a price string is invalid.
    pub fn from_config(raw: Option<&str>) -> Result<Self, PriceBookError> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };

        let table: HashMap<String, String> = serde_json::from_str(raw)?;
        let mut overrides = HashMap::with_capacity(table.len());
        for (key, price) in table {
            let money = Money::parse(&price).map_err(|source| PriceBookError::Price {
                key: key.clone(),
                source,
            })?;
            let (product, size) = key
                .split_once('|')
                .map_or_else(|| (key.as_str(), ""), |(p, s)| (p, s));
            overrides.insert((product.to_owned(), size.to_owned()), money);
        }
        Ok(Self { overrides })
    }

    /// The price a buyer pays for one unit.
    ///
    /// Non-members always pay the base price. Members pay the override
    /// for this `(product, size)` when one exists, otherwise
    /// `round(base * 0.77)`; the result is clamped to the base price.
    #[must_use]
    pub fn member_price(&self, base: Money, product: &str, size: &str, is_member: bool) -> Money {
        if !is_member {
            return base;
        }

        let discounted = self
            .overrides
            .get(&(product.to_owned(), size.to_owned()))
            .copied()
            .unwrap_or_else(|| Money::new(base.amount() * MEMBER_MULTIPLIER));

        discounted.min(base)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_non_member_pays_base() {
        let book = PriceBook::default();
        let base = Money::from_cents(10_400);
        assert_eq!(book.member_price(base, "BPC-157", "10mg", false), base);
    }

    #[test]
    fn test_member_discount_rounds_to_cents() {
        let book = PriceBook::default();
        // 104.00 * 0.77 = 80.08
        assert_eq!(
            book.member_price(Money::from_cents(10_400), "BPC-157", "10mg", true),
            Money::from_cents(8_008)
        );
        // 0.99 * 0.77 = 0.7623 -> 0.76
        assert_eq!(
            book.member_price(Money::from_cents(99), "BPC-157", "10mg", true),
            Money::from_cents(76)
        );
    }

    #[test]
    fn test_override_beats_multiplier() {
        let book =
            PriceBook::from_config(Some(r#"{"BPC-157|10mg": "79.00"}"#)).unwrap();
        assert_eq!(
            book.member_price(Money::from_cents(10_400), "BPC-157", "10mg", true),
            Money::from_cents(7_900)
        );
        // Other keys still get the multiplier.
        assert_eq!(
            book.member_price(Money::from_cents(10_000), "TB-500", "5mg", true),
            Money::from_cents(7_700)
        );
    }

    #[test]
    fn test_override_never_exceeds_base() {
        let book =
            PriceBook::from_config(Some(r#"{"BPC-157|10mg": "200.00"}"#)).unwrap();
        let base = Money::from_cents(10_400);
        assert_eq!(book.member_price(base, "BPC-157", "10mg", true), base);
    }

    #[test]
    fn test_member_price_is_monotone_for_all_bases() {
        let book = PriceBook::default();
        for cents in [1, 77, 100, 9_999, 10_400, 1_000_000] {
            let base = Money::from_cents(cents);
            assert!(book.member_price(base, "X", "Y", true) <= base);
        }
    }

    #[test]
    fn test_invalid_override_table_is_rejected() {
        assert!(matches!(
            PriceBook::from_config(Some("not json")),
            Err(PriceBookError::Json(_))
        ));
        assert!(matches!(
            PriceBook::from_config(Some(r#"{"A|B": "cheap"}"#)),
            Err(PriceBookError::Price { .. })
        ));
    }

    #[test]
    fn test_missing_config_is_empty_book() {
        let book = PriceBook::from_config(None).unwrap();
        assert_eq!(
            book.member_price(Money::from_cents(100), "A", "B", true),
            Money::from_cents(77)
        );
    }
}
