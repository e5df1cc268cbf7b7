//! Checkout input validation.
//!
//! Every rule here runs before any external call, so a malformed address or
//! an unpriceable item never reaches a payment provider. Errors carry the
//! offending field so the client can surface them inline.

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

use thistle_core::Email;

use crate::models::{CartItem, ShippingAddress};

/// Highest accepted unit price, inclusive.
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);
/// Highest accepted per-line quantity, inclusive.
pub const MAX_LINE_QUANTITY: u32 = 100;
/// Highest accepted total unit count across the cart, inclusive.
pub const MAX_CART_UNITS: u32 = 50;

static STREET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 .,#'/-]{5,200}$").expect("Invalid regex"));
static CITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z '-]{2,100}$").expect("Invalid regex"));
static STATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{2}$").expect("Invalid regex"));
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("Invalid regex"));

/// A checkout input rejection, with the field it names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("email: not a valid email address")]
    Email,
    #[error("street: must be 5-200 characters (letters, digits, and . , # ' / -)")]
    Street,
    #[error("city: must be 2-100 characters (letters, spaces, hyphens, apostrophes)")]
    City,
    #[error("state: must be a 2-letter code")]
    State,
    #[error("zip: must be 5 digits or ZIP+4")]
    Zip,
    #[error("items: cart is empty")]
    EmptyCart,
    #[error("items: cart holds more than {MAX_CART_UNITS} units")]
    TooManyUnits,
    #[error("item {0}: name must be 1-200 characters")]
    ItemName(usize),
    #[error("item {0}: size must be 1-50 characters")]
    ItemSize(usize),
    #[error("item {0}: price must be between $0.01 and $10000.00")]
    ItemPrice(usize),
    #[error("item {0}: quantity must be between 1 and {MAX_LINE_QUANTITY}")]
    ItemQuantity(usize),
}

/// Raw address fields as submitted by the client.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AddressInput {
    pub email: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

/// Validate and normalize a shipping address.
///
/// The state code is uppercased; other fields are trimmed but otherwise
/// kept as entered.
///
/// # Errors
///
/// Returns the first failing field's `ValidationError`.
pub fn validate_address(input: &AddressInput) -> Result<ShippingAddress, ValidationError> {
    let email = Email::parse(input.email.trim()).map_err(|_| ValidationError::Email)?;

    let street = input.street.trim();
    if !STREET_RE.is_match(street) {
        return Err(ValidationError::Street);
    }

    let city = input.city.trim();
    if !CITY_RE.is_match(city) {
        return Err(ValidationError::City);
    }

    let state = input.state.trim();
    if !STATE_RE.is_match(state) {
        return Err(ValidationError::State);
    }

    let zip = input.zip.trim();
    if !ZIP_RE.is_match(zip) {
        return Err(ValidationError::Zip);
    }

    Ok(ShippingAddress {
        email,
        street: street.to_owned(),
        city: city.to_owned(),
        state: state.to_ascii_uppercase(),
        zip: zip.to_owned(),
    })
}

/// Validate the cart lines about to be charged.
///
/// # Errors
///
/// Returns the first failing line's `ValidationError`; line indices are
/// zero-based.
pub fn validate_items(items: &[CartItem]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::EmptyCart);
    }

    for (i, item) in items.iter().enumerate() {
        if item.product_name.is_empty() || item.product_name.len() > 200 {
            return Err(ValidationError::ItemName(i));
        }
        if item.size.is_empty() || item.size.len() > 50 {
            return Err(ValidationError::ItemSize(i));
        }
        if !item.unit_price.is_positive() || item.unit_price.amount() > MAX_UNIT_PRICE {
            return Err(ValidationError::ItemPrice(i));
        }
        if item.quantity < 1 || item.quantity > MAX_LINE_QUANTITY {
            return Err(ValidationError::ItemQuantity(i));
        }
    }

    let units: u32 = items.iter().map(|item| item.quantity).sum();
    if units > MAX_CART_UNITS {
        return Err(ValidationError::TooManyUnits);
    }

    Ok(())
}
