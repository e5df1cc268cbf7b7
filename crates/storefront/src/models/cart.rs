//! Cart domain types.
//!
//! A cart line is identified by `(product_name, size)`. The same product in
//! two sizes is two lines; adding an already-present line increments its
//! quantity instead of appending a duplicate.

use serde::{Deserialize, Serialize};

use thistle_core::Money;

/// A single cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product display name (e.g. "BPC-157").
    pub product_name: String,
    /// Size variant (e.g. "10mg").
    pub size: String,
    /// Quantity, always >= 1. A mutation that would drive this below 1
    /// removes the line instead.
    pub quantity: u32,
    /// Unit price at the time the item was added.
    pub unit_price: Money,
}

impl CartItem {
    /// Whether this line matches the given `(product_name, size)` key.
    #[must_use]
    pub fn matches(&self, product_name: &str, size: &str) -> bool {
        self.product_name == product_name && self.size == size
    }

    /// Line total (`unit_price * quantity`).
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// An immutable snapshot of a cart's contents.
///
/// Returned by [`crate::cart::CartStore`] mutations; the authoritative
/// state lives inside the store, never in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self { items: Vec::new() }
    }

    /// Sum of all line totals.
    #[must_use]
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Total unit count across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Number of distinct `(product_name, size)` lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.items.len()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
