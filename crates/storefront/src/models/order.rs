//! Order domain types.
//!
//! An `Order` row is created only after a payment provider confirms payment.
//! Its items, totals, and payment reference are write-once; status and
//! fulfillment fields stay mutable for operational updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use thistle_core::{Email, Money, OrderId, OrderStatus, UserId};

use super::cart::CartItem;

/// A validated shipping address.
///
/// Field constraints are enforced by the checkout validator before any
/// external call; values held by this type have already passed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub email: Email,
    pub street: String,
    pub city: String,
    /// Two-letter state code, stored uppercase.
    pub state: String,
    /// 5-digit or ZIP+4.
    pub zip: String,
}

/// Who a checkout belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderOwner {
    /// An authenticated user; their server cart is cleared on completion.
    User(UserId),
    /// A guest checkout, identified by the shipping email.
    Guest(Email),
}

impl OrderOwner {
    /// Compact encoding carried through provider metadata
    /// (`user:42` / `guest:jane@example.com`).
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Guest(email) => format!("guest:{email}"),
        }
    }

    /// Decode the metadata form produced by [`Self::encode`].
    #[must_use]
    pub fn decode(s: &str) -> Option<Self> {
        if let Some(id) = s.strip_prefix("user:") {
            return id.parse::<i32>().ok().map(|id| Self::User(UserId::new(id)));
        }
        if let Some(email) = s.strip_prefix("guest:") {
            return Email::parse(email).ok().map(Self::Guest);
        }
        None
    }

    /// The authenticated user id, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Guest(_) => None,
        }
    }
}

/// Everything needed to persist an order once payment is confirmed.
///
/// Generated by the checkout orchestrator before the provider round trip
/// and carried as durable metadata on the provider session, because no
/// local order row exists until verification completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub order_number: String,
    pub items: Vec<CartItem>,
    pub address: ShippingAddress,
    pub subtotal: Money,
    pub shipping: Money,
    pub total: Money,
    pub owner: OrderOwner,
}

/// A persisted order (domain type).
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    /// Globally unique, generated before the provider round trip.
    pub order_number: String,
    /// Immutable snapshot of the purchased items.
    pub items: Vec<CartItem>,
    pub subtotal: Money,
    pub shipping: Money,
    pub total: Money,
    pub address: ShippingAddress,
    /// Provider capture/session id; unique across all orders.
    pub payment_reference: String,
    pub status: OrderStatus,
    /// Set for authenticated buyers.
    pub user_id: Option<UserId>,
    /// Set for guest checkouts (taken from the shipping address).
    pub guest_email: Option<Email>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub internal_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_encode_decode_user() {
        let owner = OrderOwner::User(UserId::new(42));
        assert_eq!(owner.encode(), "user:42");
        assert_eq!(OrderOwner::decode("user:42"), Some(owner));
    }

    #[test]
    fn test_owner_encode_decode_guest() {
        let owner = OrderOwner::Guest(Email::parse("jane@example.com").unwrap());
        assert_eq!(owner.encode(), "guest:jane@example.com");
        assert_eq!(OrderOwner::decode("guest:jane@example.com"), Some(owner));
    }

    #[test]
    fn test_owner_decode_rejects_garbage() {
        assert_eq!(OrderOwner::decode("admin:1"), None);
        assert_eq!(OrderOwner::decode("user:not-a-number"), None);
        assert_eq!(OrderOwner::decode("guest:"), None);
    }

    #[test]
    fn test_intent_json_roundtrip() {
        let intent = OrderIntent {
            order_number: "TL-A1B2C3D4E5".to_owned(),
            items: vec![CartItem {
                product_name: "BPC-157".to_owned(),
                size: "10mg".to_owned(),
                quantity: 1,
                unit_price: Money::from_cents(10_400),
            }],
            address: ShippingAddress {
                email: Email::parse("jane@example.com").unwrap(),
                street: "100 Main St".to_owned(),
                city: "Portland".to_owned(),
                state: "OR".to_owned(),
                zip: "97201".to_owned(),
            },
            subtotal: Money::from_cents(10_400),
            shipping: Money::from_cents(800),
            total: Money::from_cents(11_200),
            owner: OrderOwner::User(UserId::new(7)),
        };

        let json = serde_json::to_string(&intent).unwrap();
        let parsed: OrderIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, intent);
    }
}
