//! Payment providers.
//!
//! Two external rails sit behind one contract: Stripe hosted checkout
//! (redirect to a provider-hosted page, verified by session id on return)
//! and PayPal orders (create server-side, capture on approval). The
//! provider is the only trusted source of payment status; client-reported
//! status is never consulted.

pub mod paypal;
pub mod stripe;

pub use paypal::PayPalProvider;
pub use stripe::StripeProvider;

use std::future::Future;

use crate::models::OrderIntent;

/// Errors from payment provider operations.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// HTTP transport failure reaching the provider. Retryable.
    #[error("payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider rejected the request.
    #[error("payment provider error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Our credentials were rejected by the provider.
    #[error("payment provider authentication failed: {0}")]
    Auth(String),

    /// The provider's response was missing fields we depend on.
    #[error("unexpected payment provider response: {0}")]
    Malformed(String),

    /// The order intent cannot be charged (empty cart or non-positive total).
    #[error("order intent is not chargeable: {0}")]
    InvalidIntent(String),
}

/// Provider-reported payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    /// The provider confirmed the payment completed.
    Paid,
    /// Anything other than a confirmed completion.
    Incomplete,
}

/// A provider-side payment session.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Provider reference used later for verification.
    pub provider_ref: String,
    /// Hosted-page redirect for the card rail; `None` for the wallet
    /// rail, whose approval UI is driven client-side from the order id.
    pub redirect_url: Option<String>,
}

/// The result of verifying a provider reference.
#[derive(Debug, Clone)]
pub struct PaymentVerification {
    pub status: PaymentStatus,
    /// The capture/session id used as the order idempotency key.
    pub capture_id: String,
    /// Order intent reconstructed from the durable metadata carried on
    /// the provider reference. Present when the payment is paid.
    pub intent: Option<OrderIntent>,
}

/// Contract shared by both payment rails.
pub trait PaymentProvider: Send + Sync {
    /// Create a provider-side payment session for the given intent.
    ///
    /// All order-identifying data travels with the provider session so
    /// verification can reconstruct it; no local order row exists yet.
    fn create_session(
        &self,
        intent: &OrderIntent,
    ) -> impl Future<Output = Result<CheckoutSession, PaymentError>> + Send;

    /// Confirm completion of a previously created session.
    fn verify(
        &self,
        provider_ref: &str,
    ) -> impl Future<Output = Result<PaymentVerification, PaymentError>> + Send;
}

/// Reject intents that can never be charged, before any network call.
pub(crate) fn ensure_chargeable(intent: &OrderIntent) -> Result<(), PaymentError> {
    if intent.items.is_empty() {
        return Err(PaymentError::InvalidIntent("cart is empty".to_owned()));
    }
    if !intent.total.is_positive() {
        return Err(PaymentError::InvalidIntent(format!(
            "total must be positive, got {}",
            intent.total
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{CartItem, OrderOwner, ShippingAddress};
    use thistle_core::{Email, Money};

    pub(crate) fn test_intent() -> OrderIntent {
        OrderIntent {
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
            owner: OrderOwner::Guest(Email::parse("jane@example.com").unwrap()),
        }
    }

    #[test]
    fn test_chargeable_intent_passes() {
        assert!(ensure_chargeable(&test_intent()).is_ok());
    }

    #[test]
    fn test_empty_cart_is_rejected() {
        let mut intent = test_intent();
        intent.items.clear();
        assert!(matches!(
            ensure_chargeable(&intent),
            Err(PaymentError::InvalidIntent(_))
        ));
    }

    #[test]
    fn test_non_positive_total_is_rejected() {
        let mut intent = test_intent();
        intent.total = Money::ZERO;
        assert!(matches!(
            ensure_chargeable(&intent),
            Err(PaymentError::InvalidIntent(_))
        ));
    }
}
