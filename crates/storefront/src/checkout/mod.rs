//! Checkout orchestration.
//!
//! [`begin`] is the single entry point for starting a checkout on either
//! rail: it validates the cart and address, computes totals, generates the
//! order number, and opens a provider session. It never writes an order
//! row - orders exist only after [`verifier`] confirms payment.
//!
//! The order number is generated *before* the provider round trip and
//! embedded in the provider session, so it survives even if everything on
//! our side is lost until verification.

pub mod validation;
pub mod verifier;

use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::instrument;

use thistle_core::Money;

use crate::models::{Cart, OrderIntent, OrderOwner, ShippingAddress};
use crate::payment::{PaymentError, PaymentProvider};

use validation::ValidationError;

/// Order number prefix for this storefront.
const ORDER_NUMBER_PREFIX: &str = "TL-";
/// Random alphanumeric characters after the prefix.
const ORDER_NUMBER_LEN: usize = 10;

/// Errors from starting a checkout.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// Input failed validation; nothing was sent to a provider.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The provider call failed; no order number was consumed anywhere
    /// durable, so checkout restarts from scratch.
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

/// What the caller needs to continue a started checkout.
#[derive(Debug, Clone)]
pub struct CheckoutStarted {
    /// Our order number, already embedded in the provider session.
    pub order_number: String,
    /// Provider reference used later for verification.
    pub provider_ref: String,
    /// Hosted-page redirect for the card rail; `None` on the wallet rail.
    pub redirect_url: Option<String>,
}

/// Validate inputs, compute totals, and open a provider session.
///
/// # Errors
///
/// Returns `CheckoutError::Validation` before any external call if the
/// address or cart is malformed, or `CheckoutError::Payment` if the
/// provider round trip fails.
#[instrument(skip_all, fields(rail = rail_name, lines = cart.line_count()))]
pub async fn begin<P: PaymentProvider>(
    provider: &P,
    rail_name: &str,
    cart: &Cart,
    address: ShippingAddress,
    owner: OrderOwner,
    shipping_flat: Money,
) -> Result<CheckoutStarted, CheckoutError> {
    validation::validate_items(&cart.items)?;

    let subtotal = cart.subtotal();
    let total = subtotal + shipping_flat;

    let intent = OrderIntent {
        order_number: generate_order_number(),
        items: cart.items.clone(),
        address,
        subtotal,
        shipping: shipping_flat,
        total,
        owner,
    };

    let session = provider.create_session(&intent).await?;
    tracing::info!(
        order_number = %intent.order_number,
        provider_ref = %session.provider_ref,
        total = %intent.total,
        "checkout session created"
    );

    Ok(CheckoutStarted {
        order_number: intent.order_number,
        provider_ref: session.provider_ref,
        redirect_url: session.redirect_url,
    })
}

/// Generate a globally unique order number (`TL-` + 10 alphanumerics).
#[must_use]
pub fn generate_order_number() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(ORDER_NUMBER_LEN)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!("{ORDER_NUMBER_PREFIX}{suffix}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use thistle_core::Email;

    use crate::models::CartItem;
    use crate::payment::{CheckoutSession, PaymentStatus, PaymentVerification};

    /// Provider fake that records the intent it was given.
    struct RecordingProvider {
        seen: std::sync::Mutex<Vec<OrderIntent>>,
    }

    impl RecordingProvider {
        fn new() -> Self {
            Self {
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl PaymentProvider for RecordingProvider {
        async fn create_session(
            &self,
            intent: &OrderIntent,
        ) -> Result<CheckoutSession, PaymentError> {
            self.seen.lock().unwrap().push(intent.clone());
            Ok(CheckoutSession {
                provider_ref: "ref-1".to_owned(),
                redirect_url: Some("https://pay.example.com/s/ref-1".to_owned()),
            })
        }

        async fn verify(&self, _provider_ref: &str) -> Result<PaymentVerification, PaymentError> {
            Ok(PaymentVerification {
                status: PaymentStatus::Incomplete,
                capture_id: String::new(),
                intent: None,
            })
        }
    }

    fn cart() -> Cart {
        Cart {
            items: vec![CartItem {
                product_name: "BPC-157".to_owned(),
                size: "10mg".to_owned(),
                quantity: 2,
                unit_price: Money::from_cents(10_400),
            }],
        }
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            email: Email::parse("jane@example.com").unwrap(),
            street: "100 Main St".to_owned(),
            city: "Portland".to_owned(),
            state: "OR".to_owned(),
            zip: "97201".to_owned(),
        }
    }

    #[test]
    fn test_order_number_shape_and_uniqueness() {
        let mut seen = HashSet::new();
        for _ in 0..1_000 {
            let n = generate_order_number();
            assert!(n.starts_with("TL-"));
            assert_eq!(n.len(), 3 + ORDER_NUMBER_LEN);
            assert!(n[3..].chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(seen.insert(n), "order number collision");
        }
    }

    #[tokio::test]
    async fn test_begin_computes_totals_and_embeds_order_number() {
        let provider = RecordingProvider::new();
        let owner = OrderOwner::Guest(Email::parse("jane@example.com").unwrap());

        let started = begin(
            &provider,
            "card",
            &cart(),
            address(),
            owner,
            Money::from_cents(800),
        )
        .await
        .unwrap();

        let seen = provider.seen.lock().unwrap();
        let intent = seen.first().unwrap();
        assert_eq!(intent.order_number, started.order_number);
        assert_eq!(intent.subtotal, Money::from_cents(20_800));
        assert_eq!(intent.shipping, Money::from_cents(800));
        assert_eq!(intent.total, Money::from_cents(21_600));
        assert_eq!(started.provider_ref, "ref-1");
        assert!(started.redirect_url.is_some());
    }

    #[tokio::test]
    async fn test_begin_rejects_invalid_cart_before_provider() {
        let provider = RecordingProvider::new();
        let owner = OrderOwner::Guest(Email::parse("jane@example.com").unwrap());

        let err = begin(
            &provider,
            "card",
            &Cart::empty(),
            address(),
            owner,
            Money::from_cents(800),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CheckoutError::Validation(_)));
        assert!(provider.seen.lock().unwrap().is_empty());
    }
}
