//! Stripe hosted checkout (card rail).
//!
//! `create_session` opens a hosted checkout session with the full order
//! intent packed into session metadata - until verification completes,
//! that metadata is the only durable record of what the buyer is paying
//! for. `verify` fetches the session by id and accepts only
//! `payment_status == "paid"`.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::instrument;

use thistle_core::Money;

use crate::config::StripeConfig;
use crate::models::{CartItem, OrderIntent, OrderOwner, ShippingAddress};

use super::{
    CheckoutSession, PaymentError, PaymentProvider, PaymentStatus, PaymentVerification,
    ensure_chargeable,
};

/// Stripe API base URL.
const API_BASE: &str = "https://api.stripe.com";

/// Card-rail payment provider backed by Stripe Checkout.
pub struct StripeProvider {
    client: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
    /// Where Stripe sends the buyer after payment; the placeholder is
    /// replaced by Stripe with the session id we verify on return.
    success_url: String,
    cancel_url: String,
}

/// Response from session creation and retrieval.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: Option<SessionMetadata>,
}

/// The metadata bag carried on the checkout session.
#[derive(Debug, Deserialize)]
struct SessionMetadata {
    #[serde(default)]
    order_number: Option<String>,
    #[serde(default)]
    items: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    subtotal: Option<String>,
    #[serde(default)]
    shipping: Option<String>,
    #[serde(default)]
    total: Option<String>,
    #[serde(default)]
    owner: Option<String>,
}

impl StripeProvider {
    /// Create a Stripe provider.
    ///
    /// `base_url` is the storefront's public URL, used to build the
    /// return and cancel targets.
    #[must_use]
    pub fn new(config: &StripeConfig, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: API_BASE.to_owned(),
            secret_key: config.secret_key.clone(),
            success_url: format!(
                "{}/checkout/card/return?session_id={{CHECKOUT_SESSION_ID}}",
                base_url.trim_end_matches('/')
            ),
            cancel_url: format!("{}/cart", base_url.trim_end_matches('/')),
        }
    }

    /// Override the API base (tests).
    #[cfg(test)]
    pub(crate) fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_owned();
        self
    }

    /// Build the form body for session creation.
    ///
    /// Stripe's form encoding addresses nested fields with bracketed
    /// keys; shipping rides as its own line item.
    fn session_form(&self, intent: &OrderIntent) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_owned(), "payment".to_owned()),
            ("success_url".to_owned(), self.success_url.clone()),
            ("cancel_url".to_owned(), self.cancel_url.clone()),
        ];

        for (i, item) in intent.items.iter().enumerate() {
            form.push((
                format!("line_items[{i}][price_data][currency]"),
                "usd".to_owned(),
            ));
            form.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                item.unit_price.cents().to_string(),
            ));
            form.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                format!("{} ({})", item.product_name, item.size),
            ));
            form.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
        }

        if intent.shipping.is_positive() {
            let i = intent.items.len();
            form.push((
                format!("line_items[{i}][price_data][currency]"),
                "usd".to_owned(),
            ));
            form.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                intent.shipping.cents().to_string(),
            ));
            form.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                "Shipping".to_owned(),
            ));
            form.push((format!("line_items[{i}][quantity]"), "1".to_owned()));
        }

        form.push(("customer_email".to_owned(), intent.address.email.to_string()));
        form.push((
            "metadata[order_number]".to_owned(),
            intent.order_number.clone(),
        ));
        form.push((
            "metadata[items]".to_owned(),
            serde_json::to_string(&intent.items).unwrap_or_default(),
        ));
        form.push((
            "metadata[address]".to_owned(),
            serde_json::to_string(&intent.address).unwrap_or_default(),
        ));
        form.push((
            "metadata[subtotal]".to_owned(),
            intent.subtotal.to_unit_string(),
        ));
        form.push((
            "metadata[shipping]".to_owned(),
            intent.shipping.to_unit_string(),
        ));
        form.push(("metadata[total]".to_owned(), intent.total.to_unit_string()));
        form.push(("metadata[owner]".to_owned(), intent.owner.encode()));

        form
    }
}

impl PaymentProvider for StripeProvider {
    #[instrument(skip(self, intent), fields(order_number = %intent.order_number))]
    async fn create_session(
        &self,
        intent: &OrderIntent,
    ) -> Result<CheckoutSession, PaymentError> {
        ensure_chargeable(intent)?;

        let url = format!("{}/v1/checkout/sessions", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.secret_key.expose_secret())
            .form(&self.session_form(intent))
            .send()
            .await?;

        let session: SessionResponse = read_response(response).await?;

        Ok(CheckoutSession {
            provider_ref: session.id,
            redirect_url: session.url,
        })
    }

    #[instrument(skip(self), fields(session_id = %provider_ref))]
    async fn verify(&self, provider_ref: &str) -> Result<PaymentVerification, PaymentError> {
        let url = format!("{}/v1/checkout/sessions/{provider_ref}", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;

        let session: SessionResponse = read_response(response).await?;

        if session.payment_status.as_deref() != Some("paid") {
            return Ok(PaymentVerification {
                status: PaymentStatus::Incomplete,
                capture_id: session.id,
                intent: None,
            });
        }

        let metadata = session
            .metadata
            .ok_or_else(|| PaymentError::Malformed("session has no metadata".to_owned()))?;
        let intent = reconstruct_intent(&metadata)?;

        Ok(PaymentVerification {
            status: PaymentStatus::Paid,
            capture_id: session.id,
            intent: Some(intent),
        })
    }
}

/// Triage a Stripe HTTP response.
async fn read_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, PaymentError> {
    let status = response.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(PaymentError::Auth(format!("HTTP {status}")));
    }

    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(PaymentError::Api {
            status: status.as_u16(),
            message: message.chars().take(500).collect(),
        });
    }

    response
        .json()
        .await
        .map_err(|e| PaymentError::Malformed(e.to_string()))
}

/// Rebuild the order intent from session metadata.
fn reconstruct_intent(metadata: &SessionMetadata) -> Result<OrderIntent, PaymentError> {
    let missing = |field: &str| PaymentError::Malformed(format!("metadata missing {field}"));

    let order_number = metadata
        .order_number
        .clone()
        .ok_or_else(|| missing("order_number"))?;
    let items: Vec<CartItem> =
        serde_json::from_str(metadata.items.as_deref().ok_or_else(|| missing("items"))?)
            .map_err(|e| PaymentError::Malformed(format!("metadata items: {e}")))?;
    let address: ShippingAddress = serde_json::from_str(
        metadata
            .address
            .as_deref()
            .ok_or_else(|| missing("address"))?,
    )
    .map_err(|e| PaymentError::Malformed(format!("metadata address: {e}")))?;
    let owner = OrderOwner::decode(metadata.owner.as_deref().ok_or_else(|| missing("owner"))?)
        .ok_or_else(|| PaymentError::Malformed("metadata owner is invalid".to_owned()))?;

    let parse_money = |field: &str, value: Option<&str>| {
        Money::parse(value.ok_or_else(|| missing(field))?)
            .map_err(|e| PaymentError::Malformed(format!("metadata {field}: {e}")))
    };

    Ok(OrderIntent {
        order_number,
        items,
        address,
        subtotal: parse_money("subtotal", metadata.subtotal.as_deref())?,
        shipping: parse_money("shipping", metadata.shipping.as_deref())?,
        total: parse_money("total", metadata.total.as_deref())?,
        owner,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::payment::tests::test_intent;

    fn provider() -> StripeProvider {
        let config = StripeConfig {
            secret_key: SecretString::from("sk_test_xxx"),
            member_price_id: None,
        };
        StripeProvider::new(&config, "https://shop.example.com/")
    }

    #[test]
    fn test_success_url_carries_session_placeholder() {
        let p = provider();
        assert_eq!(
            p.success_url,
            "https://shop.example.com/checkout/card/return?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(p.cancel_url, "https://shop.example.com/cart");
    }

    #[test]
    fn test_session_form_packs_items_and_metadata() {
        let p = provider();
        let intent = test_intent();
        let form = p.session_form(&intent);

        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(
            get("line_items[0][price_data][unit_amount]"),
            Some("10400")
        );
        assert_eq!(
            get("line_items[0][price_data][product_data][name]"),
            Some("BPC-157 (10mg)")
        );
        // Shipping is the trailing line item.
        assert_eq!(get("line_items[1][price_data][unit_amount]"), Some("800"));
        assert_eq!(get("metadata[order_number]"), Some("TL-A1B2C3D4E5"));
        assert_eq!(get("metadata[total]"), Some("112.00"));
        assert_eq!(get("metadata[owner]"), Some("guest:jane@example.com"));
    }

    #[test]
    fn test_reconstruct_intent_roundtrip() {
        let p = provider();
        let intent = test_intent();
        let form = p.session_form(&intent);

        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let metadata = SessionMetadata {
            order_number: get("metadata[order_number]"),
            items: get("metadata[items]"),
            address: get("metadata[address]"),
            subtotal: get("metadata[subtotal]"),
            shipping: get("metadata[shipping]"),
            total: get("metadata[total]"),
            owner: get("metadata[owner]"),
        };

        let rebuilt = reconstruct_intent(&metadata).unwrap();
        assert_eq!(rebuilt, intent);
    }

    #[test]
    fn test_reconstruct_intent_rejects_missing_fields() {
        let metadata = SessionMetadata {
            order_number: Some("TL-A1B2C3D4E5".to_owned()),
            items: None,
            address: None,
            subtotal: None,
            shipping: None,
            total: None,
            owner: None,
        };
        assert!(matches!(
            reconstruct_intent(&metadata),
            Err(PaymentError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_create_session_rejects_empty_intent_before_network() {
        // api_base points nowhere; the guard must fire first.
        let p = provider().with_api_base("http://127.0.0.1:1");
        let mut intent = test_intent();
        intent.items.clear();

        let err = p.create_session(&intent).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidIntent(_)));
    }
}
