//! PayPal orders (wallet rail).
//!
//! Two-phase: `create_session` submits the computed line items and amount
//! breakdown and returns the provider-side order id; `verify` captures
//! that order and accepts only `COMPLETED`, extracting the capture id as
//! the idempotency token. The order number rides in `invoice_id` and the
//! owner identity in `custom_id`, so the provider order itself carries
//! the durable record of intent.

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

use thistle_core::{Email, Money};

use crate::config::PayPalConfig;
use crate::models::{CartItem, OrderIntent, OrderOwner, ShippingAddress};

use super::{
    CheckoutSession, PaymentError, PaymentProvider, PaymentStatus, PaymentVerification,
    ensure_chargeable,
};

/// Refresh the OAuth token this many seconds before it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Wallet-rail payment provider backed by the PayPal REST API.
pub struct PayPalProvider {
    client: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: SecretString,
    token: AsyncMutex<Option<CachedToken>>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: SecretString,
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
    #[serde(default)]
    payer: Option<Payer>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    invoice_id: Option<String>,
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    amount: Option<Amount>,
    #[serde(default)]
    items: Vec<OrderItem>,
    #[serde(default)]
    shipping: Option<Shipping>,
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    value: String,
    #[serde(default)]
    breakdown: Option<Breakdown>,
}

#[derive(Debug, Deserialize)]
struct Breakdown {
    #[serde(default)]
    item_total: Option<AmountValue>,
    #[serde(default)]
    shipping: Option<AmountValue>,
}

#[derive(Debug, Deserialize)]
struct AmountValue {
    value: String,
}

#[derive(Debug, Deserialize)]
struct OrderItem {
    name: String,
    #[serde(default)]
    unit_amount: Option<AmountValue>,
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct Shipping {
    #[serde(default)]
    address: Option<PostalAddress>,
}

#[derive(Debug, Deserialize)]
struct PostalAddress {
    #[serde(default)]
    address_line_1: Option<String>,
    #[serde(default)]
    admin_area_2: Option<String>,
    #[serde(default)]
    admin_area_1: Option<String>,
    #[serde(default)]
    postal_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Payer {
    #[serde(default)]
    email_address: Option<String>,
}

impl PayPalProvider {
    /// Create a PayPal provider.
    #[must_use]
    pub fn new(config: &PayPalConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token: AsyncMutex::new(None),
        }
    }

    /// Get a valid OAuth access token, refreshing if needed.
    async fn access_token(&self) -> Result<SecretString, PaymentError> {
        let mut cached = self.token.lock().await;

        let now = Utc::now().timestamp();
        if let Some(token) = cached.as_ref()
            && token.expires_at - TOKEN_REFRESH_MARGIN_SECS > now
        {
            return Ok(token.access_token.clone());
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PaymentError::Auth("client credentials rejected".to_owned()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Malformed(e.to_string()))?;

        let fresh = CachedToken {
            access_token: SecretString::from(token.access_token),
            expires_at: now + token.expires_in,
        };
        *cached = Some(fresh.clone());
        Ok(fresh.access_token)
    }

    /// Build the order-creation body.
    fn order_body(intent: &OrderIntent) -> serde_json::Value {
        let items: Vec<serde_json::Value> = intent
            .items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "name": format!("{} ({})", item.product_name, item.size),
                    "unit_amount": {
                        "currency_code": "USD",
                        "value": item.unit_price.to_unit_string(),
                    },
                    "quantity": item.quantity.to_string(),
                })
            })
            .collect();

        serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "invoice_id": intent.order_number,
                "custom_id": intent.owner.encode(),
                "amount": {
                    "currency_code": "USD",
                    "value": intent.total.to_unit_string(),
                    "breakdown": {
                        "item_total": {
                            "currency_code": "USD",
                            "value": intent.subtotal.to_unit_string(),
                        },
                        "shipping": {
                            "currency_code": "USD",
                            "value": intent.shipping.to_unit_string(),
                        },
                    },
                },
                "items": items,
                "shipping": {
                    "address": {
                        "address_line_1": intent.address.street,
                        "admin_area_2": intent.address.city,
                        "admin_area_1": intent.address.state,
                        "postal_code": intent.address.zip,
                        "country_code": "US",
                    },
                },
            }],
        })
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderResponse, PaymentError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/v2/checkout/orders/{order_id}", self.api_base))
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        read_response(response).await
    }

    async fn capture_order(&self, order_id: &str) -> Result<OrderResponse, PaymentError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{order_id}/capture",
                self.api_base
            ))
            .bearer_auth(token.expose_secret())
            .header("Content-Type", "application/json")
            .body("{}")
            .send()
            .await?;
        read_response(response).await
    }
}

impl PaymentProvider for PayPalProvider {
    #[instrument(skip(self, intent), fields(order_number = %intent.order_number))]
    async fn create_session(
        &self,
        intent: &OrderIntent,
    ) -> Result<CheckoutSession, PaymentError> {
        ensure_chargeable(intent)?;

        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(token.expose_secret())
            .json(&Self::order_body(intent))
            .send()
            .await?;

        let order: OrderResponse = read_response(response).await?;

        Ok(CheckoutSession {
            provider_ref: order.id,
            redirect_url: None,
        })
    }

    #[instrument(skip(self), fields(order_id = %provider_ref))]
    async fn verify(&self, provider_ref: &str) -> Result<PaymentVerification, PaymentError> {
        let order = self.get_order(provider_ref).await?;

        // APPROVED means the buyer consented but no money moved yet;
        // capture it now. COMPLETED means a prior capture already went
        // through (e.g. a duplicate verification call).
        let order = match order.status.as_str() {
            "COMPLETED" => order,
            "APPROVED" => self.capture_order(provider_ref).await?,
            _ => {
                return Ok(PaymentVerification {
                    status: PaymentStatus::Incomplete,
                    capture_id: order.id,
                    intent: None,
                });
            }
        };

        if order.status != "COMPLETED" {
            return Ok(PaymentVerification {
                status: PaymentStatus::Incomplete,
                capture_id: order.id,
                intent: None,
            });
        }

        let capture_id = order
            .purchase_units
            .first()
            .and_then(|unit| unit.payments.as_ref())
            .and_then(|payments| payments.captures.first())
            .map(|capture| capture.id.clone())
            .ok_or_else(|| {
                PaymentError::Malformed("completed order has no capture id".to_owned())
            })?;

        let intent = reconstruct_intent(&order)?;

        Ok(PaymentVerification {
            status: PaymentStatus::Paid,
            capture_id,
            intent: Some(intent),
        })
    }
}

/// Triage a PayPal HTTP response.
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

/// Rebuild the order intent from the provider-side order.
fn reconstruct_intent(order: &OrderResponse) -> Result<OrderIntent, PaymentError> {
    let missing = |field: &str| PaymentError::Malformed(format!("order missing {field}"));

    let unit = order.purchase_units.first().ok_or_else(|| missing("purchase_units"))?;

    let order_number = unit.invoice_id.clone().ok_or_else(|| missing("invoice_id"))?;
    let owner = OrderOwner::decode(unit.custom_id.as_deref().ok_or_else(|| missing("custom_id"))?)
        .ok_or_else(|| PaymentError::Malformed("custom_id is not a valid owner".to_owned()))?;

    let amount = unit.amount.as_ref().ok_or_else(|| missing("amount"))?;
    let breakdown = amount.breakdown.as_ref().ok_or_else(|| missing("amount.breakdown"))?;

    let parse_money = |field: &str, value: &str| {
        Money::parse(value).map_err(|e| PaymentError::Malformed(format!("{field}: {e}")))
    };

    let total = parse_money("amount.value", &amount.value)?;
    let subtotal = parse_money(
        "item_total",
        &breakdown
            .item_total
            .as_ref()
            .ok_or_else(|| missing("item_total"))?
            .value,
    )?;
    let shipping = parse_money(
        "shipping",
        &breakdown
            .shipping
            .as_ref()
            .ok_or_else(|| missing("shipping"))?
            .value,
    )?;

    let items = unit
        .items
        .iter()
        .map(|item| {
            let (product_name, size) = split_item_name(&item.name);
            let unit_price = item
                .unit_amount
                .as_ref()
                .ok_or_else(|| missing("item unit_amount"))
                .and_then(|amount| parse_money("item unit_amount", &amount.value))?;
            let quantity: u32 = item
                .quantity
                .parse()
                .map_err(|_| PaymentError::Malformed("item quantity is not a number".to_owned()))?;
            Ok(CartItem {
                product_name,
                size,
                quantity,
                unit_price,
            })
        })
        .collect::<Result<Vec<_>, PaymentError>>()?;

    // The shipping email prefers the validated guest identity; for
    // signed-in buyers the payer's PayPal email stands in.
    let email = match &owner {
        OrderOwner::Guest(email) => email.clone(),
        OrderOwner::User(_) => {
            let payer_email = order
                .payer
                .as_ref()
                .and_then(|payer| payer.email_address.as_deref())
                .ok_or_else(|| missing("payer email"))?;
            Email::parse(payer_email)
                .map_err(|e| PaymentError::Malformed(format!("payer email: {e}")))?
        }
    };

    let address = unit
        .shipping
        .as_ref()
        .and_then(|shipping| shipping.address.as_ref())
        .ok_or_else(|| missing("shipping address"))?;

    let field = |value: &Option<String>, name: &str| {
        value.clone().ok_or_else(|| missing(name))
    };

    Ok(OrderIntent {
        order_number,
        items,
        address: ShippingAddress {
            email,
            street: field(&address.address_line_1, "address_line_1")?,
            city: field(&address.admin_area_2, "admin_area_2")?,
            state: field(&address.admin_area_1, "admin_area_1")?,
            zip: field(&address.postal_code, "postal_code")?,
        },
        subtotal,
        shipping,
        total,
        owner,
    })
}

/// Split `"BPC-157 (10mg)"` back into name and size.
fn split_item_name(name: &str) -> (String, String) {
    if let Some(open) = name.rfind(" (")
        && let Some(stripped) = name.get(open + 2..)
        && let Some(size) = stripped.strip_suffix(')')
    {
        if let Some(product) = name.get(..open) {
            return (product.to_owned(), size.to_owned());
        }
    }
    (name.to_owned(), String::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::payment::tests::test_intent;

    #[test]
    fn test_order_body_shape() {
        let intent = test_intent();
        let body = PayPalProvider::order_body(&intent);

        let unit = &body["purchase_units"][0];
        assert_eq!(unit["invoice_id"], "TL-A1B2C3D4E5");
        assert_eq!(unit["custom_id"], "guest:jane@example.com");
        assert_eq!(unit["amount"]["value"], "112.00");
        assert_eq!(unit["amount"]["breakdown"]["item_total"]["value"], "104.00");
        assert_eq!(unit["amount"]["breakdown"]["shipping"]["value"], "8.00");
        assert_eq!(unit["items"][0]["name"], "BPC-157 (10mg)");
        assert_eq!(unit["items"][0]["unit_amount"]["value"], "104.00");
        assert_eq!(unit["items"][0]["quantity"], "1");
        assert_eq!(unit["shipping"]["address"]["admin_area_1"], "OR");
    }

    #[test]
    fn test_split_item_name() {
        assert_eq!(
            split_item_name("BPC-157 (10mg)"),
            ("BPC-157".to_owned(), "10mg".to_owned())
        );
        assert_eq!(
            split_item_name("Weird (Name) (5mg)"),
            ("Weird (Name)".to_owned(), "5mg".to_owned())
        );
        assert_eq!(
            split_item_name("NoSize"),
            ("NoSize".to_owned(), String::new())
        );
    }

    fn completed_order_json() -> serde_json::Value {
        serde_json::json!({
            "id": "5O190127TN364715T",
            "status": "COMPLETED",
            "payer": { "email_address": "jane@example.com" },
            "purchase_units": [{
                "invoice_id": "TL-A1B2C3D4E5",
                "custom_id": "guest:jane@example.com",
                "amount": {
                    "value": "58.00",
                    "breakdown": {
                        "item_total": { "value": "50.00" },
                        "shipping": { "value": "8.00" }
                    }
                },
                "items": [{
                    "name": "BPC-157 (10mg)",
                    "unit_amount": { "value": "50.00" },
                    "quantity": "1"
                }],
                "shipping": {
                    "address": {
                        "address_line_1": "100 Main St",
                        "admin_area_2": "Portland",
                        "admin_area_1": "OR",
                        "postal_code": "97201"
                    }
                },
                "payments": {
                    "captures": [{ "id": "3C679366HH908993F" }]
                }
            }]
        })
    }

    #[test]
    fn test_reconstruct_intent_from_completed_order() {
        let order: OrderResponse =
            serde_json::from_value(completed_order_json()).unwrap();
        let intent = reconstruct_intent(&order).unwrap();

        assert_eq!(intent.order_number, "TL-A1B2C3D4E5");
        assert_eq!(intent.total, Money::from_cents(5_800));
        assert_eq!(intent.subtotal, Money::from_cents(5_000));
        assert_eq!(intent.shipping, Money::from_cents(800));
        assert_eq!(intent.items.len(), 1);
        let item = intent.items.first().unwrap();
        assert_eq!(item.product_name, "BPC-157");
        assert_eq!(item.size, "10mg");
        assert_eq!(intent.address.city, "Portland");
        assert!(matches!(intent.owner, OrderOwner::Guest(_)));
    }

    #[test]
    fn test_capture_id_extraction_requires_captures() {
        let mut json = completed_order_json();
        json["purchase_units"][0]["payments"] = serde_json::json!({ "captures": [] });
        let order: OrderResponse = serde_json::from_value(json).unwrap();

        let capture = order
            .purchase_units
            .first()
            .and_then(|unit| unit.payments.as_ref())
            .and_then(|payments| payments.captures.first());
        assert!(capture.is_none());
    }

    #[tokio::test]
    async fn test_create_session_rejects_empty_intent_before_network() {
        let config = PayPalConfig {
            client_id: "client".to_owned(),
            client_secret: SecretString::from("secret"),
            api_base: "http://127.0.0.1:1".to_owned(),
        };
        let provider = PayPalProvider::new(&config);

        let mut intent = test_intent();
        intent.items.clear();

        let err = provider.create_session(&intent).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidIntent(_)));
    }
}
