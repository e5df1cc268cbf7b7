//! Billing source for membership reconciliation.
//!
//! The authoritative answer to "does this account pay for membership"
//! lives in Stripe subscriptions. Only subscriptions carrying the
//! configured membership price are considered; everything else a customer
//! might be paying for is invisible here.

use std::future::Future;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::instrument;

use crate::config::StripeConfig;

/// Stripe API base URL.
const API_BASE: &str = "https://api.stripe.com";

/// Errors from billing lookups.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// HTTP transport failure reaching the billing source.
    #[error("billing request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The billing source rejected the request.
    #[error("billing error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Our credentials were rejected. Callers treat this as "not a
    /// member", never as a fatal error.
    #[error("billing authentication failed: {0}")]
    Auth(String),

    /// The response was missing fields we depend on.
    #[error("unexpected billing response: {0}")]
    Malformed(String),
}

/// A paying subscription found for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Canceled but still inside its paid period.
    pub canceled: bool,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// The billing lookup seam, faked in tests.
pub trait BillingSource: Send + Sync {
    /// Find the account's membership subscription, if any.
    fn membership_subscription(
        &self,
        customer_ref: &str,
    ) -> impl Future<Output = Result<Option<SubscriptionInfo>, BillingError>> + Send;
}

/// Stripe-backed billing source.
pub struct BillingClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
    /// Price id identifying the membership plan; with none configured,
    /// no subscription ever matches.
    member_price_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    #[serde(default)]
    data: Vec<Subscription>,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    status: String,
    #[serde(default)]
    cancel_at_period_end: bool,
    current_period_start: i64,
    current_period_end: i64,
    #[serde(default)]
    items: SubscriptionItems,
}

#[derive(Debug, Default, Deserialize)]
struct SubscriptionItems {
    #[serde(default)]
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    #[serde(default)]
    price: Option<Price>,
}

#[derive(Debug, Deserialize)]
struct Price {
    id: String,
}

impl BillingClient {
    /// Create a billing client from the Stripe configuration.
    #[must_use]
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: API_BASE.to_owned(),
            secret_key: config.secret_key.clone(),
            member_price_id: config.member_price_id.clone(),
        }
    }

    /// Override the API base (tests).
    #[cfg(test)]
    pub(crate) fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_owned();
        self
    }
}

impl BillingSource for BillingClient {
    #[instrument(skip(self), fields(customer = %customer_ref))]
    async fn membership_subscription(
        &self,
        customer_ref: &str,
    ) -> Result<Option<SubscriptionInfo>, BillingError> {
        let Some(price_id) = self.member_price_id.as_deref() else {
            return Ok(None);
        };

        let url = format!("{}/v1/subscriptions", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.secret_key.expose_secret())
            .query(&[
                ("customer", customer_ref),
                ("status", "all"),
                ("limit", "100"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BillingError::Auth(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BillingError::Api {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        let list: SubscriptionList = response
            .json()
            .await
            .map_err(|e| BillingError::Malformed(e.to_string()))?;

        Ok(select_subscription(&list, price_id))
    }
}

/// Pick the membership subscription out of an account's subscription list.
///
/// Considers only subscriptions whose items carry the membership price,
/// in an `active` or `canceled` state; with several, the one whose period
/// ends last wins.
fn select_subscription(list: &SubscriptionList, price_id: &str) -> Option<SubscriptionInfo> {
    list.data
        .iter()
        .filter(|sub| matches!(sub.status.as_str(), "active" | "canceled"))
        .filter(|sub| {
            sub.items
                .data
                .iter()
                .any(|item| item.price.as_ref().is_some_and(|price| price.id == price_id))
        })
        .filter_map(|sub| {
            Some(SubscriptionInfo {
                canceled: sub.status == "canceled" || sub.cancel_at_period_end,
                period_start: DateTime::from_timestamp(sub.current_period_start, 0)?,
                period_end: DateTime::from_timestamp(sub.current_period_end, 0)?,
            })
        })
        .max_by_key(|info| info.period_end)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn list(json: serde_json::Value) -> SubscriptionList {
        serde_json::from_value(json).unwrap()
    }

    fn subscription(status: &str, price: &str, period_end: i64) -> serde_json::Value {
        serde_json::json!({
            "status": status,
            "cancel_at_period_end": false,
            "current_period_start": period_end - 30 * 24 * 60 * 60,
            "current_period_end": period_end,
            "items": { "data": [{ "price": { "id": price } }] }
        })
    }

    #[test]
    fn test_select_matches_configured_price_only() {
        let list = list(serde_json::json!({
            "data": [
                subscription("active", "price_other", 2_000_000_000),
                subscription("active", "price_member", 1_900_000_000),
            ]
        }));

        let info = select_subscription(&list, "price_member").unwrap();
        assert_eq!(info.period_end.timestamp(), 1_900_000_000);
        assert!(!info.canceled);
    }

    #[test]
    fn test_select_ignores_incomplete_and_unpaid_states() {
        let list = list(serde_json::json!({
            "data": [
                subscription("incomplete", "price_member", 2_000_000_000),
                subscription("past_due", "price_member", 2_000_000_000),
                subscription("unpaid", "price_member", 2_000_000_000),
            ]
        }));

        assert_eq!(select_subscription(&list, "price_member"), None);
    }

    #[test]
    fn test_canceled_state_and_pending_cancellation_both_flag_canceled() {
        let canceled = list(serde_json::json!({
            "data": [subscription("canceled", "price_member", 2_000_000_000)]
        }));
        assert!(select_subscription(&canceled, "price_member").unwrap().canceled);

        let mut pending = subscription("active", "price_member", 2_000_000_000);
        pending["cancel_at_period_end"] = serde_json::json!(true);
        let pending = list(serde_json::json!({ "data": [pending] }));
        assert!(select_subscription(&pending, "price_member").unwrap().canceled);
    }

    #[test]
    fn test_latest_period_end_wins() {
        let list = list(serde_json::json!({
            "data": [
                subscription("canceled", "price_member", 1_800_000_000),
                subscription("active", "price_member", 2_000_000_000),
            ]
        }));

        let info = select_subscription(&list, "price_member").unwrap();
        assert_eq!(info.period_end.timestamp(), 2_000_000_000);
        assert!(!info.canceled);
    }

    #[tokio::test]
    async fn test_no_configured_price_short_circuits() {
        let config = StripeConfig {
            secret_key: SecretString::from("sk_test_xxx"),
            member_price_id: None,
        };
        // api_base points nowhere; the short circuit must fire first.
        let client = BillingClient::new(&config).with_api_base("http://127.0.0.1:1");

        let result = client.membership_subscription("cus_123").await.unwrap();
        assert_eq!(result, None);
    }
}
