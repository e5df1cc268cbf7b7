//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures severe errors to Sentry
//! before responding to the client. All route handlers return
//! `Result<T, AppError>`.
//!
//! The one class that gets special treatment is a persistence failure after
//! the provider has confirmed payment: money has moved but no order row
//! exists. That must never read as "payment failed" to the buyer (a retry
//! would risk a second charge), so it maps to a neutral 202 "finalizing"
//! response while the payment reference is escalated for manual follow-up.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::cart::CartStoreError;
use crate::checkout::validation::ValidationError;
use crate::checkout::verifier::VerifyError;
use crate::db::RepositoryError;
use crate::payment::PaymentError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Checkout input failed validation. User-correctable; carries the
    /// field-level reason.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Reaching the payment provider failed. Retryable by the user; no
    /// money has moved.
    #[error("Payment provider error: {0}")]
    PaymentProvider(PaymentError),

    /// The provider reports the payment has not completed. No order was
    /// created; checkout can be retried from scratch.
    #[error("Payment has not completed")]
    PaymentIncomplete,

    /// Payment confirmed but the order insert failed. The most severe
    /// class; surfaced as a neutral "finalizing" outcome.
    #[error("Order persistence failed after confirmed payment (reference {payment_reference})")]
    OrderFinalizing { payment_reference: String },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Cart store operation failed.
    #[error("Cart error: {0}")]
    Cart(#[from] CartStoreError),

    /// Session store operation failed.
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            // A non-chargeable intent is a caller mistake, not a provider
            // outage.
            PaymentError::InvalidIntent(reason) => Self::BadRequest(reason),
            other => Self::PaymentProvider(other),
        }
    }
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Provider(e) => e.into(),
            VerifyError::Incomplete { .. } => Self::PaymentIncomplete,
            VerifyError::Persistence {
                payment_reference,
                source,
            } => {
                // The reference and cause go to the log for manual
                // reconciliation; the client sees only the neutral
                // outcome.
                tracing::error!(
                    payment_reference = %payment_reference,
                    error = %source,
                    "order persistence failed after confirmed payment"
                );
                Self::OrderFinalizing { payment_reference }
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture severe classes to Sentry. OrderFinalizing is the one to
        // page on: payment confirmed, no order row.
        if matches!(
            self,
            Self::Database(_) | Self::Cart(_) | Self::Session(_) | Self::OrderFinalizing { .. }
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            Self::PaymentIncomplete => StatusCode::PAYMENT_REQUIRED,
            Self::OrderFinalizing { .. } => StatusCode::ACCEPTED,
            Self::Database(_) | Self::Cart(_) | Self::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        };

        // Don't expose internal error details to clients.
        let message = match &self {
            Self::Database(_) | Self::Cart(_) | Self::Session(_) => {
                "Internal server error".to_string()
            }
            Self::PaymentProvider(_) => {
                "We couldn't reach the payment provider. You have not been charged; please try again."
                    .to_string()
            }
            Self::PaymentIncomplete => {
                "Your payment has not completed. You have not been charged; please try again."
                    .to_string()
            }
            Self::OrderFinalizing { .. } => {
                "Your payment was received and we're finalizing your order. \
                 If you don't get a confirmation email shortly, contact support."
                    .to_string()
            }
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_of(AppError::PaymentIncomplete),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(AppError::OrderFinalizing {
                payment_reference: "cs_test_123".to_string()
            }),
            StatusCode::ACCEPTED
        );
        assert_eq!(
            status_of(AppError::Unauthorized("no session".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AppError::NotFound("order".to_string())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_invalid_intent_maps_to_bad_request() {
        let err: AppError = PaymentError::InvalidIntent("cart is empty".to_string()).into();
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_finalizing_never_reads_as_payment_failure() {
        let err = AppError::OrderFinalizing {
            payment_reference: "cs_test_123".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let text = String::from_utf8_lossy(&body).to_lowercase();
        assert!(!text.contains("failed"));
        assert!(text.contains("finalizing"));
    }
}
