//! Payment verification and idempotent order persistence.
//!
//! The verifier is the only writer of order rows. It trusts nothing the
//! client reports: it asks the provider whether money actually moved, then
//! persists exactly one order per capture reference. The uniqueness
//! constraint on `payment_reference` is the final arbiter - when two
//! verification calls race, the losing insert observes a conflict and is
//! answered with the winner's order, not an error.

use sqlx::PgPool;
use tracing::instrument;

use thistle_core::{Money, OrderId};

use crate::cart::{CartOwner, CartStore};
use crate::db::{OrderRepository, RepositoryError};
use crate::fulfillment::{FulfillmentDispatcher, FulfillmentEvent};
use crate::models::Order;
use crate::payment::{PaymentError, PaymentProvider, PaymentStatus};

/// Errors from verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Reaching the provider failed; nothing was persisted and the caller
    /// may retry verification.
    #[error(transparent)]
    Provider(#[from] PaymentError),

    /// The provider reports the payment has not completed. No order was
    /// created; checkout is safe to retry from scratch.
    #[error("payment not completed for {provider_ref}")]
    Incomplete { provider_ref: String },

    /// The provider confirmed payment but persistence failed. Money has
    /// moved with no order row; this is escalated, never shown to the
    /// buyer as a payment failure.
    #[error("order persistence failed after confirmed payment ({payment_reference}): {source}")]
    Persistence {
        payment_reference: String,
        source: RepositoryError,
    },
}

/// The persisted order a verification call resolved to.
#[derive(Debug, Clone)]
pub struct VerifiedOrder {
    pub order_id: OrderId,
    pub order_number: String,
    pub total: Money,
    /// True when an earlier verification already persisted this order;
    /// callers treat both outcomes as success.
    pub already_persisted: bool,
}

impl From<&Order> for VerifiedOrder {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            total: order.total,
            already_persisted: false,
        }
    }
}

/// Confirms payment with a provider and persists orders idempotently.
#[derive(Clone)]
pub struct PaymentVerifier {
    pool: PgPool,
    cart_store: CartStore,
    fulfillment: FulfillmentDispatcher,
}

impl PaymentVerifier {
    /// Create a verifier.
    #[must_use]
    pub const fn new(
        pool: PgPool,
        cart_store: CartStore,
        fulfillment: FulfillmentDispatcher,
    ) -> Self {
        Self {
            pool,
            cart_store,
            fulfillment,
        }
    }

    /// Verify a provider reference and persist its order exactly once.
    ///
    /// # Errors
    ///
    /// `VerifyError::Provider` if the provider is unreachable,
    /// `VerifyError::Incomplete` if it reports a non-success status, and
    /// `VerifyError::Persistence` if the order insert fails after the
    /// provider confirmed payment.
    #[instrument(skip(self, provider), fields(provider_ref = %provider_ref))]
    pub async fn verify_and_persist<P: PaymentProvider>(
        &self,
        provider: &P,
        provider_ref: &str,
    ) -> Result<VerifiedOrder, VerifyError> {
        let verification = provider.verify(provider_ref).await?;

        if verification.status != PaymentStatus::Paid {
            return Err(VerifyError::Incomplete {
                provider_ref: provider_ref.to_owned(),
            });
        }

        // From here on, money has moved: every failure is a persistence
        // escalation, never a payment failure.
        let reference = verification.capture_id.clone();
        let repo = OrderRepository::new(&self.pool);

        if let Some(existing) = repo
            .get_by_payment_reference(&reference)
            .await
            .map_err(|e| persistence(&reference, e))?
        {
            tracing::info!(
                order_number = %existing.order_number,
                "payment reference already persisted"
            );
            return Ok(VerifiedOrder {
                already_persisted: true,
                ..VerifiedOrder::from(&existing)
            });
        }

        let intent = verification.intent.ok_or_else(|| {
            VerifyError::Provider(PaymentError::Malformed(
                "paid verification carries no order intent".to_owned(),
            ))
        })?;

        let order = match repo.insert(&intent, &reference).await {
            Ok(order) => order,
            Err(RepositoryError::Conflict(_)) => {
                // A racing verification won the insert; its row is the
                // order.
                let existing = repo
                    .get_by_payment_reference(&reference)
                    .await
                    .map_err(|e| persistence(&reference, e))?
                    .ok_or_else(|| {
                        persistence(
                            &reference,
                            RepositoryError::DataCorruption(
                                "conflicting order row vanished".to_owned(),
                            ),
                        )
                    })?;
                return Ok(VerifiedOrder {
                    already_persisted: true,
                    ..VerifiedOrder::from(&existing)
                });
            }
            Err(e) => return Err(persistence(&reference, e)),
        };

        tracing::info!(
            order_number = %order.order_number,
            order_id = %order.id,
            total = %order.total,
            "order persisted"
        );

        // Post-persistence side effects must not unwind the completed
        // checkout.
        if let Some(user_id) = intent.owner.user_id() {
            if let Err(e) = self.cart_store.clear(&CartOwner::User(user_id)).await {
                tracing::warn!(user = %user_id, error = %e, "cart clear after order failed");
            }
        }

        self.fulfillment.dispatch(FulfillmentEvent::new(
            order.id,
            order.order_number.clone(),
            intent.address,
            intent.items,
        ));

        Ok(VerifiedOrder::from(&order))
    }
}

/// Wrap a repository failure after confirmed payment.
fn persistence(payment_reference: &str, source: RepositoryError) -> VerifyError {
    VerifyError::Persistence {
        payment_reference: payment_reference.to_owned(),
        source,
    }
}
