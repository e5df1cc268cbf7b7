//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::cache::KeyValueCache;
use crate::cart::{CartStore, DEVICE_CART_TTL};
use crate::checkout::verifier::PaymentVerifier;
use crate::config::StorefrontConfig;
use crate::fulfillment::FulfillmentDispatcher;
use crate::membership::{BillingClient, MembershipService};
use crate::payment::{PayPalProvider, StripeProvider};
use crate::pricing::{PriceBook, PriceBookError};

/// Anonymous device-cart cache capacity.
const DEVICE_CART_CAPACITY: u64 = 100_000;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`; holds the long-lived clients and the
/// authoritative cart state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    cart_store: CartStore,
    stripe: StripeProvider,
    paypal: PayPalProvider,
    verifier: PaymentVerifier,
    membership: MembershipService<BillingClient>,
    price_book: PriceBook,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Starts the fulfillment worker as a side effect; call once at
    /// startup.
    ///
    /// # Errors
    ///
    /// Returns `PriceBookError` if the configured member price override
    /// table is invalid.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, PriceBookError> {
        let price_book = PriceBook::from_config(config.member_price_overrides.as_deref())?;

        let cart_store = CartStore::new(
            pool.clone(),
            KeyValueCache::new(DEVICE_CART_TTL, DEVICE_CART_CAPACITY),
        );
        let fulfillment = FulfillmentDispatcher::start(config.fulfillment_webhook_url.clone());
        let verifier = PaymentVerifier::new(pool.clone(), cart_store.clone(), fulfillment);

        let stripe = StripeProvider::new(&config.stripe, &config.base_url);
        let paypal = PayPalProvider::new(&config.paypal);
        let membership = MembershipService::new(pool.clone(), BillingClient::new(&config.stripe));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                cart_store,
                stripe,
                paypal,
                verifier,
                membership,
                price_book,
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get a reference to the cart store.
    #[must_use]
    pub fn cart_store(&self) -> &CartStore {
        &self.inner.cart_store
    }

    /// Get a reference to the card-rail provider.
    #[must_use]
    pub fn stripe(&self) -> &StripeProvider {
        &self.inner.stripe
    }

    /// Get a reference to the wallet-rail provider.
    #[must_use]
    pub fn paypal(&self) -> &PayPalProvider {
        &self.inner.paypal
    }

    /// Get a reference to the payment verifier.
    #[must_use]
    pub fn verifier(&self) -> &PaymentVerifier {
        &self.inner.verifier
    }

    /// Get a reference to the membership service.
    #[must_use]
    pub fn membership(&self) -> &MembershipService<BillingClient> {
        &self.inner.membership
    }

    /// Get a reference to the member price book.
    #[must_use]
    pub fn price_book(&self) -> &PriceBook {
        &self.inner.price_book
    }

    /// Spawn the background membership refresh task.
    pub fn start_membership_refresh(&self) {
        let _handle = self.inner.membership.spawn_refresh_task();
    }
}
