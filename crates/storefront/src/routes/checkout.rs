//! Checkout route handlers.
//!
//! Starting a checkout never writes an order; the verification handlers
//! are the only paths that do, and both funnel through the idempotent
//! [`PaymentVerifier`](crate::checkout::verifier::PaymentVerifier).

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use thistle_core::{Money, OrderId};

use crate::checkout::{self, validation::AddressInput, verifier::VerifiedOrder};
use crate::error::{AppError, Result};
use crate::models::{OrderOwner, ShippingAddress};
use crate::state::AppState;

use super::{cart_owner, current_user};

/// Response to starting a card-rail checkout.
#[derive(Debug, Serialize)]
pub struct CardCheckoutResponse {
    pub order_number: String,
    /// Hosted payment page to send the buyer to.
    pub redirect_url: String,
}

/// Response to starting a wallet-rail checkout.
#[derive(Debug, Serialize)]
pub struct WalletCheckoutResponse {
    pub order_number: String,
    /// Provider-side order id the client approval UI drives.
    pub provider_order_id: String,
}

/// Response to a successful verification on either rail.
#[derive(Debug, Serialize)]
pub struct VerifiedOrderResponse {
    pub order_id: OrderId,
    pub order_number: String,
    pub total: Money,
    pub status: &'static str,
}

impl From<VerifiedOrder> for VerifiedOrderResponse {
    fn from(order: VerifiedOrder) -> Self {
        Self {
            order_id: order.order_id,
            order_number: order.order_number,
            total: order.total,
            status: "processing",
        }
    }
}

/// Query parameters on the card-rail return redirect.
#[derive(Debug, Deserialize)]
pub struct CardReturnQuery {
    pub session_id: String,
}

/// Wallet-rail capture request body.
#[derive(Debug, Deserialize)]
pub struct WalletCaptureRequest {
    pub provider_order_id: String,
}

/// Who this checkout belongs to: the signed-in user, or a guest
/// identified by the shipping email.
async fn order_owner(session: &Session, address: &ShippingAddress) -> Result<OrderOwner> {
    Ok(match current_user(session).await? {
        Some(user_id) => OrderOwner::User(user_id),
        None => OrderOwner::Guest(address.email.clone()),
    })
}

/// `POST /checkout/card` - validate and open a hosted checkout session.
#[instrument(skip_all)]
pub async fn start_card(
    State(state): State<AppState>,
    session: Session,
    Json(input): Json<AddressInput>,
) -> Result<Json<CardCheckoutResponse>> {
    let address = checkout::validation::validate_address(&input)?;
    let owner = order_owner(&session, &address).await?;
    let cart = state.cart_store().get(&cart_owner(&session).await?).await?;

    let started = checkout::begin(
        state.stripe(),
        "card",
        &cart,
        address,
        owner,
        state.config().shipping_flat,
    )
    .await
    .map_err(app_error)?;

    let redirect_url = started.redirect_url.ok_or_else(|| {
        AppError::PaymentProvider(crate::payment::PaymentError::Malformed(
            "card session has no redirect URL".to_owned(),
        ))
    })?;

    Ok(Json(CardCheckoutResponse {
        order_number: started.order_number,
        redirect_url,
    }))
}

/// `GET /checkout/card/return` - verify the session the buyer returned
/// with and persist the order exactly once.
#[instrument(skip_all, fields(session_id = %query.session_id))]
pub async fn card_return(
    State(state): State<AppState>,
    Query(query): Query<CardReturnQuery>,
) -> Result<Json<VerifiedOrderResponse>> {
    let order = state
        .verifier()
        .verify_and_persist(state.stripe(), &query.session_id)
        .await?;
    Ok(Json(order.into()))
}

/// `POST /checkout/wallet` - validate and create a provider-side order.
#[instrument(skip_all)]
pub async fn start_wallet(
    State(state): State<AppState>,
    session: Session,
    Json(input): Json<AddressInput>,
) -> Result<Json<WalletCheckoutResponse>> {
    let address = checkout::validation::validate_address(&input)?;
    let owner = order_owner(&session, &address).await?;
    let cart = state.cart_store().get(&cart_owner(&session).await?).await?;

    let started = checkout::begin(
        state.paypal(),
        "wallet",
        &cart,
        address,
        owner,
        state.config().shipping_flat,
    )
    .await
    .map_err(app_error)?;

    Ok(Json(WalletCheckoutResponse {
        order_number: started.order_number,
        provider_order_id: started.provider_ref,
    }))
}

/// `POST /checkout/wallet/capture` - capture an approved wallet-rail
/// order and persist it exactly once.
#[instrument(skip_all, fields(provider_order_id = %body.provider_order_id))]
pub async fn capture_wallet(
    State(state): State<AppState>,
    Json(body): Json<WalletCaptureRequest>,
) -> Result<Json<VerifiedOrderResponse>> {
    let order = state
        .verifier()
        .verify_and_persist(state.paypal(), &body.provider_order_id)
        .await?;
    Ok(Json(order.into()))
}

/// Map a checkout start failure onto the app error taxonomy.
fn app_error(err: checkout::CheckoutError) -> AppError {
    match err {
        checkout::CheckoutError::Validation(e) => AppError::Validation(e),
        checkout::CheckoutError::Payment(e) => e.into(),
    }
}
