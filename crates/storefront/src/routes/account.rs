//! Account route handlers: the sign-in cart merge hook and membership
//! status.
//!
//! Authentication itself is an external collaborator; by the time these
//! handlers run, the session either carries a user id or it doesn't.

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use thistle_core::Money;

use crate::cart::CartOwner;
use crate::error::Result;
use crate::membership::ResolvedMembership;
use crate::models::session_keys;
use crate::state::AppState;

use super::{cart::CartResponse, require_user};

/// Resolved membership status as the client sees it.
#[derive(Debug, Serialize)]
pub struct MembershipResponse {
    /// `"optimistic"` when served from cache, `"reconciled"` when the
    /// billing source was consulted.
    pub state: &'static str,
    pub is_member: bool,
    pub canceled: bool,
    pub subscription_end: Option<DateTime<Utc>>,
}

/// Member price quote query.
#[derive(Debug, Deserialize)]
pub struct PriceQuoteQuery {
    pub product: String,
    pub size: String,
    pub base: Money,
}

/// Member price quote.
#[derive(Debug, Serialize)]
pub struct PriceQuoteResponse {
    pub unit_price: Money,
    pub is_member: bool,
}

/// `POST /account/sign-in-complete` - merge the anonymous cart into the
/// user's server cart.
///
/// Runs at most once per sign-in: a session flag marks the merge done,
/// and re-invocation returns the server cart unchanged. The merge itself
/// is also idempotent (an already-cleared local cart merges as a no-op),
/// so a crash between the merge and the flag write is safe to retry.
#[instrument(skip_all)]
pub async fn sign_in_complete(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<CartResponse>> {
    let user_id = require_user(&session).await?;

    if session
        .get::<bool>(session_keys::CART_MERGED)
        .await?
        .unwrap_or(false)
    {
        let cart = state.cart_store().get(&CartOwner::User(user_id)).await?;
        return Ok(Json(cart.into()));
    }

    let cart = match session.get::<String>(session_keys::CART_TOKEN).await? {
        Some(token) => {
            let merged = state
                .cart_store()
                .merge_on_sign_in(&CartOwner::Anonymous(token), user_id)
                .await?;
            session.remove::<String>(session_keys::CART_TOKEN).await?;
            merged
        }
        None => state.cart_store().get(&CartOwner::User(user_id)).await?,
    };

    session.insert(session_keys::CART_MERGED, true).await?;
    Ok(Json(cart.into()))
}

/// `GET /account/membership` - resolved membership status for pricing.
#[instrument(skip_all)]
pub async fn membership(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<MembershipResponse>> {
    let user_id = require_user(&session).await?;
    let resolved = state.membership().resolve(user_id).await?;

    let state_name = match &resolved {
        ResolvedMembership::OptimisticallyValid(_) => "optimistic",
        ResolvedMembership::Reconciled(_) => "reconciled",
    };
    let snapshot = resolved.snapshot();

    Ok(Json(MembershipResponse {
        state: state_name,
        is_member: snapshot.is_member,
        canceled: snapshot.canceled,
        subscription_end: snapshot.subscription_end,
    }))
}

/// `GET /account/price` - the unit price this session pays for a
/// `(product, size)`.
///
/// Anonymous sessions always quote the base price.
#[instrument(skip_all, fields(product = %query.product, size = %query.size))]
pub async fn price_quote(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<PriceQuoteQuery>,
) -> Result<Json<PriceQuoteResponse>> {
    let is_member = match super::current_user(&session).await? {
        Some(user_id) => state.membership().resolve(user_id).await?.snapshot().is_member,
        None => false,
    };

    let unit_price =
        state
            .price_book()
            .member_price(query.base, &query.product, &query.size, is_member);

    Ok(Json(PriceQuoteResponse {
        unit_price,
        is_member,
    }))
}
