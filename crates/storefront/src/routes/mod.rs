//! HTTP route handlers for the storefront checkout subsystem.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                  - Liveness check
//! GET  /health/ready            - Readiness check (database)
//!
//! # Cart (JSON)
//! GET  /cart                    - Current cart snapshot
//! POST /cart/add                - Add one unit of (product, size)
//! POST /cart/update             - Set a line's quantity (0 removes)
//! POST /cart/remove             - Remove a line
//! POST /cart/clear              - Empty the cart
//!
//! # Checkout
//! POST /checkout/card           - Start a card-rail checkout (redirect URL)
//! GET  /checkout/card/return    - Verify a card-rail session on return
//! POST /checkout/wallet         - Start a wallet-rail checkout (order id)
//! POST /checkout/wallet/capture - Capture and verify a wallet-rail order
//!
//! # Account (requires auth)
//! POST /account/sign-in-complete - Merge the anonymous cart after sign-in
//! GET  /account/membership       - Resolved membership status
//! GET  /account/price            - Member price quote for a (product, size)
//! ```
//!
//! Page rendering, catalog, and authentication itself live in external
//! collaborators; these handlers speak JSON only.

pub mod account;
pub mod cart;
pub mod checkout;

use axum::{
    Router,
    routing::{get, post},
};
use tower_sessions::Session;
use uuid::Uuid;

use thistle_core::UserId;

use crate::cart::CartOwner;
use crate::error::{AppError, Result};
use crate::models::session_keys;
use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
        .route("/clear", post(cart::clear))
}

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/card", post(checkout::start_card))
        .route("/card/return", get(checkout::card_return))
        .route("/wallet", post(checkout::start_wallet))
        .route("/wallet/capture", post(checkout::capture_wallet))
}

/// Create the account routes router.
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/sign-in-complete", post(account::sign_in_complete))
        .route("/membership", get(account::membership))
        .route("/price", get(account::price_quote))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", cart_routes())
        .nest("/checkout", checkout_routes())
        .nest("/account", account_routes())
}

/// The authenticated user for this session, if any.
///
/// The user id is written by the auth collaborator on sign-in.
pub(crate) async fn current_user(session: &Session) -> Result<Option<UserId>> {
    Ok(session
        .get::<i32>(session_keys::USER_ID)
        .await?
        .map(UserId::new))
}

/// Resolve the cart owner for this session.
///
/// Authenticated sessions own the server cart row; anonymous sessions get
/// a device cart keyed by a token minted on first touch.
pub(crate) async fn cart_owner(session: &Session) -> Result<CartOwner> {
    if let Some(user_id) = current_user(session).await? {
        return Ok(CartOwner::User(user_id));
    }

    if let Some(token) = session.get::<String>(session_keys::CART_TOKEN).await? {
        return Ok(CartOwner::Anonymous(token));
    }

    let token = Uuid::new_v4().to_string();
    session.insert(session_keys::CART_TOKEN, &token).await?;
    Ok(CartOwner::Anonymous(token))
}

/// The authenticated user, or a 401.
pub(crate) async fn require_user(session: &Session) -> Result<UserId> {
    current_user(session)
        .await?
        .ok_or_else(|| AppError::Unauthorized("sign in required".to_owned()))
}
