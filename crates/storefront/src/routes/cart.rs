//! Cart route handlers.
//!
//! Every handler returns the full post-mutation cart snapshot so the
//! client can rerender without a second round trip. Unit prices arrive
//! from the catalog collaborator with the add request; checkout
//! validation bounds them again before any money moves.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use thistle_core::Money;

use crate::error::Result;
use crate::models::Cart;
use crate::state::AppState;

use super::cart_owner;

/// Cart snapshot returned by every cart handler.
#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub items: Vec<CartLineView>,
    pub subtotal: Money,
    pub item_count: u32,
}

/// One cart line as the client sees it.
#[derive(Debug, Serialize)]
pub struct CartLineView {
    pub product_name: String,
    pub size: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            subtotal: cart.subtotal(),
            item_count: cart.item_count(),
            items: cart
                .items
                .into_iter()
                .map(|item| CartLineView {
                    line_total: item.line_total(),
                    product_name: item.product_name,
                    size: item.size,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
        }
    }
}

/// Add-to-cart request body.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_name: String,
    pub size: String,
    pub unit_price: Money,
}

/// Update-quantity request body.
#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub product_name: String,
    pub size: String,
    pub quantity: u32,
}

/// Remove-line request body.
#[derive(Debug, Deserialize)]
pub struct RemoveItemRequest {
    pub product_name: String,
    pub size: String,
}

/// `GET /cart` - current cart snapshot.
pub async fn show(State(state): State<AppState>, session: Session) -> Result<Json<CartResponse>> {
    let owner = cart_owner(&session).await?;
    let cart = state.cart_store().get(&owner).await?;
    Ok(Json(cart.into()))
}

/// `POST /cart/add` - add one unit of `(product, size)`.
#[instrument(skip_all, fields(product = %body.product_name, size = %body.size))]
pub async fn add(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<AddItemRequest>,
) -> Result<Json<CartResponse>> {
    let owner = cart_owner(&session).await?;
    let cart = state
        .cart_store()
        .add_item(&owner, &body.product_name, &body.size, body.unit_price)
        .await?;
    Ok(Json(cart.into()))
}

/// `POST /cart/update` - set a line's quantity exactly; 0 removes it.
#[instrument(skip_all, fields(product = %body.product_name, size = %body.size, qty = body.quantity))]
pub async fn update(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<UpdateQuantityRequest>,
) -> Result<Json<CartResponse>> {
    let owner = cart_owner(&session).await?;
    let cart = state
        .cart_store()
        .update_quantity(&owner, &body.product_name, &body.size, body.quantity)
        .await?;
    Ok(Json(cart.into()))
}

/// `POST /cart/remove` - remove a line.
#[instrument(skip_all, fields(product = %body.product_name, size = %body.size))]
pub async fn remove(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<RemoveItemRequest>,
) -> Result<Json<CartResponse>> {
    let owner = cart_owner(&session).await?;
    let cart = state
        .cart_store()
        .remove_item(&owner, &body.product_name, &body.size)
        .await?;
    Ok(Json(cart.into()))
}

/// `POST /cart/clear` - empty the cart.
pub async fn clear(State(state): State<AppState>, session: Session) -> Result<Json<CartResponse>> {
    let owner = cart_owner(&session).await?;
    state.cart_store().clear(&owner).await?;
    Ok(Json(Cart::empty().into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::CartItem;

    #[test]
    fn test_cart_response_shape() {
        let cart = Cart {
            items: vec![CartItem {
                product_name: "BPC-157".to_owned(),
                size: "10mg".to_owned(),
                quantity: 2,
                unit_price: Money::from_cents(10_400),
            }],
        };

        let response: CartResponse = cart.into();
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["item_count"], 2);
        assert_eq!(json["subtotal"], "208.00");
        assert_eq!(json["items"][0]["line_total"], "208.00");
        assert_eq!(json["items"][0]["unit_price"], "104.00");
    }

    #[test]
    fn test_add_request_parses_price_string() {
        let body: AddItemRequest = serde_json::from_str(
            r#"{"product_name": "BPC-157", "size": "10mg", "unit_price": "104.00"}"#,
        )
        .unwrap();
        assert_eq!(body.unit_price, Money::from_cents(10_400));
    }
}
