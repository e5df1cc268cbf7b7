//! Domain models for the storefront.
//!
//! These types represent validated domain objects separate from database
//! row types and wire formats.

pub mod cart;
pub mod membership;
pub mod order;

pub use cart::{Cart, CartItem};
pub use membership::Membership;
pub use order::{Order, OrderIntent, OrderOwner, ShippingAddress};

/// Session keys used by the storefront.
pub mod session_keys {
    /// Authenticated user id (set by the auth collaborator on sign-in).
    pub const USER_ID: &str = "user_id";
    /// Anonymous cart owner token for this session.
    pub const CART_TOKEN: &str = "cart_token";
    /// Set once the anonymous cart has been merged after sign-in.
    pub const CART_MERGED: &str = "cart_merged";
}
