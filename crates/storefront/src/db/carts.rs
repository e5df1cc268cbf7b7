//! Cart repository for database operations.
//!
//! A signed-in user's cart is a single row holding the item array as JSON,
//! the same shape the device-local store uses for anonymous sessions.
//! `user_id` is unique, so concurrent writers for one user serialize on
//! the row.

use sqlx::{PgPool, Row};

use thistle_core::UserId;

use super::RepositoryError;
use crate::models::CartItem;

/// Repository for server-side cart rows.
pub struct CartRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CartRepository<'a> {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get the cart row for a user, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if the stored JSON is invalid.
    pub async fn get(&self, user_id: UserId) -> Result<Option<Vec<CartItem>>, RepositoryError> {
        let row = sqlx::query("SELECT items FROM carts WHERE user_id = $1")
            .bind(user_id.as_i32())
            .fetch_optional(self.pool)
            .await?;

        match row {
            Some(r) => {
                let items: serde_json::Value = r.try_get("items")?;
                let items: Vec<CartItem> = serde_json::from_value(items).map_err(|e| {
                    RepositoryError::DataCorruption(format!("invalid cart items in database: {e}"))
                })?;
                Ok(Some(items))
            }
            None => Ok(None),
        }
    }

    /// Write the user's cart row, creating it on first mutation.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the write fails.
    pub async fn upsert(
        &self,
        user_id: UserId,
        items: &[CartItem],
    ) -> Result<(), RepositoryError> {
        let items = serde_json::to_value(items).map_err(|e| {
            RepositoryError::DataCorruption(format!("failed to serialize cart items: {e}"))
        })?;

        sqlx::query(
            r"
            INSERT INTO carts (user_id, items)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET items = EXCLUDED.items, updated_at = now()
            ",
        )
        .bind(user_id.as_i32())
        .bind(items)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Delete the user's cart row.
    ///
    /// Deleting an absent row is not an error; clearing is idempotent.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn clear(&self, user_id: UserId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user_id.as_i32())
            .execute(self.pool)
            .await?;

        Ok(())
    }
}
