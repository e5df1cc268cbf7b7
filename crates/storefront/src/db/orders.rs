//! Order repository for database operations.
//!
//! The unique constraint on `payment_reference` is the final arbiter of
//! order idempotency: when two verification calls race, exactly one insert
//! wins and the loser observes `RepositoryError::Conflict`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use thistle_core::{Email, Money, OrderId, OrderStatus, UserId};

use super::RepositoryError;
use crate::models::{CartItem, Order, OrderIntent, ShippingAddress};

/// Repository for persisted orders.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

const ORDER_COLUMNS: &str = "id, order_number, items, subtotal, shipping, total, \
     email, street, city, state, zip, payment_reference, status, user_id, guest_email, \
     tracking_number, carrier, internal_notes, created_at, updated_at";

impl<'a> OrderRepository<'a> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new order from a confirmed payment.
    ///
    /// The order is created with `status = processing`; items, totals, and
    /// the payment reference are never updated after this insert.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if an order already exists for
    /// this payment reference (the caller treats that as "already
    /// persisted", not as a failure).
    /// Returns `RepositoryError::Database` for other database errors.
    pub async fn insert(
        &self,
        intent: &OrderIntent,
        payment_reference: &str,
    ) -> Result<Order, RepositoryError> {
        let items = serde_json::to_value(&intent.items).map_err(|e| {
            RepositoryError::DataCorruption(format!("failed to serialize order items: {e}"))
        })?;

        let (user_id, guest_email) = match &intent.owner {
            crate::models::OrderOwner::User(id) => (Some(id.as_i32()), None),
            crate::models::OrderOwner::Guest(email) => (None, Some(email.as_str().to_owned())),
        };

        let row = sqlx::query(&format!(
            r"
            INSERT INTO orders
                (order_number, items, subtotal, shipping, total,
                 email, street, city, state, zip,
                 payment_reference, status, user_id, guest_email)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(&intent.order_number)
        .bind(items)
        .bind(intent.subtotal.amount())
        .bind(intent.shipping.amount())
        .bind(intent.total.amount())
        .bind(intent.address.email.as_str())
        .bind(&intent.address.street)
        .bind(&intent.address.city)
        .bind(&intent.address.state)
        .bind(&intent.address.zip)
        .bind(payment_reference)
        .bind(OrderStatus::Processing.to_string())
        .bind(user_id)
        .bind(guest_email)
        .fetch_one(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict(format!(
                    "order already exists for payment reference {payment_reference}"
                ));
            }
            RepositoryError::Database(e)
        })?;

        map_order(&row)
    }

    /// Look up an order by its payment reference.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if stored data is invalid.
    pub async fn get_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_reference = $1"
        ))
            .bind(payment_reference)
            .fetch_optional(self.pool)
            .await?;

        row.as_ref().map(map_order).transpose()
    }

    /// Look up an order by its order number.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if stored data is invalid.
    pub async fn get_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"
        ))
            .bind(order_number)
            .fetch_optional(self.pool)
            .await?;

        row.as_ref().map(map_order).transpose()
    }
}

/// Map a database row to the `Order` domain type.
fn map_order(row: &PgRow) -> Result<Order, RepositoryError> {
    let items: serde_json::Value = row.try_get("items")?;
    let items: Vec<CartItem> = serde_json::from_value(items).map_err(|e| {
        RepositoryError::DataCorruption(format!("invalid order items in database: {e}"))
    })?;

    let status: String = row.try_get("status")?;
    let status: OrderStatus = status
        .parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid order status: {e}")))?;

    let email: String = row.try_get("email")?;
    let email = Email::parse(&email).map_err(|e| {
        RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
    })?;

    let guest_email: Option<String> = row.try_get("guest_email")?;
    let guest_email = guest_email
        .map(|e| Email::parse(&e))
        .transpose()
        .map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid guest email in database: {e}"))
        })?;

    let subtotal: Decimal = row.try_get("subtotal")?;
    let shipping: Decimal = row.try_get("shipping")?;
    let total: Decimal = row.try_get("total")?;

    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        order_number: row.try_get("order_number")?,
        items,
        subtotal: Money::new(subtotal),
        shipping: Money::new(shipping),
        total: Money::new(total),
        address: ShippingAddress {
            email,
            street: row.try_get("street")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip: row.try_get("zip")?,
        },
        payment_reference: row.try_get("payment_reference")?,
        status,
        user_id: row
            .try_get::<Option<i32>, _>("user_id")?
            .map(UserId::new),
        guest_email,
        tracking_number: row.try_get("tracking_number")?,
        carrier: row.try_get("carrier")?,
        internal_notes: row.try_get("internal_notes")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}
