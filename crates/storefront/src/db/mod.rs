//! Database operations for storefront `PostgreSQL`.
//!
//! # Tables
//!
//! - `users` - Site authentication (owned by the auth collaborator)
//! - `sessions` - Tower-sessions storage
//! - `carts` - One row per user holding the cart's JSON item array
//! - `orders` - Persisted orders, unique on `payment_reference`
//! - `memberships` - One row per user, administered + reconciled
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and embedded
//! at compile time; run them with [`run_migrations`] at deploy time.

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub mod carts;
pub mod memberships;
pub mod orders;

pub use carts::CartRepository;
pub use memberships::MembershipRepository;
pub use orders::OrderRepository;

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique payment reference).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Embedded migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Run pending migrations.
///
/// # Errors
///
/// Returns `sqlx::migrate::MigrateError` if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
