//! Membership repository for database operations.
//!
//! Membership rows are written by billing reconciliation and by
//! administrative grants; they are never deleted, only transitioned to
//! `inactive`. `user_id` is unique.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use thistle_core::{MembershipId, MembershipStatus, UserId};

use super::RepositoryError;
use crate::models::Membership;

/// Repository for membership rows.
pub struct MembershipRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> MembershipRepository<'a> {
    /// Create a new membership repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get the membership row for a user, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if stored data is invalid.
    pub async fn get_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Membership>, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, status, current_period_start, current_period_end,
                   billing_customer_ref, created_at, updated_at
            FROM memberships
            WHERE user_id = $1
            ",
        )
        .bind(user_id.as_i32())
        .fetch_optional(self.pool)
        .await?;

        row.as_ref().map(map_membership).transpose()
    }

    /// Create or update a user's membership from a reconciliation result
    /// or an administrative grant.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the write fails.
    pub async fn upsert(
        &self,
        user_id: UserId,
        status: MembershipStatus,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        billing_customer_ref: Option<&str>,
    ) -> Result<Membership, RepositoryError> {
        let row = sqlx::query(
            r"
            INSERT INTO memberships
                (user_id, status, current_period_start, current_period_end, billing_customer_ref)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id)
            DO UPDATE SET status = EXCLUDED.status,
                          current_period_start = EXCLUDED.current_period_start,
                          current_period_end = EXCLUDED.current_period_end,
                          billing_customer_ref = COALESCE(EXCLUDED.billing_customer_ref, memberships.billing_customer_ref),
                          updated_at = now()
            RETURNING id, user_id, status, current_period_start, current_period_end,
                      billing_customer_ref, created_at, updated_at
            ",
        )
        .bind(user_id.as_i32())
        .bind(status.to_string())
        .bind(period_start)
        .bind(period_end)
        .bind(billing_customer_ref)
        .fetch_one(self.pool)
        .await?;

        map_membership(&row)
    }
}

/// Map a database row to the `Membership` domain type.
fn map_membership(row: &PgRow) -> Result<Membership, RepositoryError> {
    let status: String = row.try_get("status")?;
    let status: MembershipStatus = status
        .parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid membership status: {e}")))?;

    Ok(Membership {
        id: MembershipId::new(row.try_get("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        status,
        current_period_start: row.try_get::<DateTime<Utc>, _>("current_period_start")?,
        current_period_end: row.try_get::<DateTime<Utc>, _>("current_period_end")?,
        billing_customer_ref: row.try_get("billing_customer_ref")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}
