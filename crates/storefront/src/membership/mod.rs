//! Membership status resolution and reconciliation.
//!
//! Pricing needs a fast answer to "is this user a paying member". The
//! answer is served from an owner-checked 24-hour cache when possible
//! (zero network latency), and reconciled against the billing source
//! otherwise: billing subscription first, then the locally administered
//! membership row for manually granted access, then non-member.
//!
//! A background task re-reconciles recently active users on a fixed
//! interval, so a cancellation in the billing system propagates without
//! anyone touching their account page.

pub mod billing;

pub use billing::{BillingClient, BillingError, BillingSource, SubscriptionInfo};

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::instrument;

use thistle_core::{MembershipStatus, UserId};

use crate::cache::KeyValueCache;
use crate::db::{MembershipRepository, RepositoryError};
use crate::models::Membership;

/// How long a cached membership snapshot is served without reconciling.
pub const MEMBERSHIP_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How often recently active users are re-reconciled.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// The resolved membership facts pricing consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub is_member: bool,
    /// Canceled but still inside the paid period.
    pub canceled: bool,
    pub subscription_end: Option<DateTime<Utc>>,
}

impl MembershipSnapshot {
    /// The snapshot for an account with no membership at all.
    #[must_use]
    pub const fn non_member() -> Self {
        Self {
            is_member: false,
            canceled: false,
            subscription_end: None,
        }
    }
}

/// How a resolution was answered.
#[derive(Debug, Clone)]
pub enum ResolvedMembership {
    /// Served from a fresh, owner-matching cache entry; no network.
    OptimisticallyValid(MembershipSnapshot),
    /// Freshly reconciled against the billing source.
    Reconciled(MembershipSnapshot),
}

impl ResolvedMembership {
    /// The underlying snapshot, however it was obtained.
    #[must_use]
    pub const fn snapshot(&self) -> &MembershipSnapshot {
        match self {
            Self::OptimisticallyValid(s) | Self::Reconciled(s) => s,
        }
    }
}

/// Membership resolution service.
///
/// Cheaply cloneable; all clones share the cache and the active-user set.
pub struct MembershipService<B: BillingSource> {
    inner: Arc<MembershipServiceInner<B>>,
}

impl<B: BillingSource> Clone for MembershipService<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct MembershipServiceInner<B> {
    pool: PgPool,
    billing: B,
    cache: KeyValueCache<MembershipSnapshot>,
    /// Users resolved since the last refresh pass.
    active: StdMutex<HashSet<UserId>>,
}

impl<B: BillingSource + 'static> MembershipService<B> {
    /// Create a membership service.
    #[must_use]
    pub fn new(pool: PgPool, billing: B) -> Self {
        Self {
            inner: Arc::new(MembershipServiceInner {
                pool,
                billing,
                cache: KeyValueCache::new(MEMBERSHIP_CACHE_TTL, 10_000),
                active: StdMutex::new(HashSet::new()),
            }),
        }
    }

    /// Resolve the membership snapshot for a user.
    ///
    /// Served from cache when a fresh entry owned by this user exists;
    /// an expired or foreign-owned entry is discarded by the cache and
    /// triggers reconciliation instead.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if reading the membership row fails
    /// during reconciliation.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn resolve(&self, user_id: UserId) -> Result<ResolvedMembership, RepositoryError> {
        self.mark_active(user_id);

        if let Some(snapshot) = self
            .inner
            .cache
            .get(&cache_key(user_id), &owner_key(user_id))
            .await
        {
            return Ok(ResolvedMembership::OptimisticallyValid(snapshot));
        }

        let snapshot = self.reconcile(user_id).await?;
        Ok(ResolvedMembership::Reconciled(snapshot))
    }

    /// Reconcile a user's membership against the billing source and the
    /// administered row, writing the result back into the cache under
    /// this user's identity.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if reading or writing the membership
    /// row fails. Billing errors never propagate; they degrade to the
    /// administered row or non-member.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn reconcile(&self, user_id: UserId) -> Result<MembershipSnapshot, RepositoryError> {
        let repo = MembershipRepository::new(&self.inner.pool);
        let row = repo.get_by_user(user_id).await?;

        let external = match row.as_ref().and_then(|r| r.billing_customer_ref.as_deref()) {
            Some(customer_ref) => {
                external_or_none(self.inner.billing.membership_subscription(customer_ref).await)
            }
            None => None,
        };

        // A billing hit also refreshes the administered row, so the row
        // stays a usable fallback when billing is unreachable later.
        if let Some(sub) = &external {
            let status = if sub.canceled {
                MembershipStatus::Canceled
            } else {
                MembershipStatus::Active
            };
            repo.upsert(user_id, status, sub.period_start, sub.period_end, None)
                .await?;
        }

        let snapshot = snapshot_from_sources(Utc::now(), external, row.as_ref());
        self.inner
            .cache
            .set(&cache_key(user_id), &owner_key(user_id), snapshot.clone())
            .await;

        Ok(snapshot)
    }

    /// Spawn the interval task that re-reconciles recently active users.
    pub fn spawn_refresh_task(&self) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup isn't
            // a reconciliation stampede.
            interval.tick().await;

            loop {
                interval.tick().await;
                let users: Vec<UserId> = {
                    let mut active = lock(&service.inner.active);
                    active.drain().collect()
                };
                for user_id in users {
                    if let Err(e) = service.reconcile(user_id).await {
                        tracing::warn!(user = %user_id, error = %e, "membership refresh failed");
                    }
                }
            }
        })
    }

    /// Drop a user's cached snapshot (sign-out, administrative change).
    pub async fn invalidate(&self, user_id: UserId) {
        self.inner.cache.clear(&cache_key(user_id)).await;
    }

    fn mark_active(&self, user_id: UserId) {
        lock(&self.inner.active).insert(user_id);
    }

    /// Seed the cache directly (tests).
    #[cfg(test)]
    pub(crate) async fn seed_cache(&self, user_id: UserId, snapshot: MembershipSnapshot) {
        self.inner
            .cache
            .set(&cache_key(user_id), &owner_key(user_id), snapshot)
            .await;
    }
}

fn cache_key(user_id: UserId) -> String {
    format!("membership:{user_id}")
}

fn owner_key(user_id: UserId) -> String {
    format!("user:{user_id}")
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Degrade a billing lookup result to an optional subscription.
///
/// An auth failure means a logged-out or revoked billing credential -
/// resolved as "nothing found externally", never as a crash of membership
/// resolution. Other failures degrade the same way so the administered
/// row can still answer.
fn external_or_none(
    result: Result<Option<SubscriptionInfo>, BillingError>,
) -> Option<SubscriptionInfo> {
    match result {
        Ok(sub) => sub,
        Err(BillingError::Auth(reason)) => {
            tracing::debug!(%reason, "billing auth failed; no external subscription");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "billing lookup failed; falling back to local row");
            None
        }
    }
}

/// Derive the snapshot from the external subscription and the local row.
///
/// The external subscription wins when present; the administered row
/// covers manually granted access; absence of both is a non-member.
fn snapshot_from_sources(
    now: DateTime<Utc>,
    external: Option<SubscriptionInfo>,
    row: Option<&Membership>,
) -> MembershipSnapshot {
    if let Some(sub) = external {
        return MembershipSnapshot {
            is_member: now < sub.period_end,
            canceled: sub.canceled,
            subscription_end: Some(sub.period_end),
        };
    }

    if let Some(row) = row {
        return MembershipSnapshot {
            is_member: row.is_member_at(now),
            canceled: row.status == MembershipStatus::Canceled,
            subscription_end: Some(row.current_period_end),
        };
    }

    MembershipSnapshot::non_member()
}
