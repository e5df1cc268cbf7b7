//! Owner-scoped TTL cache.
//!
//! A thin layer over `moka` that stamps every entry with the identity that
//! wrote it and the write time. Reads only return entries that are still
//! inside the TTL window *and* belong to the reading identity; anything
//! else is invalidated on the spot. This is what keeps one account's
//! cached membership flag from leaking into another account's session on
//! a shared device.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;

/// A cached value with its owner and write time.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub owner_key: String,
    pub written_at: DateTime<Utc>,
}

/// Generic get/set/clear cache with TTL expiry and owner identity checks.
///
/// Injected into components rather than accessed as ambient global state,
/// so tests can construct their own instance.
#[derive(Clone)]
pub struct KeyValueCache<T: Clone + Send + Sync + 'static> {
    inner: Cache<String, CacheEntry<T>>,
    ttl: Duration,
}

impl<T: Clone + Send + Sync + 'static> KeyValueCache<T> {
    /// Create a cache whose entries expire `ttl` after being written.
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        // moka's own TTL is a backstop; freshness is decided against
        // `written_at` so expiry stays exact under clock inspection.
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, ttl }
    }

    /// Get a value if it is fresh and owned by `owner`.
    ///
    /// A stale or foreign-owned entry is invalidated and `None` returned,
    /// which callers treat as a cache miss (trigger a fresh load), never
    /// as an error.
    pub async fn get(&self, key: &str, owner: &str) -> Option<T> {
        let entry = self.inner.get(key).await?;

        if entry.owner_key != owner || !self.is_fresh(&entry) {
            self.inner.invalidate(key).await;
            return None;
        }

        Some(entry.value)
    }

    /// Write a value under the given owner with the current timestamp.
    pub async fn set(&self, key: &str, owner: &str, value: T) {
        self.set_at(key, owner, value, Utc::now()).await;
    }

    /// Remove a key.
    pub async fn clear(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub(crate) async fn set_at(&self, key: &str, owner: &str, value: T, written_at: DateTime<Utc>) {
        self.inner
            .insert(
                key.to_owned(),
                CacheEntry {
                    value,
                    owner_key: owner.to_owned(),
                    written_at,
                },
            )
            .await;
    }

    fn is_fresh(&self, entry: &CacheEntry<T>) -> bool {
        let age = Utc::now().signed_duration_since(entry.written_at);
        age.to_std().is_ok_and(|age| age < self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn test_fresh_entry_for_owner_is_returned() {
        let cache: KeyValueCache<u32> = KeyValueCache::new(DAY, 100);
        cache.set("membership", "user:1", 7).await;
        assert_eq!(cache.get("membership", "user:1").await, Some(7));
    }

    #[tokio::test]
    async fn test_entry_written_25_hours_ago_is_expired() {
        let cache: KeyValueCache<u32> = KeyValueCache::new(DAY, 100);
        cache
            .set_at(
                "membership",
                "user:1",
                7,
                Utc::now() - ChronoDuration::hours(25),
            )
            .await;
        assert_eq!(cache.get("membership", "user:1").await, None);
    }

    #[tokio::test]
    async fn test_entry_just_inside_ttl_is_fresh() {
        let cache: KeyValueCache<u32> = KeyValueCache::new(DAY, 100);
        cache
            .set_at(
                "membership",
                "user:1",
                7,
                Utc::now() - ChronoDuration::hours(23),
            )
            .await;
        assert_eq!(cache.get("membership", "user:1").await, Some(7));
    }

    #[tokio::test]
    async fn test_owner_mismatch_discards_entry() {
        let cache: KeyValueCache<u32> = KeyValueCache::new(DAY, 100);
        cache.set("membership", "user:1", 7).await;

        // A different identity must never see user:1's value, and the
        // entry is gone for user:1 as well afterwards.
        assert_eq!(cache.get("membership", "user:2").await, None);
        assert_eq!(cache.get("membership", "user:1").await, None);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache: KeyValueCache<u32> = KeyValueCache::new(DAY, 100);
        cache.set("k", "user:1", 1).await;
        cache.clear("k").await;
        assert_eq!(cache.get("k", "user:1").await, None);
    }

    #[tokio::test]
    async fn test_future_written_at_is_not_fresh() {
        let cache: KeyValueCache<u32> = KeyValueCache::new(DAY, 100);
        cache
            .set_at("k", "user:1", 1, Utc::now() + ChronoDuration::hours(1))
            .await;
        assert_eq!(cache.get("k", "user:1").await, None);
    }
}
