//! Cart store: the single authoritative holder of cart state.
//!
//! Every mutation reads and writes through one synchronously-updated state
//! holder per owner, never through a value captured when the caller was
//! invoked. Two mutations issued back-to-back, before either's persistence
//! round trip resolves, are both reflected in the final state.
//!
//! Persistence is optimistic: the in-memory state is committed first, then
//! written to the owning store (device cache for anonymous sessions, the
//! server cart row for signed-in users). A write failure is reported to
//! the caller but the committed local state is not rolled back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

use thistle_core::{Money, UserId};

use crate::cache::KeyValueCache;
use crate::db::{CartRepository, RepositoryError};
use crate::models::{Cart, CartItem};

/// How long an anonymous device cart survives without activity.
pub const DEVICE_CART_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Who a cart belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CartOwner {
    /// An anonymous session, keyed by its cart token.
    Anonymous(String),
    /// A signed-in user with a server-side cart row.
    User(UserId),
}

impl CartOwner {
    fn cache_key(&self) -> String {
        match self {
            Self::Anonymous(token) => format!("cart:{token}"),
            Self::User(id) => format!("cart:user:{id}"),
        }
    }

    fn owner_key(&self) -> String {
        match self {
            Self::Anonymous(token) => format!("anon:{token}"),
            Self::User(id) => format!("user:{id}"),
        }
    }
}

/// Errors from cart store operations.
#[derive(Debug, thiserror::Error)]
pub enum CartStoreError {
    /// The write to the owning store failed. The optimistic in-memory
    /// state was kept; re-reading the cart shows the applied mutation.
    #[error("cart persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
}

/// Per-owner authoritative state.
struct CartEntry {
    /// Committed cart lines. Locked only for synchronous read/apply,
    /// never across an await point.
    state: StdMutex<Vec<CartItem>>,
    /// Serializes writes to the owning store so a slow earlier write can
    /// never clobber a later one.
    write_lock: AsyncMutex<()>,
}

impl CartEntry {
    fn new(items: Vec<CartItem>) -> Self {
        Self {
            state: StdMutex::new(items),
            write_lock: AsyncMutex::new(()),
        }
    }
}

/// The cart store.
///
/// Cheaply cloneable; all clones share the same authoritative state.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartStoreInner>,
}

struct CartStoreInner {
    pool: PgPool,
    device: KeyValueCache<Vec<CartItem>>,
    entries: StdMutex<HashMap<CartOwner, Arc<CartEntry>>>,
}

impl CartStore {
    /// Create a cart store over the given database pool and device cache.
    #[must_use]
    pub fn new(pool: PgPool, device: KeyValueCache<Vec<CartItem>>) -> Self {
        Self {
            inner: Arc::new(CartStoreInner {
                pool,
                device,
                entries: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Current cart snapshot for an owner.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError::Persistence` if hydrating a signed-in
    /// user's cart row fails.
    pub async fn get(&self, owner: &CartOwner) -> Result<Cart, CartStoreError> {
        let entry = self.entry(owner).await?;
        Ok(Cart {
            items: lock(&entry.state).clone(),
        })
    }

    /// Add one unit of `(product_name, size)` to the cart.
    ///
    /// If the line already exists its quantity is incremented by 1;
    /// otherwise a new line with quantity 1 is appended.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError::Persistence` if the write to the owning
    /// store fails; the mutation itself is already committed locally.
    #[instrument(skip(self, owner), fields(product = %product_name, size = %size))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        product_name: &str,
        size: &str,
        unit_price: Money,
    ) -> Result<Cart, CartStoreError> {
        self.mutate(owner, |items| {
            if let Some(line) = items
                .iter_mut()
                .find(|line| line.matches(product_name, size))
            {
                line.quantity += 1;
            } else {
                items.push(CartItem {
                    product_name: product_name.to_owned(),
                    size: size.to_owned(),
                    quantity: 1,
                    unit_price,
                });
            }
        })
        .await
    }

    /// Set the quantity of a line exactly.
    ///
    /// A quantity below 1 is equivalent to removing the line.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError::Persistence` if the write to the owning
    /// store fails; the mutation itself is already committed locally.
    #[instrument(skip(self, owner), fields(product = %product_name, size = %size, qty = quantity))]
    pub async fn update_quantity(
        &self,
        owner: &CartOwner,
        product_name: &str,
        size: &str,
        quantity: u32,
    ) -> Result<Cart, CartStoreError> {
        self.mutate(owner, |items| {
            if quantity < 1 {
                items.retain(|line| !line.matches(product_name, size));
            } else if let Some(line) = items
                .iter_mut()
                .find(|line| line.matches(product_name, size))
            {
                line.quantity = quantity;
            }
        })
        .await
    }

    /// Remove a line from the cart.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError::Persistence` if the write to the owning
    /// store fails; the mutation itself is already committed locally.
    #[instrument(skip(self, owner), fields(product = %product_name, size = %size))]
    pub async fn remove_item(
        &self,
        owner: &CartOwner,
        product_name: &str,
        size: &str,
    ) -> Result<Cart, CartStoreError> {
        self.mutate(owner, |items| {
            items.retain(|line| !line.matches(product_name, size));
        })
        .await
    }

    /// Empty the cart and delete its persisted form.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError::Persistence` if deleting the server cart
    /// row fails.
    #[instrument(skip(self, owner))]
    pub async fn clear(&self, owner: &CartOwner) -> Result<(), CartStoreError> {
        let entry = self.entry(owner).await?;
        lock(&entry.state).clear();

        let _guard = entry.write_lock.lock().await;
        match owner {
            CartOwner::Anonymous(_) => self.inner.device.clear(&owner.cache_key()).await,
            CartOwner::User(user_id) => {
                CartRepository::new(&self.inner.pool).clear(*user_id).await?;
            }
        }
        Ok(())
    }

    /// Merge the anonymous cart into the user's server cart on sign-in.
    ///
    /// Starts from the server cart; quantities of matching
    /// `(product_name, size)` lines are summed, unmatched local lines are
    /// appended. The merged cart is written back as the new server cart
    /// and the local store is cleared. Re-running with an already-empty
    /// local cart is a no-op, so repeated invocation is safe.
    ///
    /// # Errors
    ///
    /// Returns `CartStoreError::Persistence` if reading or writing the
    /// server cart row fails; the local cart is left in place so a retry
    /// can merge it.
    #[instrument(skip(self, anonymous), fields(user = %user_id))]
    pub async fn merge_on_sign_in(
        &self,
        anonymous: &CartOwner,
        user_id: UserId,
    ) -> Result<Cart, CartStoreError> {
        let repo = CartRepository::new(&self.inner.pool);
        let server = repo.get(user_id).await?.unwrap_or_default();

        let local_entry = self.entry(anonymous).await?;
        let local = lock(&local_entry.state).clone();

        let merged = merge_items(server, &local);
        repo.upsert(user_id, &merged).await?;

        // Server row written; only now drop the local copy.
        lock(&local_entry.state).clear();
        self.inner.device.clear(&anonymous.cache_key()).await;
        {
            let mut entries = lock(&self.inner.entries);
            entries.remove(anonymous);
            entries.insert(
                CartOwner::User(user_id),
                Arc::new(CartEntry::new(merged.clone())),
            );
        }

        Ok(Cart { items: merged })
    }

    /// Apply a mutation to the committed state, then persist a snapshot.
    async fn mutate<F>(&self, owner: &CartOwner, apply: F) -> Result<Cart, CartStoreError>
    where
        F: FnOnce(&mut Vec<CartItem>),
    {
        let entry = self.entry(owner).await?;

        // Commit to the authoritative state synchronously, before any
        // asynchronous persistence begins.
        {
            let mut state = lock(&entry.state);
            apply(&mut state);
        }

        self.persist(owner, &entry).await
    }

    /// Write the latest committed snapshot to the owning store.
    async fn persist(
        &self,
        owner: &CartOwner,
        entry: &CartEntry,
    ) -> Result<Cart, CartStoreError> {
        let _guard = entry.write_lock.lock().await;

        // Snapshot under the write lock: a queued writer always persists
        // state at least as new as the mutation that queued it.
        let snapshot = lock(&entry.state).clone();

        match owner {
            CartOwner::Anonymous(_) => {
                self.inner
                    .device
                    .set(&owner.cache_key(), &owner.owner_key(), snapshot.clone())
                    .await;
            }
            CartOwner::User(user_id) => {
                CartRepository::new(&self.inner.pool)
                    .upsert(*user_id, &snapshot)
                    .await?;
            }
        }

        Ok(Cart { items: snapshot })
    }

    /// Get or hydrate the authoritative state holder for an owner.
    async fn entry(&self, owner: &CartOwner) -> Result<Arc<CartEntry>, CartStoreError> {
        if let Some(entry) = lock(&self.inner.entries).get(owner) {
            return Ok(Arc::clone(entry));
        }

        let items = match owner {
            CartOwner::Anonymous(_) => self
                .inner
                .device
                .get(&owner.cache_key(), &owner.owner_key())
                .await
                .unwrap_or_default(),
            CartOwner::User(user_id) => CartRepository::new(&self.inner.pool)
                .get(*user_id)
                .await?
                .unwrap_or_default(),
        };

        let mut entries = lock(&self.inner.entries);
        let entry = entries
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(CartEntry::new(items)));
        Ok(Arc::clone(entry))
    }
}

/// Lock a std mutex, recovering the data from a poisoned lock.
fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Merge a local (anonymous) cart into a server cart.
///
/// For every `(product_name, size)` key the result holds at most one line
/// whose quantity is the sum of both carts' quantities at that key. The
/// server cart's unit price wins for lines present in both.
fn merge_items(server: Vec<CartItem>, local: &[CartItem]) -> Vec<CartItem> {
    let mut merged = server;
    for item in local {
        if let Some(line) = merged
            .iter_mut()
            .find(|line| line.matches(&item.product_name, &item.size))
        {
            line.quantity += item.quantity;
        } else {
            merged.push(item.clone());
        }
    }
    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store() -> CartStore {
        // connect_lazy never touches the network; anonymous-cart tests
        // stay entirely in memory.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        CartStore::new(pool, KeyValueCache::new(DEVICE_CART_TTL, 1_000))
    }

    fn item(name: &str, size: &str, quantity: u32, cents: i64) -> CartItem {
        CartItem {
            product_name: name.to_owned(),
            size: size.to_owned(),
            quantity,
            unit_price: Money::from_cents(cents),
        }
    }

    fn anon(token: &str) -> CartOwner {
        CartOwner::Anonymous(token.to_owned())
    }

    #[tokio::test]
    async fn test_add_same_key_twice_increments_quantity() {
        let store = store();
        let owner = anon("t1");
        let price = Money::from_cents(10_400);

        store.add_item(&owner, "BPC-157", "10mg", price).await.unwrap();
        let cart = store.add_item(&owner, "BPC-157", "10mg", price).await.unwrap();

        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.items.first().unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_add_distinct_sizes_are_separate_lines() {
        let store = store();
        let owner = anon("t2");
        let price = Money::from_cents(10_400);

        store.add_item(&owner, "BPC-157", "10mg", price).await.unwrap();
        let cart = store.add_item(&owner, "BPC-157", "5mg", price).await.unwrap();

        assert_eq!(cart.line_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_both_reflected() {
        let store = store();
        let owner = anon("t3");
        let price = Money::from_cents(1_000);

        // Neither persistence round trip has resolved when the second
        // mutation is issued; both must survive.
        let (a, b) = tokio::join!(
            store.add_item(&owner, "BPC-157", "10mg", price),
            store.add_item(&owner, "TB-500", "5mg", price),
        );
        a.unwrap();
        b.unwrap();

        let cart = store.get(&owner).await.unwrap();
        assert_eq!(cart.line_count(), 2);
    }

    #[tokio::test]
    async fn test_update_quantity_sets_exactly() {
        let store = store();
        let owner = anon("t4");
        let price = Money::from_cents(1_000);

        store.add_item(&owner, "BPC-157", "10mg", price).await.unwrap();
        let cart = store
            .update_quantity(&owner, "BPC-157", "10mg", 5)
            .await
            .unwrap();

        assert_eq!(cart.items.first().unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_update_quantity_zero_removes_line() {
        let store = store();
        let owner = anon("t5");
        let price = Money::from_cents(1_000);

        store.add_item(&owner, "BPC-157", "10mg", price).await.unwrap();
        let cart = store
            .update_quantity(&owner, "BPC-157", "10mg", 0)
            .await
            .unwrap();

        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = store();
        let owner = anon("t6");
        let price = Money::from_cents(1_000);

        store.add_item(&owner, "BPC-157", "10mg", price).await.unwrap();
        store.add_item(&owner, "TB-500", "5mg", price).await.unwrap();

        let cart = store.remove_item(&owner, "BPC-157", "10mg").await.unwrap();
        assert_eq!(cart.line_count(), 1);

        store.clear(&owner).await.unwrap();
        assert!(store.get(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_cart_survives_entry_eviction() {
        let store = store();
        let owner = anon("t7");
        let price = Money::from_cents(1_000);

        store.add_item(&owner, "BPC-157", "10mg", price).await.unwrap();

        // Drop the in-memory holder; the next read hydrates from the
        // device store.
        lock(&store.inner.entries).clear();

        let cart = store.get(&owner).await.unwrap();
        assert_eq!(cart.line_count(), 1);
    }

    #[test]
    fn test_merge_sums_quantities_per_key() {
        let server = vec![item("BPC-157", "10mg", 2, 10_400), item("TB-500", "5mg", 1, 8_900)];
        let local = vec![item("BPC-157", "10mg", 3, 10_400), item("GHK-Cu", "50mg", 1, 6_500)];

        let merged = merge_items(server, &local);

        assert_eq!(merged.len(), 3);
        let bpc = merged
            .iter()
            .find(|line| line.matches("BPC-157", "10mg"))
            .unwrap();
        assert_eq!(bpc.quantity, 5);
        let tb = merged
            .iter()
            .find(|line| line.matches("TB-500", "5mg"))
            .unwrap();
        assert_eq!(tb.quantity, 1);
        assert!(merged.iter().any(|line| line.matches("GHK-Cu", "50mg")));
    }

    #[test]
    fn test_merge_with_empty_local_is_identity() {
        let server = vec![item("BPC-157", "10mg", 2, 10_400)];
        let merged = merge_items(server.clone(), &[]);
        assert_eq!(merged, server);
    }

    #[test]
    fn test_merge_with_empty_server_takes_local() {
        let local = vec![item("BPC-157", "10mg", 2, 10_400)];
        let merged = merge_items(Vec::new(), &local);
        assert_eq!(merged, local);
    }

    #[test]
    fn test_merge_never_duplicates_a_key() {
        let server = vec![
            item("A", "1", 1, 100),
            item("B", "1", 2, 100),
            item("C", "2", 3, 100),
        ];
        let local = vec![
            item("A", "1", 4, 100),
            item("C", "2", 1, 100),
            item("D", "9", 7, 100),
        ];

        let merged = merge_items(server, &local);

        for line in &merged {
            let occurrences = merged
                .iter()
                .filter(|other| other.matches(&line.product_name, &line.size))
                .count();
            assert_eq!(occurrences, 1, "duplicate key in merged cart");
        }
    }
}
