//! Per-account nonce counter
//!
//! The counter approximates the next nonce to use for an account and is
//! refreshed from the chain's pending nonce by [`NonceCache::sync`].
//!
//! Locking is two-level: a coarse map lock guards creation of per-account
//! slots, and every slot carries its own read/write lock so unrelated
//! accounts never contend. Read-modify-write sequences that must not
//! interleave with other commits (allocate, submit, maybe roll back) run
//! inside [`NonceCache::serialize`].

use crate::uniquify::Uniquify;
use ethers::types::Address;
use ethers::utils::to_checksum;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
struct SlotState {
    value: i64,
    /// Bumped by every write; lets `sync` detect concurrent writers.
    version: u64,
}

#[derive(Debug, Default)]
struct Slot {
    state: RwLock<SlotState>,
}

impl Slot {
    fn write(&self, f: impl FnOnce(i64) -> i64) -> i64 {
        let mut state = self.state.write();
        let prev = state.value;
        state.value = f(prev);
        state.version += 1;
        prev
    }
}

/// Result of a [`NonceCache::sync`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The counter was replaced by the fetched value
    Updated { from: i64, to: i64 },
    /// Another writer moved the counter while fetching; nothing was stored
    Skipped,
}

/// Process-wide nonce cache keyed by account address
#[derive(Debug, Default)]
pub struct NonceCache {
    slots: RwLock<HashMap<Address, Arc<Slot>>>,
    guard: Uniquify,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes access to the nonce cache for `account`. All nonce
    /// increments for a commit attempt should be done in this context: a
    /// caller that increments the nonce but never submits has the exclusive
    /// right to decrease it back before anyone else allocates.
    pub async fn serialize<F, Fut, T, E>(&self, account: Address, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guard.call(&to_checksum(&account, None), f).await
    }

    /// Snapshot of the counter; unseen accounts read as zero.
    pub fn get(&self, account: Address) -> i64 {
        match self.slots.read().get(&account) {
            Some(slot) => slot.state.read().value,
            None => 0,
        }
    }

    pub fn set(&self, account: Address, nonce: i64) {
        self.slot(account).write(|_| nonce);
    }

    /// Returns the current value and advances the stored one by one.
    pub fn incr(&self, account: Address) -> i64 {
        self.slot(account).write(|v| v + 1)
    }

    /// Returns the current value and rolls the stored one back by one.
    pub fn decr(&self, account: Address) -> i64 {
        self.slot(account).write(|v| v - 1)
    }

    /// Refreshes the counter from an authoritative source.
    ///
    /// The fetched value is stored only if no writer changed the counter
    /// between the snapshot and the end of the fetch. If someone else got
    /// there first the call is a no-op. Fetch errors leave the counter
    /// untouched.
    pub async fn sync<F, Fut, E>(&self, account: Address, fetch: F) -> Result<SyncOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, E>>,
    {
        let slot = self.slot(account);
        let seen = *slot.state.read();

        let fetched = fetch().await?;

        let mut state = slot.state.write();
        if state.version != seen.version {
            debug!(
                account = ?account,
                seen = seen.value,
                current = state.value,
                "nonce moved during sync, skipping"
            );
            return Ok(SyncOutcome::Skipped);
        }

        let to = i64::try_from(fetched).unwrap_or(i64::MAX);
        let from = state.value;
        state.value = to;
        state.version += 1;
        debug!(account = ?account, from, to, "nonce synced");
        Ok(SyncOutcome::Updated { from, to })
    }

    fn slot(&self, account: Address) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(&account) {
            return slot.clone();
        }
        self.slots.write().entry(account).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incr_returns_previous_value() {
        let cache = NonceCache::new();
        let acc = Address::repeat_byte(1);

        assert_eq!(cache.get(acc), 0);
        assert_eq!(cache.incr(acc), 0);
        assert_eq!(cache.incr(acc), 1);
        assert_eq!(cache.get(acc), 2);
    }

    #[test]
    fn test_decr_can_go_negative() {
        let cache = NonceCache::new();
        let acc = Address::repeat_byte(2);

        assert_eq!(cache.decr(acc), 0);
        assert_eq!(cache.get(acc), -1);
    }

    #[test]
    fn test_accounts_are_independent() {
        let cache = NonceCache::new();
        let a = Address::repeat_byte(3);
        let b = Address::repeat_byte(4);

        cache.set(a, 10);
        cache.incr(b);
        assert_eq!(cache.get(a), 10);
        assert_eq!(cache.get(b), 1);
    }

    #[tokio::test]
    async fn test_sync_updates_counter() {
        let cache = NonceCache::new();
        let acc = Address::repeat_byte(5);
        cache.set(acc, 3);

        let outcome = cache.sync(acc, || async { Ok::<_, ()>(9) }).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Updated { from: 3, to: 9 });
        assert_eq!(cache.get(acc), 9);
    }

    #[tokio::test]
    async fn test_sync_skips_when_counter_moved() {
        let cache = Arc::new(NonceCache::new());
        let acc = Address::repeat_byte(6);
        cache.set(acc, 3);

        let c = cache.clone();
        let outcome = cache
            .sync(acc, || async move {
                // a concurrent writer advances the counter mid-fetch
                c.incr(acc);
                Ok::<_, ()>(1)
            })
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Skipped);
        assert_eq!(cache.get(acc), 4);
    }

    #[tokio::test]
    async fn test_sync_error_leaves_counter() {
        let cache = NonceCache::new();
        let acc = Address::repeat_byte(7);
        cache.set(acc, 11);

        let res = cache.sync(acc, || async { Err::<u64, _>("node down") }).await;
        assert_eq!(res, Err("node down"));
        assert_eq!(cache.get(acc), 11);
    }
}
