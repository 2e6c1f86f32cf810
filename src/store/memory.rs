//! In-process counter store.
//!
//! Counters live in a sharded map; an increment holds the shard lock for the
//! key while it bumps the count and re-arms the expiry, which makes it atomic
//! with respect to every other operation on the same key. Only useful when a
//! single process does all the limiting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{CounterClient, CounterStore, StoreError};
use crate::ratelimit::{Clock, SystemClock};

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: DateTime<Utc>,
}

impl CounterEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// DashMap-backed counters with per-key expiry.
#[derive(Debug)]
pub struct MemoryStore {
    counters: DashMap<String, CounterEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store that reads expiry times from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    fn increment_at(&self, key: &str, window: Duration, now: DateTime<Utc>) -> u64 {
        let expires_at = chrono::Duration::from_std(window)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| {
                trace!(key = %key, "Creating counter");
                CounterEntry {
                    count: 0,
                    expires_at,
                }
            });

        if entry.is_expired(now) {
            entry.count = 0;
        }
        entry.count += 1;
        entry.expires_at = expires_at;
        entry.count
    }

    /// Drop every counter whose window has passed. Returns how many were
    /// removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.counters.len();
        self.counters.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.counters.len())
    }

    /// Number of counters currently held, expired or not.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn check_and_increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        Ok(self.increment_at(key, window, self.clock.now()))
    }
}

#[async_trait]
impl CounterClient for MemoryStore {
    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now();
        Ok(self
            .counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<(), StoreError> {
        self.increment_at(key, window, self.clock.now());
        Ok(())
    }
}

/// Periodically purge expired counters from `store`.
pub fn start_purge_task(store: Arc<MemoryStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                debug!(purged = purged, remaining = store.len(), "Purged expired counters");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;

    const WINDOW: Duration = Duration::from_secs(10);

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::at_timestamp(1_000);
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_increment_counts_up() {
        let (store, _clock) = store();

        assert_eq!(store.check_and_increment("k", WINDOW).await.unwrap(), 1);
        assert_eq!(store.check_and_increment("k", WINDOW).await.unwrap(), 2);
        assert_eq!(store.check_and_increment("other", WINDOW).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_counter_expires_after_window() {
        let (store, clock) = store();

        store.check_and_increment("k", WINDOW).await.unwrap();
        store.check_and_increment("k", WINDOW).await.unwrap();

        clock.advance(WINDOW);
        assert_eq!(CounterClient::get(&store, "k").await.unwrap(), 0);
        assert_eq!(store.check_and_increment("k", WINDOW).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reads_do_not_extend_expiry() {
        let (store, clock) = store();

        store.check_and_increment("k", WINDOW).await.unwrap();
        clock.advance(Duration::from_secs(9));
        assert_eq!(CounterClient::get(&store, "k").await.unwrap(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(CounterClient::get(&store, "k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_rearms_expiry() {
        let (store, clock) = store();

        store.check_and_increment("k", WINDOW).await.unwrap();
        clock.advance(Duration::from_secs(9));
        store.increment("k", WINDOW).await.unwrap();
        clock.advance(Duration::from_secs(5));

        assert_eq!(CounterClient::get(&store, "k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store();

        store.check_and_increment("old", WINDOW).await.unwrap();
        clock.advance(WINDOW);
        store.check_and_increment("new", WINDOW).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.check_and_increment("hot", WINDOW).await })
            })
            .collect();

        let mut counts = Vec::new();
        for task in tasks {
            counts.push(task.await.unwrap().unwrap());
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
    }
}
