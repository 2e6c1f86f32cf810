//! Counter store abstraction and adapters.
//!
//! A deployment picks exactly one store shape through [`CounterBackend`]:
//!
//! - [`CounterBackend::Atomic`]: one round trip that increments the counter
//!   and re-arms its expiry in a single transaction. Concurrent requests for
//!   the same key never lose an increment.
//! - [`CounterBackend::TwoStep`]: a read followed by a separate increment.
//!   Two round trips, and concurrent requests may interleave between them, so
//!   a few extra requests can be admitted at window edges.

pub mod memory;
pub mod redis_store;

pub use memory::{start_purge_task, MemoryStore};
pub use redis_store::{RedisCounterClient, RedisStore};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the counter store.
///
/// Every variant means the counter could not be read or updated; none of them
/// may be treated as a zero count.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// A store offering atomic increment-with-expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key`, (re)arm its expiry to `window`, and
    /// return the count after the increment.
    async fn check_and_increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;
}

/// A store offering a plain read and a separate increment.
#[async_trait]
pub trait CounterClient: Send + Sync {
    /// Current count for `key`, or 0 if it does not exist. Never touches the
    /// expiry.
    async fn get(&self, key: &str) -> Result<u64, StoreError>;

    /// Increment the counter at `key` and (re)arm its expiry to `window`.
    async fn increment(&self, key: &str, window: Duration) -> Result<(), StoreError>;
}

/// The counter store a limiter talks to, in one of the two supported shapes.
#[derive(Clone)]
pub enum CounterBackend {
    Atomic(Arc<dyn CounterStore>),
    TwoStep(Arc<dyn CounterClient>),
}

impl CounterBackend {
    pub fn atomic(store: impl CounterStore + 'static) -> Self {
        CounterBackend::Atomic(Arc::new(store))
    }

    pub fn two_step(client: impl CounterClient + 'static) -> Self {
        CounterBackend::TwoStep(Arc::new(client))
    }

    /// Short name of the shape, for logs.
    pub fn shape(&self) -> &'static str {
        match self {
            CounterBackend::Atomic(_) => "atomic",
            CounterBackend::TwoStep(_) => "two_step",
        }
    }
}

impl std::fmt::Debug for CounterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CounterBackend").field(&self.shape()).finish()
    }
}
