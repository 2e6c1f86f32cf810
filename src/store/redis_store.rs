//! Redis-backed counter store.
//!
//! Counters are plain integer keys with a TTL:
//! - `INCR` + `EXPIRE` run inside `MULTI`/`EXEC`, so the increment and the
//!   expiry are applied together or not at all
//! - `GET` never touches the TTL, so an idle key still expires at the end of
//!   its window
//!
//! Connection handling is left to `redis::aio::ConnectionManager`. Each
//! operation clones the manager right before its round trip and drops the
//! clone as soon as the reply (or error) arrives.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::fmt;
use std::time::Duration;
use tracing::{info, trace};

use super::{CounterClient, CounterStore, StoreError};

/// TTL in whole seconds for a window, never less than one.
fn ttl_secs(window: Duration) -> i64 {
    i64::try_from(window.as_secs().max(1)).unwrap_or(i64::MAX)
}

async fn connect_manager(url: &str) -> Result<ConnectionManager, StoreError> {
    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;
    info!(url = %url, "Connected to redis");
    Ok(manager)
}

/// Increment `key` and re-arm its TTL in one transaction, returning the new
/// count.
async fn incr_with_expiry(
    mut conn: ConnectionManager,
    key: &str,
    window: Duration,
) -> Result<u64, StoreError> {
    let (count,): (u64,) = redis::pipe()
        .atomic()
        .incr(key, 1u64)
        .expire(key, ttl_secs(window))
        .ignore()
        .query_async(&mut conn)
        .await?;
    Ok(count)
}

/// Atomic counter store: one `MULTI INCR EXPIRE EXEC` round trip per request.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis, e.g. `"redis://127.0.0.1/"`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Ok(Self::from_manager(connect_manager(url).await?))
    }

    pub fn from_manager(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Round-trip a `PING` to check the server is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn check_and_increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let count = incr_with_expiry(self.connection.clone(), key, window).await?;
        trace!(key = %key, count = count, "Incremented redis counter");
        Ok(count)
    }
}

/// Two-step counter client: `GET` to read, then a separate transactional
/// increment.
#[derive(Clone)]
pub struct RedisCounterClient {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisCounterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterClient").finish_non_exhaustive()
    }
}

impl RedisCounterClient {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Ok(Self::from_manager(connect_manager(url).await?))
    }

    pub fn from_manager(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CounterClient for RedisCounterClient {
    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let count: Option<u64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<(), StoreError> {
        incr_with_expiry(self.connection.clone(), key, window).await?;
        Ok(())
    }
}
