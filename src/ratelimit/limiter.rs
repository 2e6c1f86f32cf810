//! Core fixed-window rate limiter.

use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use super::clock::{Clock, SystemClock};
use super::handlers::{DefaultDeniedHandler, DefaultErrorHandler, DeniedHandler, ErrorHandler};
use super::identity::{IdentityError, IdentityResolver, IpIdentity};
use super::key::{KeyDeriver, PrefixedKey};
use super::quota::Quota;
use crate::store::{CounterBackend, CounterClient, StoreError};

/// Default bound on a single counter store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of counting one request against its identity's quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request pushed the counter past the limit
    pub denied: bool,
    /// End of the window the request was counted in
    pub resets_at: DateTime<Utc>,
    /// Requests left in the window, never negative
    pub remaining: u64,
    /// Identity the request was counted under
    pub identity: String,
    /// Counter value after this request
    pub counter: u64,
}

impl Decision {
    /// Build the decision for a request that brought the counter to `counter`.
    pub fn new(quota: &Quota, now: DateTime<Utc>, identity: String, counter: u64) -> Self {
        Self {
            denied: counter > quota.limit(),
            resets_at: quota.resets_at(now),
            remaining: quota.remaining(counter),
            identity,
            counter,
        }
    }
}

/// Result of [`Limiter::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The request resolved to the empty identity; no limit applies and the
    /// store was not consulted.
    Unlimited,
    /// The request was counted.
    Limited(Decision),
}

/// Errors produced while checking a request.
#[derive(Debug, Error)]
pub enum LimitError {
    #[error("failed to resolve identity: {0}")]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Only returned by [`Limiter::enforce`]; [`Limiter::check`] reports
    /// denials as a [`Decision`].
    #[error("rate limit exceeded for {:?}", .0.identity)]
    QuotaExceeded(Decision),
}

/// The fixed-window rate limiter.
///
/// Stateless between requests; share one instance behind an `Arc` across all
/// tasks. All per-key synchronisation happens in the counter store.
pub struct Limiter {
    quota: Quota,
    backend: CounterBackend,
    identity: Arc<dyn IdentityResolver>,
    key_deriver: Arc<dyn KeyDeriver>,
    error_handler: Arc<dyn ErrorHandler>,
    denied_handler: Arc<dyn DeniedHandler>,
    clock: Arc<dyn Clock>,
    store_timeout: Option<Duration>,
}

impl Limiter {
    /// Start building a limiter for `quota` backed by `backend`.
    pub fn builder(quota: Quota, backend: CounterBackend) -> LimiterBuilder {
        LimiterBuilder::new(quota, backend)
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    pub fn error_handler(&self) -> &dyn ErrorHandler {
        self.error_handler.as_ref()
    }

    pub fn denied_handler(&self) -> &dyn DeniedHandler {
        self.denied_handler.as_ref()
    }

    /// Count the request described by `parts` against its identity's quota.
    ///
    /// Performs at most one counter mutation. A denial is a successful check
    /// whose decision has `denied` set.
    #[instrument(skip_all, fields(method = %parts.method, path = %parts.uri.path()))]
    pub async fn check(&self, parts: &Parts) -> Result<Admission, LimitError> {
        let identity = self.identity.resolve(parts)?;
        if identity.is_empty() {
            trace!("Empty identity, skipping rate limit");
            return Ok(Admission::Unlimited);
        }

        let now = self.clock.now();
        let slot = self.quota.slot(now);
        let key = self.key_deriver.derive_key(now, slot, &identity);

        trace!(
            key = %key,
            slot = slot,
            backend = self.backend.shape(),
            "Checking rate limit"
        );

        let counter = self.count(&key).await?;
        let decision = Decision::new(&self.quota, now, identity, counter);

        if decision.denied {
            debug!(
                key = %key,
                identity = %decision.identity,
                counter = counter,
                limit = self.quota.limit(),
                "Rate limit exceeded"
            );
        }

        Ok(Admission::Limited(decision))
    }

    /// Like [`Limiter::check`], but reports a denial as
    /// [`LimitError::QuotaExceeded`] so callers can use a single `?` path.
    ///
    /// Returns `None` when no limit applies to the request.
    pub async fn enforce(&self, parts: &Parts) -> Result<Option<Decision>, LimitError> {
        match self.check(parts).await? {
            Admission::Unlimited => Ok(None),
            Admission::Limited(decision) if decision.denied => {
                Err(LimitError::QuotaExceeded(decision))
            }
            Admission::Limited(decision) => Ok(Some(decision)),
        }
    }

    /// Counter value for `key` after counting this request.
    async fn count(&self, key: &str) -> Result<u64, StoreError> {
        let within = self.quota.within();
        let limit = self.quota.limit();

        let op = async {
            match &self.backend {
                CounterBackend::Atomic(store) => store.check_and_increment(key, within).await,
                CounterBackend::TwoStep(client) => {
                    two_step_count(client.as_ref(), key, within, limit).await
                }
            }
        };

        match self.store_timeout {
            Some(timeout) => tokio::time::timeout(timeout, op).await.unwrap_or_else(|_| {
                warn!(key = %key, timeout = ?timeout, "Counter store timed out");
                Err(StoreError::Timeout(timeout))
            }),
            None => op.await,
        }
    }
}

/// Read, then increment only while under the limit. Requests racing between
/// the two round trips are not observed.
async fn two_step_count(
    client: &dyn CounterClient,
    key: &str,
    within: Duration,
    limit: u64,
) -> Result<u64, StoreError> {
    let current = client.get(key).await?;
    // already over: deny without touching the counter or its expiry
    if current >= limit {
        return Ok(current.saturating_add(1));
    }
    client.increment(key, within).await?;
    Ok(current + 1)
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("quota", &self.quota)
            .field("backend", &self.backend)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Limiter`].
///
/// Defaults: source-IP identity, `limiter-<slot>-<identity>` keys, log-and-500
/// error handler, 429 denied handler, system clock, one second store timeout.
pub struct LimiterBuilder {
    quota: Quota,
    backend: CounterBackend,
    identity: Arc<dyn IdentityResolver>,
    key_deriver: Arc<dyn KeyDeriver>,
    error_handler: Arc<dyn ErrorHandler>,
    denied_handler: Arc<dyn DeniedHandler>,
    clock: Arc<dyn Clock>,
    store_timeout: Option<Duration>,
}

impl LimiterBuilder {
    fn new(quota: Quota, backend: CounterBackend) -> Self {
        Self {
            quota,
            backend,
            identity: Arc::new(IpIdentity),
            key_deriver: Arc::new(PrefixedKey::default()),
            error_handler: Arc::new(DefaultErrorHandler),
            denied_handler: Arc::new(DefaultDeniedHandler),
            clock: Arc::new(SystemClock::new()),
            store_timeout: Some(DEFAULT_STORE_TIMEOUT),
        }
    }

    pub fn identity(mut self, resolver: impl IdentityResolver + 'static) -> Self {
        self.identity = Arc::new(resolver);
        self
    }

    pub fn key_deriver(mut self, deriver: impl KeyDeriver + 'static) -> Self {
        self.key_deriver = Arc::new(deriver);
        self
    }

    /// Use `prefix-slot-identity` keys with the given prefix and delimiter.
    ///
    /// Fails if the delimiter is empty or contains an ASCII digit.
    pub fn key_prefix(
        self,
        prefix: impl Into<String>,
        delimiter: impl Into<String>,
    ) -> crate::error::Result<Self> {
        Ok(self.key_deriver(PrefixedKey::new(prefix, delimiter)?))
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn denied_handler(mut self, handler: impl DeniedHandler + 'static) -> Self {
        self.denied_handler = Arc::new(handler);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound each counter store round trip. `None` waits as long as the
    /// surrounding request does.
    pub fn store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn build(self) -> Limiter {
        Limiter {
            quota: self.quota,
            backend: self.backend,
            identity: self.identity,
            key_deriver: self.key_deriver,
            error_handler: self.error_handler,
            denied_handler: self.denied_handler,
            clock: self.clock,
            store_timeout: self.store_timeout,
        }
    }
}
