//! Quota policy and fixed-window arithmetic.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{Result, WindowgateError};

/// A rate limit policy: at most `limit` requests per `within` window.
///
/// Windows are aligned to multiples of `within` since the unix epoch, so two
/// requests share a window exactly when they share a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    limit: u64,
    within: Duration,
    /// `within` in whole seconds, never zero
    within_secs: i64,
}

impl Quota {
    /// Create a new quota.
    ///
    /// The window must be a non-zero whole number of seconds.
    pub fn new(limit: u64, within: Duration) -> Result<Self> {
        if within.subsec_nanos() != 0 {
            return Err(WindowgateError::Config(format!(
                "quota window must be whole seconds, got {:?}",
                within
            )));
        }
        let within_secs = i64::try_from(within.as_secs())
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                WindowgateError::Config(format!(
                    "quota window must be between 1s and {}s, got {:?}",
                    i64::MAX,
                    within
                ))
            })?;

        Ok(Self {
            limit,
            within,
            within_secs,
        })
    }

    /// Shorthand for a quota whose window is `secs` seconds.
    pub fn per_seconds(limit: u64, secs: u64) -> Result<Self> {
        Self::new(limit, Duration::from_secs(secs))
    }

    /// Maximum number of requests allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window duration.
    pub fn within(&self) -> Duration {
        self.within
    }

    /// Window duration in whole seconds.
    pub fn within_secs(&self) -> u64 {
        self.within.as_secs()
    }

    /// Index of the fixed window containing `now`.
    pub fn slot(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.within_secs)
    }

    /// Epoch seconds at which the window containing `now` ends.
    pub fn reset_timestamp(&self, now: DateTime<Utc>) -> i64 {
        self.slot(now)
            .saturating_add(1)
            .saturating_mul(self.within_secs)
    }

    /// The instant at which the window containing `now` ends.
    pub fn resets_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::from_timestamp(self.reset_timestamp(now), 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Requests left in the window once the counter reached `counter`.
    pub fn remaining(&self, counter: u64) -> u64 {
        self.limit.saturating_sub(counter)
    }
}
