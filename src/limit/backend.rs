//! Counter store contract shared by the in-process and Redis backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::key::CounterKey;

/// Errors produced by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the operation did not complete.
    /// Callers recover by failing open.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something we could not interpret.
    #[error("counter store returned malformed data: {0}")]
    Malformed(String),
}

/// Result of an atomic sliding-window check.
#[derive(Debug, Clone)]
pub struct WindowCheck {
    /// Whether the request was admitted and recorded.
    pub accepted: bool,
    /// Entries retained in the window after the operation. Includes the new
    /// entry when accepted; a rejected attempt is never recorded.
    pub count: u32,
    /// Timestamp of the oldest retained entry, if any.
    pub oldest: Option<DateTime<Utc>>,
}

/// Result of an atomic token-bucket consume.
#[derive(Debug, Clone)]
pub struct BucketCheck {
    /// Whether a token was available and consumed.
    pub accepted: bool,
    /// Tokens left after the operation.
    pub tokens: f64,
}

/// Storage capability required by the limiters.
///
/// Both operations are single atomic transactions from the caller's point of
/// view: no caller ever issues a separate read and write around them, so the
/// check-then-act races live entirely inside one implementation.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Sliding-window check: expire old entries, count, and record the
    /// current attempt only if it fits under `limit`.
    async fn sliding_window_check(
        &self,
        key: &CounterKey,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowCheck, StoreError>;

    /// Token-bucket consume: refill by elapsed time (capped at `capacity`),
    /// then take one token if available.
    async fn token_bucket_consume(
        &self,
        key: &CounterKey,
        capacity: u32,
        refill_per_sec: f64,
    ) -> Result<BucketCheck, StoreError>;
}

/// Tracks store outages so a fault is logged once per detection rather than
/// once per request.
#[derive(Debug, Default)]
pub struct OutageLatch {
    tripped: AtomicBool,
}

impl OutageLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a store fault. Logs at WARN on the first failure of an outage
    /// and at DEBUG thereafter.
    pub fn trip(&self, component: &str, err: &StoreError) {
        if !self.tripped.swap(true, Ordering::Relaxed) {
            warn!(
                component = component,
                error = %err,
                "Counter store unavailable, failing open"
            );
        } else {
            debug!(component = component, error = %err, "Counter store still unavailable");
        }
    }

    /// Record a successful store operation, closing any active outage.
    pub fn clear(&self, component: &str) {
        if self.tripped.swap(false, Ordering::Relaxed) {
            info!(component = component, "Counter store recovered");
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_trips_once_until_cleared() {
        let latch = OutageLatch::new();
        let err = StoreError::Unavailable("connection refused".to_string());

        assert!(!latch.is_tripped());
        latch.trip("window", &err);
        assert!(latch.is_tripped());
        // Second trip while down keeps the latch set.
        latch.trip("window", &err);
        assert!(latch.is_tripped());

        latch.clear("window");
        assert!(!latch.is_tripped());

        // A new outage trips again.
        latch.trip("window", &err);
        assert!(latch.is_tripped());
    }
}
