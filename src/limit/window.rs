//! Sliding-window evaluation on top of a counter store.

use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

use super::backend::{CounterStore, OutageLatch, WindowCheck};
use super::decision::RateLimitDecision;
use super::key::CounterKey;
use crate::clock::Clock;

/// Evaluates sliding-window rules against a counter store and maps the raw
/// check into a [`RateLimitDecision`].
///
/// Owns the fail-open policy for window counting: a store fault admits the
/// request and is logged once per outage, never once per request.
pub struct WindowEvaluator {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    outage: OutageLatch,
}

impl WindowEvaluator {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            outage: OutageLatch::new(),
        }
    }

    /// Evaluate one rule instance for a key.
    pub async fn evaluate(
        &self,
        key: &CounterKey,
        limit: u32,
        window_secs: u64,
    ) -> RateLimitDecision {
        match self.store.sliding_window_check(key, limit, window_secs).await {
            Ok(check) => {
                self.outage.clear("sliding_window");
                let decision = self.decision_from(check, limit, window_secs);
                if !decision.allowed {
                    debug!(key = %key, limit = limit, "Rate limit window full");
                }
                decision
            }
            Err(err) => {
                self.outage.trip("sliding_window", &err);
                // Fail open: over-admission is recoverable, false rejection
                // of legitimate traffic during an outage is not.
                let now = self.clock.now();
                RateLimitDecision::allowed(
                    limit.saturating_sub(1),
                    now + Duration::seconds(window_secs as i64),
                )
            }
        }
    }

    fn decision_from(&self, check: WindowCheck, limit: u32, window_secs: u64) -> RateLimitDecision {
        let now = self.clock.now();
        let window = Duration::seconds(window_secs as i64);
        let reset_at = check.oldest.map_or(now + window, |oldest| oldest + window);

        if check.accepted {
            RateLimitDecision::allowed(limit.saturating_sub(check.count), reset_at)
        } else {
            let retry_after = (reset_at - now).num_seconds().max(1) as u64;
            RateLimitDecision::rejected(reset_at, retry_after)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::limit::backend::{BucketCheck, StoreError};
    use crate::limit::memory::InProcessStore;
    use crate::limit::rules::{RateLimitRule, RuleScope};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> CounterKey {
        let rule = RateLimitRule {
            request_limit: 5,
            window_secs: 60,
            scope: RuleScope::Origin,
            burst_allowance: None,
            description: "window test".to_string(),
        };
        CounterKey::for_rule(&rule, "10.0.0.1")
    }

    #[tokio::test]
    async fn test_remaining_decreases_strictly() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InProcessStore::new(clock.clone()));
        let evaluator = WindowEvaluator::new(store, clock);
        let key = key();

        for expected in [4u32, 3, 2, 1, 0] {
            let decision = evaluator.evaluate(&key, 5, 60).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let decision = evaluator.evaluate(&key, 5, 60).await;
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_retry_after_tracks_oldest_entry() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InProcessStore::new(clock.clone()));
        let evaluator = WindowEvaluator::new(store, clock.clone());
        let key = key();

        evaluator.evaluate(&key, 1, 60).await;
        clock.advance_secs(20);
        let decision = evaluator.evaluate(&key, 1, 60).await;
        assert!(!decision.allowed);
        // Oldest entry is 20s old in a 60s window.
        assert_eq!(decision.retry_after_secs, Some(40));
    }

    /// Store that always fails, counting how many times it was asked.
    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn sliding_window_check(
            &self,
            _key: &CounterKey,
            _limit: u32,
            _window_secs: u64,
        ) -> Result<WindowCheck, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn token_bucket_consume(
            &self,
            _key: &CounterKey,
            _capacity: u32,
            _refill_per_sec: f64,
        ) -> Result<BucketCheck, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_outage_fails_open_for_every_request() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(BrokenStore {
            calls: AtomicUsize::new(0),
        });
        let evaluator = WindowEvaluator::new(store.clone(), clock);
        let key = key();

        for _ in 0..20 {
            let decision = evaluator.evaluate(&key, 5, 60).await;
            assert!(decision.allowed, "outage must never reject traffic");
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 20);
        assert!(evaluator.outage.is_tripped());
    }
}
