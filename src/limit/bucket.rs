//! Token-bucket burst limiter.
//!
//! Smooths short bursts that a window counter's granularity would admit all
//! at once or reject unfairly at window boundaries. Capacity accumulates at
//! a steady refill rate and each admitted request consumes one token.

use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

use super::backend::{CounterStore, OutageLatch};
use super::decision::RateLimitDecision;
use super::key::CounterKey;
use crate::clock::Clock;

/// Burst limiter driving the store's token-bucket operation.
pub struct BurstLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    capacity: u32,
    refill_per_sec: f64,
    outage: OutageLatch,
}

impl BurstLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        capacity: u32,
        refill_per_sec: f64,
    ) -> Self {
        Self {
            store,
            clock,
            capacity,
            refill_per_sec,
            outage: OutageLatch::new(),
        }
    }

    /// Take one burst token for the key.
    ///
    /// `capacity_override` lets a matched rule's burst allowance replace the
    /// configured default capacity. A store fault fails open.
    pub async fn consume(
        &self,
        key: &CounterKey,
        capacity_override: Option<u32>,
    ) -> RateLimitDecision {
        let capacity = capacity_override.unwrap_or(self.capacity);
        let now = self.clock.now();

        match self
            .store
            .token_bucket_consume(key, capacity, self.refill_per_sec)
            .await
        {
            Ok(check) if check.accepted => {
                self.outage.clear("token_bucket");
                RateLimitDecision::allowed(check.tokens.floor().max(0.0) as u32, now)
            }
            Ok(check) => {
                self.outage.clear("token_bucket");
                debug!(key = %key, tokens = check.tokens, "Burst budget exhausted");
                RateLimitDecision::rejected(now + Duration::seconds(1), 1)
            }
            Err(err) => {
                self.outage.trip("token_bucket", &err);
                RateLimitDecision::allowed(capacity.saturating_sub(1), now)
            }
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
