//! In-process counter store.
//!
//! Correct within a single process only. Window and bucket state is keyed in
//! a [`DashMap`], and every multi-step operation runs while holding the
//! entry's shard guard, so concurrent callers on one key are serialized
//! without a global lock and unrelated keys never contend.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use super::backend::{BucketCheck, CounterStore, StoreError, WindowCheck};
use super::key::CounterKey;
use crate::clock::Clock;

/// Per-key sliding-window state: ordered acceptance timestamps.
#[derive(Debug, Default)]
struct WindowSlot {
    entries: VecDeque<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
}

/// Per-key token-bucket state, mutated only under the entry guard.
#[derive(Debug)]
struct BucketSlot {
    tokens: f64,
    refreshed_at: DateTime<Utc>,
}

/// Counter store backed by process-local maps.
pub struct InProcessStore {
    clock: Arc<dyn Clock>,
    windows: DashMap<String, WindowSlot>,
    buckets: DashMap<String, BucketSlot>,
}

impl InProcessStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Number of live window counters, primarily for tests and maintenance.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Drop state that has been idle longer than `horizon`.
    ///
    /// `horizon` should be at least the longest configured window plus a
    /// safety margin; anything idle that long can no longer influence a
    /// decision.
    pub fn purge_expired(&self, horizon: Duration) {
        let cutoff = self.clock.now() - horizon;
        let before = self.windows.len() + self.buckets.len();
        self.windows
            .retain(|_, slot| slot.last_seen.map_or(false, |seen| seen > cutoff));
        self.buckets.retain(|_, slot| slot.refreshed_at > cutoff);
        let after = self.windows.len() + self.buckets.len();
        if before != after {
            debug!(purged = before - after, "Evicted idle counters");
        }
    }
}

#[async_trait]
impl CounterStore for InProcessStore {
    async fn sliding_window_check(
        &self,
        key: &CounterKey,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowCheck, StoreError> {
        let now = self.clock.now();
        let cutoff = now - Duration::seconds(window_secs as i64);

        // The entry guard serializes the expire/count/record steps per key.
        let mut slot = self.windows.entry(key.storage_key()).or_default();
        slot.last_seen = Some(now);

        while slot.entries.front().map_or(false, |t| *t <= cutoff) {
            slot.entries.pop_front();
        }

        let count = slot.entries.len() as u32;
        if count >= limit {
            // Rejected attempts are not recorded.
            return Ok(WindowCheck {
                accepted: false,
                count,
                oldest: slot.entries.front().copied(),
            });
        }

        slot.entries.push_back(now);
        Ok(WindowCheck {
            accepted: true,
            count: count + 1,
            oldest: slot.entries.front().copied(),
        })
    }

    async fn token_bucket_consume(
        &self,
        key: &CounterKey,
        capacity: u32,
        refill_per_sec: f64,
    ) -> Result<BucketCheck, StoreError> {
        let now = self.clock.now();
        let capacity = capacity as f64;

        let mut slot = self
            .buckets
            .entry(key.storage_key())
            .or_insert_with(|| BucketSlot {
                tokens: capacity,
                refreshed_at: now,
            });

        let elapsed = (now - slot.refreshed_at).num_milliseconds().max(0) as f64 / 1000.0;
        slot.tokens = (slot.tokens + elapsed * refill_per_sec).min(capacity);
        slot.refreshed_at = now;

        if slot.tokens >= 1.0 {
            slot.tokens -= 1.0;
            Ok(BucketCheck {
                accepted: true,
                tokens: slot.tokens,
            })
        } else {
            Ok(BucketCheck {
                accepted: false,
                tokens: slot.tokens,
            })
        }
    }
}
