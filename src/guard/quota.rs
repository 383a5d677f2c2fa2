//! Learned per-identity quotas.
//!
//! Authenticated identities get quotas derived from who they are and how they
//! actually use the API: a coarse category computed from aggregate counters
//! sets the base, and when enough per-route history exists the 90th
//! percentile of hourly usage is blended in. Computed limits are cached with
//! a short TTL to bound recomputation cost. Enforcement reuses the same
//! sliding-window mechanics as the rule counters, keyed by identity and
//! route.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::limit::{CounterKey, RateLimitDecision, RuleScope, WindowEvaluator};

/// Minimum hourly samples before history influences the quota.
const MIN_HOURLY_SAMPLES: usize = 10;
/// History retention horizon.
const HISTORY_RETENTION_HOURS: i64 = 7 * 24;
/// Blend weights: configured base vs. learned usage.
const BASE_WEIGHT: f64 = 0.3;
const LEARNED_WEIGHT: f64 = 0.7;
/// Headroom applied to the learned p90 so normal growth is not throttled.
const LEARNED_HEADROOM: f64 = 1.5;
/// Bounds on any learned quota.
const QUOTA_FLOOR: u32 = 10;
const QUOTA_CEILING_FACTOR: u32 = 3;
/// Quotas are enforced per minute.
const QUOTA_WINDOW_SECS: u64 = 60;

/// Coarse identity classification derived from aggregate counters, never
/// from a static role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityCategory {
    New,
    Regular,
    Trusted,
    Admin,
}

/// Base per-minute quota for each identity category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryQuotas {
    pub new_per_min: u32,
    pub regular_per_min: u32,
    pub trusted_per_min: u32,
    pub admin_per_min: u32,
}

impl Default for CategoryQuotas {
    fn default() -> Self {
        Self {
            new_per_min: 30,
            regular_per_min: 60,
            trusted_per_min: 120,
            admin_per_min: 200,
        }
    }
}

impl CategoryQuotas {
    pub fn base_for(&self, category: IdentityCategory) -> u32 {
        match category {
            IdentityCategory::New => self.new_per_min,
            IdentityCategory::Regular => self.regular_per_min,
            IdentityCategory::Trusted => self.trusted_per_min,
            IdentityCategory::Admin => self.admin_per_min,
        }
    }
}

/// Aggregate counters for one identity.
#[derive(Debug, Clone)]
struct IdentityStats {
    total_requests: u64,
    first_seen: DateTime<Utc>,
    violation_count: u32,
}

/// Hourly request counts for one `(identity, route)` pair.
#[derive(Debug, Default)]
struct RouteHistory {
    /// (hour since epoch, requests in that hour), oldest first.
    hourly: VecDeque<(i64, u32)>,
}

impl RouteHistory {
    fn prune(&mut self, current_hour: i64) {
        let horizon = current_hour - HISTORY_RETENTION_HOURS;
        while self.hourly.front().map_or(false, |(h, _)| *h < horizon) {
            self.hourly.pop_front();
        }
    }
}

/// Derives, caches, and enforces learned quotas.
pub struct LearnedQuotaEngine {
    clock: Arc<dyn Clock>,
    evaluator: Arc<WindowEvaluator>,
    quotas: CategoryQuotas,
    cache_ttl: Duration,
    stats: DashMap<String, IdentityStats>,
    history: DashMap<String, RouteHistory>,
    cache: DashMap<String, (u32, DateTime<Utc>)>,
}

impl LearnedQuotaEngine {
    pub fn new(
        clock: Arc<dyn Clock>,
        evaluator: Arc<WindowEvaluator>,
        quotas: CategoryQuotas,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            clock,
            evaluator,
            quotas,
            // Recomputation must happen at least hourly.
            cache_ttl: cache_ttl.min(Duration::hours(1)),
            stats: DashMap::new(),
            history: DashMap::new(),
            cache: DashMap::new(),
        }
    }

    /// Classify an identity from its aggregate counters.
    pub fn categorize(&self, identity: &str) -> IdentityCategory {
        let Some(stats) = self.stats.get(identity) else {
            return IdentityCategory::New;
        };
        let age_days = (self.clock.now() - stats.first_seen).num_days();

        if stats.violation_count >= 5 {
            IdentityCategory::New
        } else if age_days >= 90 && stats.total_requests >= 50_000 && stats.violation_count == 0 {
            IdentityCategory::Admin
        } else if age_days >= 30 && stats.total_requests >= 5_000 && stats.violation_count <= 1 {
            IdentityCategory::Trusted
        } else if age_days >= 7 && stats.total_requests >= 100 {
            IdentityCategory::Regular
        } else {
            IdentityCategory::New
        }
    }

    /// Record one accepted request for an identity and route.
    ///
    /// Best-effort bookkeeping: feeds the aggregate counters and the hourly
    /// history, and never influences the current decision.
    pub fn record_activity(&self, identity: &str, route: &str) {
        let now = self.clock.now();
        let hour = now.timestamp() / 3600;

        {
            let mut stats = self
                .stats
                .entry(identity.to_string())
                .or_insert_with(|| IdentityStats {
                    total_requests: 0,
                    first_seen: now,
                    violation_count: 0,
                });
            stats.total_requests += 1;
        }

        let mut history = self
            .history
            .entry(history_key(identity, route))
            .or_default();
        match history.hourly.back_mut() {
            Some((h, count)) if *h == hour => *count += 1,
            _ => history.hourly.push_back((hour, 1)),
        }
        history.prune(hour);
    }

    /// Record a limit violation against an identity.
    pub fn record_violation(&self, identity: &str) {
        let now = self.clock.now();
        let mut stats = self
            .stats
            .entry(identity.to_string())
            .or_insert_with(|| IdentityStats {
                total_requests: 0,
                first_seen: now,
                violation_count: 0,
            });
        stats.violation_count += 1;
    }

    /// The per-minute quota for an identity on a route.
    ///
    /// Cached per `(identity, route)` with the engine's TTL.
    pub fn smart_limit(&self, identity: &str, route: &str) -> u32 {
        let now = self.clock.now();
        let key = history_key(identity, route);

        if let Some(cached) = self.cache.get(&key) {
            let (limit, computed_at) = *cached;
            if now - computed_at < self.cache_ttl {
                return limit;
            }
        }

        let base = self.quotas.base_for(self.categorize(identity));
        let limit = match self.hourly_p90(&key, now) {
            Some(p90) => {
                let blended =
                    (base as f64 * BASE_WEIGHT + p90 * LEARNED_HEADROOM * LEARNED_WEIGHT).round();
                let ceiling = (base * QUOTA_CEILING_FACTOR).max(QUOTA_FLOOR);
                (blended as u32).clamp(QUOTA_FLOOR.min(ceiling), ceiling)
            }
            None => base,
        };

        debug!(identity = %identity, route = %route, limit = limit, "Computed learned quota");
        self.cache.insert(key, (limit, now));
        limit
    }

    /// Enforce the learned quota for one request. Returns the decision and
    /// the limit it was evaluated against.
    pub async fn evaluate(&self, identity: &str, route: &str) -> (RateLimitDecision, u32) {
        let limit = self.smart_limit(identity, route);
        let key = CounterKey::custom(
            RuleScope::Identity,
            "learned-quota",
            history_key(identity, route),
        );
        let decision = self.evaluator.evaluate(&key, limit, QUOTA_WINDOW_SECS).await;
        (decision, limit)
    }

    /// 90th percentile of completed hourly counts, if enough history exists.
    fn hourly_p90(&self, key: &str, now: DateTime<Utc>) -> Option<f64> {
        let current_hour = now.timestamp() / 3600;
        let mut history = self.history.get_mut(key)?;
        history.prune(current_hour);

        // The current hour is still accumulating; only completed hours count.
        let mut counts: Vec<u32> = history
            .hourly
            .iter()
            .filter(|(h, _)| *h < current_hour)
            .map(|(_, c)| *c)
            .collect();
        if counts.len() < MIN_HOURLY_SAMPLES {
            return None;
        }

        counts.sort_unstable();
        let rank = ((counts.len() as f64) * 0.9).ceil() as usize;
        Some(counts[rank.saturating_sub(1)] as f64)
    }

    /// Length of the quota enforcement window, in seconds.
    pub const fn window_secs() -> u64 {
        QUOTA_WINDOW_SECS
    }

    /// Drop history outside the retention horizon and stale cache entries.
    pub fn purge(&self) {
        let now = self.clock.now();
        let current_hour = now.timestamp() / 3600;
        self.history.retain(|_, history| {
            history.prune(current_hour);
            !history.hourly.is_empty()
        });
        self.cache
            .retain(|_, entry| now - entry.1 < self.cache_ttl);
    }
}

fn history_key(identity: &str, route: &str) -> String {
    format!("{}|{}", identity, route)
}
