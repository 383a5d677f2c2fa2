//! Reputation guard: short-window abuse detection and origin banning.
//!
//! Keeps its own per-origin activity samples, independent of the rule
//! counters, over a trailing 60 second window. An origin that exceeds the
//! suspicious-activity threshold is banned for a configured duration; bans
//! expire lazily on the next lookup. The threshold check and the ban write
//! are deliberately not atomic with each other - a short race admitting a
//! handful of extra requests is acceptable here.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;

/// Trailing window for activity counting, in seconds.
const ACTIVITY_WINDOW_SECS: i64 = 60;

/// An active origin ban.
#[derive(Debug, Clone, Serialize)]
pub struct BanRecord {
    pub origin: String,
    pub blocked_until: DateTime<Utc>,
}

/// Tracks per-origin request activity and bans abusive origins.
pub struct ReputationGuard {
    clock: Arc<dyn Clock>,
    suspicious_threshold: u32,
    block_duration: Duration,
    whitelist: HashSet<String>,
    activity: DashMap<String, VecDeque<DateTime<Utc>>>,
    bans: DashMap<String, DateTime<Utc>>,
}

impl ReputationGuard {
    pub fn new(
        clock: Arc<dyn Clock>,
        suspicious_threshold: u32,
        block_duration: Duration,
        whitelist: HashSet<String>,
    ) -> Self {
        Self {
            clock,
            suspicious_threshold,
            block_duration,
            whitelist,
            activity: DashMap::new(),
            bans: DashMap::new(),
        }
    }

    /// Return the active ban for an origin, if any.
    ///
    /// Whitelisted origins always pass. Expired bans are removed on the way
    /// through.
    pub fn active_ban(&self, origin: &str) -> Option<BanRecord> {
        if self.whitelist.contains(origin) {
            return None;
        }

        let blocked_until = self.bans.get(origin).map(|entry| *entry)?;
        if blocked_until > self.clock.now() {
            return Some(BanRecord {
                origin: origin.to_string(),
                blocked_until,
            });
        }

        self.bans.remove(origin);
        debug!(origin = %origin, "Ban expired");
        None
    }

    /// Record one attempt from an origin and ban it when the trailing-window
    /// count crosses the threshold.
    ///
    /// This is bookkeeping off the decision path: it never fails and never
    /// blocks the admission decision.
    pub fn record_activity(&self, origin: &str) {
        let now = self.clock.now();
        let cutoff = now - Duration::seconds(ACTIVITY_WINDOW_SECS);

        let count = {
            let mut samples = self.activity.entry(origin.to_string()).or_default();
            samples.push_back(now);
            while samples.front().map_or(false, |t| *t <= cutoff) {
                samples.pop_front();
            }
            samples.len() as u32
        };

        if count > self.suspicious_threshold && !self.whitelist.contains(origin) {
            let blocked_until = now + self.block_duration;
            warn!(
                origin = %origin,
                requests_in_window = count,
                blocked_until = %blocked_until,
                "Origin exceeded suspicious activity threshold, banning"
            );
            self.bans.insert(origin.to_string(), blocked_until);
        }
    }

    /// The configured suspicious-activity threshold.
    pub fn threshold(&self) -> u32 {
        self.suspicious_threshold
    }

    /// Length of the trailing activity window, in seconds.
    pub const fn activity_window_secs() -> u64 {
        ACTIVITY_WINDOW_SECS as u64
    }

    /// Number of currently tracked origins, for tests and maintenance.
    pub fn tracked_origins(&self) -> usize {
        self.activity.len()
    }

    /// Drop stale samples and expired bans.
    pub fn purge(&self) {
        let now = self.clock.now();
        let cutoff = now - Duration::seconds(ACTIVITY_WINDOW_SECS);
        self.activity.retain(|_, samples| {
            while samples.front().map_or(false, |t| *t <= cutoff) {
                samples.pop_front();
            }
            !samples.is_empty()
        });
        self.bans.retain(|_, blocked_until| *blocked_until > now);
    }
}
