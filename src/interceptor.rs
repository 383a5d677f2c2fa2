//! Dispatch interceptor: the single admission decision for every request.
//!
//! Orchestrates the guards and limiters in a fixed order: exclusion list,
//! reputation ban check, per-rule sliding windows (load-scaled when the
//! adaptive controller is enabled), learned per-identity quota, token-bucket
//! burst consumption. The first failing check short-circuits with a
//! structured rejection; success carries informational limit metadata from
//! the most restrictive passing rule so callers can self-throttle. Any
//! unexpected fault inside this orchestration fails open - enforcement
//! errors are a degraded-service condition, not an outage condition.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::{BackendConfig, GatekeeperConfig};
use crate::error::Result;
use crate::guard::{
    AdaptiveController, LearnedQuotaEngine, LoadProbe, ReputationGuard, SystemLoadProbe,
};
use crate::limit::{
    BurstLimiter, CounterKey, CounterStore, InProcessStore, PathPattern, RedisStore,
    RedisStoreConfig, RejectReason, RuleResolver, RuleScope, WindowEvaluator,
};

/// Scope value used for globally scoped rules.
const GLOBAL_SUBJECT: &str = "global";

/// The request descriptor handed over by the surrounding handler.
///
/// The interceptor never looks at bodies or business payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    /// Origin network address
    pub origin: String,
    /// Authenticated identity, when present
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RequestDescriptor {
    pub fn new(method: &str, path: &str, origin: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            origin: origin.to_string(),
            identity: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = Some(identity.to_string());
        self
    }

    /// Canonical `"METHOD path"` route string.
    fn route(&self) -> String {
        format!("{} {}", self.method.to_ascii_uppercase(), self.path)
    }
}

/// Informational limit metadata attached to admitted requests.
#[derive(Debug, Clone, Serialize)]
pub struct LimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub window_secs: u64,
    pub reset_at: DateTime<Utc>,
}

/// A structured rejection handed back to the caller.
///
/// Carries only stable reason codes and diagnostic numbers, never internal
/// identifiers or backend details.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub retry_after_secs: u64,
    pub limit: u32,
    pub remaining: u32,
    pub window_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
}

/// The admission decision for one request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Let the request through; `info` is present unless the path was
    /// excluded or the decision was made while failing open.
    Proceed { info: Option<LimitInfo> },
    /// Decline the request.
    Reject(Rejection),
}

impl Outcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Proceed { .. })
    }
}

/// The admission layer entry point.
///
/// One instance serves all in-flight requests concurrently; shared state
/// lives in the keyed stores underneath.
pub struct DispatchInterceptor {
    clock: Arc<dyn Clock>,
    resolver: RwLock<Arc<RuleResolver>>,
    exclusions: Vec<PathPattern>,
    windows: Arc<WindowEvaluator>,
    burst: Option<BurstLimiter>,
    reputation: ReputationGuard,
    adaptive: Option<AdaptiveController>,
    quota: Option<LearnedQuotaEngine>,
    /// Retained for counter maintenance when the in-process store is used.
    local_store: Option<Arc<InProcessStore>>,
}

impl DispatchInterceptor {
    /// Build from configuration with the system clock and load probe,
    /// connecting to Redis when the shared backend is selected.
    pub async fn from_config(config: GatekeeperConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let probe: Arc<dyn LoadProbe> = Arc::new(SystemLoadProbe::new());

        let (store, local_store): (Arc<dyn CounterStore>, Option<Arc<InProcessStore>>) =
            match &config.backend {
                BackendConfig::Memory => {
                    let store = Arc::new(InProcessStore::new(clock.clone()));
                    (store.clone(), Some(store))
                }
                BackendConfig::Redis { url, key_prefix } => {
                    let store = RedisStore::connect_with_config(
                        url,
                        RedisStoreConfig {
                            key_prefix: key_prefix.clone(),
                        },
                        clock.clone(),
                    )
                    .await?;
                    (Arc::new(store), None)
                }
            };

        let mut interceptor = Self::assemble(config, store, clock, probe)?;
        interceptor.local_store = local_store;
        Ok(interceptor)
    }

    /// Build with injected store, clock, and load probe.
    ///
    /// This is how tests and embedders with their own infrastructure wire
    /// the interceptor up.
    pub fn assemble(
        config: GatekeeperConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn LoadProbe>,
    ) -> Result<Self> {
        config.validate()?;

        let mut resolver = RuleResolver::new(config.rules.defaults.clone())?;
        for route in &config.rules.routes {
            resolver.register(&route.pattern, route.rules.clone())?;
        }

        let exclusions = config
            .rules
            .exclusions
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>>>()?;

        let windows = Arc::new(WindowEvaluator::new(store.clone(), clock.clone()));

        let burst = config.burst.enabled.then(|| {
            BurstLimiter::new(
                store.clone(),
                clock.clone(),
                config.burst.capacity,
                config.burst.refill_per_sec,
            )
        });

        let reputation = ReputationGuard::new(
            clock.clone(),
            config.reputation.suspicious_threshold,
            Duration::seconds(config.reputation.block_secs as i64),
            config.reputation.whitelist.iter().cloned().collect(),
        );

        let adaptive = config.adaptive.enabled.then(|| {
            AdaptiveController::new(
                probe,
                clock.clone(),
                config.adaptive.load_threshold,
                config.adaptive.adaptive_factor,
                Duration::seconds(config.adaptive.sample_secs as i64),
            )
        });

        let quota = config.quota.enabled.then(|| {
            LearnedQuotaEngine::new(
                clock.clone(),
                windows.clone(),
                config.quota.categories.clone(),
                Duration::seconds(config.quota.cache_ttl_secs as i64),
            )
        });

        Ok(Self {
            clock,
            resolver: RwLock::new(Arc::new(resolver)),
            exclusions,
            windows,
            burst,
            reputation,
            adaptive,
            quota,
            local_store: None,
        })
    }

    /// Decide whether one request may proceed.
    ///
    /// Never fails: an internal fault is logged with full context and the
    /// request is admitted.
    pub async fn intercept(&self, request: &RequestDescriptor) -> Outcome {
        match self.evaluate(request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    error = %err,
                    method = %request.method,
                    path = %request.path,
                    origin = %request.origin,
                    "Admission evaluation failed, failing open"
                );
                Outcome::Proceed { info: None }
            }
        }
    }

    async fn evaluate(&self, request: &RequestDescriptor) -> Result<Outcome> {
        // Excluded paths skip every check.
        if self
            .exclusions
            .iter()
            .any(|p| p.matches(&request.method, &request.path))
        {
            trace!(path = %request.path, "Path excluded from admission checks");
            return Ok(Outcome::Proceed { info: None });
        }

        // Active bans short-circuit before any rule evaluation.
        if let Some(ban) = self.reputation.active_ban(&request.origin) {
            debug!(origin = %request.origin, blocked_until = %ban.blocked_until, "Origin is banned");
            let retry_after =
                (ban.blocked_until - self.clock.now()).num_seconds().max(1) as u64;
            return Ok(Outcome::Reject(Rejection {
                reason: RejectReason::IpBlocked,
                retry_after_secs: retry_after,
                limit: self.reputation.threshold(),
                remaining: 0,
                window_secs: ReputationGuard::activity_window_secs(),
                blocked_until: Some(ban.blocked_until),
            }));
        }

        // Reputation sampling is bookkeeping, not part of the decision.
        self.reputation.record_activity(&request.origin);

        let route = request.route();
        let resolver = Arc::clone(&self.resolver.read());
        let rules = resolver.resolve(&request.method, &request.path);

        let mut info: Option<LimitInfo> = None;
        let mut burst_capacity: Option<u32> = None;

        for rule in rules.iter() {
            let Some(subject) = scope_subject(rule.scope, request, &route) else {
                // Identity-scoped rules do not apply to anonymous traffic.
                continue;
            };
            if burst_capacity.is_none() {
                burst_capacity = rule.burst_allowance;
            }

            let base_limit = rule.request_limit;
            let effective_limit = self
                .adaptive
                .as_ref()
                .map_or(base_limit, |a| a.effective_limit(base_limit));

            let key = CounterKey::for_rule(rule, &subject);
            let decision = self
                .windows
                .evaluate(&key, effective_limit, rule.window_secs)
                .await;

            if !decision.allowed {
                self.note_violation(request);
                let reason = if effective_limit < base_limit {
                    RejectReason::AdaptiveLimitExceeded
                } else {
                    RejectReason::RateLimitExceeded
                };
                return Ok(Outcome::Reject(Rejection {
                    reason,
                    retry_after_secs: decision.retry_after_secs.unwrap_or(1),
                    limit: effective_limit,
                    remaining: 0,
                    window_secs: rule.window_secs,
                    blocked_until: None,
                }));
            }

            let candidate = LimitInfo {
                limit: effective_limit,
                remaining: decision.remaining,
                window_secs: rule.window_secs,
                reset_at: decision.reset_at,
            };
            if info
                .as_ref()
                .map_or(true, |current| candidate.remaining < current.remaining)
            {
                info = Some(candidate);
            }
        }

        // Learned quota for authenticated identities.
        if let (Some(quota), Some(identity)) = (&self.quota, request.identity.as_deref()) {
            let (decision, limit) = quota.evaluate(identity, &route).await;
            if !decision.allowed {
                quota.record_violation(identity);
                return Ok(Outcome::Reject(Rejection {
                    reason: RejectReason::RateLimitExceeded,
                    retry_after_secs: decision.retry_after_secs.unwrap_or(1),
                    limit,
                    remaining: 0,
                    window_secs: LearnedQuotaEngine::window_secs(),
                    blocked_until: None,
                }));
            }
            quota.record_activity(identity, &route);

            let candidate = LimitInfo {
                limit,
                remaining: decision.remaining,
                window_secs: LearnedQuotaEngine::window_secs(),
                reset_at: decision.reset_at,
            };
            if info
                .as_ref()
                .map_or(true, |current| candidate.remaining < current.remaining)
            {
                info = Some(candidate);
            }
        }

        // Burst smoothing comes last: everything admitted so far still has
        // to fit the short-term budget.
        if let Some(burst) = &self.burst {
            let key = CounterKey::custom(RuleScope::Origin, "burst", request.origin.clone());
            let decision = burst.consume(&key, burst_capacity).await;
            if !decision.allowed {
                self.note_violation(request);
                return Ok(Outcome::Reject(Rejection {
                    reason: RejectReason::BurstLimitExceeded,
                    retry_after_secs: decision.retry_after_secs.unwrap_or(1),
                    limit: burst_capacity.unwrap_or_else(|| burst.capacity()),
                    remaining: 0,
                    window_secs: 1,
                    blocked_until: None,
                }));
            }
        }

        Ok(Outcome::Proceed { info })
    }

    /// Replace the rule table atomically; in-flight requests keep the
    /// resolver they already loaded.
    pub fn reload_rules(&self, resolver: RuleResolver) {
        *self.resolver.write() = Arc::new(resolver);
    }

    /// Drop idle counters, stale reputation samples, and expired bans.
    ///
    /// `horizon` should exceed the longest configured window.
    pub fn purge_expired(&self, horizon: Duration) {
        if let Some(store) = &self.local_store {
            store.purge_expired(horizon);
        }
        self.reputation.purge();
        if let Some(quota) = &self.quota {
            quota.purge();
        }
    }

    fn note_violation(&self, request: &RequestDescriptor) {
        if let (Some(quota), Some(identity)) = (&self.quota, request.identity.as_deref()) {
            quota.record_violation(identity);
        }
    }
}

fn scope_subject(
    scope: RuleScope,
    request: &RequestDescriptor,
    route: &str,
) -> Option<String> {
    match scope {
        RuleScope::Origin => Some(request.origin.clone()),
        RuleScope::Identity => request.identity.clone(),
        RuleScope::Route => Some(route.to_string()),
        RuleScope::Global => Some(GLOBAL_SUBJECT.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{AdaptiveConfig, BurstConfig, ReputationConfig, RouteRulesConfig};
    use crate::guard::FixedLoadProbe;
    use crate::limit::RateLimitRule;

    fn rule(limit: u32, window: u64, scope: RuleScope, description: &str) -> RateLimitRule {
        RateLimitRule {
            request_limit: limit,
            window_secs: window,
            scope,
            burst_allowance: None,
            description: description.to_string(),
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        probe: Arc<FixedLoadProbe>,
        interceptor: DispatchInterceptor,
    }

    fn harness(config: GatekeeperConfig) -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InProcessStore::new(clock.clone()));
        let probe = Arc::new(FixedLoadProbe::new(0.0));
        let mut interceptor = DispatchInterceptor::assemble(
            config,
            store.clone(),
            clock.clone(),
            probe.clone(),
        )
        .unwrap();
        interceptor.local_store = Some(store);
        Harness {
            clock,
            probe,
            interceptor,
        }
    }

    fn base_config() -> GatekeeperConfig {
        let mut config = GatekeeperConfig::default();
        config.rules.defaults = vec![rule(5, 60, RuleScope::Origin, "default")];
        // Generous burst so window tests are not confounded.
        config.burst = BurstConfig {
            enabled: true,
            capacity: 1000,
            refill_per_sec: 1000.0,
        };
        config.quota.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_window_rule_admits_with_decreasing_remaining() {
        let h = harness(base_config());
        let request = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");

        for expected in [4u32, 3, 2, 1, 0] {
            match h.interceptor.intercept(&request).await {
                Outcome::Proceed { info } => {
                    assert_eq!(info.unwrap().remaining, expected);
                }
                Outcome::Reject(rejection) => panic!("unexpected rejection: {:?}", rejection),
            }
        }

        match h.interceptor.intercept(&request).await {
            Outcome::Reject(rejection) => {
                assert_eq!(rejection.reason, RejectReason::RateLimitExceeded);
                assert!(rejection.retry_after_secs > 0);
                assert_eq!(rejection.limit, 5);
                assert_eq!(rejection.window_secs, 60);
            }
            Outcome::Proceed { .. } => panic!("sixth request must be rejected"),
        }
    }

    #[tokio::test]
    async fn test_window_recovers_without_manual_reset() {
        let h = harness(base_config());
        let request = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");

        for _ in 0..5 {
            assert!(h.interceptor.intercept(&request).await.is_allowed());
        }
        assert!(!h.interceptor.intercept(&request).await.is_allowed());

        h.clock.advance_secs(60);
        assert!(h.interceptor.intercept(&request).await.is_allowed());
    }

    #[tokio::test]
    async fn test_excluded_paths_skip_all_checks() {
        let mut config = base_config();
        config.rules.exclusions = vec!["/health".to_string()];
        let h = harness(config);
        let request = RequestDescriptor::new("GET", "/health", "10.0.0.1");

        for _ in 0..100 {
            match h.interceptor.intercept(&request).await {
                Outcome::Proceed { info } => assert!(info.is_none()),
                Outcome::Reject(_) => panic!("excluded path must never be rejected"),
            }
        }
    }

    #[tokio::test]
    async fn test_route_override_beats_default() {
        let mut config = base_config();
        config.rules.routes = vec![RouteRulesConfig {
            pattern: "POST /api/enrollments".to_string(),
            rules: vec![rule(2, 60, RuleScope::Origin, "enrollment writes")],
        }];
        let h = harness(config);
        let request = RequestDescriptor::new("POST", "/api/enrollments", "10.0.0.1");

        assert!(h.interceptor.intercept(&request).await.is_allowed());
        assert!(h.interceptor.intercept(&request).await.is_allowed());
        assert!(!h.interceptor.intercept(&request).await.is_allowed());

        // Other routes still use the default allowance.
        let other = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");
        assert!(h.interceptor.intercept(&other).await.is_allowed());
    }

    #[tokio::test]
    async fn test_identity_rules_skip_anonymous_requests() {
        let mut config = base_config();
        config.rules.defaults = vec![rule(1, 60, RuleScope::Identity, "per identity")];
        let h = harness(config);

        let anonymous = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");
        for _ in 0..10 {
            assert!(h.interceptor.intercept(&anonymous).await.is_allowed());
        }

        let authed =
            RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1").with_identity("alice");
        assert!(h.interceptor.intercept(&authed).await.is_allowed());
        assert!(!h.interceptor.intercept(&authed).await.is_allowed());
    }

    #[tokio::test]
    async fn test_burst_limiter_rejects_with_burst_reason() {
        let mut config = base_config();
        config.rules.defaults = vec![rule(1000, 60, RuleScope::Origin, "loose")];
        config.burst = BurstConfig {
            enabled: true,
            capacity: 3,
            refill_per_sec: 1.0,
        };
        let h = harness(config);
        let request = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");

        for _ in 0..3 {
            assert!(h.interceptor.intercept(&request).await.is_allowed());
        }
        match h.interceptor.intercept(&request).await {
            Outcome::Reject(rejection) => {
                assert_eq!(rejection.reason, RejectReason::BurstLimitExceeded);
                assert_eq!(rejection.retry_after_secs, 1);
            }
            Outcome::Proceed { .. } => panic!("burst budget should be exhausted"),
        }

        h.clock.advance_secs(1);
        assert!(h.interceptor.intercept(&request).await.is_allowed());
    }

    #[tokio::test]
    async fn test_reputation_ban_rejects_before_rules() {
        let mut config = base_config();
        config.rules.defaults = vec![rule(100_000, 60, RuleScope::Origin, "loose")];
        config.reputation = ReputationConfig {
            suspicious_threshold: 150,
            block_secs: 300,
            whitelist: vec!["127.0.0.1".to_string()],
        };
        let h = harness(config);
        let request = RequestDescriptor::new("GET", "/api/parishes", "203.0.113.9");

        // 151 attempts in one window trip the ban.
        for _ in 0..151 {
            h.interceptor.intercept(&request).await;
        }
        match h.interceptor.intercept(&request).await {
            Outcome::Reject(rejection) => {
                assert_eq!(rejection.reason, RejectReason::IpBlocked);
                assert!(rejection.blocked_until.is_some());
                assert!(rejection.retry_after_secs > 0);
            }
            Outcome::Proceed { .. } => panic!("banned origin must be rejected"),
        }

        // The whitelist is exempt no matter the volume.
        let trusted = RequestDescriptor::new("GET", "/api/parishes", "127.0.0.1");
        for _ in 0..200 {
            assert!(h.interceptor.intercept(&trusted).await.is_allowed());
        }

        // Ban expires on its own.
        h.clock.advance_secs(301);
        assert!(h.interceptor.intercept(&request).await.is_allowed());
    }

    #[tokio::test]
    async fn test_adaptive_scaling_changes_reason_code() {
        let mut config = base_config();
        config.rules.defaults = vec![rule(100, 60, RuleScope::Origin, "default")];
        config.adaptive = AdaptiveConfig {
            enabled: true,
            load_threshold: 0.75,
            adaptive_factor: 0.4,
            sample_secs: 10,
        };
        let h = harness(config);
        h.probe.set(1.0);
        let request = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");

        // Full load: effective limit is 100 * (1 - 0.4) = 60.
        for _ in 0..60 {
            assert!(h.interceptor.intercept(&request).await.is_allowed());
        }
        match h.interceptor.intercept(&request).await {
            Outcome::Reject(rejection) => {
                assert_eq!(rejection.reason, RejectReason::AdaptiveLimitExceeded);
                assert_eq!(rejection.limit, 60);
            }
            Outcome::Proceed { .. } => panic!("adaptive limit should reject"),
        }
    }

    #[tokio::test]
    async fn test_learned_quota_limits_identities() {
        let mut config = base_config();
        config.rules.defaults = vec![rule(100_000, 60, RuleScope::Origin, "loose")];
        config.quota.enabled = true;
        let h = harness(config);
        let request =
            RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1").with_identity("newbie");

        // New identity: 30 per minute.
        for _ in 0..30 {
            assert!(h.interceptor.intercept(&request).await.is_allowed());
        }
        match h.interceptor.intercept(&request).await {
            Outcome::Reject(rejection) => {
                assert_eq!(rejection.reason, RejectReason::RateLimitExceeded);
                assert_eq!(rejection.limit, 30);
            }
            Outcome::Proceed { .. } => panic!("quota should reject the 31st request"),
        }
    }

    #[tokio::test]
    async fn test_rejections_serialize_without_internals() {
        let h = harness(base_config());
        let request = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");

        for _ in 0..5 {
            h.interceptor.intercept(&request).await;
        }
        let outcome = h.interceptor.intercept(&request).await;
        let json = serde_json::to_value(&outcome).unwrap();
        let rejection = &json["reject"];
        assert_eq!(rejection["reason"], "RATE_LIMIT_EXCEEDED");
        assert!(rejection["retry_after_secs"].as_u64().unwrap() > 0);
        assert!(rejection.get("blocked_until").is_none());
    }

    #[tokio::test]
    async fn test_hot_rule_reload_swaps_atomically() {
        let h = harness(base_config());
        let request = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");

        for _ in 0..5 {
            assert!(h.interceptor.intercept(&request).await.is_allowed());
        }
        assert!(!h.interceptor.intercept(&request).await.is_allowed());

        // The swapped table applies to the very next request.
        let resolver =
            RuleResolver::new(vec![rule(50, 60, RuleScope::Origin, "default")]).unwrap();
        h.interceptor.reload_rules(resolver);
        assert!(h.interceptor.intercept(&request).await.is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_requests_respect_single_slot() {
        let mut config = base_config();
        config.rules.defaults = vec![rule(1, 60, RuleScope::Origin, "single slot")];
        config.reputation.suspicious_threshold = 100_000;
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InProcessStore::new(clock.clone()));
        let probe = Arc::new(FixedLoadProbe::new(0.0));
        let interceptor = Arc::new(
            DispatchInterceptor::assemble(config, store, clock, probe).unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..32 {
            let interceptor = Arc::clone(&interceptor);
            handles.push(tokio::spawn(async move {
                let request = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");
                interceptor.intercept(&request).await.is_allowed()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1, "exactly one concurrent caller may be admitted");
    }

    #[tokio::test]
    async fn test_purge_reclaims_idle_counters() {
        let h = harness(base_config());
        let request = RequestDescriptor::new("GET", "/api/parishes", "10.0.0.1");
        h.interceptor.intercept(&request).await;

        h.clock.advance_secs(3600);
        h.interceptor.purge_expired(Duration::seconds(120));
        assert_eq!(
            h.interceptor.local_store.as_ref().unwrap().window_count(),
            0
        );
    }
}
