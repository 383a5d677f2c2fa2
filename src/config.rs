//! Configuration management for Gatekeeper.
//!
//! Everything is loaded once at startup. `validate` rejects misconfiguration
//! before any traffic is served; a bad rule must fail fast at load time, not
//! degrade silently at request time.

use serde::{Deserialize, Serialize};

use crate::error::{GatekeeperError, Result};
use crate::guard::CategoryQuotas;
use crate::limit::{PathPattern, RateLimitRule, RuleScope};

/// Main configuration for the Gatekeeper admission layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Counter store selection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Rate limit rules and route overrides
    #[serde(default)]
    pub rules: RulesConfig,

    /// Token-bucket burst smoothing
    #[serde(default)]
    pub burst: BurstConfig,

    /// Abuse detection and origin banning
    #[serde(default)]
    pub reputation: ReputationConfig,

    /// Load-adaptive limit scaling
    #[serde(default)]
    pub adaptive: AdaptiveConfig,

    /// Learned per-identity quotas
    #[serde(default)]
    pub quota: QuotaConfig,
}

/// Counter store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Process-local counters
    Memory,
    /// Counters shared across processes through Redis
    Redis {
        url: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory
    }
}

fn default_key_prefix() -> String {
    "gatekeeper:".to_string()
}

/// Rule table: defaults, route overrides, and excluded paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Rules applied when no route override matches
    #[serde(default = "default_rules")]
    pub defaults: Vec<RateLimitRule>,

    /// Route-pattern overrides, matched in listed order
    #[serde(default)]
    pub routes: Vec<RouteRulesConfig>,

    /// Paths admitted without any checks (health probes and the like)
    #[serde(default)]
    pub exclusions: Vec<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            defaults: default_rules(),
            routes: Vec::new(),
            exclusions: Vec::new(),
        }
    }
}

/// Rules attached to one route pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRulesConfig {
    pub pattern: String,
    pub rules: Vec<RateLimitRule>,
}

fn default_rules() -> Vec<RateLimitRule> {
    vec![RateLimitRule {
        request_limit: 1000,
        window_secs: 60,
        scope: RuleScope::Origin,
        burst_allowance: None,
        description: "default per-origin".to_string(),
    }]
}

/// Token-bucket tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bucket capacity per origin
    #[serde(default = "default_burst_capacity")]
    pub capacity: u32,

    /// Tokens restored per second
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_burst_capacity(),
            refill_per_sec: default_refill_per_sec(),
        }
    }
}

fn default_burst_capacity() -> u32 {
    20
}

fn default_refill_per_sec() -> f64 {
    5.0
}

/// Reputation guard tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Requests in the trailing 60s after which an origin is banned
    #[serde(default = "default_suspicious_threshold")]
    pub suspicious_threshold: u32,

    /// Ban duration in seconds
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,

    /// Origins that are never banned
    #[serde(default)]
    pub whitelist: Vec<String>,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            suspicious_threshold: default_suspicious_threshold(),
            block_secs: default_block_secs(),
            whitelist: Vec::new(),
        }
    }
}

fn default_suspicious_threshold() -> u32 {
    150
}

fn default_block_secs() -> u64 {
    300
}

/// Load-adaptive scaling tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Load above which limits start shrinking
    #[serde(default = "default_load_threshold")]
    pub load_threshold: f64,

    /// Fraction of the limit shed at full load
    #[serde(default = "default_adaptive_factor")]
    pub adaptive_factor: f64,

    /// Minimum seconds between load samples
    #[serde(default = "default_sample_secs")]
    pub sample_secs: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            load_threshold: default_load_threshold(),
            adaptive_factor: default_adaptive_factor(),
            sample_secs: default_sample_secs(),
        }
    }
}

fn default_load_threshold() -> f64 {
    0.75
}

fn default_adaptive_factor() -> f64 {
    0.4
}

fn default_sample_secs() -> u64 {
    10
}

/// Learned quota tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base per-minute quota for each identity category
    #[serde(default)]
    pub categories: CategoryQuotas,

    /// How long a computed quota stays cached, capped at one hour
    #[serde(default = "default_quota_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            categories: CategoryQuotas::default(),
            cache_ttl_secs: default_quota_cache_ttl_secs(),
        }
    }
}

fn default_quota_cache_ttl_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl GatekeeperConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid configuration before serving traffic.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules.defaults {
            rule.validate()?;
        }
        for route in &self.rules.routes {
            PathPattern::parse(&route.pattern)?;
            if route.rules.is_empty() {
                return Err(GatekeeperError::Config(format!(
                    "route '{}' has no rules",
                    route.pattern
                )));
            }
            for rule in &route.rules {
                rule.validate()?;
            }
        }
        for exclusion in &self.rules.exclusions {
            PathPattern::parse(exclusion)?;
        }

        if self.burst.enabled {
            if self.burst.capacity == 0 {
                return Err(GatekeeperError::Config(
                    "burst.capacity must be positive".to_string(),
                ));
            }
            if self.burst.refill_per_sec <= 0.0 {
                return Err(GatekeeperError::Config(
                    "burst.refill_per_sec must be positive".to_string(),
                ));
            }
        }

        if self.reputation.suspicious_threshold == 0 {
            return Err(GatekeeperError::Config(
                "reputation.suspicious_threshold must be positive".to_string(),
            ));
        }
        if self.reputation.block_secs == 0 {
            return Err(GatekeeperError::Config(
                "reputation.block_secs must be positive".to_string(),
            ));
        }

        if self.adaptive.enabled {
            if !(0.0..1.0).contains(&self.adaptive.load_threshold)
                || self.adaptive.load_threshold <= 0.0
            {
                return Err(GatekeeperError::Config(
                    "adaptive.load_threshold must be within (0, 1)".to_string(),
                ));
            }
            if !(0.0..=1.0).contains(&self.adaptive.adaptive_factor)
                || self.adaptive.adaptive_factor == 0.0
            {
                return Err(GatekeeperError::Config(
                    "adaptive.adaptive_factor must be within (0, 1]".to_string(),
                ));
            }
        }

        if self.quota.enabled {
            let q = &self.quota.categories;
            if [
                q.new_per_min,
                q.regular_per_min,
                q.trusted_per_min,
                q.admin_per_min,
            ]
            .contains(&0)
            {
                return Err(GatekeeperError::Config(
                    "quota.categories must all be positive".to_string(),
                ));
            }
            if self.quota.cache_ttl_secs == 0 {
                return Err(GatekeeperError::Config(
                    "quota.cache_ttl_secs must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatekeeperConfig::default();
        assert!(config.validate().is_ok());
        assert!(matches!(config.backend, BackendConfig::Memory));
        assert!(config.burst.enabled);
        assert_eq!(config.reputation.suspicious_threshold, 150);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
backend:
  kind: redis
  url: redis://127.0.0.1/
rules:
  defaults:
    - request_limit: 100
      window_secs: 60
      scope: origin
      description: default
  routes:
    - pattern: "GET /api/reports/:id"
      rules:
        - request_limit: 10
          window_secs: 60
          scope: identity
          burst_allowance: 5
          description: report by id
  exclusions:
    - "/health"
burst:
  capacity: 30
  refill_per_sec: 10.0
reputation:
  suspicious_threshold: 200
  block_secs: 600
  whitelist:
    - 127.0.0.1
adaptive:
  enabled: true
  load_threshold: 0.8
  adaptive_factor: 0.5
quota:
  enabled: true
  categories:
    new_per_min: 20
    regular_per_min: 40
    trusted_per_min: 80
    admin_per_min: 160
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        match &config.backend {
            BackendConfig::Redis { url, key_prefix } => {
                assert_eq!(url, "redis://127.0.0.1/");
                assert_eq!(key_prefix, "gatekeeper:");
            }
            other => panic!("unexpected backend: {:?}", other),
        }
        assert_eq!(config.rules.routes.len(), 1);
        assert_eq!(config.rules.routes[0].rules[0].burst_allowance, Some(5));
        assert_eq!(config.reputation.whitelist, vec!["127.0.0.1"]);
        assert_eq!(config.quota.categories.regular_per_min, 40);
    }

    #[test]
    fn test_invalid_rule_fails_at_load() {
        let yaml = r#"
rules:
  defaults:
    - request_limit: 0
      window_secs: 60
      scope: origin
      description: broken
"#;
        assert!(GatekeeperConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_adaptive_threshold_fails_at_load() {
        let yaml = r#"
adaptive:
  enabled: true
  load_threshold: 1.5
"#;
        assert!(GatekeeperConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_pattern_fails_at_load() {
        let yaml = r#"
rules:
  routes:
    - pattern: "no-leading-slash"
      rules:
        - request_limit: 10
          window_secs: 60
          scope: origin
          description: x
"#;
        assert!(GatekeeperConfig::from_yaml(yaml).is_err());
    }
}
