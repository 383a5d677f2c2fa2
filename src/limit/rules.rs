//! Rate limit rules and route resolution.
//!
//! Rules are loaded once from configuration, validated up front, and are
//! read-only afterwards. Resolution maps a `(method, path)` pair to the
//! ordered set of rules that apply to it: exact `"METHOD path"` entries win,
//! then wildcard patterns in registration order, then the default rule set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{GatekeeperError, Result};

/// The dimension a rule counts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// Per origin network address
    Origin,
    /// Per authenticated identity
    Identity,
    /// Per method + path
    Route,
    /// One shared counter for all traffic
    Global,
}

impl std::fmt::Display for RuleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleScope::Origin => "origin",
            RuleScope::Identity => "identity",
            RuleScope::Route => "route",
            RuleScope::Global => "global",
        };
        write!(f, "{}", name)
    }
}

/// A rate limit rule specifying the limit, window, and counting scope.
///
/// Immutable once loaded. Many rules may apply to a single request; each is
/// evaluated against its own counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Number of requests allowed per window
    pub request_limit: u32,
    /// Window length in seconds
    pub window_secs: u64,
    /// Counting scope
    pub scope: RuleScope,
    /// Optional burst capacity override for the token bucket
    #[serde(default)]
    pub burst_allowance: Option<u32>,
    /// Human-readable name, also part of the counter key
    #[serde(default)]
    pub description: String,
}

impl RateLimitRule {
    /// Reject invalid rules before any traffic is served.
    pub fn validate(&self) -> Result<()> {
        if self.request_limit == 0 {
            return Err(GatekeeperError::Config(format!(
                "rule '{}': request_limit must be positive",
                self.description
            )));
        }
        if self.window_secs == 0 {
            return Err(GatekeeperError::Config(format!(
                "rule '{}': window_secs must be positive",
                self.description
            )));
        }
        if self.burst_allowance == Some(0) {
            return Err(GatekeeperError::Config(format!(
                "rule '{}': burst_allowance must be positive when set",
                self.description
            )));
        }
        Ok(())
    }

    /// Stable identifier embedded in counter keys.
    ///
    /// Includes limit, window, and description verbatim so distinct rules map
    /// to distinct counters even when their numeric parameters agree.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}/{}s:{}",
            self.request_limit, self.window_secs, self.description
        )
    }
}

/// One segment of a parsed path pattern.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    /// `:name` — matches exactly one segment
    Param,
    /// `*` — matches one segment, or any remainder in final position
    Wildcard,
}

/// A compiled `"METHOD /path"` pattern.
///
/// The method part is optional; `*` or a missing method matches any method.
/// Path segments support `:param` placeholders and `*` wildcards, with a
/// trailing `*` matching any remainder (including none).
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    method: Option<String>,
    segments: Vec<Segment>,
    raw: String,
}

impl PathPattern {
    /// Parse a pattern such as `"GET /api/parishes/:id"` or `"/health"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GatekeeperError::Config("empty path pattern".to_string()));
        }

        let (method, path) = match raw.split_once(' ') {
            Some((m, p)) if !m.starts_with('/') => (Some(m), p.trim()),
            _ => (None, raw),
        };
        if !path.starts_with('/') {
            return Err(GatekeeperError::Config(format!(
                "pattern '{}': path must start with '/'",
                raw
            )));
        }

        let method = match method {
            None | Some("*") => None,
            Some(m) => Some(m.to_ascii_uppercase()),
        };

        let mut segments = Vec::new();
        for s in path.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
            if s == "*" {
                segments.push(Segment::Wildcard);
            } else if let Some(name) = s.strip_prefix(':') {
                if name.is_empty() {
                    return Err(GatekeeperError::Config(format!(
                        "pattern '{}': unnamed path parameter",
                        raw
                    )));
                }
                segments.push(Segment::Param);
            } else {
                segments.push(Segment::Literal(s.to_string()));
            }
        }

        Ok(Self {
            method,
            segments,
            raw: raw.to_string(),
        })
    }

    /// Whether this pattern is a plain literal route with a fixed method.
    pub fn is_exact(&self) -> bool {
        self.method.is_some()
            && self
                .segments
                .iter()
                .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// The `"METHOD /path"` form for exact-map lookups.
    fn exact_key(&self) -> String {
        let path: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.as_str(),
                _ => unreachable!("exact_key on non-literal pattern"),
            })
            .collect();
        format!(
            "{} /{}",
            self.method.as_deref().unwrap_or("*"),
            path.join("/")
        )
    }

    /// Match a concrete request against this pattern.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        if let Some(ref m) = self.method {
            if !m.eq_ignore_ascii_case(method) {
                return false;
            }
        }

        let parts: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let mut i = 0;
        for (idx, segment) in self.segments.iter().enumerate() {
            let last = idx == self.segments.len() - 1;
            match segment {
                Segment::Wildcard if last => return true,
                Segment::Wildcard | Segment::Param => {
                    if i >= parts.len() {
                        return false;
                    }
                    i += 1;
                }
                Segment::Literal(lit) => {
                    if parts.get(i).map_or(true, |p| p != lit) {
                        return false;
                    }
                    i += 1;
                }
            }
        }
        i == parts.len()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Resolves the rule set applicable to a request.
///
/// Built once from configuration; resolution is pure and lock-free, safe to
/// call from any number of concurrent tasks.
#[derive(Debug, Default)]
pub struct RuleResolver {
    exact: HashMap<String, Arc<Vec<RateLimitRule>>>,
    patterns: Vec<(PathPattern, Arc<Vec<RateLimitRule>>)>,
    defaults: Arc<Vec<RateLimitRule>>,
}

impl RuleResolver {
    /// Create a resolver with only a default rule set.
    pub fn new(defaults: Vec<RateLimitRule>) -> Result<Self> {
        for rule in &defaults {
            rule.validate()?;
        }
        Ok(Self {
            exact: HashMap::new(),
            patterns: Vec::new(),
            defaults: Arc::new(defaults),
        })
    }

    /// Register a route override. Literal patterns with a fixed method go to
    /// the exact table; everything else is matched in registration order.
    pub fn register(&mut self, pattern: &str, rules: Vec<RateLimitRule>) -> Result<()> {
        for rule in &rules {
            rule.validate()?;
        }
        let compiled = PathPattern::parse(pattern)?;
        let rules = Arc::new(rules);
        if compiled.is_exact() {
            self.exact.insert(compiled.exact_key(), rules);
        } else {
            self.patterns.push((compiled, rules));
        }
        info!(pattern = %pattern, "Registered route rule set");
        Ok(())
    }

    /// Resolve the ordered rule set for a request.
    pub fn resolve(&self, method: &str, path: &str) -> Arc<Vec<RateLimitRule>> {
        let exact_key = format!("{} {}", method.to_ascii_uppercase(), path);
        if let Some(rules) = self.exact.get(&exact_key) {
            return Arc::clone(rules);
        }
        for (pattern, rules) in &self.patterns {
            if pattern.matches(method, path) {
                return Arc::clone(rules);
            }
        }
        Arc::clone(&self.defaults)
    }

    pub fn defaults(&self) -> Arc<Vec<RateLimitRule>> {
        Arc::clone(&self.defaults)
    }
}
