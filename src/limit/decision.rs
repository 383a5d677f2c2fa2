//! Decision types returned by limit evaluations.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Machine-readable reason attached to a rejection.
///
/// These codes are part of the host-facing contract and must stay stable;
/// internal store or backend identifiers are never exposed alongside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    RateLimitExceeded,
    BurstLimitExceeded,
    IpBlocked,
    AdaptiveLimitExceeded,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            RejectReason::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            RejectReason::BurstLimitExceeded => "BURST_LIMIT_EXCEEDED",
            RejectReason::IpBlocked => "IP_BLOCKED",
            RejectReason::AdaptiveLimitExceeded => "ADAPTIVE_LIMIT_EXCEEDED",
        };
        write!(f, "{}", code)
    }
}

/// Outcome of a single limit evaluation.
///
/// Produced per call and returned to the interceptor; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed past this limit.
    pub allowed: bool,
    /// Slots left in the current window after this evaluation.
    pub remaining: u32,
    /// When the window constraining this decision resets.
    pub reset_at: DateTime<Utc>,
    /// Hint for the caller when rejected.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    pub fn allowed(remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            retry_after_secs: None,
        }
    }

    pub fn rejected(reset_at: DateTime<Utc>, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_reason_codes_serialize_stable() {
        let json = serde_json::to_string(&RejectReason::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_EXCEEDED\"");
        let json = serde_json::to_string(&RejectReason::IpBlocked).unwrap();
        assert_eq!(json, "\"IP_BLOCKED\"");
        assert_eq!(
            RejectReason::AdaptiveLimitExceeded.to_string(),
            "ADAPTIVE_LIMIT_EXCEEDED"
        );
    }

    #[test]
    fn test_rejected_decision_carries_retry_hint() {
        let now = Utc::now();
        let decision = RateLimitDecision::rejected(now, 30);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, Some(30));
    }
}
