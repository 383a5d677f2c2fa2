//! Gatekeeper - Adaptive Traffic Governance
//!
//! This crate implements the request-admission layer that sits between a
//! transport and the business handlers: every inbound request is checked
//! against sliding-window rate limits, a token-bucket burst limiter, a
//! reputation guard for abusive origins, a load-adaptive controller, and
//! statistically learned per-identity quotas before it is allowed through.
//! Counter state lives behind a pluggable backend (in-process or Redis), and
//! every enforcement path fails open so a degraded limiter never becomes an
//! outage.

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod interceptor;
pub mod limit;

pub use config::GatekeeperConfig;
pub use interceptor::{DispatchInterceptor, LimitInfo, Outcome, Rejection, RequestDescriptor};
pub use limit::{RateLimitDecision, RateLimitRule, RejectReason, RuleScope};
