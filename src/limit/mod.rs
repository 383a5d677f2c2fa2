//! Rate limiting logic and counter storage.

mod backend;
mod bucket;
mod decision;
mod distributed;
mod key;
mod memory;
mod rules;
mod window;

pub use backend::{BucketCheck, CounterStore, OutageLatch, StoreError, WindowCheck};
pub use bucket::BurstLimiter;
pub use decision::{RateLimitDecision, RejectReason};
pub use distributed::{RedisStore, RedisStoreConfig};
pub use key::CounterKey;
pub use memory::InProcessStore;
pub use rules::{PathPattern, RateLimitRule, RuleResolver, RuleScope};
pub use window::WindowEvaluator;
