//! Request guards layered above the rule counters.

mod adaptive;
mod quota;
mod reputation;

pub use adaptive::{AdaptiveController, FixedLoadProbe, LoadProbe, SystemLoadProbe};
pub use quota::{CategoryQuotas, IdentityCategory, LearnedQuotaEngine};
pub use reputation::{BanRecord, ReputationGuard};
