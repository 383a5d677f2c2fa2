//! Counter key generation and handling.

use super::rules::{RateLimitRule, RuleScope};

/// A key that uniquely identifies one counter in a store.
///
/// The key is composed of the rule's scope, the rule fingerprint, and the
/// scope value the request resolved to (origin address, identity id, route,
/// or a constant for global scope). The fingerprint embeds the rule's limit,
/// window, and description verbatim, so two different rules can never share
/// a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub scope: RuleScope,
    pub fingerprint: String,
    pub subject: String,
}

impl CounterKey {
    /// Derive the counter key for a rule applied to one scope value.
    pub fn for_rule(rule: &RateLimitRule, subject: &str) -> Self {
        Self {
            scope: rule.scope,
            fingerprint: rule.fingerprint(),
            subject: subject.to_string(),
        }
    }

    /// Build a key outside the rule table, e.g. for learned quotas.
    pub fn custom(scope: RuleScope, fingerprint: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            scope,
            fingerprint: fingerprint.into(),
            subject: subject.into(),
        }
    }

    /// Convert to the store key string.
    /// Format: "gk|{scope}|{fingerprint}|{subject}"
    /// We use | as delimiter since it cannot appear in scope names and is
    /// uncommon in subjects.
    pub fn storage_key(&self) -> String {
        format!("gk|{}|{}|{}", self.scope, self.fingerprint, self.subject)
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}
