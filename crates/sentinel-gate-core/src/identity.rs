// sentinel-gate-core/src/identity.rs
// ============================================================================
// Module: Caller identity
// Description: The authenticated principal attached to a message after auth.
// Purpose: Give the policy and audit stages a stable, role-bearing subject.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! `Identity` is the result of successfully resolving an API key or session
//! to a principal. It never carries the raw key or its hash; only the
//! fields downstream stages need (subject id, display name, roles, scopes).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A named permission grouping attached to an identity.
///
/// Stored as a plain string rather than a closed enum: the set of valid
/// roles is defined by configuration and the external policy engine, not by
/// this crate.
pub type Role = String;

/// The authenticated principal a message carries once auth has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier for the principal, independent of which API key
    /// was used to authenticate this particular request.
    pub subject_id: String,
    /// Human-readable label, for audit records and diagnostics only.
    pub display_name: String,
    /// Roles granted to this principal.
    pub roles: BTreeSet<Role>,
    /// Fine-grained scopes, narrower than roles, carried from the API key
    /// that resolved this identity.
    pub scopes: BTreeSet<String>,
}

impl Identity {
    /// Builds an identity with no roles or scopes.
    #[must_use]
    pub fn new(subject_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: display_name.into(),
            roles: BTreeSet::new(),
            scopes: BTreeSet::new(),
        }
    }

    /// Returns true if this identity carries the given role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Returns true if this identity carries the given scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// The key used to namespace per-identity rate limiting and audit
    /// grouping: the subject id, stable across the principal's API keys and
    /// sessions.
    #[must_use]
    pub fn rate_limit_key(&self) -> &str {
        &self.subject_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_identity_has_no_roles_or_scopes() {
        let identity = Identity::new("user-1", "Alice");
        assert!(!identity.has_role("admin"));
        assert!(!identity.has_scope("tools:write"));
    }

    #[test]
    fn rate_limit_key_is_subject_id() {
        let identity = Identity::new("user-1", "Alice");
        assert_eq!(identity.rate_limit_key(), "user-1");
    }

    #[test]
    fn has_role_reflects_inserted_roles() {
        let mut identity = Identity::new("user-1", "Alice");
        identity.roles.insert("admin".to_string());
        assert!(identity.has_role("admin"));
        assert!(!identity.has_role("viewer"));
    }
}
