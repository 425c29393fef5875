// sentinel-gate-core/src/policy.rs
// ============================================================================
// Module: Policy evaluation contract
// Description: The request/response shape exchanged with the external
//              policy engine (CEL or otherwise) — this crate only defines
//              the contract, never a concrete evaluator.
// Purpose: Let the policy interceptor depend on a trait, not a specific
//          rule language or engine implementation.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! `EvaluationContext` is everything the policy interceptor gathers about a
//! `tools/call` request before asking the engine for a decision.
//! `PolicyDecision` is the engine's answer. The engine itself (a CEL
//! evaluator, a Rego sidecar, a hand-rolled rule table) lives outside this
//! crate and outside this repository; only the boundary is specified here.

use serde_json::Value;

use crate::error::PolicyDenial;
use crate::identity::Identity;

/// Everything the policy engine is given to decide a single `tools/call`.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// The resolved caller.
    pub identity: Identity,
    /// The tool being invoked.
    pub tool_name: String,
    /// The (already-sanitized) arguments being passed to the tool.
    pub arguments: Value,
    /// The upstream the tool resolves to, if routing has already happened.
    pub upstream_id: Option<String>,
}

/// The external policy engine's verdict on one [`EvaluationContext`].
#[derive(Debug, Clone)]
pub enum PolicyDecision {
    /// The call may proceed. `requires_approval` is set when the engine
    /// additionally wants a human-in-the-loop gate before the call
    /// actually reaches an upstream; the policy interceptor stashes this on
    /// the message for a downstream approval stage (out of scope here) and
    /// still forwards.
    Allow {
        /// Present when the engine wants out-of-band approval before the
        /// call proceeds to an upstream.
        requires_approval: Option<ApprovalRequirement>,
    },
    /// The call is rejected; carries the structured denial reason.
    Deny(PolicyDenial),
}

/// The engine's request for out-of-band (human) approval before an
/// otherwise-allowed call is actually dispatched.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalRequirement {
    /// How long the caller may wait for approval before the call is
    /// treated as denied.
    pub timeout: std::time::Duration,
}

impl PolicyDecision {
    /// An allow decision with no approval requirement.
    #[must_use]
    pub const fn allow() -> Self {
        Self::Allow { requires_approval: None }
    }

    /// Returns true if this decision allows the call to proceed (with or
    /// without a pending approval requirement).
    #[must_use]
    pub const fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// The boundary the policy interceptor depends on. A concrete CEL
/// evaluator, a remote policy service client, or a static allow-all
/// implementation can all satisfy this trait; none is provided here.
pub trait PolicyEngine: Send + Sync {
    /// Evaluates `context` and returns a decision. Implementations that call
    /// out to a remote service are expected to fail open or closed
    /// according to their own configuration, not this trait's contract.
    fn evaluate(&self, context: &EvaluationContext) -> PolicyDecision;
}

/// A policy engine that allows every call. Used as the default when no
/// concrete engine is configured, and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPolicyEngine;

impl PolicyEngine for AllowAllPolicyEngine {
    fn evaluate(&self, _context: &EvaluationContext) -> PolicyDecision {
        PolicyDecision::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn allow_all_engine_always_allows() {
        let engine = AllowAllPolicyEngine;
        let context = EvaluationContext {
            identity: Identity::new("user-1", "Alice"),
            tool_name: "echo".to_string(),
            arguments: serde_json::json!({}),
            upstream_id: None,
        };
        assert!(engine.evaluate(&context).is_allow());
    }

    #[test]
    fn deny_decision_is_not_allow() {
        let decision = PolicyDecision::Deny(PolicyDenial {
            rule_id: "r1".to_string(),
            rule_name: "block-all".to_string(),
            reason: "blocked".to_string(),
            help_url: None,
            help_text: None,
        });
        assert!(!decision.is_allow());
    }

    #[test]
    fn allow_with_approval_is_still_allow() {
        let decision = PolicyDecision::Allow {
            requires_approval: Some(ApprovalRequirement {
                timeout: std::time::Duration::from_secs(60),
            }),
        };
        assert!(decision.is_allow());
    }
}
