// sentinel-gate-gateway/src/policy.rs
// ============================================================================
// Module: Policy interceptor
// Description: Builds an evaluation context for each `tools/call` and asks
//              the configured policy engine for a verdict.
// Purpose: Be the last gate before the router dispatches to an upstream.
// Dependencies: sentinel-gate-core
// ============================================================================

//! ## Overview
//! [`PolicyStage`] runs after auth and both rate limiters, once an
//! [`Identity`] is attached to the message. It only evaluates `tools/call`;
//! every other whitelisted method forwards unchanged, since policy rules
//! are scoped to tool invocations. A deny short-circuits the chain with
//! [`GatewayError::PolicyDenied`]; an allow-with-approval stashes the
//! requirement on the message and still forwards, leaving the decision of
//! what to do with it to a later stage this crate does not implement.

use std::sync::Arc;

use sentinel_gate_core::interceptor::{InterceptStage, Interceptor};
use sentinel_gate_core::message::{Direction, Message};
use sentinel_gate_core::policy::{EvaluationContext, PolicyDecision, PolicyEngine};
use sentinel_gate_core::GatewayError;

/// The policy interceptor: evaluates every `tools/call` against a
/// [`PolicyEngine`] and enforces its verdict.
pub struct PolicyStage {
    engine: Arc<dyn PolicyEngine>,
}

impl PolicyStage {
    /// Builds the stage around a shared engine handle.
    #[must_use]
    pub fn new(engine: Arc<dyn PolicyEngine>) -> Self {
        Self { engine }
    }
}

impl Interceptor for PolicyStage {
    fn name(&self) -> &'static str {
        "policy"
    }
}

#[async_trait::async_trait]
impl InterceptStage for PolicyStage {
    async fn intercept(&self, message: &mut Message) -> Result<(), GatewayError> {
        if message.direction() != Direction::ClientToServer {
            return Ok(());
        }

        let Some(envelope) = message.envelope() else {
            return Ok(());
        };
        if envelope.method.as_deref() != Some("tools/call") {
            return Ok(());
        }

        let identity = message
            .identity
            .clone()
            .ok_or(GatewayError::MissingSession)?;

        let params = envelope.params.clone().unwrap_or_default();
        let tool_name = params
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let arguments = params.get("arguments").cloned().unwrap_or_default();

        let context = EvaluationContext {
            identity,
            tool_name,
            arguments,
            upstream_id: None,
        };

        match self.engine.evaluate(&context) {
            PolicyDecision::Allow { requires_approval } => {
                message.pending_approval = requires_approval;
                Ok(())
            }
            PolicyDecision::Deny(denial) => Err(GatewayError::PolicyDenied(denial)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_gate_core::error::PolicyDenial;
    use sentinel_gate_core::identity::Identity;
    use sentinel_gate_core::policy::ApprovalRequirement;
    use std::time::Duration;

    struct DenyEverything;

    impl PolicyEngine for DenyEverything {
        fn evaluate(&self, _context: &EvaluationContext) -> PolicyDecision {
            PolicyDecision::Deny(PolicyDenial {
                rule_id: "r1".to_string(),
                rule_name: "deny-all".to_string(),
                reason: "blocked for test".to_string(),
                help_url: None,
                help_text: None,
            })
        }
    }

    struct RequireApproval;

    impl PolicyEngine for RequireApproval {
        fn evaluate(&self, _context: &EvaluationContext) -> PolicyDecision {
            PolicyDecision::Allow {
                requires_approval: Some(ApprovalRequirement {
                    timeout: Duration::from_secs(30),
                }),
            }
        }
    }

    fn tool_call_message() -> Message {
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{}}}"#
                .to_vec(),
            0,
        );
        msg.identity = Some(Identity::new("user-1", "Alice"));
        msg
    }

    #[tokio::test]
    async fn non_tool_call_methods_bypass_policy() {
        let stage = PolicyStage::new(Arc::new(DenyEverything));
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#.to_vec(),
            0,
        );
        assert!(stage.intercept(&mut msg).await.is_ok());
    }

    #[tokio::test]
    async fn missing_identity_is_rejected() {
        let stage = PolicyStage::new(Arc::new(DenyEverything));
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{}}}"#
                .to_vec(),
            0,
        );
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingSession));
    }

    #[tokio::test]
    async fn deny_decision_rejects_the_call() {
        let stage = PolicyStage::new(Arc::new(DenyEverything));
        let mut msg = tool_call_message();
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(err, GatewayError::PolicyDenied(_)));
    }

    #[tokio::test]
    async fn allow_forwards_with_no_pending_approval() {
        let stage = PolicyStage::new(Arc::new(sentinel_gate_core::AllowAllPolicyEngine));
        let mut msg = tool_call_message();
        assert!(stage.intercept(&mut msg).await.is_ok());
        assert!(msg.pending_approval.is_none());
    }

    #[tokio::test]
    async fn allow_with_approval_stashes_the_requirement() {
        let stage = PolicyStage::new(Arc::new(RequireApproval));
        let mut msg = tool_call_message();
        assert!(stage.intercept(&mut msg).await.is_ok());
        assert!(msg.pending_approval.is_some());
    }

    #[tokio::test]
    async fn server_to_client_messages_bypass_policy() {
        let stage = PolicyStage::new(Arc::new(DenyEverything));
        let mut msg = Message::from_server_bytes(b"{}".to_vec(), 0);
        assert!(stage.intercept(&mut msg).await.is_ok());
    }
}
