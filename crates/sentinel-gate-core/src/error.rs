// sentinel-gate-core/src/error.rs
// ============================================================================
// Module: Gateway error taxonomy
// Description: Closed set of interceptor-chain errors and their JSON-RPC shaping.
// Purpose: Give every interceptor one vocabulary for reject outcomes.
// Dependencies: thiserror, serde_json
// ============================================================================

//! ## Overview
//! `GatewayError` is the one error type every interceptor in the chain
//! returns. Each variant carries enough structure for the transport to shape
//! a JSON-RPC error response and for the audit pipeline to classify the
//! outcome (`allow | deny | rate_limited`), without ever exposing internal
//! detail to the client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed taxonomy of errors an interceptor may reject a message with.
///
/// Variant order follows the table in the component's governing
/// specification (validation, authn, rate limiting, policy, routing).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// JSON-RPC parse or shape failure, or an unknown/disallowed method.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No API key presented and no cached session found.
    #[error("authentication required")]
    Unauthenticated,

    /// The presented API key failed lookup, or is revoked or expired.
    #[error("invalid API key")]
    InvalidApiKey,

    /// A cached session was found but its `ExpiresAt` has passed.
    #[error("session expired")]
    SessionExpired,

    /// A tool call reached the policy stage without a resolved session.
    #[error("session required")]
    MissingSession,

    /// GCRA denied the request.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Time until the next token is available.
        retry_after: Duration,
    },

    /// The policy engine denied the tool call.
    #[error("access denied by policy")]
    PolicyDenied(PolicyDenial),

    /// No upstream connection is available to service the request.
    #[error("no upstreams available")]
    UpstreamUnavailable,

    /// `tools/call` named a tool absent from the tool cache.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// An internal failure (RNG, store I/O, serialization) unrelated to
    /// client input. The detail string is for logs only; it must never be
    /// echoed to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Structured denial produced by the external policy engine.
#[derive(Debug, Clone)]
pub struct PolicyDenial {
    /// Identifier of the rule that produced the denial.
    pub rule_id: String,
    /// Human-readable rule name.
    pub rule_name: String,
    /// Reason the engine gave for the denial.
    pub reason: String,
    /// Optional link to documentation explaining the rule.
    pub help_url: Option<String>,
    /// Optional free-text help for the caller.
    pub help_text: Option<String>,
}

/// Validation-stage failures (spec §4.2).
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The payload was not valid JSON.
    #[error("parse error")]
    Parse,
    /// The payload was valid JSON but not a valid JSON-RPC 2.0 envelope.
    #[error("invalid request")]
    InvalidRequest,
    /// The method is not in the MCP method whitelist.
    #[error("method not found: {0}")]
    MethodNotFound(String),
    /// Parameters failed shape, tool-name, or argument-sanitization checks.
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// A `ServerToClient` response carried an id with no matching in-flight
    /// request (confused-deputy defense).
    #[error("unsolicited response")]
    UnsolicitedResponse,
}

/// Outcome classification used by the audit interceptor (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The message was forwarded.
    Allow,
    /// A non-rate-limit rejection occurred.
    Deny,
    /// The rejection was specifically a GCRA deny.
    RateLimited,
}

impl GatewayError {
    /// Classifies the error for audit/metrics purposes.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        match self {
            Self::RateLimited { .. } => Outcome::RateLimited,
            _ => Outcome::Deny,
        }
    }

    /// Maps this error to a `(code, safe_message, retry_after)` triple
    /// suitable for a JSON-RPC error object. The message never includes
    /// internal detail (file paths, stack traces, raw key material).
    #[must_use]
    pub fn to_jsonrpc(&self) -> (i64, &'static str, Option<Duration>) {
        match self {
            Self::Validation(ValidationError::Parse) => (-32700, "Parse error", None),
            Self::Validation(ValidationError::InvalidRequest | ValidationError::UnsolicitedResponse) => {
                (-32600, "Invalid Request", None)
            }
            Self::Validation(ValidationError::MethodNotFound(_)) => {
                (-32601, "Method not found", None)
            }
            Self::Validation(ValidationError::InvalidParams(_)) => (-32602, "Invalid params", None),
            Self::ToolNotFound(_) => (-32601, "Tool not found", None),
            Self::UpstreamUnavailable => (-32000, "No upstreams available", None),
            Self::Unauthenticated => (-32603, "Authentication required", None),
            Self::InvalidApiKey => (-32603, "Invalid API key", None),
            Self::SessionExpired => (-32603, "Session expired", None),
            Self::MissingSession => (-32603, "Session required", None),
            Self::PolicyDenied(_) => (-32603, "Access denied by policy", None),
            Self::RateLimited { retry_after } => {
                (-32603, "Rate limit exceeded", Some(*retry_after))
            }
            Self::Internal(_) => (-32603, "Internal error", None),
        }
    }

    /// Returns the normalized error-kind label used in audit records and
    /// JSON-RPC error metadata.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::Parse) => "parse",
            Self::Validation(ValidationError::InvalidRequest) => "invalid_request",
            Self::Validation(ValidationError::MethodNotFound(_)) => "method_not_found",
            Self::Validation(ValidationError::InvalidParams(_)) => "invalid_params",
            Self::Validation(ValidationError::UnsolicitedResponse) => "unsolicited_response",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidApiKey => "invalid_api_key",
            Self::SessionExpired => "session_expired",
            Self::MissingSession => "missing_session",
            Self::RateLimited { .. } => "rate_limited",
            Self::PolicyDenied(_) => "policy_denied",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_internal_code_with_retry_after() {
        let err = GatewayError::RateLimited {
            retry_after: Duration::from_millis(250),
        };
        let (code, message, retry_after) = err.to_jsonrpc();
        assert_eq!(code, -32603);
        assert_eq!(message, "Rate limit exceeded");
        assert_eq!(retry_after, Some(Duration::from_millis(250)));
        assert_eq!(err.outcome(), Outcome::RateLimited);
    }

    #[test]
    fn method_not_found_maps_to_32601() {
        let err = GatewayError::Validation(ValidationError::MethodNotFound("foo/bar".to_string()));
        let (code, message, _) = err.to_jsonrpc();
        assert_eq!(code, -32601);
        assert_eq!(message, "Method not found");
        assert_eq!(err.kind_label(), "method_not_found");
    }

    #[test]
    fn policy_denied_is_deny_outcome_not_rate_limited() {
        let err = GatewayError::PolicyDenied(PolicyDenial {
            rule_id: "r1".to_string(),
            rule_name: "no-secrets".to_string(),
            reason: "blocked".to_string(),
            help_url: None,
            help_text: None,
        });
        assert_eq!(err.outcome(), Outcome::Deny);
    }
}
