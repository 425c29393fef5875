// sentinel-gate-core/src/audit.rs
// ============================================================================
// Module: Audit record shape and sensitive-key redaction
// Description: The data model the audit pipeline serializes, plus the
//              redaction rules applied before a record is written or cached.
// Purpose: Guarantee secret material never reaches the on-disk audit trail.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! `AuditRecord` mirrors the structured-event idiom used for MCP request
//! logging: one flat, `Serialize`-able struct per request, written as a
//! single JSON-Lines record. Redaction is a pure function applied to the
//! arguments sub-tree before a record is constructed, so the record type
//! itself can never accidentally carry raw secret values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Outcome;

/// Case-insensitive key fragments that mark a JSON object key as carrying
/// sensitive material. Any key containing one of these (after lowercasing)
/// has its value replaced with the redaction marker, recursively. Mirrors
/// spec's `password|secret|token|api_key|credential|auth|private_key` list
/// verbatim; `apikey` is kept alongside `api_key` to also catch the
/// no-underscore spelling without narrowing the spec's own fragments.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "password", "secret", "token", "api_key", "apikey", "credential", "auth", "private_key",
];

/// The value substituted for any redacted field.
pub const REDACTED_MARKER: &str = "***REDACTED***";

/// Recursively walks a JSON value, replacing the value of any object key
/// whose lowercased form contains a [`SENSITIVE_KEY_FRAGMENTS`] entry with
/// [`REDACTED_MARKER`]. Arrays are walked element-wise; scalars are
/// returned unchanged.
#[must_use]
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let lowered = key.to_lowercase();
                if SENSITIVE_KEY_FRAGMENTS.iter().any(|frag| lowered.contains(frag)) {
                    out.insert(key.clone(), Value::String(REDACTED_MARKER.to_string()));
                } else {
                    out.insert(key.clone(), redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Content-scan findings attached to a request, when a scanner collaborator
/// ran. Absent scanning (the common case today) serializes as all-zero /
/// empty fields rather than `null`, keeping the record shape stable across
/// deployments that do and don't wire a scanner in.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ScanFindings {
    /// Number of findings reported by the scanner.
    pub count: usize,
    /// Action the scanner recommended or took (e.g. `"block"`, `"warn"`).
    pub action: Option<String>,
    /// Finding categories reported, e.g. `"pii"`, `"secret"`.
    pub types: Vec<String>,
}

/// One audit trail entry: a flat, fully-owned record of a single request's
/// disposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Milliseconds since the Unix epoch when the request entered the chain.
    pub timestamp_ms: u64,
    /// The JSON-RPC request id, when present (absent for notifications).
    pub request_id: Option<String>,
    /// The session id bound to the connection, when one exists.
    pub session_id: Option<String>,
    /// The JSON-RPC method invoked.
    pub method: String,
    /// The tool name, for `tools/call` requests only.
    pub tool_name: Option<String>,
    /// Resolved subject identifier, when auth succeeded before this stage.
    pub subject_id: Option<String>,
    /// Resolved subject display name, when auth succeeded before this stage.
    pub identity_name: Option<String>,
    /// Client peer address, when the transport exposes one.
    pub peer_addr: Option<String>,
    /// Disposition of the request.
    pub outcome: Outcome,
    /// Normalized error-kind label, present only when `outcome != Allow`.
    pub error_kind: Option<&'static str>,
    /// Policy rule id responsible for the disposition, present only for
    /// policy denials.
    pub rule_id: Option<String>,
    /// Human-readable reason for the disposition, present only for denials.
    pub reason: Option<String>,
    /// Request arguments, already redacted, present only when policy
    /// configuration opts into payload logging.
    pub arguments: Option<Value>,
    /// Wall-clock duration of the request, in milliseconds.
    pub duration_ms: u64,
    /// Content-scan findings for this request's payload, if scanning ran.
    pub scan: ScanFindings,
    /// Transport the request arrived on, e.g. `"stdio"` or `"http"`.
    pub protocol: String,
    /// Protocol framework identifier, fixed at `"mcp"`.
    pub framework: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_password_field_case_insensitively() {
        let input = serde_json::json!({"Password": "hunter2", "name": "alice"});
        let redacted = redact(&input);
        assert_eq!(redacted["Password"], Value::String(REDACTED_MARKER.to_string()));
        assert_eq!(redacted["name"], Value::String("alice".to_string()));
    }

    #[test]
    fn redacts_nested_and_array_values() {
        let input = serde_json::json!({
            "config": {"api_key": "sk-123"},
            "items": [{"token": "abc"}, {"value": 1}]
        });
        let redacted = redact(&input);
        assert_eq!(
            redacted["config"]["api_key"],
            Value::String(REDACTED_MARKER.to_string())
        );
        assert_eq!(
            redacted["items"][0]["token"],
            Value::String(REDACTED_MARKER.to_string())
        );
        assert_eq!(redacted["items"][1]["value"], Value::from(1));
    }

    #[test]
    fn leaves_non_sensitive_scalars_untouched() {
        let input = serde_json::json!({"count": 42, "label": "ok"});
        let redacted = redact(&input);
        assert_eq!(redacted, input);
    }

    #[test]
    fn redaction_is_idempotent() {
        let input = serde_json::json!({"secret": "x", "nested": {"password": "y"}});
        let once = redact(&input);
        let twice = redact(&once);
        assert_eq!(once, twice);
    }
}
