// sentinel-gate-gateway/src/validation.rs
// ============================================================================
// Module: Message validation and argument sanitization
// Description: JSON-RPC shape checks, the MCP method whitelist, the
//              confused-deputy in-flight request id table, tool-name
//              policy, and the argument-tree sanitizer.
// Purpose: Be the first interceptor in the chain — reject anything
//          malformed or out of policy before any later stage spends work
//          on it.
// Dependencies: sentinel-gate-core, serde_json
// ============================================================================

//! ## Overview
//! [`ValidationStage`] is the chain's first interceptor. It only inspects
//! `ClientToServer` messages; `ServerToClient` messages (upstream
//! responses) are instead checked by [`ValidationStage::check_response`],
//! called directly by the router at the point it reads an upstream's reply,
//! since responses never flow back through the full client-facing chain.

use std::collections::HashSet;
use std::sync::Mutex;

use sentinel_gate_core::error::ValidationError;
use sentinel_gate_core::interceptor::{InterceptStage, Interceptor};
use sentinel_gate_core::message::{Direction, Message};
use sentinel_gate_core::GatewayError;
use serde_json::Value;

/// Maximum length, in bytes, a string anywhere in a sanitized arguments
/// tree may have after truncation.
pub const MAX_STRING_LENGTH: usize = 1024 * 1024;

/// Maximum length of a tool name, per spec's tool-name policy.
pub const MAX_TOOL_NAME_LENGTH: usize = 255;

/// The MCP methods this gateway accepts from clients. Anything else is
/// rejected with `-32601 Method not found` at the validation stage.
const METHOD_WHITELIST: &[&str] = &[
    "initialize",
    "initialized",
    "ping",
    "tools/list",
    "tools/call",
    "resources/list",
    "resources/read",
    "prompts/list",
    "prompts/get",
    "completion/complete",
    "logging/setLevel",
    "sampling/createMessage",
    "roots/list",
];

/// Returns true if `method` is in the MCP whitelist, or is one of the
/// `notifications/*` family (which is accepted wholesale).
#[must_use]
pub fn is_whitelisted_method(method: &str) -> bool {
    method.starts_with("notifications/") || METHOD_WHITELIST.contains(&method)
}

/// Returns true if `name` satisfies the tool-name policy: 1-255 characters,
/// `[A-Za-z][A-Za-z0-9_-]*`, and contains neither `..` nor `/`.
#[must_use]
pub fn is_valid_tool_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_TOOL_NAME_LENGTH {
        return false;
    }
    if name.contains("..") || name.contains('/') {
        return false;
    }
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Recursively sanitizes a JSON value: strips NUL bytes from every string
/// and truncates strings longer than [`MAX_STRING_LENGTH`]. Object keys and
/// array order are preserved. Idempotent: sanitizing an already-sanitized
/// value produces the same value.
#[must_use]
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let scrubbed: String = s.chars().filter(|c| *c != '\0').collect();
            if scrubbed.len() > MAX_STRING_LENGTH {
                let mut truncated = scrubbed;
                let mut end = MAX_STRING_LENGTH;
                while !truncated.is_char_boundary(end) {
                    end -= 1;
                }
                truncated.truncate(end);
                Value::String(truncated)
            } else {
                Value::String(scrubbed)
            }
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                out.insert(key.clone(), sanitize_value(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

/// Renders a JSON-RPC `id` value into the key used by the in-flight request
/// table. `null`, numbers, and strings are all legal id types on the wire.
fn id_key(id: &Value) -> String {
    id.to_string()
}

/// Tracks client request ids that have been forwarded but not yet answered,
/// so an upstream response with an unknown or already-consumed id can be
/// rejected (confused-deputy defense).
#[derive(Debug, Default)]
pub struct InFlightRequests {
    ids: Mutex<HashSet<String>>,
}

impl InFlightRequests {
    /// Builds an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` has been forwarded to an upstream and a response
    /// is expected.
    pub fn register(&self, id: &Value) {
        let mut ids = self.ids.lock().unwrap_or_else(|poison| poison.into_inner());
        ids.insert(id_key(id));
    }

    /// Consumes `id` if it was registered, returning whether it was found.
    /// An id is removed on first consumption; a second response with the
    /// same id will find nothing and be rejected.
    pub fn consume(&self, id: &Value) -> bool {
        let mut ids = self.ids.lock().unwrap_or_else(|poison| poison.into_inner());
        ids.remove(&id_key(id))
    }

    /// Number of requests currently awaiting a response. Exposed for
    /// health reporting.
    #[must_use]
    pub fn len(&self) -> usize {
        let ids = self.ids.lock().unwrap_or_else(|poison| poison.into_inner());
        ids.len()
    }

    /// Returns true if no requests are currently in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The first stage of the interceptor chain: JSON-RPC shape, method
/// whitelist, tool-name policy, and argument sanitization.
pub struct ValidationStage {
    in_flight: std::sync::Arc<InFlightRequests>,
    allowed_tool_names: Option<HashSet<String>>,
}

impl ValidationStage {
    /// Builds a validation stage sharing `in_flight` with whatever router
    /// component reads upstream responses. Applies no restriction beyond
    /// the base tool-name shape policy; see [`Self::with_allowed_tool_names`]
    /// to additionally restrict to a fixed set.
    #[must_use]
    pub fn new(in_flight: std::sync::Arc<InFlightRequests>) -> Self {
        Self { in_flight, allowed_tool_names: None }
    }

    /// Restricts `tools/call` to the given tool names, in addition to the
    /// base shape policy. An empty iterator applies no restriction, mirroring
    /// an empty `RouterConfig::allowed_tool_names`.
    #[must_use]
    pub fn with_allowed_tool_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        let set: HashSet<String> = names.into_iter().collect();
        self.allowed_tool_names = if set.is_empty() { None } else { Some(set) };
        self
    }

    /// Records that `id` has just been forwarded to an upstream and a
    /// correlated response is now expected. Called by the router
    /// immediately before writing to an upstream connection — not by this
    /// stage's own `intercept`, since at validation time it is not yet known
    /// whether a request will be answered locally (`initialize`,
    /// `tools/list`) or forwarded; registering ids that are never forwarded
    /// would leak them in the in-flight table forever, since no upstream
    /// response would ever arrive to consume them.
    pub fn register_in_flight(&self, id: &Value) {
        self.in_flight.register(id);
    }

    /// Checks an upstream `ServerToClient` response's shape and id against
    /// the in-flight table. Called by the router, not by the chain:
    /// responses never pass through the client-facing interceptor chain.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] if the response is not a JSON
    /// object, doesn't carry exactly one of `result` xor `error`, carries no
    /// id, or carries an id with no matching in-flight request.
    pub fn check_response(&self, root: Option<&Value>) -> Result<(), GatewayError> {
        let Some(object) = root.and_then(Value::as_object) else {
            return Err(GatewayError::Validation(ValidationError::InvalidRequest));
        };
        if object.contains_key("result") == object.contains_key("error") {
            return Err(GatewayError::Validation(ValidationError::InvalidRequest));
        }
        let Some(id) = object.get("id") else {
            return Err(GatewayError::Validation(ValidationError::UnsolicitedResponse));
        };
        if self.in_flight.consume(id) {
            Ok(())
        } else {
            Err(GatewayError::Validation(ValidationError::UnsolicitedResponse))
        }
    }
}

impl Interceptor for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }
}

#[async_trait::async_trait]
impl InterceptStage for ValidationStage {
    async fn intercept(&self, message: &mut Message) -> Result<(), GatewayError> {
        if message.direction() != Direction::ClientToServer {
            return Ok(());
        }

        let root: Value = serde_json::from_slice(message.raw())
            .map_err(|_| GatewayError::Validation(ValidationError::Parse))?;
        let object = root
            .as_object()
            .ok_or(GatewayError::Validation(ValidationError::InvalidRequest))?;

        let version_ok = object.get("jsonrpc").and_then(Value::as_str) == Some("2.0");
        if !version_ok {
            return Err(GatewayError::Validation(ValidationError::InvalidRequest));
        }

        let method = object
            .get("method")
            .and_then(Value::as_str)
            .ok_or(GatewayError::Validation(ValidationError::InvalidRequest))?;
        if method.is_empty() {
            return Err(GatewayError::Validation(ValidationError::InvalidRequest));
        }
        if !is_whitelisted_method(method) {
            return Err(GatewayError::Validation(ValidationError::MethodNotFound(
                method.to_string(),
            )));
        }

        if method == "tools/call" {
            let params = object.get("params");
            let name = params.and_then(|p| p.get("name")).and_then(Value::as_str);
            match name {
                Some(name) if is_valid_tool_name(name) => {
                    if let Some(allowed) = &self.allowed_tool_names {
                        if !allowed.contains(name) {
                            return Err(GatewayError::Validation(ValidationError::InvalidParams(
                                "tool name not in allowlist".to_string(),
                            )));
                        }
                    }
                }
                _ => {
                    return Err(GatewayError::Validation(ValidationError::InvalidParams(
                        "invalid or missing tool name".to_string(),
                    )));
                }
            }

            if let Some(arguments) = params.and_then(|p| p.get("arguments")) {
                let sanitized = sanitize_value(arguments);
                message
                    .rewrite_arguments(sanitized)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    /// Generates arbitrary JSON leaves, including strings that may embed NUL
    /// bytes, so the idempotence property actually exercises the scrubbing
    /// path rather than just passing already-clean values through.
    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Number(n.into())),
            "[a-zA-Z0-9 \u{0}]{0,32}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::hash_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(value in arb_json()) {
            let once = sanitize_value(&value);
            let twice = sanitize_value(&once);
            prop_assert_eq!(once, twice);
        }
    }

    fn stage() -> ValidationStage {
        ValidationStage::new(Arc::new(InFlightRequests::new()))
    }

    #[tokio::test]
    async fn accepts_whitelisted_notification() {
        let stage = stage();
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","method":"tools/list"}"#.to_vec(),
            0,
        );
        assert!(stage.intercept(&mut msg).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_unknown_method() {
        let stage = stage();
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"foo/bar"}"#.to_vec(),
            0,
        );
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Validation(ValidationError::MethodNotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_non_object_json() {
        let stage = stage();
        let mut msg = Message::from_client_bytes(b"[1,2,3]".to_vec(), 0);
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Validation(ValidationError::InvalidRequest)
        ));
    }

    #[tokio::test]
    async fn rejects_malformed_json_as_parse_error() {
        let stage = stage();
        let mut msg = Message::from_client_bytes(b"not json".to_vec(), 0);
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(ValidationError::Parse)));
    }

    #[tokio::test]
    async fn rejects_invalid_tool_name() {
        let stage = stage();
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"../etc"}}"#
                .to_vec(),
            0,
        );
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Validation(ValidationError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn sanitizes_arguments_in_place() {
        let stage = stage();
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"text":"a b"}}}"#
                .to_vec(),
            0,
        );
        stage.intercept(&mut msg).await.expect("valid message");
        let envelope = msg.envelope().expect("parses");
        let text = envelope
            .params
            .as_ref()
            .and_then(|p| p.get("arguments"))
            .and_then(|a| a.get("text"))
            .and_then(Value::as_str);
        assert_eq!(text, Some("ab"));
    }

    #[tokio::test]
    async fn register_in_flight_is_consumed_by_check_response() {
        let in_flight = Arc::new(InFlightRequests::new());
        let stage = ValidationStage::new(in_flight.clone());
        stage.register_in_flight(&Value::from(42));
        assert_eq!(in_flight.len(), 1);
        let response = serde_json::json!({"jsonrpc": "2.0", "id": 42, "result": {}});
        assert!(stage.check_response(Some(&response)).is_ok());
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn intercept_does_not_register_ids_that_may_be_answered_locally() {
        // `initialize`/`tools/list` ids are answered locally by the router
        // and never forwarded, so validation itself must not register them:
        // doing so would leak the in-flight table (nothing ever consumes
        // an id with no correlated upstream response).
        let in_flight = Arc::new(InFlightRequests::new());
        let stage = ValidationStage::new(in_flight.clone());
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":42,"method":"initialize"}"#.to_vec(),
            0,
        );
        stage.intercept(&mut msg).await.expect("valid message");
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn unsolicited_response_is_rejected() {
        let stage = stage();
        let response = serde_json::json!({"jsonrpc": "2.0", "id": 999, "result": {}});
        let err = stage.check_response(Some(&response)).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Validation(ValidationError::UnsolicitedResponse)
        ));
    }

    #[tokio::test]
    async fn response_with_both_result_and_error_is_rejected() {
        let stage = stage();
        let response =
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": -1, "message": "x"}});
        let err = stage.check_response(Some(&response)).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Validation(ValidationError::InvalidRequest)
        ));
    }

    #[tokio::test]
    async fn response_with_neither_result_nor_error_is_rejected() {
        let stage = stage();
        let response = serde_json::json!({"jsonrpc": "2.0", "id": 1});
        let err = stage.check_response(Some(&response)).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Validation(ValidationError::InvalidRequest)
        ));
    }

    #[tokio::test]
    async fn allowlisted_tool_name_rejects_names_outside_the_set() {
        let stage = ValidationStage::new(Arc::new(InFlightRequests::new()))
            .with_allowed_tool_names(["echo".to_string()]);
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"other"}}"#
                .to_vec(),
            0,
        );
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Validation(ValidationError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn allowlisted_tool_name_accepts_listed_names() {
        let stage = ValidationStage::new(Arc::new(InFlightRequests::new()))
            .with_allowed_tool_names(["echo".to_string()]);
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo"}}"#.to_vec(),
            0,
        );
        assert!(stage.intercept(&mut msg).await.is_ok());
    }

    #[test]
    fn tool_name_policy_rejects_path_traversal_and_slashes() {
        assert!(is_valid_tool_name("valid_name-1"));
        assert!(!is_valid_tool_name("../etc/passwd"));
        assert!(!is_valid_tool_name("a/b"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name("1abc"));
    }
}
