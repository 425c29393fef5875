// sentinel-gate-core/src/message.rs
// ============================================================================
// Module: Wire message model
// Description: The value threaded through the interceptor chain.
// Purpose: Preserve byte-exact JSON-RPC transit while carrying per-request context.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! A `Message` carries the raw bytes exactly as received so the router can
//! forward without re-encoding, a parsed view for interceptors that need
//! structured access, and a mutable slot for the identity resolved by the
//! auth stage. Once a response is synthesized in lieu of forwarding,
//! [`Direction`] flips to [`Direction::ServerToClient`].

use serde_json::Value;

use crate::identity::Identity;
use crate::policy::ApprovalRequirement;
use crate::session::Session;

/// Which way a message is flowing through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A request or notification moving from the client toward an upstream.
    ClientToServer,
    /// A response or server-initiated message moving back to the client.
    ServerToClient,
}

/// A parsed JSON-RPC 2.0 envelope, deliberately permissive: validation owns
/// rejecting malformed envelopes, this type only names the fields callers
/// need without re-parsing.
#[derive(Debug, Clone)]
pub struct JsonRpcEnvelope {
    /// The `id` field, absent for notifications.
    pub id: Option<Value>,
    /// The `method` field, present on requests/notifications.
    pub method: Option<String>,
    /// The `params` field.
    pub params: Option<Value>,
    /// The `result` field, present on success responses.
    pub result: Option<Value>,
    /// The `error` field, present on error responses.
    pub error: Option<Value>,
}

impl JsonRpcEnvelope {
    /// A request carries a method and (for calls) an id; a notification
    /// carries a method and no id.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    /// A response carries no method and exactly one of `result`/`error`.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.method.is_none()
    }
}

/// The value threaded through the interceptor chain.
///
/// Invariant: `raw` is the canonical wire form. Only the argument sub-tree
/// is ever rewritten (sanitization); any such rewrite re-serializes `raw`
/// rather than hand-editing bytes.
#[derive(Debug, Clone)]
pub struct Message {
    /// The exact bytes as received from the wire, newline stripped.
    raw: Vec<u8>,
    /// The parsed envelope, if `raw` parsed as a JSON-RPC object.
    envelope: Option<JsonRpcEnvelope>,
    /// Which way the message is currently flowing.
    direction: Direction,
    /// Milliseconds since the Unix epoch when the message entered the chain.
    pub received_at_ms: u64,
    /// The session resolved by the auth interceptor, if any.
    pub session: Option<Session>,
    /// The identity resolved by the auth interceptor, if any.
    pub identity: Option<Identity>,
    /// The transport-assigned connection identifier this message arrived
    /// on (a stdio process lifetime, or an HTTP-derived key). Empty until
    /// the transport sets it.
    pub connection_id: String,
    /// The client's peer address, when the transport exposes one (absent
    /// for stdio).
    pub peer_addr: Option<String>,
    /// The API key presented with this message, extracted by the
    /// transport (HTTP Bearer header) or by validation (stdio
    /// `params.apiKey`). Never logged or persisted; cleared once auth has
    /// resolved a session for it.
    pub api_key: Option<String>,
    /// Set by the policy interceptor when the engine allows a call but
    /// requires out-of-band approval before it reaches an upstream. A
    /// later approval stage (out of scope) consumes this; its mere
    /// presence does not itself block forwarding.
    pub pending_approval: Option<ApprovalRequirement>,
    /// Milliseconds since the Unix epoch when the audit stage stamped this
    /// message, set only for `tools/call` requests. Absence means the
    /// message never reached (or was not eligible for) audit logging.
    pub audit_started_at_ms: Option<u64>,
}

impl Message {
    /// Builds a client-to-server message from raw bytes, parsing a best-
    /// effort envelope. A parse failure leaves `envelope` as `None`;
    /// validation is responsible for rejecting such messages.
    #[must_use]
    pub fn from_client_bytes(raw: Vec<u8>, received_at_ms: u64) -> Self {
        let envelope = parse_envelope(&raw);
        Self {
            raw,
            envelope,
            direction: Direction::ClientToServer,
            received_at_ms,
            session: None,
            identity: None,
            connection_id: String::new(),
            peer_addr: None,
            api_key: None,
            pending_approval: None,
            audit_started_at_ms: None,
        }
    }

    /// Builds a server-to-client message (an upstream response or
    /// server-initiated push).
    #[must_use]
    pub fn from_server_bytes(raw: Vec<u8>, received_at_ms: u64) -> Self {
        let envelope = parse_envelope(&raw);
        Self {
            raw,
            envelope,
            direction: Direction::ServerToClient,
            received_at_ms,
            session: None,
            identity: None,
            connection_id: String::new(),
            peer_addr: None,
            api_key: None,
            pending_approval: None,
            audit_started_at_ms: None,
        }
    }

    /// Returns the canonical wire bytes.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Returns the parsed envelope, if the raw bytes were valid JSON-RPC.
    #[must_use]
    pub const fn envelope(&self) -> Option<&JsonRpcEnvelope> {
        self.envelope.as_ref()
    }

    /// Returns the current flow direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Replaces the raw bytes and re-parses the envelope, re-stamping
    /// direction to `ServerToClient` as required when a stage synthesizes a
    /// response in lieu of forwarding.
    pub fn replace_with_response(&mut self, raw: Vec<u8>) {
        self.envelope = parse_envelope(&raw);
        self.raw = raw;
        self.direction = Direction::ServerToClient;
    }

    /// Rewrites only the `params.arguments` sub-tree, re-serializing the
    /// full envelope into `raw`. Used by the sanitizer, which must never
    /// touch any other part of the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the current raw bytes are not valid JSON, or if
    /// re-serialization fails.
    pub fn rewrite_arguments(&mut self, arguments: Value) -> Result<(), serde_json::Error> {
        let mut value: Value = serde_json::from_slice(&self.raw)?;
        if let Some(params) = value.get_mut("params").and_then(Value::as_object_mut) {
            params.insert("arguments".to_string(), arguments);
        }
        let raw = serde_json::to_vec(&value)?;
        self.envelope = parse_envelope(&raw);
        self.raw = raw;
        Ok(())
    }
}

fn parse_envelope(raw: &[u8]) -> Option<JsonRpcEnvelope> {
    let value: Value = serde_json::from_slice(raw).ok()?;
    let object = value.as_object()?;
    Some(JsonRpcEnvelope {
        id: object.get("id").cloned(),
        method: object
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string),
        params: object.get("params").cloned(),
        result: object.get("result").cloned(),
        error: object.get("error").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_has_method_and_no_id() {
        let msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","method":"tools/list"}"#.to_vec(),
            0,
        );
        let envelope = msg.envelope().expect("valid json");
        assert!(envelope.is_notification());
        assert!(!envelope.is_response());
    }

    #[test]
    fn request_has_id_and_is_not_notification() {
        let msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#.to_vec(),
            0,
        );
        let envelope = msg.envelope().expect("valid json");
        assert!(!envelope.is_notification());
    }

    #[test]
    fn malformed_json_yields_no_envelope() {
        let msg = Message::from_client_bytes(b"not json".to_vec(), 0);
        assert!(msg.envelope().is_none());
    }

    #[test]
    fn rewrite_arguments_touches_only_arguments_subtree() {
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"text":"hi "}}}"#
                .to_vec(),
            0,
        );
        msg.rewrite_arguments(serde_json::json!({"text": "hi"}))
            .expect("rewrite succeeds");
        let envelope = msg.envelope().expect("valid json");
        assert_eq!(
            envelope.params.as_ref().and_then(|p| p.get("name")).and_then(|v| v.as_str()),
            Some("echo")
        );
        assert_eq!(
            envelope
                .params
                .as_ref()
                .and_then(|p| p.get("arguments"))
                .and_then(|a| a.get("text"))
                .and_then(|v| v.as_str()),
            Some("hi")
        );
    }

    #[test]
    fn replace_with_response_flips_direction() {
        let mut msg = Message::from_client_bytes(
            br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_vec(),
            0,
        );
        assert_eq!(msg.direction(), Direction::ClientToServer);
        msg.replace_with_response(br#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_vec());
        assert_eq!(msg.direction(), Direction::ServerToClient);
    }
}
