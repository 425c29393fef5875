// sentinel-gate-core/src/tool.rs
// ============================================================================
// Module: Routable tool descriptor
// Description: The record the router caches per upstream-exposed tool.
// Purpose: Let tools/list be answered from cache and tools/call be routed
//          without re-querying every upstream on every request.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! `RoutableTool` is the unit the router's process-wide cache is keyed by
//! tool name. It is populated once per upstream, at the point the gateway
//! learns that upstream's tool list (typically during its own startup
//! handshake with each configured upstream), and is immutable thereafter —
//! the cache is rebuilt wholesale on upstream reconnect, never patched
//! in place.

use serde_json::Value;

/// A single tool advertised by one upstream, as cached by the router.
#[derive(Debug, Clone)]
pub struct RoutableTool {
    /// The tool's name, unique within the router's cache. Collisions across
    /// upstreams are resolved by first-registered-wins; later registrations
    /// of the same name are rejected at cache-build time.
    pub name: String,
    /// Human-readable description, forwarded verbatim in `tools/list`.
    pub description: Option<String>,
    /// The tool's JSON Schema for its input arguments, forwarded verbatim.
    pub input_schema: Value,
    /// Identifier of the upstream connection this tool is served by.
    pub upstream_id: String,
}

impl RoutableTool {
    /// Renders this tool in the shape expected inside an MCP `tools/list`
    /// result's `tools` array: `name`, `description`, `inputSchema`, with no
    /// `upstream_id` leaked to the client.
    #[must_use]
    pub fn to_client_json(&self) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("name".to_string(), Value::String(self.name.clone()));
        if let Some(description) = &self.description {
            object.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }
        object.insert("inputSchema".to_string(), self.input_schema.clone());
        Value::Object(object)
    }
}
