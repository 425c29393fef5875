// sentinel-gate-gateway/src/tools.rs
// ============================================================================
// Module: Upstream router and tool cache
// Description: The terminal chain stage: initialize/tools handling,
//              tool-name-to-upstream dispatch, and the connection boundary
//              a concrete upstream transport satisfies.
// Purpose: Turn a validated, authenticated, policy-allowed `ClientToServer`
//          message into a `ServerToClient` response.
// Dependencies: sentinel-gate-core, async-trait, serde_json
// ============================================================================

//! ## Overview
//! [`Router`] is the last stage in the declared chain. [`ToolCache`] is the
//! process-wide `name -> `[`RoutableTool`] map it reads; population (the
//! discovery handshake with each upstream) is an external collaborator, not
//! this module's concern, so the cache here only exposes register/get/list.
//! [`UpstreamConnectionProvider`] is the boundary to whatever actually owns
//! upstream stdin/stdout; no concrete process-spawning implementation is
//! provided, matching [`sentinel_gate_core::policy::PolicyEngine`]'s
//! boundary-only contract.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sentinel_gate_core::interceptor::{InterceptStage, Interceptor};
use sentinel_gate_core::message::{Direction, Message};
use sentinel_gate_core::tool::RoutableTool;
use sentinel_gate_core::GatewayError;
use serde_json::Value;

use crate::validation::ValidationStage;

/// The MCP protocol version this gateway advertises in `initialize`
/// responses and the `MCP-Protocol-Version` header.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// This gateway's own version string, surfaced in `initialize` and
/// `/health`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The process-wide cache of tools advertised by connected upstreams.
/// Collisions across upstreams are resolved first-registered-wins.
#[derive(Debug, Default)]
pub struct ToolCache {
    tools: Mutex<HashMap<String, RoutableTool>>,
}

impl ToolCache {
    /// Builds an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool`. Returns `false` without replacing the existing
    /// entry if a tool of the same name is already cached.
    pub fn register(&self, tool: RoutableTool) -> bool {
        let mut tools = self.tools.lock().unwrap_or_else(|p| p.into_inner());
        if tools.contains_key(&tool.name) {
            false
        } else {
            tools.insert(tool.name.clone(), tool);
            true
        }
    }

    /// Looks up one tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<RoutableTool> {
        let tools = self.tools.lock().unwrap_or_else(|p| p.into_inner());
        tools.get(name).cloned()
    }

    /// Every cached tool, sorted by name for deterministic `tools/list`
    /// ordering.
    #[must_use]
    pub fn list_sorted(&self) -> Vec<RoutableTool> {
        let tools = self.tools.lock().unwrap_or_else(|p| p.into_inner());
        let mut list: Vec<_> = tools.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Number of cached tools.
    #[must_use]
    pub fn len(&self) -> usize {
        let tools = self.tools.lock().unwrap_or_else(|p| p.into_inner());
        tools.len()
    }

    /// Returns true if no tools are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The boundary between the router and whatever owns live upstream
/// connections. A concrete implementation manages each upstream's
/// stdin/stdout pipe (or equivalent) and serializes requests on it so the
/// router never interleaves concurrent calls on the same connection; none
/// is provided here.
#[async_trait::async_trait]
pub trait UpstreamConnectionProvider: Send + Sync {
    /// Writes `payload` (the caller appends the trailing newline) to
    /// `upstream_id`'s input and returns exactly one newline-delimited
    /// response line read back from its output.
    async fn call(&self, upstream_id: &str, payload: &[u8]) -> Result<Vec<u8>, GatewayError>;

    /// True once every configured upstream has an established connection.
    fn all_connected(&self) -> bool;

    /// The id of any currently connected upstream, or `None` if none are
    /// connected. Implementations should prefer an upstream named
    /// `"primary"` when more than one is connected.
    fn first_available(&self) -> Option<String>;
}

/// The terminal chain stage: synthesizes `initialize`/`tools/list`
/// responses locally, and dispatches `tools/call` (and any other
/// whitelisted method) to the owning upstream.
pub struct Router {
    tools: Arc<ToolCache>,
    upstreams: Arc<dyn UpstreamConnectionProvider>,
    validation: Arc<ValidationStage>,
}

impl Router {
    /// Builds a router sharing the tool cache, upstream connections, and
    /// the validation stage's in-flight table (so upstream responses are
    /// checked for the same confused-deputy invariant as client requests).
    #[must_use]
    pub fn new(
        tools: Arc<ToolCache>,
        upstreams: Arc<dyn UpstreamConnectionProvider>,
        validation: Arc<ValidationStage>,
    ) -> Self {
        Self { tools, upstreams, validation }
    }

    fn initialize_response(id: &Value) -> Vec<u8> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "sentinel-gate", "version": SERVER_VERSION},
            },
        });
        serde_json::to_vec(&body).unwrap_or_default()
    }

    fn empty_result_response(id: &Value) -> Vec<u8> {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}});
        serde_json::to_vec(&body).unwrap_or_default()
    }

    fn tools_list_response(&self, id: &Value) -> Vec<u8> {
        let tools: Vec<Value> = self.tools.list_sorted().iter().map(RoutableTool::to_client_json).collect();
        let body = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {"tools": tools}});
        serde_json::to_vec(&body).unwrap_or_default()
    }

    async fn dispatch_tool_call(&self, message: &mut Message) -> Result<(), GatewayError> {
        let name = message
            .envelope()
            .and_then(|e| e.params.as_ref())
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(tool) = self.tools.get(&name) else {
            return Err(GatewayError::ToolNotFound(name));
        };
        if !self.upstreams.all_connected() {
            return Err(GatewayError::UpstreamUnavailable);
        }

        if let Some(id) = message.envelope().and_then(|e| e.id.clone()) {
            self.validation.register_in_flight(&id);
        }
        let mut payload = message.raw().to_vec();
        payload.push(b'\n');
        let response = self.upstreams.call(&tool.upstream_id, &payload).await?;

        let response_root = serde_json::from_slice::<Value>(&response).ok();
        self.validation.check_response(response_root.as_ref())?;

        message.replace_with_response(response);
        Ok(())
    }

    async fn dispatch_forward(&self, message: &mut Message) -> Result<(), GatewayError> {
        if !self.upstreams.all_connected() {
            return Err(GatewayError::UpstreamUnavailable);
        }
        let Some(upstream_id) = self.upstreams.first_available() else {
            return Err(GatewayError::UpstreamUnavailable);
        };
        if let Some(id) = message.envelope().and_then(|e| e.id.clone()) {
            self.validation.register_in_flight(&id);
        }
        let mut payload = message.raw().to_vec();
        payload.push(b'\n');
        let response = self.upstreams.call(&upstream_id, &payload).await?;

        let response_root = serde_json::from_slice::<Value>(&response).ok();
        self.validation.check_response(response_root.as_ref())?;

        message.replace_with_response(response);
        Ok(())
    }
}

impl Interceptor for Router {
    fn name(&self) -> &'static str {
        "router"
    }
}

#[async_trait::async_trait]
impl InterceptStage for Router {
    async fn intercept(&self, message: &mut Message) -> Result<(), GatewayError> {
        if message.direction() != Direction::ClientToServer {
            return Ok(());
        }
        let Some(envelope) = message.envelope().cloned() else {
            return Ok(());
        };
        let Some(method) = envelope.method.clone() else {
            return Ok(());
        };

        match method.as_str() {
            "initialize" => {
                if let Some(id) = &envelope.id {
                    message.replace_with_response(Self::initialize_response(id));
                }
                Ok(())
            }
            "initialized" => {
                if let Some(id) = &envelope.id {
                    message.replace_with_response(Self::empty_result_response(id));
                }
                Ok(())
            }
            m if m.starts_with("notifications/") => Ok(()),
            "tools/list" => {
                if let Some(id) = &envelope.id {
                    message.replace_with_response(self.tools_list_response(id));
                }
                Ok(())
            }
            "tools/call" => {
                if envelope.id.is_none() {
                    return Ok(());
                }
                self.dispatch_tool_call(message).await
            }
            _ => {
                if envelope.id.is_some() {
                    self.dispatch_forward(message).await
                } else {
                    Ok(())
                }
            }
        }
    }
}
