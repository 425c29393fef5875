// sentinel-gate-cli/src/upstream.rs
// ============================================================================
// Module: Process-backed upstream connections
// Description: The concrete `UpstreamConnectionProvider` the CLI wires into
//              the gateway: one child process per configured upstream,
//              spoken to over its stdin/stdout.
// Purpose: Satisfy the gateway's upstream boundary trait and perform the
//          one-time tool discovery handshake at startup.
// Dependencies: sentinel-gate-config, sentinel-gate-core, sentinel-gate-gateway, tokio
// ============================================================================

//! ## Overview
//! [`StdioUpstreamProvider`] spawns one child process per
//! [`sentinel_gate_config::UpstreamProcessConfig`] and serializes JSON-RPC
//! calls on its stdin/stdout, one in flight at a time per upstream, exactly
//! as the router's boundary contract requires. [`discover_tools`] drives
//! the `initialize` / `tools/list` handshake against every upstream once at
//! startup and registers the results into the shared tool cache; the
//! gateway crate deliberately leaves this discovery step external.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};

use sentinel_gate_config::UpstreamProcessConfig;
use sentinel_gate_core::error::GatewayError;
use sentinel_gate_core::tool::RoutableTool;
use sentinel_gate_gateway::{ToolCache, UpstreamConnectionProvider};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

/// Failures from spawning or speaking to an upstream process.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The configured executable could not be spawned.
    #[error("failed to spawn upstream {id}: {source}")]
    Spawn {
        /// The upstream's configured id.
        id: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// An upstream's stdio handle was unexpectedly unavailable.
    #[error("upstream {id} has no piped stdio")]
    MissingPipe {
        /// The upstream's configured id.
        id: String,
    },
    /// The discovery handshake's response could not be parsed.
    #[error("upstream {id} sent an unparseable discovery response: {reason}")]
    Discovery {
        /// The upstream's configured id.
        id: String,
        /// What went wrong.
        reason: String,
    },
}

struct Connection {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    /// Never read again; its only job is to outlive the provider so the
    /// process isn't reaped while `stdin`/`stdout` are still in use.
    #[expect(dead_code, reason = "held only to keep the child process alive for the provider's lifetime")]
    child: Child,
}

/// One child process per configured upstream, addressed by the upstream's
/// configured id.
pub struct StdioUpstreamProvider {
    connections: HashMap<String, Connection>,
    next_request_id: AtomicI64,
}

impl StdioUpstreamProvider {
    /// Spawns every configured upstream's process up front.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Spawn`] if any configured command cannot be
    /// started, or [`UpstreamError::MissingPipe`] if its stdio was not
    /// piped (this should not happen given how this constructor spawns).
    pub fn spawn(configs: &[UpstreamProcessConfig]) -> Result<Self, UpstreamError> {
        let mut connections = HashMap::with_capacity(configs.len());
        for config in configs {
            let mut child = tokio::process::Command::new(&config.command)
                .args(&config.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|source| UpstreamError::Spawn { id: config.id.clone(), source })?;

            let stdin = child.stdin.take().ok_or_else(|| UpstreamError::MissingPipe { id: config.id.clone() })?;
            let stdout = child.stdout.take().ok_or_else(|| UpstreamError::MissingPipe { id: config.id.clone() })?;

            connections.insert(
                config.id.clone(),
                Connection {
                    stdin: Mutex::new(stdin),
                    stdout: Mutex::new(BufReader::new(stdout)),
                    child,
                },
            );
        }
        Ok(Self { connections, next_request_id: AtomicI64::new(1) })
    }

    /// Every known upstream id, in configuration order.
    #[must_use]
    pub fn upstream_ids(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    fn next_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, upstream_id: &str, payload: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let connection = self.connections.get(upstream_id).ok_or(GatewayError::UpstreamUnavailable)?;

        // The upstream may emit progress notifications before the final
        // result; trusting the first non-empty line would hand one of those
        // back as if it were the answer. When the outgoing request carries
        // an id, only a line whose own id matches is the real response.
        let expected_id = serde_json::from_slice::<Value>(payload).ok().and_then(|v| v.get("id").cloned());

        let mut stdin = connection.stdin.lock().await;
        stdin.write_all(payload).await.map_err(|_| GatewayError::UpstreamUnavailable)?;
        stdin.write_all(b"\n").await.map_err(|_| GatewayError::UpstreamUnavailable)?;
        stdin.flush().await.map_err(|_| GatewayError::UpstreamUnavailable)?;
        drop(stdin);

        let mut stdout = connection.stdout.lock().await;
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read =
                stdout.read_line(&mut line).await.map_err(|_| GatewayError::UpstreamUnavailable)?;
            if bytes_read == 0 {
                return Err(GatewayError::UpstreamUnavailable);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Some(expected) = &expected_id else {
                return Ok(trimmed.as_bytes().to_vec());
            };
            let line_id = serde_json::from_str::<Value>(trimmed).ok().and_then(|v| v.get("id").cloned());
            if line_id.as_ref() == Some(expected) {
                return Ok(trimmed.as_bytes().to_vec());
            }
        }
    }

    /// Sends `method`/`params` as a freshly-id'd JSON-RPC request to
    /// `upstream_id` and returns the parsed response.
    async fn call_method(
        &self,
        upstream_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, UpstreamError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id(),
            "method": method,
            "params": params,
        });
        let payload = serde_json::to_vec(&request).unwrap_or_default();
        let response = self.request(upstream_id, &payload).await.map_err(|_| UpstreamError::Discovery {
            id: upstream_id.to_string(),
            reason: "no response from upstream".to_string(),
        })?;
        serde_json::from_slice(&response).map_err(|err| UpstreamError::Discovery {
            id: upstream_id.to_string(),
            reason: err.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl UpstreamConnectionProvider for StdioUpstreamProvider {
    async fn call(&self, upstream_id: &str, payload: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.request(upstream_id, payload).await
    }

    fn all_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    fn first_available(&self) -> Option<String> {
        if self.connections.contains_key("primary") {
            return Some("primary".to_string());
        }
        self.connections.keys().next().cloned()
    }
}

/// Runs the `initialize` / `tools/list` handshake against every upstream in
/// `provider` and registers each returned tool into `cache`. Tools with a
/// name already claimed by an earlier upstream are skipped, matching the
/// cache's first-registered-wins collision policy.
///
/// # Errors
///
/// Returns [`UpstreamError::Discovery`] if an upstream's handshake response
/// cannot be parsed as the expected shape.
pub async fn discover_tools(provider: &StdioUpstreamProvider, cache: &ToolCache) -> Result<(), UpstreamError> {
    for upstream_id in provider.upstream_ids() {
        provider
            .call_method(&upstream_id, "initialize", serde_json::json!({}))
            .await?;
        let list_response = provider.call_method(&upstream_id, "tools/list", serde_json::json!({})).await?;
        let tools = list_response
            .get("result")
            .and_then(|result| result.get("tools"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for tool in tools {
            let Some(name) = tool.get("name").and_then(Value::as_str) else {
                continue;
            };
            cache.register(RoutableTool {
                name: name.to_string(),
                description: tool.get("description").and_then(Value::as_str).map(str::to_string),
                input_schema: tool.get("inputSchema").cloned().unwrap_or(Value::Null),
                upstream_id: upstream_id.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_upstream(id: &str) -> UpstreamProcessConfig {
        UpstreamProcessConfig { id: id.to_string(), command: "cat".to_string(), args: Vec::new() }
    }

    #[tokio::test]
    async fn request_skips_notification_lines_and_matches_by_id() {
        let provider = StdioUpstreamProvider::spawn(&[cat_upstream("primary")]).expect("spawn cat");
        let connection = provider.connections.get("primary").expect("connection");

        {
            let mut stdin = connection.stdin.lock().await;
            stdin
                .write_all(br#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#)
                .await
                .expect("write notification");
            stdin.write_all(b"\n").await.expect("write newline");
            stdin
                .write_all(br#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#)
                .await
                .expect("write result");
            stdin.write_all(b"\n").await.expect("write newline");
            stdin.flush().await.expect("flush");
        }

        let request = br#"{"jsonrpc":"2.0","id":7,"method":"tools/call"}"#;
        let response = provider.request("primary", request).await.expect("response");
        let value: Value = serde_json::from_slice(&response).expect("valid json");
        assert_eq!(value["id"].as_i64(), Some(7));
        assert_eq!(value["result"]["ok"].as_bool(), Some(true));
    }

    #[tokio::test]
    async fn request_without_expected_id_returns_first_non_empty_line() {
        let provider = StdioUpstreamProvider::spawn(&[cat_upstream("primary")]).expect("spawn cat");
        let connection = provider.connections.get("primary").expect("connection");

        {
            let mut stdin = connection.stdin.lock().await;
            stdin.write_all(br#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).await.expect("write");
            stdin.write_all(b"\n").await.expect("write newline");
            stdin.flush().await.expect("flush");
        }

        let request = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let response = provider.request("primary", request).await.expect("response");
        let value: Value = serde_json::from_slice(&response).expect("valid json");
        assert_eq!(value["method"].as_str(), Some("notifications/progress"));
    }

    #[test]
    fn first_available_prefers_primary() {
        let provider = StdioUpstreamProvider::spawn(&[cat_upstream("other"), cat_upstream("primary")])
            .expect("spawn cat");
        assert_eq!(provider.first_available(), Some("primary".to_string()));
    }
}
