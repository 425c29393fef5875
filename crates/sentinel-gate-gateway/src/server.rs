// sentinel-gate-gateway/src/server.rs
// ============================================================================
// Module: MCP server transports
// Description: Wires the full interceptor chain to the stdio and HTTP
//              (Streamable HTTP) transports, plus the health endpoint and
//              the background sweepers every stateful subsystem needs.
// Purpose: Turn the chain of independently-testable stages into a process
//          that actually speaks MCP over a wire.
// Dependencies: sentinel-gate-core, sentinel-gate-config, axum, tokio,
//               tokio-stream, serde_json
// ============================================================================

//! ## Overview
//! [`McpServer`] owns every long-lived piece the interceptor chain needs —
//! the tool cache, both rate limiters, the session store, the audit
//! recorder and its writer task, the auth stage's identity cache — and
//! assembles them into one [`sentinel_gate_core::InterceptorChain`] shared
//! by both transports. [`McpServer::serve_stdio`] drives one connection for
//! the lifetime of the process; [`McpServer::serve_http`] drives the
//! Streamable HTTP surface (single endpoint, method-routed) for as many
//! concurrent HTTP clients as connect. Both honor the same shutdown signal
//! and leave the audit writer to flush on exit.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router as AxumRouter;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use sentinel_gate_config::GatewayConfig;
use sentinel_gate_core::diagnostic::{DiagnosticEvent, DiagnosticSink};
use sentinel_gate_core::error::GatewayError;
use sentinel_gate_core::interceptor::{InterceptStage, Interceptor, InterceptorChain};
use sentinel_gate_core::message::Message;
use sentinel_gate_core::policy::{AllowAllPolicyEngine, PolicyEngine};
use sentinel_gate_core::ratecell::{GcraLimiter, GcraParams};
use sentinel_gate_core::session::{generate_session_id, SessionStore};

use crate::audit::{self, AuditRecorder, AuditStage, FileAuditStore};
use crate::auth::{AuthStage, ApiKeyStore};
use crate::policy::PolicyStage;
use crate::ratelimit::{self, IpRateLimitStage, UserRateLimitStage};
use crate::tools::{Router, ToolCache, UpstreamConnectionProvider, PROTOCOL_VERSION, SERVER_VERSION};
use crate::validation::{InFlightRequests, ValidationStage};

/// MCP method whose success response carries a freshly minted
/// `Mcp-Session-Id`, per the Streamable HTTP transport's handshake.
const INITIALIZE_METHOD: &str = "initialize";

/// How often the audit retention sweep runs. The audit configuration
/// controls how long files are retained, not how often the sweep checks,
/// so this cadence is fixed rather than configurable.
const AUDIT_RETENTION_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(3600);

/// Fraction of the audit channel's capacity, once exceeded, that marks the
/// audit subsystem unhealthy in `/health`.
const AUDIT_UNHEALTHY_DEPTH_FRACTION: f64 = 0.9;

/// Connection id used for client-to-server stdio messages, which all share
/// one process-lifetime connection.
const STDIO_CONNECTION_ID: &str = "stdio";

/// Connection id used for HTTP requests that present no API key. Every
/// such request shares one (always-unauthenticated) cache slot.
const HTTP_ANONYMOUS_CONNECTION_ID: &str = "http-anonymous";

/// CORS preflight cache lifetime, in seconds.
const CORS_MAX_AGE_SECS: &str = "86400";

/// Failures that can prevent the server from starting or from continuing
/// to serve a transport.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The audit file store could not be opened.
    #[error("failed to open audit store: {0}")]
    AuditStore(#[source] std::io::Error),
    /// The HTTP listener could not be bound.
    #[error("failed to bind http listener {addr}: {source}")]
    Bind {
        /// The address binding failed for.
        addr: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The HTTP server loop exited with an error.
    #[error("http server failed: {0}")]
    Http(#[source] std::io::Error),
    /// The stdio transport loop exited with an error.
    #[error("stdio transport failed: {0}")]
    Stdio(#[source] std::io::Error),
}

/// Delegates [`Interceptor`]/[`InterceptStage`] to a shared, reference-
/// counted stage, so the same stage instance can sit in the chain and be
/// held directly by whatever else needs it (the router holds the
/// validation stage directly, for instance).
struct Shared<T>(Arc<T>);

impl<T: Interceptor + Send + Sync> Interceptor for Shared<T> {
    fn name(&self) -> &'static str {
        self.0.name()
    }
}

#[async_trait]
impl<T: InterceptStage + Send + Sync> InterceptStage for Shared<T> {
    async fn intercept(&self, message: &mut Message) -> Result<(), GatewayError> {
        self.0.intercept(message).await
    }
}

/// Registry of open SSE streams, keyed by the transport-level
/// `Mcp-Session-Id`. A concrete server-push source (out of this crate's
/// scope) would publish onto a session's sender; this registry only owns
/// the open/close lifecycle the `GET`/`DELETE` handlers need.
#[derive(Default)]
struct SseRegistry {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl SseRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Returns the channel for `session_id`, creating it if absent.
    fn subscribe(&self, session_id: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    /// Pre-registers an empty channel for `session_id`, as done at
    /// `initialize` time so a later `DELETE` can distinguish "known but
    /// idle" from "never existed".
    fn register(&self, session_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.entry(session_id.to_string()).or_insert_with(|| broadcast::channel(64).0);
    }

    /// Removes `session_id`'s channel, dropping the sender and closing
    /// every subscriber's stream. Returns whether the session was known.
    fn close(&self, session_id: &str) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.remove(session_id).is_some()
    }

    fn len(&self) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.len()
    }
}

/// JSON body of `GET /health`.
#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    checks: HealthChecks,
    version: &'static str,
}

/// Per-subsystem counters backing [`HealthReport`].
#[derive(Debug, Serialize)]
struct HealthChecks {
    session_store: SessionStoreHealth,
    rate_limiter: RateLimiterHealth,
    audit: AuditHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit_drops: Option<u64>,
    /// Count of background sweeper/writer tasks still running.
    goroutines: usize,
}

/// Session store occupancy, for `/health`.
#[derive(Debug, Serialize)]
struct SessionStoreHealth {
    size: usize,
}

/// Rate limiter key-space occupancy, for `/health`.
#[derive(Debug, Serialize)]
struct RateLimiterHealth {
    ip_tracked_keys: usize,
    user_tracked_keys: usize,
}

/// Audit pipeline occupancy, for `/health`.
#[derive(Debug, Serialize)]
struct AuditHealth {
    depth: usize,
    capacity: usize,
}

/// Everything an HTTP handler needs, cloned cheaply per request.
#[derive(Clone)]
struct ServerState {
    chain: Arc<InterceptorChain>,
    session_store: Arc<SessionStore>,
    ip_limiter: Arc<GcraLimiter>,
    user_limiter: Arc<GcraLimiter>,
    audit_recorder: Arc<AuditRecorder>,
    sse: Arc<SseRegistry>,
    cors_allowed_origins: Arc<Vec<String>>,
    log_arguments: bool,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// The assembled gateway: the interceptor chain plus every stateful
/// subsystem and background task the chain's stages depend on.
pub struct McpServer {
    config: GatewayConfig,
    chain: Arc<InterceptorChain>,
    session_store: Arc<SessionStore>,
    auth_stage: Arc<AuthStage>,
    ip_limiter: Arc<GcraLimiter>,
    user_limiter: Arc<GcraLimiter>,
    audit_recorder: Arc<AuditRecorder>,
    audit_store: Arc<FileAuditStore>,
    sse: Arc<SseRegistry>,
    diagnostics: Arc<dyn DiagnosticSink>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl McpServer {
    /// Assembles the full interceptor chain and its background sweepers
    /// from configuration and the caller's concrete collaborators
    /// (upstream connections, credential store, policy engine).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AuditStore`] if the audit log directory
    /// cannot be opened.
    pub fn new(
        config: GatewayConfig,
        upstreams: Arc<dyn UpstreamConnectionProvider>,
        tool_cache: Arc<ToolCache>,
        api_key_store: Arc<dyn ApiKeyStore>,
        policy_engine: Arc<dyn PolicyEngine>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, ServerError> {
        diagnostics.record(&DiagnosticEvent::Startup {
            config_path: None,
            version: SERVER_VERSION,
        });

        let in_flight = Arc::new(InFlightRequests::new());
        let validation = Arc::new(
            ValidationStage::new(in_flight)
                .with_allowed_tool_names(config.router.allowed_tool_names.clone()),
        );

        let ip_limiter = Arc::new(GcraLimiter::new(GcraParams {
            rate: config.rate_limit.ip.rate,
            period: config.rate_limit.ip.period(),
            burst: config.rate_limit.ip.burst,
        }));
        let user_limiter = Arc::new(GcraLimiter::new(GcraParams {
            rate: config.rate_limit.user.rate,
            period: config.rate_limit.user.period(),
            burst: config.rate_limit.user.burst,
        }));

        let session_store = Arc::new(SessionStore::new());
        let devmode = config.devmode_active();
        let auth_stage = Arc::new(AuthStage::new(
            api_key_store,
            session_store.clone(),
            StdDuration::from_secs(config.session.timeout_secs),
            devmode,
            diagnostics.clone(),
        ));

        let engine: Arc<dyn PolicyEngine> = if config.policy.enabled {
            policy_engine
        } else {
            Arc::new(AllowAllPolicyEngine)
        };
        let policy_stage = Arc::new(PolicyStage::new(engine));

        let audit_store = Arc::new(
            FileAuditStore::open(
                Path::new(&config.audit.log_dir),
                config.audit.max_file_size,
                config.audit.retention_days,
                config.audit.cache_size,
            )
            .map_err(ServerError::AuditStore)?,
        );
        let (recorder, audit_receiver) = AuditRecorder::new(
            config.audit.channel_size,
            StdDuration::from_millis(config.audit.send_timeout_ms),
            diagnostics.clone(),
        );
        let audit_recorder = Arc::new(recorder);
        let audit_stage = Arc::new(AuditStage);

        let router = Arc::new(Router::new(tool_cache, upstreams, validation.clone()));

        let chain = Arc::new(InterceptorChain::new(vec![
            Box::new(Shared(validation)),
            Box::new(Shared(Arc::new(IpRateLimitStage::new(ip_limiter.clone())))),
            Box::new(Shared(auth_stage.clone())),
            Box::new(Shared(Arc::new(UserRateLimitStage::new(user_limiter.clone())))),
            Box::new(Shared(audit_stage)),
            Box::new(Shared(policy_stage)),
            Box::new(Shared(router)),
        ]));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = Arc::new(Mutex::new(Vec::new()));

        {
            let mut guard = tasks.lock().unwrap_or_else(|p| p.into_inner());
            guard.push(ratelimit::spawn_sweeper(
                "ip_rate_limit",
                ip_limiter.clone(),
                StdDuration::from_secs(config.rate_limit.cleanup_interval_secs),
                shutdown_rx.clone(),
                diagnostics.clone(),
            ));
            guard.push(ratelimit::spawn_sweeper(
                "user_rate_limit",
                user_limiter.clone(),
                StdDuration::from_secs(config.rate_limit.cleanup_interval_secs),
                shutdown_rx.clone(),
                diagnostics.clone(),
            ));
            guard.push(spawn_session_sweeper(
                auth_stage.clone(),
                StdDuration::from_secs(config.session.cleanup_interval_secs),
                shutdown_rx.clone(),
                diagnostics.clone(),
            ));
            guard.push(audit::spawn_writer(
                audit_receiver,
                audit_store.clone(),
                shutdown_rx.clone(),
                diagnostics.clone(),
            ));
            guard.push(audit::spawn_retention_sweeper(
                audit_store.clone(),
                AUDIT_RETENTION_SWEEP_INTERVAL,
                shutdown_rx.clone(),
                diagnostics.clone(),
            ));
        }

        Ok(Self {
            config,
            chain,
            session_store,
            auth_stage,
            ip_limiter,
            user_limiter,
            audit_recorder,
            audit_store,
            sse: Arc::new(SseRegistry::new()),
            diagnostics,
            shutdown_tx,
            shutdown_rx,
            tasks,
        })
    }

    /// Signals every background sweeper and the audit writer to stop, and
    /// awaits their exit. Idempotent: a second call observes the channel
    /// already set and the tasks already finished.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Builds a snapshot health report from live subsystem counters.
    fn health_report(&self) -> (StatusCode, HealthReport) {
        let depth = self.audit_recorder.depth();
        let capacity = self.audit_recorder.capacity();
        #[allow(
            clippy::cast_precision_loss,
            reason = "capacity is bounded by config validation (<= 1_000_000); precision loss is immaterial to a 90% threshold check"
        )]
        let unhealthy = capacity > 0 && (depth as f64 / capacity as f64) > AUDIT_UNHEALTHY_DEPTH_FRACTION;
        let dropped = self.audit_recorder.dropped();
        let goroutines = {
            let guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            guard.iter().filter(|h| !h.is_finished()).count()
        };
        let report = HealthReport {
            status: if unhealthy { "unhealthy" } else { "healthy" },
            checks: HealthChecks {
                session_store: SessionStoreHealth { size: self.session_store.len() },
                rate_limiter: RateLimiterHealth {
                    ip_tracked_keys: self.ip_limiter.tracked_keys(),
                    user_tracked_keys: self.user_limiter.tracked_keys(),
                },
                audit: AuditHealth { depth, capacity },
                audit_drops: (dropped > 0).then_some(dropped),
                goroutines,
            },
            version: SERVER_VERSION,
        };
        let status = if unhealthy { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
        (status, report)
    }

    /// Runs the stdio transport: one JSON-RPC message per line on stdin,
    /// one response line per line on stdout. Every message shares
    /// [`STDIO_CONNECTION_ID`], matching stdio's single, long-lived,
    /// unauthenticated-until-proven connection.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Stdio`] on a stdin/stdout I/O failure.
    pub async fn serve_stdio(&self) -> Result<(), ServerError> {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        let mut stdout = tokio::io::stdout();
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.map_err(ServerError::Stdio)? else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(response) = self.handle_stdio_line(line).await {
                        stdout.write_all(&response).await.map_err(ServerError::Stdio)?;
                        stdout.write_all(b"\n").await.map_err(ServerError::Stdio)?;
                        stdout.flush().await.map_err(ServerError::Stdio)?;
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_stdio_line(&self, line: String) -> Option<Vec<u8>> {
        let received_at_ms = now_ms();
        let mut message = Message::from_client_bytes(line.into_bytes(), received_at_ms);
        message.connection_id = STDIO_CONNECTION_ID.to_string();

        let is_notification = is_notification(&message);
        let request_id = request_id_value(&message);

        let result = self.chain.run(&mut message).await;
        if let Some(record) = audit::build_record(&message, &result, self.config.audit.log_arguments) {
            self.audit_recorder.record(record).await;
        }

        match result {
            Ok(()) => {
                if is_notification {
                    None
                } else {
                    Some(message.raw().to_vec())
                }
            }
            Err(err) => {
                if is_notification {
                    None
                } else {
                    Some(error_response_bytes(request_id.as_ref(), &err))
                }
            }
        }
    }

    /// Serves the Streamable HTTP transport: a single endpoint (any path)
    /// method-routed between `POST`/`GET`/`DELETE`/`OPTIONS`, plus
    /// `GET /health`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the configured address cannot be
    /// bound, or [`ServerError::Http`] if the server loop itself fails.
    pub async fn serve_http(self: Arc<Self>) -> Result<(), ServerError> {
        let addr = self.config.server.http_listen_addr.clone();
        let state = ServerState {
            chain: self.chain.clone(),
            session_store: self.session_store.clone(),
            ip_limiter: self.ip_limiter.clone(),
            user_limiter: self.user_limiter.clone(),
            audit_recorder: self.audit_recorder.clone(),
            sse: self.sse.clone(),
            cors_allowed_origins: Arc::new(self.config.server.cors_allowed_origins.clone()),
            log_arguments: self.config.audit.log_arguments,
            tasks: self.tasks.clone(),
        };

        let app = AxumRouter::new()
            .route("/health", get(health_handler))
            .fallback(any(mcp_handler))
            .layer(axum::extract::DefaultBodyLimit::max(self.config.server.max_body_bytes))
            .with_state((self.clone(), state));

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;

        let mut shutdown = self.shutdown_rx.clone();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(ServerError::Http)
    }
}

/// Periodically sweeps expired sessions (and their cached identities) from
/// `auth_stage`. Mirrors the other sweepers in shape.
fn spawn_session_sweeper(
    auth_stage: Arc<AuthStage>,
    interval: StdDuration,
    mut shutdown: watch::Receiver<bool>,
    diagnostics: Arc<dyn DiagnosticSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        diagnostics.record(&DiagnosticEvent::SweeperStarted {
            sweeper: "session",
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        });
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    auth_stage.sweep(OffsetDateTime::now_utc());
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        diagnostics.record(&DiagnosticEvent::SweeperStopped { sweeper: "session" });
    })
}

fn now_ms() -> u64 {
    let now = OffsetDateTime::now_utc();
    u64::try_from(now.unix_timestamp_nanos() / 1_000_000).unwrap_or(0)
}

fn is_notification(message: &Message) -> bool {
    message.envelope().is_some_and(|e| e.is_notification())
}

fn request_id_value(message: &Message) -> Option<Value> {
    message.envelope().and_then(|e| e.id.clone())
}

fn error_response_bytes(id: Option<&Value>, error: &GatewayError) -> Vec<u8> {
    let (code, message, retry_after) = error.to_jsonrpc();
    let mut error_object = serde_json::json!({ "code": code, "message": message });
    if let Some(retry_after) = retry_after {
        error_object["data"] = serde_json::json!({ "retryAfterMs": retry_after.as_millis() });
    }
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id.cloned().unwrap_or(Value::Null),
        "error": error_object,
    });
    serde_json::to_vec(&body).unwrap_or_default()
}

async fn health_handler(State((server, _state)): State<(Arc<McpServer>, ServerState)>) -> impl IntoResponse {
    let (status, report) = server.health_report();
    (status, axum::Json(report))
}

/// True if `origin` is permitted by `allowed`. An empty allowlist blocks
/// every request that carries an `Origin` header at all.
fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    !allowed.is_empty() && allowed.iter().any(|candidate| candidate == origin)
}

fn cors_headers(origin: Option<&str>) -> Vec<(&'static str, HeaderValue)> {
    let mut headers = vec![
        (
            "access-control-allow-methods",
            HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
        ),
        (
            "access-control-allow-headers",
            HeaderValue::from_static("Content-Type, Authorization, Mcp-Session-Id, MCP-Protocol-Version"),
        ),
        (
            "access-control-max-age",
            HeaderValue::from_static(CORS_MAX_AGE_SECS),
        ),
    ];
    if let Some(origin) = origin {
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.push(("access-control-allow-origin", value));
        }
    }
    headers
}

fn peer_addr(headers: &HeaderMap, connect_info: Option<SocketAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.trim().is_empty() {
            return Some(real_ip.trim().to_string());
        }
    }
    connect_info.map(|addr| addr.ip().to_string())
}

fn bearer_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Single entry point for every HTTP method but `GET /health`: the
/// Streamable HTTP surface routes by method within one handler, since the
/// transport is a single endpoint at any path.
async fn mcp_handler(
    State((server, state)): State<(Arc<McpServer>, ServerState)>,
    method: Method,
    ConnectInfo(connect_info): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok());
    if let Some(origin) = origin {
        if !origin_allowed(origin, &state.cors_allowed_origins) {
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    match method {
        Method::OPTIONS => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            for (name, value) in cors_headers(origin) {
                response.headers_mut().insert(name, value);
            }
            response
        }
        Method::POST => handle_post(&server, &state, headers, connect_info, body, origin).await,
        Method::GET => handle_get(&state, &headers, origin),
        Method::DELETE => handle_delete(&state, &headers, origin),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn handle_post(
    server: &Arc<McpServer>,
    state: &ServerState,
    headers: HeaderMap,
    connect_info: SocketAddr,
    body: Bytes,
    origin: Option<&str>,
) -> axum::response::Response {
    if let Some(content_type) = headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        if !content_type.starts_with("application/json") {
            return jsonrpc_error_http_response(
                None,
                &GatewayError::Validation(sentinel_gate_core::error::ValidationError::InvalidRequest),
                origin,
            );
        }
    }

    let root: Option<Value> = serde_json::from_slice(&body).ok();
    let parsed_object = root.as_ref().and_then(Value::as_object);
    let has_id = parsed_object.is_some_and(|o| o.contains_key("id"));
    // A message can only be treated as a silent notification once its shape
    // is known to be a JSON object with no `id`: JSON-RPC 2.0 forbids ever
    // responding to a genuine notification, but an unparseable body or a
    // non-object payload (empty body, `[1,2,3]`, ...) carries no such proof
    // and must still surface its `-32700`/`-32600` error to the caller.
    let is_notification_shape = parsed_object.is_some() && !has_id;
    let id_for_error = parsed_object.and_then(|o| o.get("id")).cloned();

    let received_at_ms = now_ms();
    let mut message = Message::from_client_bytes(body.to_vec(), received_at_ms);
    message.peer_addr = peer_addr(&headers, Some(connect_info));
    if let Some(key) = bearer_key(&headers) {
        message.connection_id = crate::auth::derive_http_connection_id(&key);
        message.api_key = Some(key);
    } else {
        message.connection_id = HTTP_ANONYMOUS_CONNECTION_ID.to_string();
    }

    let is_initialize = root
        .as_ref()
        .and_then(|v| v.get("method"))
        .and_then(Value::as_str)
        == Some(INITIALIZE_METHOD);

    let result = server.chain.run(&mut message).await;
    if let Some(record) = audit::build_record(&message, &result, state.log_arguments) {
        state.audit_recorder.record(record).await;
    }

    let mut response = match result {
        Ok(()) if is_notification_shape => StatusCode::ACCEPTED.into_response(),
        Ok(()) => {
            let body = message.raw().to_vec();
            ([(axum::http::header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(_) if is_notification_shape => {
            // Notifications never receive a response per JSON-RPC 2.0,
            // even when the gateway itself rejects them.
            StatusCode::ACCEPTED.into_response()
        }
        Err(err) => jsonrpc_error_http_response(id_for_error.as_ref(), &err, origin),
    };

    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(PROTOCOL_VERSION) {
        response_headers.insert("mcp-protocol-version", value);
    }
    if is_initialize && response.status() == StatusCode::OK {
        let session_id = generate_session_id();
        state.sse.register(&session_id);
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            response_headers.insert("mcp-session-id", value);
        }
    }
    for (name, value) in cors_headers(origin) {
        response_headers.insert(name, value);
    }
    response
}

fn jsonrpc_error_http_response(
    id: Option<&Value>,
    error: &GatewayError,
    origin: Option<&str>,
) -> axum::response::Response {
    let body = error_response_bytes(id, error);
    let mut response = (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "application/json")], body)
        .into_response();
    for (name, value) in cors_headers(origin) {
        response.headers_mut().insert(name, value);
    }
    response
}

fn handle_get(state: &ServerState, headers: &HeaderMap, origin: Option<&str>) -> axum::response::Response {
    let Some(session_id) = headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let receiver = state.sse.subscribe(session_id);
    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(payload) => Some(Ok::<Event, std::convert::Infallible>(Event::default().data(payload))),
        Err(_) => None,
    });
    let session_id = session_id.to_string();
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().text(": connected"));
    let mut response = sse.into_response();
    let response_headers = response.headers_mut();
    response_headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    response_headers.insert("connection", HeaderValue::from_static("keep-alive"));
    if let Ok(value) = HeaderValue::from_str(PROTOCOL_VERSION) {
        response_headers.insert("mcp-protocol-version", value);
    }
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response_headers.insert("mcp-session-id", value);
    }
    for (name, value) in cors_headers(origin) {
        response_headers.insert(name, value);
    }
    response
}

fn handle_delete(state: &ServerState, headers: &HeaderMap, origin: Option<&str>) -> axum::response::Response {
    let Some(session_id) = headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let mut response = if state.sse.close(session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    };
    for (name, value) in cors_headers(origin) {
        response.headers_mut().insert(name, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryApiKeyStore;
    use crate::tools::ToolCache as ToolCacheImpl;
    use sentinel_gate_core::diagnostic::NoopDiagnosticSink;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubUpstreams {
        connected: AtomicBool,
    }

    #[async_trait]
    impl UpstreamConnectionProvider for StubUpstreams {
        async fn call(&self, _upstream_id: &str, _payload: &[u8]) -> Result<Vec<u8>, GatewayError> {
            Ok(br#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_vec())
        }

        fn all_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }

        fn first_available(&self) -> Option<String> {
            None
        }
    }

    fn test_server() -> (McpServer, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = GatewayConfig::default();
        config.audit.log_dir = dir.path().to_string_lossy().into_owned();
        config.dev.allow_devmode = true;
        let server = McpServer::new(
            config,
            Arc::new(StubUpstreams { connected: AtomicBool::new(true) }),
            Arc::new(ToolCacheImpl::new()),
            Arc::new(InMemoryApiKeyStore::new()),
            Arc::new(AllowAllPolicyEngine),
            Arc::new(NoopDiagnosticSink),
        )
        .expect("server builds");
        (server, dir)
    }

    fn test_state(server: &McpServer) -> ServerState {
        ServerState {
            chain: server.chain.clone(),
            session_store: server.session_store.clone(),
            ip_limiter: server.ip_limiter.clone(),
            user_limiter: server.user_limiter.clone(),
            audit_recorder: server.audit_recorder.clone(),
            sse: server.sse.clone(),
            cors_allowed_origins: Arc::new(Vec::new()),
            log_arguments: server.config.audit.log_arguments,
            tasks: server.tasks.clone(),
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9999".parse().expect("valid addr")
    }

    #[tokio::test]
    async fn http_empty_body_yields_parse_error() {
        let (server, _dir) = test_server();
        let state = test_state(&server);
        let response = handle_post(
            &Arc::new(server),
            &state,
            HeaderMap::new(),
            peer(),
            Bytes::new(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value: Value = serde_json::from_slice(&body).expect("valid json");
        assert_eq!(value["error"]["code"].as_i64(), Some(-32700));
        assert!(value["id"].is_null());
    }

    #[tokio::test]
    async fn http_non_object_json_yields_invalid_request() {
        let (server, _dir) = test_server();
        let state = test_state(&server);
        let response = handle_post(
            &Arc::new(server),
            &state,
            HeaderMap::new(),
            peer(),
            Bytes::from_static(b"[1,2,3]"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value: Value = serde_json::from_slice(&body).expect("valid json");
        assert_eq!(value["error"]["code"].as_i64(), Some(-32600));
    }

    #[tokio::test]
    async fn http_notification_yields_202_with_empty_body() {
        let (server, _dir) = test_server();
        let state = test_state(&server);
        let response = handle_post(
            &Arc::new(server),
            &state,
            HeaderMap::new(),
            peer(),
            Bytes::from_static(br#"{"jsonrpc":"2.0","method":"tools/list"}"#),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn stdio_notification_produces_no_response() {
        let (server, _dir) = test_server();
        let response = server
            .handle_stdio_line(r#"{"jsonrpc":"2.0","method":"tools/list"}"#.to_string())
            .await;
        assert!(response.is_none());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn stdio_devmode_tools_list_returns_empty_catalog() {
        let (server, _dir) = test_server();
        let response = server
            .handle_stdio_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#.to_string())
            .await
            .expect("response");
        let value: Value = serde_json::from_slice(&response).expect("valid json");
        assert_eq!(value["result"]["tools"].as_array().map(Vec::len), Some(0));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn stdio_unknown_method_yields_jsonrpc_error() {
        let (server, _dir) = test_server();
        let response = server
            .handle_stdio_line(r#"{"jsonrpc":"2.0","id":1,"method":"foo/bar"}"#.to_string())
            .await
            .expect("response");
        let value: Value = serde_json::from_slice(&response).expect("valid json");
        assert_eq!(value["error"]["code"].as_i64(), Some(-32601));
    }

    #[test]
    fn origin_allowed_blocks_everything_when_allowlist_empty() {
        assert!(!origin_allowed("https://example.com", &[]));
    }

    #[test]
    fn origin_allowed_accepts_listed_origin() {
        let allowed = vec!["https://example.com".to_string()];
        assert!(origin_allowed("https://example.com", &allowed));
        assert!(!origin_allowed("https://evil.example", &allowed));
    }

    #[test]
    fn sse_registry_delete_reports_unknown_session() {
        let registry = SseRegistry::new();
        assert!(!registry.close("nonexistent"));
        registry.register("known");
        assert!(registry.close("known"));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn error_response_bytes_embed_retry_after_for_rate_limit() {
        let error = GatewayError::RateLimited { retry_after: StdDuration::from_millis(10) };
        let bytes = error_response_bytes(Some(&Value::from(1)), &error);
        let value: Value = serde_json::from_slice(&bytes).expect("valid json");
        assert!(value["error"]["data"]["retryAfterMs"].is_number());
    }
}
