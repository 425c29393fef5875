// sentinel-gate-core/src/diagnostic.rs
// ============================================================================
// Module: Structured diagnostics
// Description: The ambient, non-audit logging surface — startup notices,
//              sweeper lifecycle, DevMode warnings — emitted as one JSON
//              object per line rather than prose.
// Purpose: Give every subsystem outside the audit pipeline a structured,
//          machine-parseable diagnostic channel without pulling in tracing.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Sentinel Gate does not depend on `tracing` or `log`. Ambient notices
//! instead flow through [`DiagnosticSink`], mirroring the audit sink trait
//! shape: a small `Serialize`-able event enum, a trait any deployment can
//! implement to route events elsewhere, and a stderr-backed default.

use serde::Serialize;
use serde_json::Value;

/// A structured ambient diagnostic notice.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// The gateway process has finished config resolution and is starting.
    Startup {
        /// The resolved configuration file path, if one was found.
        config_path: Option<String>,
        /// The gateway's own version string.
        version: &'static str,
    },
    /// `DevMode` is enabled for this run; callers should treat every
    /// request as pre-authenticated with a fixed identity.
    DevModeEnabled,
    /// A background sweeper task has started.
    SweeperStarted {
        /// Which sweeper (`session`, `ip_rate_limit`, `identity_rate_limit`).
        sweeper: &'static str,
        /// Its run interval, in milliseconds.
        interval_ms: u64,
    },
    /// A background sweeper task has stopped, normally via shutdown.
    SweeperStopped {
        /// Which sweeper stopped.
        sweeper: &'static str,
    },
    /// The audit pipeline dropped a record because its channel was full
    /// and the bounded wait also elapsed.
    AuditRecordDropped {
        /// Total dropped records observed so far in this process.
        total_dropped: u64,
    },
    /// A config value was out of its documented bounds and was rejected.
    ConfigRejected {
        /// The field that failed validation.
        field: &'static str,
        /// A human-readable reason, safe to surface to an operator.
        reason: String,
    },
}

/// The ambient diagnostics boundary. A deployment may implement this to
/// route events anywhere (structured log aggregator, metrics counter); the
/// default just writes one compact JSON line to stderr.
pub trait DiagnosticSink: Send + Sync {
    /// Records one diagnostic event.
    fn record(&self, event: &DiagnosticEvent);
}

/// Writes one compact JSON line per event to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrDiagnosticSink;

impl DiagnosticSink for StderrDiagnosticSink {
    fn record(&self, event: &DiagnosticEvent) {
        match serde_json::to_string(event) {
            Ok(line) => {
                #[allow(
                    clippy::print_stderr,
                    reason = "stderr is the documented default diagnostic sink; no tracing dependency is carried"
                )]
                {
                    eprintln!("{line}");
                }
            }
            Err(_) => {
                #[allow(
                    clippy::print_stderr,
                    reason = "serialization of a closed enum should never fail; surfacing the failure itself still must not panic"
                )]
                {
                    eprintln!(r#"{{"event":"diagnostic_serialize_failed"}}"#);
                }
            }
        }
    }
}

/// Discards every event. Useful in tests that assert on behavior but not
/// on diagnostic output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnosticSink;

impl DiagnosticSink for NoopDiagnosticSink {
    fn record(&self, _event: &DiagnosticEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_event_serializes_with_tag() {
        let event = DiagnosticEvent::Startup {
            config_path: Some("/etc/sentinel-gate.toml".to_string()),
            version: "0.1.0",
        };
        let value: Value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(value.get("event").and_then(Value::as_str), Some("startup"));
    }

    #[test]
    fn noop_sink_does_not_panic() {
        let sink = NoopDiagnosticSink;
        sink.record(&DiagnosticEvent::DevModeEnabled);
    }

    #[test]
    fn stderr_sink_does_not_panic_on_any_variant() {
        let sink = StderrDiagnosticSink;
        sink.record(&DiagnosticEvent::SweeperStarted {
            sweeper: "session",
            interval_ms: 1000,
        });
        sink.record(&DiagnosticEvent::AuditRecordDropped { total_dropped: 3 });
    }
}
