// sentinel-gate-gateway/src/ratelimit.rs
// ============================================================================
// Module: GCRA rate-limit interceptors
// Description: The two interceptor instances — pre-auth IP-keyed, post-auth
//              identity-keyed — sharing the GCRA implementation in
//              sentinel-gate-core, plus their background TTL sweepers.
// Purpose: Absorb brute-force guessing before auth runs, and bound
//          per-identity request rate after it does.
// Dependencies: sentinel-gate-core, tokio
// ============================================================================

//! ## Overview
//! Both [`IpRateLimitStage`] and [`UserRateLimitStage`] wrap the same
//! [`GcraLimiter`] but key it differently and sit at different points in
//! the chain: the IP-keyed instance runs before [`crate::auth`] so an
//! unauthenticated flood never reaches the (potentially Argon2id-slow) key
//! verification path; the identity-keyed instance runs after, once a
//! subject id is available. Both fail open on nothing — GCRA itself cannot
//! fail — but are deliberately silent about denial causes beyond the
//! structured [`GatewayError::RateLimited`] they return, per spec's
//! "availability over strictness for infra faults, never for decided
//! denials" rule.

use std::sync::Arc;
use std::time::Duration;

use sentinel_gate_core::diagnostic::{DiagnosticEvent, DiagnosticSink};
use sentinel_gate_core::interceptor::{InterceptStage, Interceptor};
use sentinel_gate_core::message::{Direction, Message};
use sentinel_gate_core::ratecell::{GcraLimiter, GcraParams};
use sentinel_gate_core::GatewayError;

/// The namespace prefix used for IP-keyed rate-limit cells.
pub const IP_KEY_PREFIX: &str = "ratelimit:ip:";
/// The namespace prefix used for identity-keyed rate-limit cells.
pub const USER_KEY_PREFIX: &str = "ratelimit:user:";
/// Key used when no peer address is known (stdio transport, or an HTTP
/// request with no extractable client address).
pub const UNKNOWN_IP: &str = "unknown";

/// Rate-limits client messages by peer IP address, before authentication
/// has run.
pub struct IpRateLimitStage {
    limiter: Arc<GcraLimiter>,
}

impl IpRateLimitStage {
    /// Builds the stage around an already-constructed limiter, so the
    /// sweeper task and the stage can share ownership.
    #[must_use]
    pub fn new(limiter: Arc<GcraLimiter>) -> Self {
        Self { limiter }
    }
}

impl Interceptor for IpRateLimitStage {
    fn name(&self) -> &'static str {
        "ip_rate_limit"
    }
}

#[async_trait::async_trait]
impl InterceptStage for IpRateLimitStage {
    async fn intercept(&self, message: &mut Message) -> Result<(), GatewayError> {
        if message.direction() != Direction::ClientToServer {
            return Ok(());
        }
        let addr = message.peer_addr.as_deref().unwrap_or(UNKNOWN_IP);
        let key = format!("{IP_KEY_PREFIX}{addr}");
        check(&self.limiter, &key)
    }
}

/// Rate-limits client messages by resolved identity, after authentication
/// has run.
pub struct UserRateLimitStage {
    limiter: Arc<GcraLimiter>,
}

impl UserRateLimitStage {
    /// Builds the stage around an already-constructed limiter.
    #[must_use]
    pub fn new(limiter: Arc<GcraLimiter>) -> Self {
        Self { limiter }
    }
}

impl Interceptor for UserRateLimitStage {
    fn name(&self) -> &'static str {
        "user_rate_limit"
    }
}

#[async_trait::async_trait]
impl InterceptStage for UserRateLimitStage {
    async fn intercept(&self, message: &mut Message) -> Result<(), GatewayError> {
        if message.direction() != Direction::ClientToServer {
            return Ok(());
        }
        let Some(identity) = message.identity.as_ref() else {
            // Auth runs before this stage in the declared chain order; an
            // unauthenticated message reaching here is a programming error
            // upstream, not something this stage should silently allow.
            return Err(GatewayError::MissingSession);
        };
        let key = format!("{USER_KEY_PREFIX}{}", identity.rate_limit_key());
        check(&self.limiter, &key)
    }
}

fn check(limiter: &GcraLimiter, key: &str) -> Result<(), GatewayError> {
    let now = time::OffsetDateTime::now_utc();
    let decision = limiter.check(key, now);
    if decision.allowed {
        Ok(())
    } else {
        Err(GatewayError::RateLimited {
            retry_after: decision.retry_after.unwrap_or(Duration::ZERO),
        })
    }
}

/// Spawns the background sweeper that periodically drops idle GCRA cells
/// from `limiter`. Cancellation of `shutdown` halts the sweeper at its next
/// tick; the returned handle can be awaited to confirm the sweeper has
/// exited.
pub fn spawn_sweeper(
    sweeper_name: &'static str,
    limiter: Arc<GcraLimiter>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    diagnostics: Arc<dyn DiagnosticSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        diagnostics.record(&DiagnosticEvent::SweeperStarted {
            sweeper: sweeper_name,
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        });
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    limiter.sweep_idle(time::OffsetDateTime::now_utc());
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        diagnostics.record(&DiagnosticEvent::SweeperStopped { sweeper: sweeper_name });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_gate_core::identity::Identity;

    fn limiter(rate: u32, burst: u32) -> Arc<GcraLimiter> {
        Arc::new(GcraLimiter::new(GcraParams {
            rate,
            period: Duration::from_secs(1),
            burst,
        }))
    }

    #[tokio::test]
    async fn ip_stage_denies_after_burst_exhausted() {
        let stage = IpRateLimitStage::new(limiter(1, 0));
        let mut first = Message::from_client_bytes(b"{}".to_vec(), 0);
        first.peer_addr = Some("203.0.113.1".to_string());
        assert!(stage.intercept(&mut first).await.is_ok());

        let mut second = Message::from_client_bytes(b"{}".to_vec(), 0);
        second.peer_addr = Some("203.0.113.1".to_string());
        let err = stage.intercept(&mut second).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn ip_stage_keys_distinct_addresses_independently() {
        let stage = IpRateLimitStage::new(limiter(1, 0));
        let mut a = Message::from_client_bytes(b"{}".to_vec(), 0);
        a.peer_addr = Some("203.0.113.1".to_string());
        let mut b = Message::from_client_bytes(b"{}".to_vec(), 0);
        b.peer_addr = Some("203.0.113.2".to_string());
        assert!(stage.intercept(&mut a).await.is_ok());
        assert!(stage.intercept(&mut b).await.is_ok());
    }

    #[tokio::test]
    async fn missing_peer_addr_falls_back_to_unknown_key() {
        let stage = IpRateLimitStage::new(limiter(5, 0));
        let mut msg = Message::from_client_bytes(b"{}".to_vec(), 0);
        assert!(stage.intercept(&mut msg).await.is_ok());
    }

    #[tokio::test]
    async fn user_stage_requires_identity() {
        let stage = UserRateLimitStage::new(limiter(5, 0));
        let mut msg = Message::from_client_bytes(b"{}".to_vec(), 0);
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingSession));
    }

    #[tokio::test]
    async fn user_stage_keys_by_subject_id() {
        let stage = UserRateLimitStage::new(limiter(1, 0));
        let mut msg = Message::from_client_bytes(b"{}".to_vec(), 0);
        msg.identity = Some(Identity::new("user-1", "Alice"));
        assert!(stage.intercept(&mut msg).await.is_ok());

        let mut msg2 = Message::from_client_bytes(b"{}".to_vec(), 0);
        msg2.identity = Some(Identity::new("user-1", "Alice"));
        let err = stage.intercept(&mut msg2).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn server_to_client_messages_bypass_rate_limiting() {
        let stage = IpRateLimitStage::new(limiter(1, 0));
        let mut msg = Message::from_server_bytes(b"{}".to_vec(), 0);
        assert!(stage.intercept(&mut msg).await.is_ok());
        assert!(stage.intercept(&mut msg).await.is_ok());
    }
}
