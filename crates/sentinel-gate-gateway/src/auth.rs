// sentinel-gate-gateway/src/auth.rs
// ============================================================================
// Module: Authentication interceptor
// Description: API key extraction and resolution, the per-connection
//              session cache, and DevMode bypass.
// Purpose: Resolve a message's caller exactly once per connection's
//          lifetime, then let every later message on that connection skip
//          the (potentially Argon2id-slow) key verification path.
// Dependencies: sentinel-gate-core, sha2
// ============================================================================

//! ## Overview
//! [`AuthStage`] implements spec §4.4's four-branch flow: DevMode synthesis,
//! cached-session fast path, fresh API key resolution, or rejection. The
//! per-connection cache is [`sentinel_gate_core::SessionStore`] itself —
//! keyed directly by connection id rather than by an intermediate session
//! id — which folds spec's "session service" (§4.5) and "per-connection
//! session cache" (§4.4) into the one store the teacher's own mutex+map
//! components already model; the identity each cached session resolves to
//! is kept alongside it in this stage's own table, since a [`Session`]
//! deliberately carries only a subject id, not the roles/scopes a full
//! [`Identity`] needs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use sentinel_gate_core::apikey::{self, ApiKey};
use sentinel_gate_core::diagnostic::{DiagnosticEvent, DiagnosticSink};
use sentinel_gate_core::identity::Identity;
use sentinel_gate_core::interceptor::{InterceptStage, Interceptor};
use sentinel_gate_core::message::{Direction, Message};
use sentinel_gate_core::session::{Session, SessionStore};
use sentinel_gate_core::GatewayError;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Subject id synthesized for every DevMode request.
pub const DEVMODE_SUBJECT_ID: &str = "devmode-admin";
/// Display name synthesized for every DevMode request.
pub const DEVMODE_DISPLAY_NAME: &str = "DevMode Administrator";

/// The read contract the auth stage consumes to resolve a presented secret
/// to a stored key record. A concrete credential storage backend (a
/// database, a secrets manager, a config-file-backed table) lives outside
/// this crate and satisfies this trait.
pub trait ApiKeyStore: Send + Sync {
    /// Looks up a key record by the exact stored-hash string a SHA-256 fast
    /// path would produce for some secret. Returns `None` on miss; a miss
    /// here does not imply the key is invalid, only that it is not stored
    /// in the SHA-256 form (it may be Argon2id, requiring [`Self::list`]).
    fn find_by_hash(&self, hash: &str) -> Option<ApiKey>;

    /// Returns every stored key record, for the fallback verification scan
    /// (Argon2id keys cannot be looked up directly since the scheme is
    /// salted).
    fn list(&self) -> Vec<ApiKey>;
}

/// An in-memory [`ApiKeyStore`], useful for tests and for small
/// deployments that provision keys through configuration rather than an
/// external credential service.
#[derive(Debug, Default)]
pub struct InMemoryApiKeyStore {
    keys: Mutex<Vec<ApiKey>>,
}

impl InMemoryApiKeyStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key record to the store.
    pub fn insert(&self, key: ApiKey) {
        let mut keys = self.keys.lock().unwrap_or_else(|poison| poison.into_inner());
        keys.push(key);
    }
}

impl ApiKeyStore for InMemoryApiKeyStore {
    fn find_by_hash(&self, hash: &str) -> Option<ApiKey> {
        let keys = self.keys.lock().unwrap_or_else(|poison| poison.into_inner());
        keys.iter().find(|k| k.hash == hash).cloned()
    }

    fn list(&self) -> Vec<ApiKey> {
        let keys = self.keys.lock().unwrap_or_else(|poison| poison.into_inner());
        keys.clone()
    }
}

/// Derives the HTTP transport's per-client connection id from a presented
/// Bearer key: `"http-"` followed by the first 8 bytes (16 hex characters)
/// of the key's SHA-256 digest. This isolates distinct clients that share
/// one HTTP listener without needing the transport to track a real
/// connection handle.
#[must_use]
pub fn derive_http_connection_id(raw_key: &str) -> String {
    let digest = Sha256::digest(raw_key.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(hex, "{byte:02x}");
    }
    format!("http-{hex}")
}

/// The authentication interceptor.
pub struct AuthStage {
    store: Arc<dyn ApiKeyStore>,
    sessions: Arc<SessionStore>,
    identities: Mutex<HashMap<String, Identity>>,
    session_ttl: StdDuration,
    devmode: bool,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl AuthStage {
    /// Builds the auth stage. `devmode` must already reflect both the
    /// configuration flag and the `SENTINELGATE_ALLOW_DEVMODE` environment
    /// override (resolved by `sentinel-gate-config`); this stage trusts the
    /// caller's decision and does not re-check the environment itself.
    #[must_use]
    pub fn new(
        store: Arc<dyn ApiKeyStore>,
        sessions: Arc<SessionStore>,
        session_ttl: StdDuration,
        devmode: bool,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        if devmode {
            diagnostics.record(&DiagnosticEvent::DevModeEnabled);
        }
        Self {
            store,
            sessions,
            identities: Mutex::new(HashMap::new()),
            session_ttl,
            devmode,
            diagnostics,
        }
    }

    fn store_identity(&self, connection_id: &str, identity: Identity) {
        let mut identities = self.identities.lock().unwrap_or_else(|poison| poison.into_inner());
        identities.insert(connection_id.to_string(), identity);
    }

    fn cached_identity(&self, connection_id: &str) -> Option<Identity> {
        let identities = self.identities.lock().unwrap_or_else(|poison| poison.into_inner());
        identities.get(connection_id).cloned()
    }

    fn resolve_key(&self, raw_key: &str) -> Option<ApiKey> {
        let hash = apikey::hash_sha256(raw_key);
        if let Some(key) = self.store.find_by_hash(&hash) {
            return Some(key);
        }
        self.store
            .list()
            .into_iter()
            .find(|candidate| apikey::verify(raw_key, &candidate.hash).unwrap_or(false))
    }

    /// Runs the expiry sweep for both the session cache and the identity
    /// table, keeping them in lockstep. Intended to be driven by a
    /// periodic background task; returns the number of entries removed.
    pub fn sweep(&self, now: OffsetDateTime) -> usize {
        let removed = self.sessions.sweep_expired(now);
        let mut identities = self.identities.lock().unwrap_or_else(|poison| poison.into_inner());
        identities.retain(|connection_id, _| self.sessions.get(connection_id).is_some());
        removed
    }

    fn extract_presented_key(message: &Message) -> Option<String> {
        if let Some(key) = message.api_key.as_ref() {
            return Some(key.clone());
        }
        message
            .envelope()
            .and_then(|e| e.params.as_ref())
            .and_then(|params| params.get("apiKey"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    }
}

impl Interceptor for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }
}

#[async_trait::async_trait]
impl InterceptStage for AuthStage {
    async fn intercept(&self, message: &mut Message) -> Result<(), GatewayError> {
        if message.direction() != Direction::ClientToServer {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();

        if self.devmode {
            let mut identity = Identity::new(DEVMODE_SUBJECT_ID, DEVMODE_DISPLAY_NAME);
            identity.roles.insert("admin".to_string());
            let session = Session::new(identity.subject_id.clone(), now, ttl(self.session_ttl));
            message.session = Some(session);
            message.identity = Some(identity);
            message.api_key = None;
            return Ok(());
        }

        let connection_id = message.connection_id.clone();

        if let Some(mut session) = self.sessions.get(&connection_id) {
            if session.is_valid(now) {
                session.last_access = now;
                session.expires_at = now + ttl(self.session_ttl);
                self.sessions.put(connection_id.clone(), session.clone());
                let identity = self.cached_identity(&connection_id).ok_or_else(|| {
                    GatewayError::Internal("cached session missing identity".to_string())
                })?;
                message.session = Some(session);
                message.identity = Some(identity);
                message.api_key = None;
                return Ok(());
            }
            // Do not remove the expired entry here: a read that deletes on
            // expiry forces every concurrent caller observing the same
            // stale session into a write, and ownership of eviction belongs
            // to the periodic sweeper alone (spec's session-store lock
            // discipline). `sweep` reconciles the identity table afterward.
            return Err(GatewayError::SessionExpired);
        }

        let Some(raw_key) = Self::extract_presented_key(message) else {
            return Err(GatewayError::Unauthenticated);
        };

        let key_record = self.resolve_key(&raw_key).ok_or(GatewayError::InvalidApiKey)?;
        if !key_record.is_active(now) {
            return Err(GatewayError::InvalidApiKey);
        }

        let mut identity = Identity::new(key_record.subject_id.clone(), key_record.display_name.clone());
        identity.roles.extend(key_record.roles.iter().cloned());
        identity.scopes.extend(key_record.scopes.iter().cloned());

        let session = Session::new(identity.subject_id.clone(), now, ttl(self.session_ttl));
        self.sessions.put(connection_id.clone(), session.clone());
        self.store_identity(&connection_id, identity.clone());

        message.session = Some(session);
        message.identity = Some(identity);
        message.api_key = None;
        Ok(())
    }
}

fn ttl(d: StdDuration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_gate_core::diagnostic::NoopDiagnosticSink;

    fn stage(devmode: bool) -> AuthStage {
        AuthStage::new(
            Arc::new(InMemoryApiKeyStore::new()),
            Arc::new(SessionStore::new()),
            StdDuration::from_secs(1800),
            devmode,
            Arc::new(NoopDiagnosticSink),
        )
    }

    fn client_message(connection_id: &str) -> Message {
        let mut msg = Message::from_client_bytes(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_vec(), 0);
        msg.connection_id = connection_id.to_string();
        msg
    }

    #[tokio::test]
    async fn devmode_synthesizes_admin_identity() {
        let stage = stage(true);
        let mut msg = client_message("conn-1");
        stage.intercept(&mut msg).await.expect("devmode always allows");
        assert_eq!(msg.identity.expect("identity attached").subject_id, DEVMODE_SUBJECT_ID);
    }

    #[tokio::test]
    async fn missing_key_and_no_session_is_unauthenticated() {
        let stage = stage(false);
        let mut msg = client_message("conn-1");
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
    }

    #[tokio::test]
    async fn valid_key_creates_session_and_caches_by_connection() {
        let store = Arc::new(InMemoryApiKeyStore::new());
        store.insert(ApiKey {
            key_id: "k1".to_string(),
            subject_id: "user-1".to_string(),
            display_name: "Alice".to_string(),
            hash: apikey::hash_sha256("topsecret"),
            roles: vec!["user".to_string()],
            scopes: vec![],
            revoked: false,
            expires_at: None,
        });
        let stage = AuthStage::new(
            store,
            Arc::new(SessionStore::new()),
            StdDuration::from_secs(1800),
            false,
            Arc::new(NoopDiagnosticSink),
        );

        let mut msg = client_message("conn-1");
        msg.api_key = Some("topsecret".to_string());
        stage.intercept(&mut msg).await.expect("valid key authenticates");
        assert_eq!(msg.identity.as_ref().expect("identity").subject_id, "user-1");
        assert!(msg.api_key.is_none(), "key must not survive past auth");

        // second message on the same connection, no key presented: must
        // reuse the cached session.
        let mut second = client_message("conn-1");
        stage.intercept(&mut second).await.expect("cached session reused");
        assert_eq!(second.identity.expect("identity").subject_id, "user-1");
    }

    #[tokio::test]
    async fn revoked_key_is_invalid() {
        let store = Arc::new(InMemoryApiKeyStore::new());
        store.insert(ApiKey {
            key_id: "k1".to_string(),
            subject_id: "user-1".to_string(),
            display_name: "Alice".to_string(),
            hash: apikey::hash_sha256("topsecret"),
            roles: vec![],
            scopes: vec![],
            revoked: true,
            expires_at: None,
        });
        let stage = AuthStage::new(
            store,
            Arc::new(SessionStore::new()),
            StdDuration::from_secs(1800),
            false,
            Arc::new(NoopDiagnosticSink),
        );
        let mut msg = client_message("conn-1");
        msg.api_key = Some("topsecret".to_string());
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidApiKey));
    }

    #[tokio::test]
    async fn unknown_key_is_invalid() {
        let stage = stage(false);
        let mut msg = client_message("conn-1");
        msg.api_key = Some("nope".to_string());
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidApiKey));
    }

    #[tokio::test]
    async fn expired_cached_session_is_rejected_without_self_eviction() {
        let sessions = Arc::new(SessionStore::new());
        let now = OffsetDateTime::now_utc();
        sessions.put(
            "conn-1".to_string(),
            Session::new("user-1", now - time::Duration::seconds(10), time::Duration::seconds(5)),
        );
        let stage = AuthStage::new(
            Arc::new(InMemoryApiKeyStore::new()),
            sessions.clone(),
            StdDuration::from_secs(1800),
            false,
            Arc::new(NoopDiagnosticSink),
        );
        let mut msg = client_message("conn-1");
        let err = stage.intercept(&mut msg).await.unwrap_err();
        assert!(matches!(err, GatewayError::SessionExpired));
        // Eviction is the sweeper's job, not this read path's: the entry
        // stays put (still expired) until `sweep` runs.
        assert!(sessions.get("conn-1").is_some());

        let removed = stage.sweep(now);
        assert_eq!(removed, 1);
        assert!(sessions.get("conn-1").is_none());
    }

    #[test]
    fn two_different_keys_on_http_derive_distinct_connection_ids() {
        let a = derive_http_connection_id("key-a");
        let b = derive_http_connection_id("key-b");
        assert_ne!(a, b);
        assert!(a.starts_with("http-"));
    }
}
