// sentinel-gate-core/src/session.rs
// ============================================================================
// Module: Session records and in-memory store
// Description: Per-connection session lifecycle: creation, lookup, touch,
//              expiry. No persistence — sessions live only as long as the
//              process (and the connection they were minted for).
// Purpose: Let the auth interceptor avoid re-verifying an API key on every
//          message once a connection has proven itself once.
// Dependencies: rand, time
// ============================================================================

//! ## Overview
//! A [`Session`] is minted once per connection after the first successful
//! API key verification and cached so subsequent messages on the same
//! connection skip the (potentially Argon2id-slow) key verification path.
//! `SessionStore::get` must never mutate on read: an expired session is
//! still returned to the caller (who treats it as absent) so that expiry
//! semantics are owned entirely by the background sweeper, not by whichever
//! request happens to observe the expiry first.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use time::{Duration, OffsetDateTime};

/// A cached proof of prior authentication for one connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// 32 bytes of CSPRNG output, hex-encoded: the session token.
    pub id: String,
    /// Subject this session resolves to, set at creation time.
    pub subject_id: String,
    /// When the session was minted.
    pub created_at: OffsetDateTime,
    /// When the session stops being valid.
    pub expires_at: OffsetDateTime,
    /// Updated on every successful lookup; informational only, does not
    /// extend `expires_at` (sessions do not auto-renew on access).
    pub last_access: OffsetDateTime,
}

impl Session {
    /// Mints a new session for `subject_id`, valid for `ttl` from `now`.
    #[must_use]
    pub fn new(subject_id: impl Into<String>, now: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            id: generate_session_id(),
            subject_id: subject_id.into(),
            created_at: now,
            expires_at: now + ttl,
            last_access: now,
        }
    }

    /// Returns true if the session's `expires_at` has not yet passed at
    /// `now`.
    #[must_use]
    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

/// Generates a 32-byte CSPRNG session token, hex-encoded to 64 characters.
#[must_use]
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// An in-memory, mutex-guarded session cache keyed by connection id.
///
/// One store instance is shared process-wide; each physical connection
/// (a stdio process lifetime, or one HTTP connection-derived key) owns at
/// most one live session at a time, created lazily on first successful
/// auth and overwritten on re-auth.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or replaces the session cached for `connection_key`.
    pub fn put(&self, connection_key: String, session: Session) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
        sessions.insert(connection_key, session);
    }

    /// Returns a clone of the session cached for `connection_key`, if any,
    /// regardless of whether it has expired. Callers must check
    /// [`Session::is_valid`] themselves; a read never deletes state, so
    /// expiry is observed consistently by every reader until the sweeper
    /// runs.
    #[must_use]
    pub fn get(&self, connection_key: &str) -> Option<Session> {
        let sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
        sessions.get(connection_key).cloned()
    }

    /// Removes the session cached for `connection_key`, if any.
    pub fn remove(&self, connection_key: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
        sessions.remove(connection_key);
    }

    /// Drops every session whose `expires_at` has passed as of `now`.
    /// Intended to be driven by a periodic background sweeper; returns the
    /// number of sessions removed.
    pub fn sweep_expired(&self, now: OffsetDateTime) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
        let before = sessions.len();
        sessions.retain(|_, session| session.is_valid(now));
        before - sessions.len()
    }

    /// Returns the number of sessions currently cached, expired or not.
    /// Exposed for health reporting.
    #[must_use]
    pub fn len(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
        sessions.len()
    }

    /// Returns true if no sessions are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_64_hex_chars_and_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn get_does_not_delete_expired_session() {
        let store = SessionStore::new();
        let now = OffsetDateTime::now_utc();
        let session = Session::new("user-1", now - Duration::seconds(10), Duration::seconds(5));
        store.put("conn-1".to_string(), session);

        let fetched = store.get("conn-1").expect("still present");
        assert!(!fetched.is_valid(now));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sweep_removes_only_expired_sessions() {
        let store = SessionStore::new();
        let now = OffsetDateTime::now_utc();
        store.put(
            "expired".to_string(),
            Session::new("user-1", now - Duration::seconds(10), Duration::seconds(5)),
        );
        store.put(
            "fresh".to_string(),
            Session::new("user-2", now, Duration::seconds(60)),
        );

        let removed = store.sweep_expired(now);
        assert_eq!(removed, 1);
        assert!(store.get("expired").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[test]
    fn put_overwrites_existing_session_for_connection() {
        let store = SessionStore::new();
        let now = OffsetDateTime::now_utc();
        store.put("conn-1".to_string(), Session::new("user-1", now, Duration::seconds(60)));
        store.put("conn-1".to_string(), Session::new("user-2", now, Duration::seconds(60)));

        let session = store.get("conn-1").expect("present");
        assert_eq!(session.subject_id, "user-2");
        assert_eq!(store.len(), 1);
    }
}
