// sentinel-gate-core/src/apikey.rs
// ============================================================================
// Module: API key model and verification
// Description: Stored key material and the two verification strategies it
//              supports — a SHA-256 fast path and an Argon2id fallback.
// Purpose: Give the auth interceptor one type to resolve a presented secret
//          against, regardless of which hash scheme produced the record.
// Dependencies: argon2, sha2, subtle, time
// ============================================================================

//! ## Overview
//! A stored [`ApiKey`] never holds the plaintext secret, only a hash in one
//! of two formats: a plain `sha256:` hex digest (fast, constant-time
//! comparison) or an Argon2id PHC string (slow, memory-hard, for keys that
//! need to resist offline brute force of the stored hash itself). The format
//! is detected from the stored string, exactly as the caller wrote it, and
//! verification dispatches accordingly.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::Argon2;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

/// How a stored key's secret material is hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// `sha256:<64 lowercase hex chars>`.
    Sha256,
    /// A `$argon2id$...` PHC string.
    Argon2id,
}

/// Failures produced while verifying a presented secret against a stored
/// hash.
#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    /// The stored hash string matched neither the `sha256:` prefix form nor
    /// a parseable Argon2 PHC string.
    #[error("unrecognized key hash format")]
    UnrecognizedFormat,
    /// The Argon2 backend rejected the stored hash or panicked internally;
    /// treated as a verification failure, never propagated as a crash.
    #[error("argon2 verification failed")]
    Argon2Failure,
}

/// Detects which [`HashScheme`] a stored hash string uses. Accepts both the
/// `sha256:`-prefixed form and a bare 64-character hex digest (the form a
/// credential store might produce directly from a column of raw hex).
#[must_use]
pub fn detect_scheme(stored_hash: &str) -> Option<HashScheme> {
    if let Some(hex) = stored_hash.strip_prefix("sha256:") {
        return is_hex64(hex).then_some(HashScheme::Sha256);
    }
    if stored_hash.starts_with("$argon2id$") {
        return Some(HashScheme::Argon2id);
    }
    if is_hex64(stored_hash) {
        return Some(HashScheme::Sha256);
    }
    None
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Hashes a freshly generated key's secret part with SHA-256, producing the
/// `sha256:` stored form.
#[must_use]
pub fn hash_sha256(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    format!("sha256:{}", hex_encode(&digest))
}

/// Hashes a secret with Argon2id, producing a PHC string suitable for
/// storage. Used for keys the operator explicitly marks as high-value.
///
/// # Errors
///
/// Returns [`ApiKeyError::Argon2Failure`] if the underlying Argon2
/// implementation rejects the input (it does not reject UTF-8 strings in
/// practice, but the call is fallible and must not be unwrapped).
pub fn hash_argon2id(secret: &str) -> Result<String, ApiKeyError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| ApiKeyError::Argon2Failure)
}

/// Verifies a presented secret against a stored hash, dispatching on
/// [`detect_scheme`]. The SHA-256 path uses a constant-time comparison; the
/// Argon2 path is wrapped so that a malformed stored hash yields `Ok(false)`
/// (the key is simply invalid) rather than propagating a parser panic.
///
/// # Errors
///
/// Returns [`ApiKeyError::UnrecognizedFormat`] if `stored_hash` matches
/// neither supported scheme.
pub fn verify(presented_secret: &str, stored_hash: &str) -> Result<bool, ApiKeyError> {
    match detect_scheme(stored_hash) {
        Some(HashScheme::Sha256) => {
            let presented_hex = hex_encode(&Sha256::digest(presented_secret.as_bytes()));
            let stored_hex = stored_hash.strip_prefix("sha256:").unwrap_or(stored_hash);
            Ok(bool::from(
                presented_hex.as_bytes().ct_eq(stored_hex.as_bytes()),
            ))
        }
        Some(HashScheme::Argon2id) => verify_argon2id(presented_secret, stored_hash),
        None => Err(ApiKeyError::UnrecognizedFormat),
    }
}

fn verify_argon2id(presented_secret: &str, stored_hash: &str) -> Result<bool, ApiKeyError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|_| ApiKeyError::Argon2Failure)?;
    match Argon2::default().verify_password(presented_secret.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(_) => Err(ApiKeyError::Argon2Failure),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// A stored API key record, as resolved by whatever credential storage
/// backend sits behind the auth interceptor's lookup trait.
#[derive(Debug, Clone)]
pub struct ApiKey {
    /// Stable identifier for this key record, independent of the subject it
    /// authenticates.
    pub key_id: String,
    /// Subject identifier this key resolves to on success.
    pub subject_id: String,
    /// Display name for the subject, carried for audit convenience.
    pub display_name: String,
    /// The stored hash, in either supported [`HashScheme`] form.
    pub hash: String,
    /// Roles granted to the resolved identity.
    pub roles: Vec<String>,
    /// Scopes granted to the resolved identity.
    pub scopes: Vec<String>,
    /// Set once the key has been revoked; revoked keys never verify.
    pub revoked: bool,
    /// Optional expiry; an expired key never verifies.
    pub expires_at: Option<OffsetDateTime>,
}

impl ApiKey {
    /// Returns true if this key is currently usable: not revoked and not
    /// past its expiry, evaluated against `now`.
    #[must_use]
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        if self.revoked {
            return false;
        }
        match self.expires_at {
            Some(expiry) => now < expiry,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn detects_sha256_scheme() {
        let hash = hash_sha256("topsecret");
        assert_eq!(detect_scheme(&hash), Some(HashScheme::Sha256));
    }

    #[test]
    fn detects_argon2id_scheme() {
        let hash = hash_argon2id("topsecret").expect("hash succeeds");
        assert_eq!(detect_scheme(&hash), Some(HashScheme::Argon2id));
    }

    #[test]
    fn bare_hex_digest_is_detected_and_verified_as_sha256() {
        let bare = hash_sha256("topsecret").strip_prefix("sha256:").unwrap().to_string();
        assert_eq!(detect_scheme(&bare), Some(HashScheme::Sha256));
        assert!(verify("topsecret", &bare).expect("verify ok"));
        assert!(!verify("wrong", &bare).expect("verify ok"));
    }

    #[test]
    fn rejects_unrecognized_format() {
        assert_eq!(detect_scheme("plaintext"), None);
        assert!(verify("x", "plaintext").is_err());
    }

    #[test]
    fn sha256_round_trip_verifies() {
        let hash = hash_sha256("topsecret");
        assert!(verify("topsecret", &hash).expect("verify ok"));
        assert!(!verify("wrong", &hash).expect("verify ok"));
    }

    #[test]
    fn argon2id_round_trip_verifies() {
        let hash = hash_argon2id("topsecret").expect("hash succeeds");
        assert!(verify("topsecret", &hash).expect("verify ok"));
        assert!(!verify("wrong", &hash).expect("verify ok"));
    }

    #[test]
    fn malformed_argon2_hash_is_false_not_panic() {
        let result = verify("topsecret", "$argon2id$garbage");
        assert!(result.is_err() || result == Ok(false));
    }

    #[test]
    fn revoked_key_is_never_active() {
        let key = ApiKey {
            key_id: "k1".to_string(),
            subject_id: "s1".to_string(),
            display_name: "Test".to_string(),
            hash: hash_sha256("secret"),
            roles: vec![],
            scopes: vec![],
            revoked: true,
            expires_at: None,
        };
        assert!(!key.is_active(OffsetDateTime::now_utc()));
    }

    #[test]
    fn expired_key_is_not_active() {
        let now = OffsetDateTime::now_utc();
        let key = ApiKey {
            key_id: "k1".to_string(),
            subject_id: "s1".to_string(),
            display_name: "Test".to_string(),
            hash: hash_sha256("secret"),
            roles: vec![],
            scopes: vec![],
            revoked: false,
            expires_at: Some(now - Duration::seconds(1)),
        };
        assert!(!key.is_active(now));
    }
}
