//! Token codec — authenticated encryption of payload maps into expiring,
//! opaque string tokens
//!
//! A sealed token is base64url(nonce ‖ AES-256-GCM ciphertext) over a JSON
//! envelope `{ iat, exp, data }`. Anything that goes to the host — session
//! cookies, OAuth state cookies, email-verification payloads — travels
//! through this codec, so possession of a token that opens is the only
//! authentication state the core keeps.
//!
//! `open` collapses every failure (malformed envelope, authentication-tag
//! mismatch, wrong key, expiry) into the single [`TokenError::Invalid`]
//! class: past the point of logging, an expired token and a tampered token
//! must both read as "not authenticated".

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::TryRngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Encryption key size for AES-256 (256 bits)
pub const ENCRYPTION_KEY_SIZE: usize = 32;

/// Minimum secret length in raw bytes; enforced again by config validation
pub const MIN_SECRET_BYTES: usize = 32;

/// Tolerance applied to the embedded expiry to absorb clock skew
pub const CLOCK_SKEW_LEEWAY_SECS: i64 = 30;

/// Token codec errors
#[derive(Debug, Error)]
pub enum TokenError {
    /// One class for every way a token can fail to open. The reason string
    /// is for logs only; callers must treat all of them identically.
    #[error("token invalid: {0}")]
    Invalid(&'static str),
    #[error("token could not be sealed: {0}")]
    Seal(String),
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    iat: i64,
    exp: i64,
    data: T,
}

/// Truncate a validated secret to the AES-256 key size
///
/// Config validation guarantees at least [`MIN_SECRET_BYTES`] of raw key
/// material; the first 32 bytes are keyed into AES-256 directly.
fn encryption_key(secret: &[u8]) -> Key<Aes256Gcm> {
    *Key::<Aes256Gcm>::from_slice(&secret[..ENCRYPTION_KEY_SIZE])
}

/// Seal a serializable payload into an expiring, authenticated token
///
/// # Errors
///
/// Returns [`TokenError::Seal`] if the secret is shorter than
/// [`MIN_SECRET_BYTES`], serialization fails, the nonce cannot be drawn
/// from the OS entropy source, or encryption fails.
pub fn seal<T: Serialize>(
    payload: &T,
    secret: &[u8],
    max_age_secs: i64,
) -> Result<String, TokenError> {
    if secret.len() < MIN_SECRET_BYTES {
        return Err(TokenError::Seal(format!(
            "secret must be at least {MIN_SECRET_BYTES} bytes, got {}",
            secret.len()
        )));
    }

    let now = Utc::now().timestamp();
    let envelope = Envelope {
        iat: now,
        exp: now + max_age_secs,
        data: payload,
    };
    let plaintext =
        serde_json::to_vec(&envelope).map_err(|e| TokenError::Seal(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| TokenError::Seal(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(&encryption_key(secret));
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|e| TokenError::Seal(e.to_string()))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&combined))
}

/// Open a sealed token, enforcing authenticity and expiry
///
/// # Errors
///
/// Returns [`TokenError::Invalid`] for a malformed envelope, an
/// authentication-tag mismatch, a wrong key, or an expiry past the
/// clock-skew leeway. Callers must not distinguish between these.
pub fn open<T: DeserializeOwned>(token: &str, secret: &[u8]) -> Result<T, TokenError> {
    if secret.len() < MIN_SECRET_BYTES {
        return Err(TokenError::Invalid("secret too short"));
    }

    let combined = general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| TokenError::Invalid("malformed envelope"))?;
    if combined.len() < NONCE_SIZE {
        return Err(TokenError::Invalid("malformed envelope"));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(&encryption_key(secret));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| TokenError::Invalid("authentication failed"))?;

    let envelope: Envelope<T> = serde_json::from_slice(&plaintext)
        .map_err(|_| TokenError::Invalid("unreadable payload"))?;

    if envelope.exp + CLOCK_SKEW_LEEWAY_SECS < Utc::now().timestamp() {
        return Err(TokenError::Invalid("expired"));
    }

    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const OTHER_SECRET: &[u8] = b"fedcba9876543210fedcba9876543210";

    #[test]
    fn round_trip_before_expiry() {
        let payload = json!({ "sub": "user-1", "role": "admin" });
        let token = seal(&payload, SECRET, 60).unwrap();
        let opened: serde_json::Value = open(&token, SECRET).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn open_fails_after_expiry() {
        let payload = json!({ "sub": "user-1" });
        // Already past expiry plus leeway
        let token = seal(&payload, SECRET, -(CLOCK_SKEW_LEEWAY_SECS + 5)).unwrap();
        let err = open::<serde_json::Value>(&token, SECRET).unwrap_err();
        assert!(matches!(err, TokenError::Invalid(_)));
    }

    #[test]
    fn open_honors_clock_skew_leeway() {
        let payload = json!({ "sub": "user-1" });
        // Expired, but within the leeway window
        let token = seal(&payload, SECRET, -5).unwrap();
        assert!(open::<serde_json::Value>(&token, SECRET).is_ok());
    }

    #[test]
    fn open_fails_for_truncated_token() {
        let token = seal(&json!({"k": "v"}), SECRET, 60).unwrap();
        let truncated = &token[..token.len() / 2];
        assert!(open::<serde_json::Value>(truncated, SECRET).is_err());
    }

    #[test]
    fn open_fails_with_wrong_secret() {
        let token = seal(&json!({"k": "v"}), SECRET, 60).unwrap();
        assert!(open::<serde_json::Value>(&token, OTHER_SECRET).is_err());
    }

    #[test]
    fn open_fails_for_single_flipped_bit() {
        let token = seal(&json!({"k": "v"}), SECRET, 60).unwrap();
        let mut raw = general_purpose::URL_SAFE_NO_PAD.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = general_purpose::URL_SAFE_NO_PAD.encode(&raw);
        assert!(open::<serde_json::Value>(&tampered, SECRET).is_err());
    }

    #[test]
    fn open_fails_for_garbage_input() {
        assert!(open::<serde_json::Value>("not base64!!", SECRET).is_err());
        assert!(open::<serde_json::Value>("", SECRET).is_err());
        assert!(open::<serde_json::Value>("AAAA", SECRET).is_err());
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = seal(&json!({}), b"too-short", 60).unwrap_err();
        assert!(matches!(err, TokenError::Seal(_)));
        assert!(open::<serde_json::Value>("whatever", b"too-short").is_err());
    }

    #[test]
    fn tokens_for_identical_payloads_differ() {
        let payload = json!({ "sub": "user-1" });
        let a = seal(&payload, SECRET, 60).unwrap();
        let b = seal(&payload, SECRET, 60).unwrap();
        assert_ne!(a, b); // fresh nonce per seal
    }
}
