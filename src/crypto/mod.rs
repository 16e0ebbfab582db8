//! Cryptographic primitives: random token generation, PKCE helpers, and
//! constant-time comparison
//!
//! Everything in this module is pure or depends only on the operating
//! system's entropy source. Higher layers (token codec, OAuth state
//! manager, credential provider) build on these functions.

use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rand::TryRngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub mod password;

/// Default number of random bytes for state and verifier tokens (256 bits)
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Errors from the entropy-backed primitives
///
/// An entropy failure is fatal: the process cannot mint credentials without
/// a working CSPRNG, so callers abort the flow rather than retry.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("operating system entropy source failed: {0}")]
    EntropyFailure(String),
}

/// Outcome of a comparison whose inputs may not be comparable
///
/// Length is not secret, so reporting a mismatch early is safe; only the
/// final equal-length comparison must run without data-dependent branching.
/// Type mismatches are ruled out by the signature, which leaves a tri-state
/// result: `Err(LengthMismatch)`, `Ok(true)` or `Ok(false)`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompareError {
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Generate a base64url-encoded token with `byte_len` bytes of entropy
///
/// # Errors
///
/// Returns [`CryptoError::EntropyFailure`] if the OS entropy source fails.
pub fn generate_random_token(byte_len: usize) -> Result<String, CryptoError> {
    let mut bytes = vec![0u8; byte_len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::EntropyFailure(e.to_string()))?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&bytes))
}

/// Generate the CSRF `state` value round-tripped through the provider
///
/// 32 bytes of entropy, base64url-encoded to 43 characters.
///
/// # Errors
///
/// Returns [`CryptoError::EntropyFailure`] if the OS entropy source fails.
pub fn generate_state() -> Result<String, CryptoError> {
    generate_random_token(DEFAULT_TOKEN_BYTES)
}

/// Generate a PKCE code verifier (RFC 7636)
///
/// 32 random bytes base64url-encode to a 43-character string, the minimum
/// verifier length, using only unreserved characters.
///
/// # Errors
///
/// Returns [`CryptoError::EntropyFailure`] if the OS entropy source fails.
pub fn generate_code_verifier() -> Result<String, CryptoError> {
    generate_random_token(DEFAULT_TOKEN_BYTES)
}

/// Derive the S256 code challenge from a verifier: base64url(SHA-256(verifier))
///
/// Deterministic and pure.
#[must_use]
pub fn generate_code_challenge(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Compare two byte strings without early exit on mismatch
///
/// # Errors
///
/// Returns [`CompareError::LengthMismatch`] when the inputs differ in
/// length; the shorter input is never scanned past its end.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> Result<bool, CompareError> {
    if a.len() != b.len() {
        return Err(CompareError::LengthMismatch {
            expected: b.len(),
            actual: a.len(),
        });
    }
    Ok(bool::from(a.ct_eq(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_tokens_are_base64url_and_unique() {
        let a = generate_random_token(32).unwrap();
        let b = generate_random_token(32).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43); // 32 bytes, unpadded base64
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn code_verifier_meets_rfc_7636_rules() {
        let verifier = generate_code_verifier().unwrap();
        assert!(verifier.len() >= 43 && verifier.len() <= 128);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-._~".contains(c)));
    }

    #[test]
    fn code_challenge_is_deterministic() {
        // RFC 7636 appendix B test vector
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = generate_code_challenge(verifier);
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
        assert_eq!(challenge, generate_code_challenge(verifier));
    }

    #[test]
    fn compare_reports_length_mismatch() {
        let result = constant_time_compare(b"short", b"a longer value");
        assert_eq!(
            result,
            Err(CompareError::LengthMismatch {
                expected: 14,
                actual: 5
            })
        );
    }

    #[test]
    fn compare_equal_length_inputs() {
        assert_eq!(constant_time_compare(b"same-bytes", b"same-bytes"), Ok(true));
        assert_eq!(constant_time_compare(b"same-bytes", b"same-bytez"), Ok(false));
    }

    #[test]
    fn compare_empty_inputs_are_equal() {
        assert_eq!(constant_time_compare(b"", b""), Ok(true));
    }
}
