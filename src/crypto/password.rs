//! Password hashing and verification — Argon2id
//!
//! Passwords are normalized to Unicode NFKC before hashing so that visually
//! identical inputs typed on different platforms derive the same hash. The
//! output is a self-describing PHC-format record
//! (`$argon2id$v=19$m=19456,t=2,p=1$saltB64$hashB64`) carrying the algorithm
//! and its parameters, so verification re-derives with whatever parameters
//! the record was created under.
//!
//! A malformed record is a distinct [`PasswordError::InvalidHashFormat`],
//! never reported as a password mismatch.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Errors from the password pipeline
#[derive(Debug, Error)]
pub enum PasswordError {
    /// The stored record is not a well-formed PHC string for a supported
    /// algorithm. Deliberately distinct from a verification mismatch.
    #[error("password hash record is malformed: {0}")]
    InvalidHashFormat(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

fn normalize(password: &str) -> String {
    password.nfkc().collect()
}

/// Hash a password with Argon2id and a fresh random salt
///
/// # Errors
///
/// Returns [`PasswordError::Hashing`] if the key derivation fails.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let normalized = normalize(password);
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hashing(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC-format record
///
/// The comparison inside `argon2` runs in constant time over the derived
/// output.
///
/// # Errors
///
/// Returns [`PasswordError::InvalidHashFormat`] if the record cannot be
/// parsed or names unsupported parameters.
pub fn verify_password(password: &str, record: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(record)
        .map_err(|e| PasswordError::InvalidHashFormat(e.to_string()))?;
    let normalized = normalize(password);
    match Argon2::default().verify_password(normalized.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::InvalidHashFormat(e.to_string())),
    }
}
