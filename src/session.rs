//! Stateless session management
//!
//! A session is nothing but a sealed token in the host's cookie: there is
//! no server-side store to consult or invalidate. Reading a session is
//! total — every failure mode (missing, tampered, expired, wrong key)
//! collapses to "no session", logged at debug and never surfaced to the
//! caller as an error.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::token::{self, TokenError};

/// Fields sealed into the session cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSessionPayload {
    /// Provider that authenticated this session (`google`, `credential`, …)
    pub provider_id: String,
    /// Host-defined session fields from the `on_authenticated` /
    /// `on_sign_in` hooks
    pub claims: Map<String, Value>,
    /// Window length in seconds; `expires_at` moves in steps of this on
    /// extension
    pub max_age: i64,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Seals and opens session tokens with a fixed secret and lifetime
#[derive(Clone)]
pub struct SessionManager {
    secret: Vec<u8>,
    max_age_secs: i64,
}

impl SessionManager {
    #[must_use]
    pub fn new(secret: Vec<u8>, max_age_secs: i64) -> Self {
        Self {
            secret,
            max_age_secs,
        }
    }

    #[must_use]
    pub fn max_age_secs(&self) -> i64 {
        self.max_age_secs
    }

    /// Seal a fresh session for `provider_id` carrying the hook-provided
    /// claims
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Seal`] on serialization or encryption failure.
    pub fn create(
        &self,
        provider_id: &str,
        claims: Map<String, Value>,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let payload = UserSessionPayload {
            provider_id: provider_id.to_owned(),
            claims,
            max_age: self.max_age_secs,
            created_at: now,
            expires_at: now + self.max_age_secs,
        };
        token::seal(&payload, &self.secret, self.max_age_secs)
    }

    /// Open a session token; `None` for anything that does not open
    #[must_use]
    pub fn read(&self, session_token: &str) -> Option<UserSessionPayload> {
        match token::open(session_token, &self.secret) {
            Ok(payload) => Some(payload),
            Err(e) => {
                log::debug!("Session token did not open: {e}");
                None
            }
        }
    }

    /// Re-seal a valid session with a fresh expiry, preserving its claims
    /// and creation time; `None` if the token does not open
    ///
    /// Pure with respect to the input: the original token is untouched and
    /// remains valid until its own expiry.
    #[must_use]
    pub fn extend(&self, session_token: &str) -> Option<String> {
        let mut payload = self.read(session_token)?;
        payload.expires_at = Utc::now().timestamp() + payload.max_age;
        match token::seal(&payload, &self.secret, payload.max_age) {
            Ok(renewed) => Some(renewed),
            Err(e) => {
                log::error!("Could not re-seal session during extension: {e}");
                None
            }
        }
    }
}
