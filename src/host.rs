//! Collaborator contracts implemented by the host application
//!
//! The core never touches cookies, HTTP responses, user records, or
//! outbound email directly. Each of those concerns is a small async trait
//! the host implements; the facade drives them in a fixed order per flow.
//! Everything here is request-scoped except [`UserRepository`],
//! [`EmailSender`] and [`AuthEvents`], which are application-scoped and
//! shared behind `Arc`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::oauth::callback::IdTokenClaims;

/// Failure reported by a host collaborator (database down, SMTP refused, …)
///
/// The core never inspects the message; it only decides which tagged error
/// the failure maps to.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

// =============================================================================
// Cookie storage
// =============================================================================

/// Cookie names used by the core
///
/// HTTPS deployments get the `__Host-` prefix for the strongest scoping
/// guarantee (no Domain attribute, Path=/, Secure required).
#[must_use]
pub fn session_cookie_name(secure: bool) -> &'static str {
    if secure {
        "__Host-gatekey.session"
    } else {
        "gatekey.session"
    }
}

#[must_use]
pub fn oauth_state_cookie_name(secure: bool) -> &'static str {
    if secure {
        "__Host-gatekey.oauth_state"
    } else {
        "gatekey.oauth_state"
    }
}

#[must_use]
pub fn email_verification_cookie_name(secure: bool) -> &'static str {
    if secure {
        "__Host-gatekey.email_verification"
    } else {
        "gatekey.email_verification"
    }
}

#[must_use]
pub fn password_reset_cookie_name(secure: bool) -> &'static str {
    if secure {
        "__Host-gatekey.password_reset"
    } else {
        "gatekey.password_reset"
    }
}

/// `SameSite` attribute for cookies set through [`CookieStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Options for cookie creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub max_age_secs: i64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
}

impl CookieOptions {
    /// Standard options for an auth cookie with the given lifetime
    #[must_use]
    pub fn auth_cookie(max_age_secs: i64, secure: bool) -> Self {
        Self {
            max_age_secs,
            http_only: true,
            secure,
            same_site: SameSite::Lax,
            path: "/".to_owned(),
        }
    }
}

/// Host-side cookie storage for the current request/response pair
#[async_trait]
pub trait CookieStore: Send {
    /// Store a cookie on the outgoing response
    async fn set(
        &mut self,
        name: &str,
        value: &str,
        options: CookieOptions,
    ) -> Result<(), HostError>;

    /// Read a cookie from the incoming request
    async fn get(&self, name: &str) -> Option<String>;

    /// Delete a cookie (expire it on the outgoing response)
    async fn delete(&mut self, name: &str) -> Result<(), HostError>;
}

// =============================================================================
// Redirects
// =============================================================================

/// How the host should issue a redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// Normal navigation; the intermediate URL stays in history
    Push,
    /// Replace the current history entry (used after callbacks so Back
    /// does not replay the flow)
    Replace,
}

/// Host-side redirect issuance; has no failure mode visible to the core
#[async_trait]
pub trait Redirector: Send {
    async fn redirect(&mut self, url: &str, mode: RedirectMode);
}

// =============================================================================
// User persistence
// =============================================================================

/// A credential account as the host stores it; referenced, never owned
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub linked_providers: Vec<String>,
    /// Host-defined extra fields captured at sign-up
    pub extra: Map<String, Value>,
}

/// Fields the core hands to the host when creating an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub extra: Map<String, Value>,
}

/// Host persistence for credential accounts
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Persist a new, unverified account
    async fn create_account(&self, account: NewAccount) -> Result<Account, HostError>;

    /// Look up an account by email
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, HostError>;

    /// Mark the account's email as verified
    async fn mark_email_verified(&self, email: &str) -> Result<(), HostError>;

    /// Replace the account's stored password hash
    async fn change_password(&self, email: &str, password_hash: &str) -> Result<(), HostError>;

    /// Record that `provider_id` is linked to the account
    async fn link_provider(
        &self,
        account_id: &str,
        provider_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), HostError>;
}

// =============================================================================
// Outbound email
// =============================================================================

/// Host email delivery
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), HostError>;
}

// =============================================================================
// Application hooks
// =============================================================================

/// Optional application hooks fired at well-defined points in each flow
///
/// Every method has a sensible default, so hosts implement only what they
/// need. Hook failures abort the flow with a distinct error and are never
/// retried by the core.
#[async_trait]
pub trait AuthEvents: Send + Sync {
    /// Map validated identity claims to the fields stored in the session.
    /// Typical implementations upsert a user record here.
    async fn on_authenticated(
        &self,
        claims: &IdTokenClaims,
    ) -> Result<Map<String, Value>, HostError> {
        Ok(claims.session_fields())
    }

    /// Fired after a credential account was persisted at sign-up
    async fn on_sign_up(&self, _account: &Account) {}

    /// Map a credential account to the fields stored in the session
    async fn on_sign_in(&self, account: &Account) -> Result<Map<String, Value>, HostError> {
        let mut fields = Map::new();
        fields.insert("email".to_owned(), Value::String(account.email.clone()));
        Ok(fields)
    }

    /// Fired after an email address was verified
    async fn on_email_verified(&self, _email: &str) {}
}

/// The no-op hook set used when the host registers nothing
pub struct DefaultAuthEvents;

#[async_trait]
impl AuthEvents for DefaultAuthEvents {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_names_follow_host_prefix_convention() {
        assert_eq!(session_cookie_name(true), "__Host-gatekey.session");
        assert_eq!(session_cookie_name(false), "gatekey.session");
        assert_ne!(
            session_cookie_name(true),
            oauth_state_cookie_name(true),
            "session and state cookies must not collide"
        );
    }

    #[test]
    fn auth_cookie_defaults() {
        let options = CookieOptions::auth_cookie(600, true);
        assert!(options.http_only);
        assert!(options.secure);
        assert_eq!(options.same_site, SameSite::Lax);
        assert_eq!(options.path, "/");
        assert_eq!(options.max_age_secs, 600);
    }
}
