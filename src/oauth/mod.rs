//! OAuth2 Authorization Code + PKCE
//!
//! This module owns the sign-in side of the flow: generating the CSRF
//! `state` and PKCE verifier, sealing them into the short-lived state
//! token the host stores in a cookie, and building the provider
//! authorization URL. The callback side lives in [`callback`].

pub mod callback;
pub mod provider;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::crypto::{self, CryptoError};
use crate::token::{self, TokenError};
use provider::ProviderConfig;

/// Lifetime of the sealed OAuth state token: 10 minutes
pub const OAUTH_STATE_MAX_AGE_SECS: i64 = 600;

/// OAuth flow errors, one tag per fallible step
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("provider `{0}` is not configured")]
    ProviderNotConfigured(String),
    #[error("provider returned an error: {0}")]
    ProviderReturnedError(String),
    #[error("missing authorization code in callback URL")]
    MissingAuthorizationCode,
    #[error("missing state in callback URL")]
    MissingState,
    #[error("no OAuth state cookie accompanied the callback")]
    MissingStateCookie,
    #[error("stored OAuth state token failed to open: {0}")]
    InvalidStateToken(TokenError),
    #[error("callback state does not match the state bound at sign-in")]
    StateMismatch,
    #[error("could not reach the token endpoint: {0}")]
    TokenFetch(String),
    #[error("token endpoint returned {status} {status_text}")]
    TokenResponse { status: u16, status_text: String },
    #[error("token endpoint returned an unreadable body: {0}")]
    TokenParse(String),
    #[error("identity token payload failed validation: {0}")]
    InvalidTokenPayload(String),
    #[error("authentication hook failed: {0}")]
    Hook(String),
    #[error("state token could not be sealed: {0}")]
    StateSeal(TokenError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("authorization endpoint is not a valid URL: {0}")]
    InvalidEndpoint(String),
}

impl OAuthError {
    /// Stable, URL-safe tag for `?error=` query parameters
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ProviderNotConfigured(_) => "provider_not_configured",
            Self::ProviderReturnedError(_) => "provider_error",
            Self::MissingAuthorizationCode => "missing_code",
            Self::MissingState
            | Self::MissingStateCookie
            | Self::InvalidStateToken(_)
            | Self::StateMismatch => "oauth_state_error",
            Self::TokenFetch(_) | Self::TokenResponse { .. } | Self::TokenParse(_) => {
                "token_exchange_failed"
            }
            Self::InvalidTokenPayload(_) => "invalid_token_payload",
            Self::Hook(_) => "hook_failed",
            Self::StateSeal(_) | Self::Crypto(_) | Self::InvalidEndpoint(_) => "auth_failed",
        }
    }
}

/// Payload sealed into the OAuth state cookie at sign-in start
///
/// Consumed exactly once at the callback; never persisted server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthStatePayload {
    pub state: String,
    pub code_verifier: String,
    pub redirect_to: String,
    pub provider_id: String,
}

/// Query parameters a provider sends to the callback endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Result of starting an OAuth sign-in
///
/// The host stores `state_token` in a short-lived cookie and redirects the
/// user-agent to `authorization_url`.
#[derive(Debug, Clone)]
pub struct SignInStart {
    pub authorization_url: String,
    pub state_token: String,
}

/// Begin an OAuth sign-in: mint state + verifier, seal the state payload,
/// build the authorization URL
///
/// The `state` parameter on the URL is the raw random value that
/// round-trips through the provider; the sealed token carrying it (plus the
/// PKCE verifier) never leaves the first-party cookie.
///
/// # Errors
///
/// Returns [`OAuthError::Crypto`] on entropy failure (fatal, not retried),
/// [`OAuthError::StateSeal`] if the payload cannot be sealed, and
/// [`OAuthError::InvalidEndpoint`] for an unparsable authorization endpoint.
pub fn start_sign_in(
    provider: &ProviderConfig,
    redirect_to: &str,
    secret: &[u8],
) -> Result<SignInStart, OAuthError> {
    let state = crypto::generate_state()?;
    let code_verifier = crypto::generate_code_verifier()?;
    let code_challenge = crypto::generate_code_challenge(&code_verifier);

    let payload = OAuthStatePayload {
        state: state.clone(),
        code_verifier,
        redirect_to: redirect_to.to_owned(),
        provider_id: provider.id.clone(),
    };
    let state_token = token::seal(&payload, secret, OAUTH_STATE_MAX_AGE_SECS)
        .map_err(OAuthError::StateSeal)?;

    let authorization_url = build_authorization_url(provider, &state, &code_challenge)?;

    log::debug!(
        "Started OAuth sign-in for provider {} (redirect_to: {redirect_to})",
        provider.id
    );

    Ok(SignInStart {
        authorization_url,
        state_token,
    })
}

fn build_authorization_url(
    provider: &ProviderConfig,
    state: &str,
    code_challenge: &str,
) -> Result<String, OAuthError> {
    let mut url = Url::parse(&provider.authorization_endpoint)
        .map_err(|e| OAuthError::InvalidEndpoint(e.to_string()))?;

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &provider.client_id)
        .append_pair("redirect_uri", &provider.redirect_uri)
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("scope", &provider.scopes.join(" "))
        .append_pair("prompt", &provider.prompt);

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthProviderSettings;
    use crate::crypto::generate_code_challenge;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn google() -> ProviderConfig {
        ProviderConfig::from_settings(&OAuthProviderSettings {
            name: "google".to_owned(),
            client_id: Some("cid".to_owned()),
            client_secret: Some("cs".to_owned()),
            redirect_uri: Some("https://app.example.com/api/auth/callback".to_owned()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn authorization_url_carries_pkce_parameters() {
        let start = start_sign_in(&google(), "/dashboard", SECRET).unwrap();
        let url = Url::parse(&start.authorization_url).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "cid");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["scope"], "openid email profile");
        assert_eq!(pairs["prompt"], "select_account");
        assert!(!pairs["state"].is_empty());
        assert!(!pairs["code_challenge"].is_empty());
    }

    #[test]
    fn state_token_decrypts_to_the_bound_flow() {
        let start = start_sign_in(&google(), "/dashboard", SECRET).unwrap();
        let payload: OAuthStatePayload = token::open(&start.state_token, SECRET).unwrap();

        assert_eq!(payload.provider_id, "google");
        assert_eq!(payload.redirect_to, "/dashboard");

        // The URL state is the raw value inside the sealed payload, and the
        // challenge on the URL derives from the sealed verifier.
        let url = Url::parse(&start.authorization_url).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["state"], payload.state);
        assert_eq!(
            pairs["code_challenge"],
            generate_code_challenge(&payload.code_verifier)
        );
    }

    #[test]
    fn each_sign_in_uses_fresh_state() {
        let a = start_sign_in(&google(), "/", SECRET).unwrap();
        let b = start_sign_in(&google(), "/", SECRET).unwrap();
        let pa: OAuthStatePayload = token::open(&a.state_token, SECRET).unwrap();
        let pb: OAuthStatePayload = token::open(&b.state_token, SECRET).unwrap();
        assert_ne!(pa.state, pb.state);
        assert_ne!(pa.code_verifier, pb.code_verifier);
    }
}
