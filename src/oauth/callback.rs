//! OAuth callback processing
//!
//! The callback runs as an ordered sequence of fallible steps, each
//! short-circuiting to its own tagged [`OAuthError`]:
//!
//! 1. provider `error` parameter → [`OAuthError::ProviderReturnedError`]
//! 2. extract `code` / `state` → `MissingAuthorizationCode` / `MissingState`
//! 3. open the stored state token → `MissingStateCookie` / `InvalidStateToken`
//! 4. compare URL state against the sealed state → `StateMismatch`
//! 5. exchange code + verifier at the token endpoint → `TokenFetch` /
//!    `TokenResponse` / `TokenParse`
//! 6. locally decode and validate the identity token → `InvalidTokenPayload`
//!
//! Steps 1–4 are [`validate_state`]; steps 5–6 are [`complete`], split so
//! the facade can resolve the provider from the opened state payload in
//! between. A state mismatch is treated as a potential CSRF attempt: the
//! flow aborts and the token exchange is never reached.
//!
//! The identity token is parsed locally and deliberately not re-verified
//! against the provider's signing keys — it arrived over the authenticated
//! direct channel the exchange in step 5 established.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::provider::ProviderConfig;
use super::{OAuthCallback, OAuthError, OAuthStatePayload};
use crate::token;

/// Token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
}

/// Identity claims decoded from the provider's id token
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: String,
    /// String or array of strings, depending on the provider
    pub aud: Value,
    pub exp: i64,
    pub iat: Option<i64>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

impl IdTokenClaims {
    /// Default session fields derived from the claims; used when the host
    /// registers no `on_authenticated` hook
    #[must_use]
    pub fn session_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("sub".to_owned(), Value::String(self.sub.clone()));
        if let Some(email) = &self.email {
            fields.insert("email".to_owned(), Value::String(email.clone()));
        }
        if let Some(name) = &self.name {
            fields.insert("name".to_owned(), Value::String(name.clone()));
        }
        if let Some(picture) = &self.picture {
            fields.insert("picture".to_owned(), Value::String(picture.clone()));
        }
        fields
    }

    fn audience_matches(&self, client_id: &str) -> bool {
        match &self.aud {
            Value::String(aud) => aud == client_id,
            Value::Array(auds) => auds.iter().any(|a| a.as_str() == Some(client_id)),
            _ => false,
        }
    }
}

/// Performs the code-for-tokens exchange with the provider
///
/// A trait so tests can drive the full callback path without a live token
/// endpoint; production uses [`HttpCodeExchanger`].
#[async_trait]
pub trait CodeExchanger: Send + Sync {
    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, OAuthError>;
}

/// Production exchanger: POSTs to the provider's token endpoint over HTTPS
pub struct HttpCodeExchanger {
    client: reqwest::Client,
}

impl HttpCodeExchanger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpCodeExchanger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeExchanger for HttpCodeExchanger {
    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, OAuthError> {
        let credentials = encode_client_credentials(&provider.client_id, &provider.client_secret);

        let response = self
            .client
            .post(&provider.token_endpoint)
            .header("Authorization", format!("Basic {credentials}"))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("client_id", &provider.client_id),
                ("redirect_uri", &provider.redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::TokenFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::TokenResponse {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_owned(),
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| OAuthError::TokenParse(e.to_string()))
    }
}

/// HTTP Basic credentials for the token endpoint: base64url of
/// `client_id:client_secret`
#[must_use]
pub fn encode_client_credentials(client_id: &str, client_secret: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(format!("{client_id}:{client_secret}"))
}

/// Steps 1–4: callback parameter checks, state-token open, state comparison
///
/// Decrypt-then-compare: the stored token is opened first, and the URL
/// `state` is compared against the sealed value. The comparison is plain
/// equality — `state` is not a secret whose comparison must be disguised —
/// but any difference aborts the flow as a potential CSRF attempt.
///
/// # Errors
///
/// See the module docs for the per-step error tags.
pub fn validate_state(
    callback: &OAuthCallback,
    state_token: Option<&str>,
    secret: &[u8],
) -> Result<(String, OAuthStatePayload), OAuthError> {
    if let Some(error) = &callback.error {
        log::error!("OAuth provider returned an error on callback: {error}");
        return Err(OAuthError::ProviderReturnedError(error.clone()));
    }

    let code = callback
        .code
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or(OAuthError::MissingAuthorizationCode)?;
    let url_state = callback
        .state
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(OAuthError::MissingState)?;

    let state_token = state_token.ok_or(OAuthError::MissingStateCookie)?;
    let payload: OAuthStatePayload =
        token::open(state_token, secret).map_err(|e| {
            log::error!("OAuth state token failed to open: {e}");
            OAuthError::InvalidStateToken(e)
        })?;

    if payload.state != url_state {
        log::error!(
            "OAuth state mismatch for provider {} - aborting callback",
            payload.provider_id
        );
        return Err(OAuthError::StateMismatch);
    }

    Ok((code.to_owned(), payload))
}

/// Steps 5–6: exchange the code and decode/validate the identity claims
///
/// # Errors
///
/// Returns the exchange errors from the [`CodeExchanger`] and
/// [`OAuthError::InvalidTokenPayload`] for a missing, undecodable, or
/// structurally invalid identity token.
pub async fn complete(
    provider: &ProviderConfig,
    code: &str,
    state_payload: &OAuthStatePayload,
    exchanger: &dyn CodeExchanger,
) -> Result<IdTokenClaims, OAuthError> {
    let tokens = exchanger
        .exchange(provider, code, &state_payload.code_verifier)
        .await?;

    let id_token = tokens.id_token.as_deref().ok_or_else(|| {
        OAuthError::InvalidTokenPayload("token response carried no id_token".to_owned())
    })?;

    let claims = decode_id_token(id_token)?;
    validate_claims(&claims, provider)?;

    log::debug!(
        "OAuth callback completed for provider {} (subject present)",
        provider.id
    );
    Ok(claims)
}

/// Decode the payload segment of a compact JWS without verifying the
/// signature
///
/// # Errors
///
/// Returns [`OAuthError::InvalidTokenPayload`] if the token is not three
/// dot-separated segments of base64 JSON.
pub fn decode_id_token(id_token: &str) -> Result<IdTokenClaims, OAuthError> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(OAuthError::InvalidTokenPayload(
            "identity token is not a compact JWS".to_owned(),
        ));
    }

    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1])
        .or_else(|_| general_purpose::STANDARD.decode(parts[1]))
        .map_err(|_| {
            OAuthError::InvalidTokenPayload("identity token payload is not base64".to_owned())
        })?;

    serde_json::from_slice(&payload_bytes)
        .map_err(|e| OAuthError::InvalidTokenPayload(e.to_string()))
}

fn validate_claims(claims: &IdTokenClaims, provider: &ProviderConfig) -> Result<(), OAuthError> {
    if claims.sub.is_empty() {
        return Err(OAuthError::InvalidTokenPayload(
            "empty subject claim".to_owned(),
        ));
    }
    if let Some(issuer) = &provider.issuer {
        if &claims.iss != issuer {
            return Err(OAuthError::InvalidTokenPayload(format!(
                "issuer `{}` does not match expected `{issuer}`",
                claims.iss
            )));
        }
    }
    if !claims.audience_matches(&provider.client_id) {
        return Err(OAuthError::InvalidTokenPayload(
            "audience does not include this client".to_owned(),
        ));
    }
    if claims.exp <= Utc::now().timestamp() {
        return Err(OAuthError::InvalidTokenPayload(
            "identity token already expired".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthProviderSettings;
    use serde_json::json;

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

    fn sealed_state(state: &str) -> String {
        let payload = OAuthStatePayload {
            state: state.to_owned(),
            code_verifier: "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_owned(),
            redirect_to: "/dashboard".to_owned(),
            provider_id: "google".to_owned(),
        };
        crate::token::seal(&payload, SECRET, 600).unwrap()
    }

    fn callback(code: Option<&str>, state: Option<&str>) -> OAuthCallback {
        OAuthCallback {
            code: code.map(str::to_owned),
            state: state.map(str::to_owned),
            error: None,
        }
    }

    fn unsigned_jwt(payload: &Value) -> String {
        let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let body = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.sig")
    }

    #[test]
    fn matching_state_passes_validation() {
        let token = sealed_state("abc");
        let (code, payload) =
            validate_state(&callback(Some("auth-code"), Some("abc")), Some(&token), SECRET)
                .unwrap();
        assert_eq!(code, "auth-code");
        assert_eq!(payload.redirect_to, "/dashboard");
    }

    #[test]
    fn mismatched_state_is_rejected() {
        let token = sealed_state("abc");
        let err =
            validate_state(&callback(Some("auth-code"), Some("xyz")), Some(&token), SECRET)
                .unwrap_err();
        assert!(matches!(err, OAuthError::StateMismatch));
    }

    #[test]
    fn missing_parameters_map_to_distinct_tags() {
        let token = sealed_state("abc");
        assert!(matches!(
            validate_state(&callback(None, Some("abc")), Some(&token), SECRET),
            Err(OAuthError::MissingAuthorizationCode)
        ));
        assert!(matches!(
            validate_state(&callback(Some("c"), None), Some(&token), SECRET),
            Err(OAuthError::MissingState)
        ));
        assert!(matches!(
            validate_state(&callback(Some("c"), Some("abc")), None, SECRET),
            Err(OAuthError::MissingStateCookie)
        ));
    }

    #[test]
    fn provider_error_short_circuits_everything() {
        let cb = OAuthCallback {
            code: Some("c".to_owned()),
            state: Some("abc".to_owned()),
            error: Some("access_denied".to_owned()),
        };
        assert!(matches!(
            validate_state(&cb, None, SECRET),
            Err(OAuthError::ProviderReturnedError(_))
        ));
    }

    #[test]
    fn tampered_state_token_fails_to_open() {
        let err = validate_state(
            &callback(Some("c"), Some("abc")),
            Some("not-a-sealed-token"),
            SECRET,
        )
        .unwrap_err();
        assert!(matches!(err, OAuthError::InvalidStateToken(_)));
    }

    #[test]
    fn decode_id_token_reads_claims() {
        let jwt = unsigned_jwt(&json!({
            "sub": "user-123",
            "iss": "https://accounts.google.com",
            "aud": "cid",
            "exp": Utc::now().timestamp() + 3600,
            "email": "user@example.com",
        }));
        let claims = decode_id_token(&jwt).unwrap();
        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn decode_rejects_malformed_tokens() {
        assert!(decode_id_token("only.two").is_err());
        assert!(decode_id_token("a.!!!.c").is_err());
        let not_claims = format!(
            "h.{}.s",
            general_purpose::URL_SAFE_NO_PAD.encode(b"[1,2,3]")
        );
        assert!(decode_id_token(&not_claims).is_err());
    }

    #[test]
    fn claim_validation_checks_issuer_audience_expiry() {
        let provider = google();
        let good = decode_id_token(&unsigned_jwt(&json!({
            "sub": "u", "iss": "https://accounts.google.com", "aud": "cid",
            "exp": Utc::now().timestamp() + 60,
        })))
        .unwrap();
        assert!(validate_claims(&good, &provider).is_ok());

        let wrong_iss = decode_id_token(&unsigned_jwt(&json!({
            "sub": "u", "iss": "https://evil.example.com", "aud": "cid",
            "exp": Utc::now().timestamp() + 60,
        })))
        .unwrap();
        assert!(validate_claims(&wrong_iss, &provider).is_err());

        let wrong_aud = decode_id_token(&unsigned_jwt(&json!({
            "sub": "u", "iss": "https://accounts.google.com", "aud": "other",
            "exp": Utc::now().timestamp() + 60,
        })))
        .unwrap();
        assert!(validate_claims(&wrong_aud, &provider).is_err());

        let expired = decode_id_token(&unsigned_jwt(&json!({
            "sub": "u", "iss": "https://accounts.google.com", "aud": "cid",
            "exp": Utc::now().timestamp() - 60,
        })))
        .unwrap();
        assert!(validate_claims(&expired, &provider).is_err());
    }

    #[test]
    fn audience_array_is_accepted() {
        let provider = google();
        let claims = decode_id_token(&unsigned_jwt(&json!({
            "sub": "u", "iss": "https://accounts.google.com",
            "aud": ["other", "cid"],
            "exp": Utc::now().timestamp() + 60,
        })))
        .unwrap();
        assert!(validate_claims(&claims, &provider).is_ok());
    }

    #[test]
    fn client_credentials_use_base64url() {
        let encoded = encode_client_credentials("cid", "cs");
        let decoded = general_purpose::URL_SAFE_NO_PAD.decode(encoded).unwrap();
        assert_eq!(decoded, b"cid:cs");
    }
}
