//! Provider endpoint configuration
//!
//! Google and Microsoft carry built-in endpoint defaults; any other
//! provider works too, as long as its settings spell out the endpoints
//! explicitly. Resolution happens once at startup, so a half-configured
//! provider is a [`ConfigError`] before the first request.

use crate::config::{ConfigError, OAuthProviderSettings};

/// Built-in endpoint defaults for a known provider
struct BuiltinDefaults {
    authorization_endpoint: &'static str,
    token_endpoint: &'static str,
    issuer: &'static str,
    scopes: &'static [&'static str],
}

fn builtin_defaults(name: &str) -> Option<BuiltinDefaults> {
    match name {
        "google" => Some(BuiltinDefaults {
            authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth",
            token_endpoint: "https://oauth2.googleapis.com/token",
            issuer: "https://accounts.google.com",
            scopes: &["openid", "email", "profile"],
        }),
        "microsoft" => Some(BuiltinDefaults {
            authorization_endpoint:
                "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
            token_endpoint: "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            issuer: "https://login.microsoftonline.com/common/v2.0",
            scopes: &["openid", "email", "profile"],
        }),
        _ => None,
    }
}

/// A fully resolved OAuth provider, ready to serve sign-ins
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    /// Expected `iss` claim; identity tokens are rejected on mismatch.
    /// `None` skips the check for providers without a stable issuer.
    pub issuer: Option<String>,
    pub scopes: Vec<String>,
    pub prompt: String,
}

impl ProviderConfig {
    /// Resolve host settings (plus built-in defaults) into a usable provider
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingProviderField`] for an absent client
    /// id, client secret, or redirect URI,
    /// [`ConfigError::MissingEnvVar`] for a broken env indirection, and
    /// [`ConfigError::UnknownProvider`] when a provider without built-in
    /// defaults omits its endpoints.
    pub fn from_settings(settings: &OAuthProviderSettings) -> Result<Self, ConfigError> {
        let defaults = builtin_defaults(&settings.name);

        let client_id = settings.resolve_client_id()?.ok_or_else(|| {
            ConfigError::MissingProviderField {
                provider: settings.name.clone(),
                field: "client_id",
            }
        })?;
        let client_secret = settings.resolve_client_secret()?.ok_or_else(|| {
            ConfigError::MissingProviderField {
                provider: settings.name.clone(),
                field: "client_secret",
            }
        })?;
        let redirect_uri = settings.redirect_uri.clone().ok_or_else(|| {
            ConfigError::MissingProviderField {
                provider: settings.name.clone(),
                field: "redirect_uri",
            }
        })?;

        let authorization_endpoint = settings
            .authorization_endpoint
            .clone()
            .or_else(|| defaults.as_ref().map(|d| d.authorization_endpoint.to_owned()))
            .ok_or_else(|| ConfigError::UnknownProvider(settings.name.clone()))?;
        let token_endpoint = settings
            .token_endpoint
            .clone()
            .or_else(|| defaults.as_ref().map(|d| d.token_endpoint.to_owned()))
            .ok_or_else(|| ConfigError::UnknownProvider(settings.name.clone()))?;

        let issuer = settings
            .issuer
            .clone()
            .or_else(|| defaults.as_ref().map(|d| d.issuer.to_owned()));
        let scopes = settings.scopes.clone().unwrap_or_else(|| {
            defaults
                .as_ref()
                .map_or_else(|| vec!["openid".to_owned()], |d| {
                    d.scopes.iter().map(|&s| s.to_owned()).collect()
                })
        });
        let prompt = settings
            .prompt
            .clone()
            .unwrap_or_else(|| "select_account".to_owned());

        Ok(Self {
            id: settings.name.clone(),
            client_id,
            client_secret,
            redirect_uri,
            authorization_endpoint,
            token_endpoint,
            issuer,
            scopes,
            prompt,
        })
    }
}
