//! Configuration for the authentication core
//!
//! Configuration is read-only after startup: [`AuthConfig::validate`] runs
//! once when the host constructs an [`crate::core::AuthCore`], and every
//! problem it finds is fatal there — a weak secret or a half-configured
//! provider must never surface at request time.
//!
//! Settings can be built programmatically or deserialized from TOML.
//! Secrets may be given inline or indirected through `*_env` fields naming
//! environment variables, which keeps credentials out of checked-in files.

use serde::Deserialize;
use thiserror::Error;

use crate::token::MIN_SECRET_BYTES;

/// Default session lifetime: seven days
pub const DEFAULT_SESSION_MAX_AGE_SECS: i64 = 604_800;

/// Default path the verification email links back to
pub const DEFAULT_VERIFICATION_PATH: &str = "/api/auth/verify-email";

/// Default path the password-reset email links back to
pub const DEFAULT_RESET_PATH: &str = "/api/auth/verify-password-reset";

/// Configuration errors — fatal at startup, never retried
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("session secret must be at least {MIN_SECRET_BYTES} bytes, got {actual}")]
    WeakSecret { actual: usize },
    #[error("provider `{provider}` is missing required setting `{field}`")]
    MissingProviderField {
        provider: String,
        field: &'static str,
    },
    #[error("provider `{0}` has no built-in endpoints; set authorization_endpoint and token_endpoint explicitly")]
    UnknownProvider(String),
    #[error("provider `{0}` is configured more than once")]
    DuplicateProvider(String),
    #[error("environment variable `{0}` is not set")]
    MissingEnvVar(String),
    #[error("could not parse configuration: {0}")]
    Parse(String),
    #[error("base_url must be an absolute http(s) URL, got `{0}`")]
    InvalidBaseUrl(String),
}

/// Per-provider OAuth settings as written by the host (or in TOML)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthProviderSettings {
    pub name: String,
    // Direct values (or indirect via *_env variables)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,
    pub redirect_uri: Option<String>,
    // Only needed for providers without built-in endpoint defaults
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub issuer: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub prompt: Option<String>,
}

impl OAuthProviderSettings {
    /// Resolve the client id from the direct value or the named env var
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if an env indirection names a
    /// variable that is not set.
    pub fn resolve_client_id(&self) -> Result<Option<String>, ConfigError> {
        resolve(self.client_id.as_deref(), self.client_id_env.as_deref())
    }

    /// Resolve the client secret from the direct value or the named env var
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if an env indirection names a
    /// variable that is not set.
    pub fn resolve_client_secret(&self) -> Result<Option<String>, ConfigError> {
        resolve(self.client_secret.as_deref(), self.client_secret_env.as_deref())
    }
}

fn resolve(direct: Option<&str>, env_name: Option<&str>) -> Result<Option<String>, ConfigError> {
    if let Some(value) = direct {
        return Ok(Some(value.to_owned()));
    }
    match env_name {
        Some(name) => std::env::var(name)
            .map(Some)
            .map_err(|_| ConfigError::MissingEnvVar(name.to_owned())),
        None => Ok(None),
    }
}

/// Settings for the email/password provider
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialSettings {
    /// Path appended to `base_url` in verification-email links
    #[serde(default = "default_verification_path")]
    pub verification_path: String,
    /// Subject line of the verification email
    #[serde(default = "default_verification_subject")]
    pub verification_subject: String,
    /// Path appended to `base_url` in password-reset links
    #[serde(default = "default_reset_path")]
    pub reset_path: String,
    /// Subject line of the password-reset email
    #[serde(default = "default_reset_subject")]
    pub reset_subject: String,
}

fn default_verification_path() -> String {
    DEFAULT_VERIFICATION_PATH.to_owned()
}

fn default_verification_subject() -> String {
    "Verify your email address".to_owned()
}

fn default_reset_path() -> String {
    DEFAULT_RESET_PATH.to_owned()
}

fn default_reset_subject() -> String {
    "Reset your password".to_owned()
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            verification_path: default_verification_path(),
            verification_subject: default_verification_subject(),
            reset_path: default_reset_path(),
            reset_subject: default_reset_subject(),
        }
    }
}

/// Top-level configuration owned by the host at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Raw session secret bytes; at least 32. In TOML this is the UTF-8 of
    /// the configured string (or of the env var named by `secret_env`).
    #[serde(default, with = "secret_bytes")]
    pub session_secret: Vec<u8>,
    #[serde(default)]
    pub secret_env: Option<String>,
    #[serde(default = "default_session_max_age")]
    pub session_max_age: i64,
    /// Absolute origin of the host application, e.g. `https://app.example.com`
    pub base_url: String,
    /// Production (HTTPS) contexts get `__Host-`-prefixed cookies
    #[serde(default = "default_true")]
    pub cookie_secure: bool,
    /// Where the user-agent lands after a sign-in without `redirect_to`
    #[serde(default = "default_redirect")]
    pub default_redirect: String,
    /// Where failed flows land; the error tag is appended as `?error=<tag>`
    #[serde(default = "default_error_path")]
    pub error_path: String,
    #[serde(default)]
    pub providers: Vec<OAuthProviderSettings>,
    #[serde(default)]
    pub credential: Option<CredentialSettings>,
}

fn default_session_max_age() -> i64 {
    DEFAULT_SESSION_MAX_AGE_SECS
}

fn default_true() -> bool {
    true
}

fn default_redirect() -> String {
    "/".to_owned()
}

fn default_error_path() -> String {
    "/auth/error".to_owned()
}

mod secret_bytes {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.map(String::into_bytes).unwrap_or_default())
    }
}

impl AuthConfig {
    /// Create a config with the given secret and host origin, all defaults
    /// otherwise
    #[must_use]
    pub fn new(session_secret: impl Into<Vec<u8>>, base_url: impl Into<String>) -> Self {
        Self {
            session_secret: session_secret.into(),
            secret_env: None,
            session_max_age: DEFAULT_SESSION_MAX_AGE_SECS,
            base_url: base_url.into(),
            cookie_secure: true,
            default_redirect: default_redirect(),
            error_path: default_error_path(),
            providers: Vec::new(),
            credential: None,
        }
    }

    /// Register an OAuth provider
    #[must_use]
    pub fn with_provider(mut self, provider: OAuthProviderSettings) -> Self {
        self.providers.push(provider);
        self
    }

    /// Enable the email/password provider
    #[must_use]
    pub fn with_credential_provider(mut self, settings: CredentialSettings) -> Self {
        self.credential = Some(settings);
        self
    }

    /// Override the session lifetime in seconds
    #[must_use]
    pub fn with_session_max_age(mut self, seconds: i64) -> Self {
        self.session_max_age = seconds;
        self
    }

    /// Mark the deployment as non-HTTPS (development): plain cookie names,
    /// no `Secure` flag
    #[must_use]
    pub fn insecure_dev(mut self) -> Self {
        self.cookie_secure = false;
        self
    }

    /// Parse a TOML document into a config
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::MissingEnvVar`] when `secret_env` names an unset
    /// variable.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            basic_toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.session_secret.is_empty() {
            if let Some(name) = config.secret_env.clone() {
                let value = std::env::var(&name)
                    .map_err(|_| ConfigError::MissingEnvVar(name))?;
                config.session_secret = value.into_bytes();
            }
        }
        Ok(config)
    }

    /// Validate the configuration; called once at startup
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found. All of these are fatal:
    /// the host must not start serving requests with a broken auth config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::WeakSecret {
                actual: self.session_secret.len(),
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
        }
        Ok(())
    }
}
