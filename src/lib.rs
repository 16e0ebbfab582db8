//! gatekey — an embeddable authentication core
//!
//! Two credential paths, one session model: OAuth2 Authorization Code with
//! PKCE and email/password sign-up with mandatory verification, both
//! ending in a stateless AES-256-GCM-encrypted session token the host
//! stores in a cookie. There is no server-side session table; possession
//! of a token that opens is the whole authentication state.
//!
//! The host wires the core into its framework through small async traits
//! ([`host::CookieStore`], [`host::Redirector`], [`host::UserRepository`],
//! [`host::EmailSender`]) and drives the flows through [`AuthCore`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatekey::{AuthConfig, AuthCore};
//! use gatekey::config::OAuthProviderSettings;
//!
//! # fn main() -> Result<(), gatekey::AuthError> {
//! let config = AuthConfig::new(
//!     std::env::var("SESSION_SECRET").unwrap_or_default().into_bytes(),
//!     "https://app.example.com",
//! )
//! .with_provider(OAuthProviderSettings {
//!     name: "google".into(),
//!     client_id_env: Some("GOOGLE_CLIENT_ID".into()),
//!     client_secret_env: Some("GOOGLE_CLIENT_SECRET".into()),
//!     redirect_uri: Some("https://app.example.com/api/auth/callback".into()),
//!     ..Default::default()
//! });
//! let core = AuthCore::builder(config).build()?;
//! # let _ = core;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod core;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod host;
pub mod oauth;
pub mod registry;
pub mod session;
pub mod token;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{AuthConfig, ConfigError};
pub use self::core::{AuthCore, AuthCoreBuilder, Credentials, SignInOptions};
pub use credential::CredentialError;
pub use error::AuthError;
pub use host::{AuthEvents, CookieStore, EmailSender, Redirector, UserRepository};
pub use oauth::{OAuthCallback, OAuthError};
pub use session::{SessionManager, UserSessionPayload};
pub use token::TokenError;

/// Crate version, for hosts that surface it in diagnostics
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
