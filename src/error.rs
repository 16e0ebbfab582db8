//! Umbrella error for the facade surface
//!
//! Each subsystem keeps its own closed taxonomy; [`AuthError`] wraps them
//! for hosts that want one type at the boundary. `tag()` yields the stable
//! URL-safe identifier appended to error redirects, and `user_message()`
//! yields text safe to show to the user — account-lookup and
//! password failures share one message so responses cannot be used to
//! probe which addresses are registered.

use thiserror::Error;

use crate::config::ConfigError;
use crate::credential::CredentialError;
use crate::oauth::OAuthError;
use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The named provider is not in the registry. Lives here, not in a
    /// per-provider taxonomy: the lookup fails before any provider kind
    /// is known.
    #[error("provider `{0}` is not configured")]
    ProviderNotConfigured(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    OAuth(#[from] OAuthError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("authentication hook failed: {0}")]
    Hook(String),
    #[error("host collaborator failed: {0}")]
    Host(String),
}

impl AuthError {
    /// Stable, URL-safe tag for `?error=` query parameters
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ProviderNotConfigured(_) => "provider_not_configured",
            Self::Config(_) => "configuration_error",
            Self::OAuth(e) => e.tag(),
            Self::Credential(e) => e.tag(),
            Self::Token(_) => "invalid_token",
            Self::Hook(_) => "hook_failed",
            Self::Host(_) => "auth_failed",
        }
    }

    /// Text safe to show to an end user
    ///
    /// Deliberately coarser than the error itself; the full detail goes to
    /// logs only.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ProviderNotConfigured(_) | Self::Config(_) => {
                "Authentication is not configured correctly."
            }
            Self::OAuth(_) => "Sign-in could not be completed. Please try again.",
            Self::Credential(e) => match e {
                CredentialError::AccountNotFound | CredentialError::InvalidCredentials => {
                    "Incorrect email or password."
                }
                CredentialError::EmailNotVerified => {
                    "Please verify your email address before signing in."
                }
                CredentialError::VerificationSessionMissing
                | CredentialError::VerificationTokenInvalid(_)
                | CredentialError::VerificationTokenMismatch => {
                    "This verification link is invalid or has expired."
                }
                CredentialError::ResetSessionMissing
                | CredentialError::ResetTokenInvalid(_)
                | CredentialError::ResetTokenMismatch => {
                    "This password reset link is invalid or has expired."
                }
                CredentialError::EmailSend(_) => {
                    "The verification email could not be sent. Please try again."
                }
                _ => "Sign-in could not be completed. Please try again.",
            },
            Self::Token(_) => "Your session is invalid or has expired.",
            Self::Hook(_) | Self::Host(_) => {
                "Sign-in could not be completed. Please try again."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_password_failures_are_indistinguishable() {
        let not_found = AuthError::from(CredentialError::AccountNotFound);
        let bad_password = AuthError::from(CredentialError::InvalidCredentials);
        assert_eq!(not_found.tag(), bad_password.tag());
        assert_eq!(not_found.user_message(), bad_password.user_message());
    }

    #[test]
    fn tags_are_url_safe() {
        let errors = [
            AuthError::from(CredentialError::EmailNotVerified),
            AuthError::from(OAuthError::StateMismatch),
            AuthError::from(OAuthError::MissingAuthorizationCode),
            AuthError::from(TokenError::Invalid("expired")),
        ];
        for error in errors {
            assert!(error
                .tag()
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
