//! Email/password authentication with mandatory email verification
//!
//! Sign-up persists an unverified account and mails a verification link.
//! The link carries a raw random token in the URL; its sealed counterpart
//! (together with the email it is bound to) lives in a short-lived cookie,
//! so verification requires both the mailbox and the browser that started
//! the sign-up. The two tokens are compared in constant time.
//!
//! Sign-in refuses unverified accounts. Lookup and password failures share
//! one user-facing message so responses cannot be used to enumerate
//! registered addresses; the distinct variants below exist for logs and
//! host observability only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::CredentialSettings;
use crate::crypto::{self, password, CryptoError};
use crate::host::{Account, EmailSender, NewAccount, UserRepository};
use crate::token::{self, TokenError};

/// Lifetime of the sealed verification cookie: one hour
pub const EMAIL_VERIFICATION_MAX_AGE_SECS: i64 = 3600;

/// Lifetime of the sealed password-reset cookie: one hour
pub const PASSWORD_RESET_MAX_AGE_SECS: i64 = 3600;

/// Entropy of the raw verification and reset tokens carried in emailed URLs
pub const VERIFICATION_TOKEN_BYTES: usize = 32;

/// Credential flow errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no account for that email")]
    AccountNotFound,
    #[error("password does not match")]
    InvalidCredentials,
    #[error("email address has not been verified")]
    EmailNotVerified,
    #[error("password hashing failed: {0}")]
    PasswordHashing(String),
    #[error("stored password hash is malformed: {0}")]
    InvalidHashFormat(String),
    #[error("repository failure: {0}")]
    Persistence(String),
    #[error("could not generate verification token: {0}")]
    TokenGeneration(String),
    #[error("verification email could not be sent: {0}")]
    EmailSend(String),
    #[error("no verification session accompanied the request")]
    VerificationSessionMissing,
    #[error("verification session token failed to open: {0}")]
    VerificationTokenInvalid(TokenError),
    #[error("verification token does not match")]
    VerificationTokenMismatch,
    #[error("no password-reset session accompanied the request")]
    ResetSessionMissing,
    #[error("password-reset session token failed to open: {0}")]
    ResetTokenInvalid(TokenError),
    #[error("password-reset token does not match")]
    ResetTokenMismatch,
}

impl CredentialError {
    /// Stable, URL-safe tag for `?error=` query parameters
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AccountNotFound | Self::InvalidCredentials => "invalid_credentials",
            Self::EmailNotVerified => "email_not_verified",
            Self::PasswordHashing(_) | Self::InvalidHashFormat(_) => "password_error",
            Self::Persistence(_) => "persistence_error",
            Self::TokenGeneration(_) => "auth_failed",
            Self::EmailSend(_) => "email_send_failed",
            Self::VerificationSessionMissing
            | Self::VerificationTokenInvalid(_)
            | Self::VerificationTokenMismatch => "verification_failed",
            Self::ResetSessionMissing
            | Self::ResetTokenInvalid(_)
            | Self::ResetTokenMismatch => "reset_failed",
        }
    }
}

impl From<password::PasswordError> for CredentialError {
    fn from(e: password::PasswordError) -> Self {
        match e {
            password::PasswordError::InvalidHashFormat(msg) => Self::InvalidHashFormat(msg),
            password::PasswordError::Hashing(msg) => Self::PasswordHashing(msg),
        }
    }
}

impl From<CryptoError> for CredentialError {
    fn from(e: CryptoError) -> Self {
        Self::TokenGeneration(e.to_string())
    }
}

/// Payload sealed into the email-verification cookie
///
/// Binds the raw emailed token to the email being verified; consumed once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailVerificationPayload {
    pub email: String,
    pub pending_password_hash: String,
    pub token: String,
}

/// Payload sealed into the password-reset cookie
///
/// Same cookie + URL-token split as verification: resetting requires both
/// the mailbox and the browser that asked for the reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetPayload {
    pub email: String,
    pub token: String,
}

/// Result of a sign-up or a verification resend
///
/// The host stores `state_token` in a short-lived cookie; the raw token is
/// already embedded in `verification_url`, which went out by email.
#[derive(Debug, Clone)]
pub struct VerificationIssue {
    pub email: String,
    pub state_token: String,
    pub verification_url: String,
}

/// Outcome of a completed sign-up
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub account: Account,
    pub verification: VerificationIssue,
}

/// The email/password provider
pub struct CredentialProvider {
    repository: Arc<dyn UserRepository>,
    email_sender: Arc<dyn EmailSender>,
    secret: Vec<u8>,
    base_url: String,
    settings: CredentialSettings,
}

impl CredentialProvider {
    #[must_use]
    pub fn new(
        repository: Arc<dyn UserRepository>,
        email_sender: Arc<dyn EmailSender>,
        secret: Vec<u8>,
        base_url: String,
        settings: CredentialSettings,
    ) -> Self {
        Self {
            repository,
            email_sender,
            secret,
            base_url,
            settings,
        }
    }

    /// Create an unverified account and send the verification email
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::PasswordHashing`] if the password cannot
    /// be hashed, [`CredentialError::Persistence`] if the repository refuses
    /// the account, and [`CredentialError::TokenGeneration`] /
    /// [`CredentialError::EmailSend`] from issuing the verification email.
    pub async fn sign_up(
        &self,
        email: &str,
        plain_password: &str,
        extra: Map<String, Value>,
    ) -> Result<SignUpOutcome, CredentialError> {
        let password_hash = password::hash_password(plain_password)?;

        let account = self
            .repository
            .create_account(NewAccount {
                email: email.to_owned(),
                password_hash: password_hash.clone(),
                extra,
            })
            .await
            .map_err(|e| CredentialError::Persistence(e.to_string()))?;

        let verification = self.issue_verification(email, &password_hash).await?;
        log::info!("Credential sign-up completed, verification email queued");
        Ok(SignUpOutcome {
            account,
            verification,
        })
    }

    /// Authenticate an email/password pair against the repository
    ///
    /// # Errors
    ///
    /// [`CredentialError::AccountNotFound`] and
    /// [`CredentialError::InvalidCredentials`] share one user-facing
    /// message; [`CredentialError::EmailNotVerified`] is returned for a
    /// correct password on an unverified account.
    pub async fn sign_in(
        &self,
        email: &str,
        plain_password: &str,
    ) -> Result<Account, CredentialError> {
        let account = self
            .repository
            .find_by_email(email)
            .await
            .map_err(|e| CredentialError::Persistence(e.to_string()))?
            .ok_or(CredentialError::AccountNotFound)?;

        let stored_hash = account
            .password_hash
            .as_deref()
            .ok_or(CredentialError::InvalidCredentials)?;

        if !password::verify_password(plain_password, stored_hash)? {
            return Err(CredentialError::InvalidCredentials);
        }
        if !account.email_verified {
            return Err(CredentialError::EmailNotVerified);
        }

        Ok(account)
    }

    /// Complete verification: open the sealed session, compare the URL
    /// token in constant time, mark the email verified
    ///
    /// Returns the verified email address.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::VerificationSessionMissing`] without a
    /// cookie, [`CredentialError::VerificationTokenInvalid`] if it does not
    /// open, and [`CredentialError::VerificationTokenMismatch`] when the
    /// URL token differs from the sealed one.
    pub async fn verify_email(
        &self,
        state_token: Option<&str>,
        url_token: &str,
    ) -> Result<String, CredentialError> {
        let state_token = state_token.ok_or(CredentialError::VerificationSessionMissing)?;
        let payload: EmailVerificationPayload = token::open(state_token, &self.secret)
            .map_err(CredentialError::VerificationTokenInvalid)?;

        // A length mismatch already rules the tokens out; no compare needed
        let matches =
            crypto::constant_time_compare(payload.token.as_bytes(), url_token.as_bytes())
                .unwrap_or(false);
        if !matches {
            log::warn!("Email verification token mismatch");
            return Err(CredentialError::VerificationTokenMismatch);
        }

        self.repository
            .mark_email_verified(&payload.email)
            .await
            .map_err(|e| CredentialError::Persistence(e.to_string()))?;

        // Record the credential linkage on the account, now that the
        // address is proven
        if let Some(account) = self
            .repository
            .find_by_email(&payload.email)
            .await
            .map_err(|e| CredentialError::Persistence(e.to_string()))?
        {
            self.repository
                .link_provider(&account.id, crate::registry::CREDENTIAL_PROVIDER_ID, &Map::new())
                .await
                .map_err(|e| CredentialError::Persistence(e.to_string()))?;
        }

        log::info!("Email address verified");
        Ok(payload.email)
    }

    /// Issue a fresh verification email for an existing unverified account
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::AccountNotFound`] for an unknown email
    /// and passes through token/email failures. Verifying an
    /// already-verified account is not an error; a fresh link is sent and
    /// verification is simply a no-op.
    pub async fn resend_verification(
        &self,
        email: &str,
    ) -> Result<VerificationIssue, CredentialError> {
        let account = self
            .repository
            .find_by_email(email)
            .await
            .map_err(|e| CredentialError::Persistence(e.to_string()))?
            .ok_or(CredentialError::AccountNotFound)?;

        let pending_hash = account.password_hash.unwrap_or_default();
        self.issue_verification(&account.email, &pending_hash).await
    }

    /// Begin a password reset: mail a reset link for an existing account
    ///
    /// Like sign-up verification, the raw token travels in the URL and its
    /// sealed counterpart in a one-hour cookie.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::AccountNotFound`] for an unknown email
    /// and passes through token/email failures. Whether the facade reveals
    /// the not-found case to the user is its decision, not made here.
    pub async fn request_password_reset(
        &self,
        email: &str,
    ) -> Result<VerificationIssue, CredentialError> {
        let account = self
            .repository
            .find_by_email(email)
            .await
            .map_err(|e| CredentialError::Persistence(e.to_string()))?
            .ok_or(CredentialError::AccountNotFound)?;

        let raw_token = crypto::generate_random_token(VERIFICATION_TOKEN_BYTES)?;
        let payload = PasswordResetPayload {
            email: account.email.clone(),
            token: raw_token.clone(),
        };
        let state_token = token::seal(&payload, &self.secret, PASSWORD_RESET_MAX_AGE_SECS)
            .map_err(|e| CredentialError::TokenGeneration(e.to_string()))?;

        let reset_url = self.emailed_url(&self.settings.reset_path, &raw_token);
        let body = reset_email_body(&reset_url);
        self.email_sender
            .send(&account.email, &self.settings.reset_subject, &body)
            .await
            .map_err(|e| CredentialError::EmailSend(e.to_string()))?;

        log::info!("Password reset email queued");
        Ok(VerificationIssue {
            email: account.email,
            state_token,
            verification_url: reset_url,
        })
    }

    /// Complete a password reset: compare tokens in constant time, hash the
    /// replacement password, store it
    ///
    /// Returns the email whose password changed.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::ResetSessionMissing`] without a cookie,
    /// [`CredentialError::ResetTokenInvalid`] if it does not open,
    /// [`CredentialError::ResetTokenMismatch`] when the URL token differs
    /// from the sealed one, and hashing/persistence errors past that.
    pub async fn complete_password_reset(
        &self,
        state_token: Option<&str>,
        url_token: &str,
        new_password: &str,
    ) -> Result<String, CredentialError> {
        let state_token = state_token.ok_or(CredentialError::ResetSessionMissing)?;
        let payload: PasswordResetPayload = token::open(state_token, &self.secret)
            .map_err(CredentialError::ResetTokenInvalid)?;

        let matches =
            crypto::constant_time_compare(payload.token.as_bytes(), url_token.as_bytes())
                .unwrap_or(false);
        if !matches {
            log::warn!("Password reset token mismatch");
            return Err(CredentialError::ResetTokenMismatch);
        }

        let password_hash = password::hash_password(new_password)?;
        self.repository
            .change_password(&payload.email, &password_hash)
            .await
            .map_err(|e| CredentialError::Persistence(e.to_string()))?;

        log::info!("Password changed via reset flow");
        Ok(payload.email)
    }

    async fn issue_verification(
        &self,
        email: &str,
        pending_password_hash: &str,
    ) -> Result<VerificationIssue, CredentialError> {
        let raw_token = crypto::generate_random_token(VERIFICATION_TOKEN_BYTES)?;

        let payload = EmailVerificationPayload {
            email: email.to_owned(),
            pending_password_hash: pending_password_hash.to_owned(),
            token: raw_token.clone(),
        };
        let state_token = token::seal(&payload, &self.secret, EMAIL_VERIFICATION_MAX_AGE_SECS)
            .map_err(|e| CredentialError::TokenGeneration(e.to_string()))?;

        let verification_url = self.emailed_url(&self.settings.verification_path, &raw_token);
        let body = verification_email_body(&verification_url);
        self.email_sender
            .send(email, &self.settings.verification_subject, &body)
            .await
            .map_err(|e| CredentialError::EmailSend(e.to_string()))?;

        Ok(VerificationIssue {
            email: email.to_owned(),
            state_token,
            verification_url,
        })
    }

    fn emailed_url(&self, path: &str, raw_token: &str) -> String {
        format!(
            "{}{}?token={}",
            self.base_url.trim_end_matches('/'),
            path,
            urlencoding::encode(raw_token)
        )
    }
}

fn verification_email_body(verification_url: &str) -> String {
    format!(
        "<p>Confirm your email address by opening the link below.</p>\
         <p><a href=\"{verification_url}\">Verify email</a></p>\
         <p>If you did not request this, you can ignore this message.</p>"
    )
}

fn reset_email_body(reset_url: &str) -> String {
    format!(
        "<p>Reset your password by opening the link below.</p>\
         <p><a href=\"{reset_url}\">Reset password</a></p>\
         <p>If you did not request this, you can ignore this message and \
         your password will stay unchanged.</p>"
    )
}
