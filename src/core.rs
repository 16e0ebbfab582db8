//! The authentication facade
//!
//! [`AuthCore`] is an explicit value the host constructs at startup and
//! owns; there is no global singleton. Construction validates the config
//! and resolves every provider, so a misconfigured core never serves a
//! request.
//!
//! Every flow method drives the host's request-scoped collaborators
//! ([`CookieStore`], [`Redirector`]) in a fixed order. Browser-facing
//! flows (`sign_in`, `handle_oauth_callback`, `handle_verify_email`,
//! `sign_out`) always end in a redirect, including on failure, where the
//! user-agent lands on the configured error path with a stable
//! `?error=<tag>` parameter; the same error is also returned so the host
//! can observe it.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::AuthConfig;
use crate::credential::{
    SignUpOutcome, EMAIL_VERIFICATION_MAX_AGE_SECS, PASSWORD_RESET_MAX_AGE_SECS,
};
use crate::error::AuthError;
use crate::host::{
    email_verification_cookie_name, oauth_state_cookie_name, password_reset_cookie_name,
    session_cookie_name, AuthEvents, CookieOptions, CookieStore, DefaultAuthEvents, EmailSender,
    RedirectMode, Redirector, UserRepository,
};
use crate::oauth::callback::{CodeExchanger, HttpCodeExchanger};
use crate::oauth::{self, OAuthCallback, OAuthError, OAUTH_STATE_MAX_AGE_SECS};
use crate::registry::{ProviderRegistry, CREDENTIAL_PROVIDER_ID};
use crate::session::{SessionManager, UserSessionPayload};

/// Email/password pair for a credential sign-in
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Options for [`AuthCore::sign_in`]
#[derive(Debug, Clone, Default)]
pub struct SignInOptions {
    /// Where the user-agent lands after authentication; the configured
    /// default when absent
    pub redirect_to: Option<String>,
    /// Required for the credential provider, ignored by OAuth providers
    pub credentials: Option<Credentials>,
}

/// Builds an [`AuthCore`], wiring in the host's collaborators
pub struct AuthCoreBuilder {
    config: AuthConfig,
    repository: Option<Arc<dyn UserRepository>>,
    email_sender: Option<Arc<dyn EmailSender>>,
    events: Option<Arc<dyn AuthEvents>>,
    exchanger: Option<Arc<dyn CodeExchanger>>,
}

impl AuthCoreBuilder {
    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn UserRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn email_sender(mut self, email_sender: Arc<dyn EmailSender>) -> Self {
        self.email_sender = Some(email_sender);
        self
    }

    #[must_use]
    pub fn events(mut self, events: Arc<dyn AuthEvents>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn exchanger(mut self, exchanger: Arc<dyn CodeExchanger>) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    /// Validate the config, resolve the providers, and build the core
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] for a weak secret, a broken base URL,
    /// or an unresolvable provider. All fatal; the host must not serve
    /// requests without a valid core.
    pub fn build(self) -> Result<AuthCore, AuthError> {
        self.config.validate()?;
        let registry =
            ProviderRegistry::from_config(&self.config, self.repository, self.email_sender)?;
        let sessions = SessionManager::new(
            self.config.session_secret.clone(),
            self.config.session_max_age,
        );
        Ok(AuthCore {
            config: self.config,
            registry,
            sessions,
            events: self.events.unwrap_or_else(|| Arc::new(DefaultAuthEvents)),
            exchanger: self
                .exchanger
                .unwrap_or_else(|| Arc::new(HttpCodeExchanger::new())),
        })
    }
}

/// The authentication core
pub struct AuthCore {
    config: AuthConfig,
    registry: ProviderRegistry,
    sessions: SessionManager,
    events: Arc<dyn AuthEvents>,
    exchanger: Arc<dyn CodeExchanger>,
}

impl AuthCore {
    #[must_use]
    pub fn builder(config: AuthConfig) -> AuthCoreBuilder {
        AuthCoreBuilder {
            config,
            repository: None,
            email_sender: None,
            events: None,
            exchanger: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Begin a sign-in with the named provider
    ///
    /// OAuth providers get a sealed state cookie and a redirect to the
    /// authorization endpoint. The credential provider authenticates the
    /// supplied email/password pair and, on success, sets the session
    /// cookie and redirects to the requested destination.
    ///
    /// # Errors
    ///
    /// Any failure redirects to the error path with the error's tag and is
    /// also returned.
    pub async fn sign_in(
        &self,
        cookies: &mut dyn CookieStore,
        redirector: &mut dyn Redirector,
        provider_id: &str,
        options: SignInOptions,
    ) -> Result<(), AuthError> {
        let result = self.sign_in_inner(cookies, redirector, provider_id, options).await;
        if let Err(error) = &result {
            self.redirect_with_error(redirector, error, RedirectMode::Push)
                .await;
        }
        result
    }

    async fn sign_in_inner(
        &self,
        cookies: &mut dyn CookieStore,
        redirector: &mut dyn Redirector,
        provider_id: &str,
        options: SignInOptions,
    ) -> Result<(), AuthError> {
        let redirect_to = options
            .redirect_to
            .unwrap_or_else(|| self.config.default_redirect.clone());

        if provider_id == CREDENTIAL_PROVIDER_ID {
            let credential = self
                .registry
                .credential()
                .ok_or_else(|| AuthError::ProviderNotConfigured(provider_id.to_owned()))?;
            let credentials = options.credentials.ok_or_else(|| {
                AuthError::Host("credential sign-in requires an email and password".to_owned())
            })?;

            let account = credential
                .sign_in(&credentials.email, &credentials.password)
                .await?;
            let claims = self
                .events
                .on_sign_in(&account)
                .await
                .map_err(|e| AuthError::Hook(e.to_string()))?;

            self.establish_session(cookies, CREDENTIAL_PROVIDER_ID, claims)
                .await?;
            redirector.redirect(&redirect_to, RedirectMode::Push).await;
            return Ok(());
        }

        let provider = self
            .registry
            .oauth(provider_id)
            .ok_or_else(|| AuthError::ProviderNotConfigured(provider_id.to_owned()))?;
        let start =
            oauth::start_sign_in(provider, &redirect_to, &self.config.session_secret)?;

        cookies
            .set(
                oauth_state_cookie_name(self.config.cookie_secure),
                &start.state_token,
                CookieOptions::auth_cookie(OAUTH_STATE_MAX_AGE_SECS, self.config.cookie_secure),
            )
            .await
            .map_err(|e| AuthError::Host(e.to_string()))?;

        redirector
            .redirect(&start.authorization_url, RedirectMode::Push)
            .await;
        Ok(())
    }

    /// Process the provider's callback: validate state, exchange the code,
    /// establish the session
    ///
    /// The state cookie is deleted whether or not the callback succeeds; a
    /// state token is consumed by its first use.
    ///
    /// # Errors
    ///
    /// Any failure redirects to the error path (replacing the history
    /// entry, so Back does not replay the callback) and is also returned.
    pub async fn handle_oauth_callback(
        &self,
        cookies: &mut dyn CookieStore,
        redirector: &mut dyn Redirector,
        callback: &OAuthCallback,
    ) -> Result<(), AuthError> {
        let result = self.oauth_callback_inner(cookies, callback).await;

        let state_cookie = oauth_state_cookie_name(self.config.cookie_secure);
        if let Err(e) = cookies.delete(state_cookie).await {
            log::warn!("Could not delete OAuth state cookie: {e}");
        }

        match result {
            Ok(redirect_to) => {
                redirector.redirect(&redirect_to, RedirectMode::Replace).await;
                Ok(())
            }
            Err(error) => {
                self.redirect_with_error(redirector, &error, RedirectMode::Replace)
                    .await;
                Err(error)
            }
        }
    }

    async fn oauth_callback_inner(
        &self,
        cookies: &mut dyn CookieStore,
        callback: &OAuthCallback,
    ) -> Result<String, AuthError> {
        let state_cookie = cookies
            .get(oauth_state_cookie_name(self.config.cookie_secure))
            .await;

        let (code, state_payload) = oauth::callback::validate_state(
            callback,
            state_cookie.as_deref(),
            &self.config.session_secret,
        )?;

        let provider = self
            .registry
            .oauth(&state_payload.provider_id)
            .ok_or_else(|| {
                OAuthError::ProviderNotConfigured(state_payload.provider_id.clone())
            })?;

        let claims = oauth::callback::complete(
            provider,
            &code,
            &state_payload,
            self.exchanger.as_ref(),
        )
        .await?;

        let session_fields = self
            .events
            .on_authenticated(&claims)
            .await
            .map_err(|e| AuthError::Hook(e.to_string()))?;

        self.establish_session(cookies, &provider.id, session_fields)
            .await?;
        Ok(state_payload.redirect_to)
    }

    /// Create a credential account and send its verification email
    ///
    /// Sets the sealed verification cookie; the host renders its own
    /// "check your inbox" response, so no redirect is issued.
    ///
    /// # Errors
    ///
    /// Passes through [`crate::credential::CredentialError`] step errors.
    pub async fn sign_up(
        &self,
        cookies: &mut dyn CookieStore,
        email: &str,
        password: &str,
        extra: Map<String, Value>,
    ) -> Result<SignUpOutcome, AuthError> {
        let credential = self.registry.credential().ok_or_else(|| {
            AuthError::ProviderNotConfigured(CREDENTIAL_PROVIDER_ID.to_owned())
        })?;

        let outcome = credential.sign_up(email, password, extra).await?;
        self.events.on_sign_up(&outcome.account).await;

        cookies
            .set(
                email_verification_cookie_name(self.config.cookie_secure),
                &outcome.verification.state_token,
                CookieOptions::auth_cookie(
                    EMAIL_VERIFICATION_MAX_AGE_SECS,
                    self.config.cookie_secure,
                ),
            )
            .await
            .map_err(|e| AuthError::Host(e.to_string()))?;

        Ok(outcome)
    }

    /// Re-send the verification email for an existing account, replacing
    /// the verification cookie
    ///
    /// # Errors
    ///
    /// Passes through [`crate::credential::CredentialError`].
    pub async fn resend_verification(
        &self,
        cookies: &mut dyn CookieStore,
        email: &str,
    ) -> Result<(), AuthError> {
        let credential = self.registry.credential().ok_or_else(|| {
            AuthError::ProviderNotConfigured(CREDENTIAL_PROVIDER_ID.to_owned())
        })?;

        let issue = credential.resend_verification(email).await?;
        cookies
            .set(
                email_verification_cookie_name(self.config.cookie_secure),
                &issue.state_token,
                CookieOptions::auth_cookie(
                    EMAIL_VERIFICATION_MAX_AGE_SECS,
                    self.config.cookie_secure,
                ),
            )
            .await
            .map_err(|e| AuthError::Host(e.to_string()))?;
        Ok(())
    }

    /// Begin a password reset: mail the reset link and store its sealed
    /// counterpart in the reset cookie
    ///
    /// # Errors
    ///
    /// Passes through [`crate::credential::CredentialError`]. Whether the
    /// host reveals `AccountNotFound` to the user (or answers "check your
    /// inbox" unconditionally) is the host's choice.
    pub async fn request_password_reset(
        &self,
        cookies: &mut dyn CookieStore,
        email: &str,
    ) -> Result<(), AuthError> {
        let credential = self.registry.credential().ok_or_else(|| {
            AuthError::ProviderNotConfigured(CREDENTIAL_PROVIDER_ID.to_owned())
        })?;

        let issue = credential.request_password_reset(email).await?;
        cookies
            .set(
                password_reset_cookie_name(self.config.cookie_secure),
                &issue.state_token,
                CookieOptions::auth_cookie(
                    PASSWORD_RESET_MAX_AGE_SECS,
                    self.config.cookie_secure,
                ),
            )
            .await
            .map_err(|e| AuthError::Host(e.to_string()))?;
        Ok(())
    }

    /// Consume the reset link: compare tokens, store the new password
    /// hash, delete the reset cookie
    ///
    /// # Errors
    ///
    /// Any failure redirects to the error path and is also returned. As
    /// with verification, the cookie survives a failed attempt.
    pub async fn handle_reset_password(
        &self,
        cookies: &mut dyn CookieStore,
        redirector: &mut dyn Redirector,
        url_token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let result = self.reset_password_inner(cookies, url_token, new_password).await;
        match result {
            Ok(()) => {
                redirector
                    .redirect(&self.config.default_redirect, RedirectMode::Replace)
                    .await;
                Ok(())
            }
            Err(error) => {
                self.redirect_with_error(redirector, &error, RedirectMode::Replace)
                    .await;
                Err(error)
            }
        }
    }

    async fn reset_password_inner(
        &self,
        cookies: &mut dyn CookieStore,
        url_token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let credential = self.registry.credential().ok_or_else(|| {
            AuthError::ProviderNotConfigured(CREDENTIAL_PROVIDER_ID.to_owned())
        })?;

        let cookie_name = password_reset_cookie_name(self.config.cookie_secure);
        let state_token = cookies.get(cookie_name).await;

        credential
            .complete_password_reset(state_token.as_deref(), url_token, new_password)
            .await?;

        // Single use, like the verification session
        if let Err(e) = cookies.delete(cookie_name).await {
            log::warn!("Could not delete password reset cookie: {e}");
        }
        Ok(())
    }

    /// Consume the verification link: compare tokens, mark the address
    /// verified, delete the verification cookie
    ///
    /// # Errors
    ///
    /// Any failure redirects to the error path and is also returned. The
    /// cookie survives a failed attempt so a mistyped link does not burn
    /// the session.
    pub async fn handle_verify_email(
        &self,
        cookies: &mut dyn CookieStore,
        redirector: &mut dyn Redirector,
        url_token: &str,
    ) -> Result<(), AuthError> {
        let result = self.verify_email_inner(cookies, url_token).await;
        match result {
            Ok(()) => {
                redirector
                    .redirect(&self.config.default_redirect, RedirectMode::Replace)
                    .await;
                Ok(())
            }
            Err(error) => {
                self.redirect_with_error(redirector, &error, RedirectMode::Replace)
                    .await;
                Err(error)
            }
        }
    }

    async fn verify_email_inner(
        &self,
        cookies: &mut dyn CookieStore,
        url_token: &str,
    ) -> Result<(), AuthError> {
        let credential = self.registry.credential().ok_or_else(|| {
            AuthError::ProviderNotConfigured(CREDENTIAL_PROVIDER_ID.to_owned())
        })?;

        let cookie_name = email_verification_cookie_name(self.config.cookie_secure);
        let state_token = cookies.get(cookie_name).await;

        let email = credential
            .verify_email(state_token.as_deref(), url_token)
            .await?;
        self.events.on_email_verified(&email).await;

        // Single use: the sealed session is gone once it verified
        if let Err(e) = cookies.delete(cookie_name).await {
            log::warn!("Could not delete email verification cookie: {e}");
        }
        Ok(())
    }

    /// Read the current session, if any
    ///
    /// Total: a missing, tampered, or expired cookie is simply `None`.
    pub async fn get_session(&self, cookies: &dyn CookieStore) -> Option<UserSessionPayload> {
        let token = cookies
            .get(session_cookie_name(self.config.cookie_secure))
            .await?;
        self.sessions.read(&token)
    }

    /// Sliding-window renewal: re-seal the current session with a fresh
    /// expiry and replace the cookie
    ///
    /// Returns `false` without a valid session; extension never creates a
    /// session from nothing.
    pub async fn extend_session(&self, cookies: &mut dyn CookieStore) -> bool {
        let cookie_name = session_cookie_name(self.config.cookie_secure);
        let Some(token) = cookies.get(cookie_name).await else {
            return false;
        };
        let Some(renewed) = self.sessions.extend(&token) else {
            return false;
        };
        match cookies
            .set(
                cookie_name,
                &renewed,
                CookieOptions::auth_cookie(
                    self.sessions.max_age_secs(),
                    self.config.cookie_secure,
                ),
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                log::error!("Could not store extended session cookie: {e}");
                false
            }
        }
    }

    /// End the session and redirect home
    ///
    /// Always succeeds from the user's perspective; a cookie-deletion
    /// failure is logged only.
    pub async fn sign_out(&self, cookies: &mut dyn CookieStore, redirector: &mut dyn Redirector) {
        let cookie_name = session_cookie_name(self.config.cookie_secure);
        if let Err(e) = cookies.delete(cookie_name).await {
            log::error!("Could not delete session cookie during sign-out: {e}");
        }
        redirector
            .redirect(&self.config.default_redirect, RedirectMode::Push)
            .await;
    }

    async fn establish_session(
        &self,
        cookies: &mut dyn CookieStore,
        provider_id: &str,
        claims: Map<String, Value>,
    ) -> Result<(), AuthError> {
        let session_token = self.sessions.create(provider_id, claims)?;
        cookies
            .set(
                session_cookie_name(self.config.cookie_secure),
                &session_token,
                CookieOptions::auth_cookie(
                    self.sessions.max_age_secs(),
                    self.config.cookie_secure,
                ),
            )
            .await
            .map_err(|e| AuthError::Host(e.to_string()))?;
        log::info!("Session established via provider {provider_id}");
        Ok(())
    }

    async fn redirect_with_error(
        &self,
        redirector: &mut dyn Redirector,
        error: &AuthError,
        mode: RedirectMode,
    ) {
        log::error!("Authentication flow failed: {error}");
        let url = format!("{}?error={}", self.config.error_path, error.tag());
        redirector.redirect(&url, mode).await;
    }
}
