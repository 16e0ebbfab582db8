//! In-memory collaborator doubles for tests
//!
//! Gated behind the `testing` feature (always available to unit tests).
//! Each double implements one host trait and records what was asked of it
//! so tests can assert on side effects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

use crate::host::{
    Account, CookieOptions, CookieStore, EmailSender, HostError, NewAccount, RedirectMode,
    Redirector, UserRepository,
};
use crate::oauth::callback::{CodeExchanger, TokenResponse};
use crate::oauth::provider::ProviderConfig;
use crate::oauth::OAuthError;

/// Cookie jar backed by a map; `set` and `delete` take effect immediately
#[derive(Default)]
pub struct MemoryCookieStore {
    cookies: HashMap<String, String>,
}

impl MemoryCookieStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cookie as if a previous response had set it
    pub fn insert(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_owned(), value.to_owned());
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

#[async_trait]
impl CookieStore for MemoryCookieStore {
    async fn set(
        &mut self,
        name: &str,
        value: &str,
        _options: CookieOptions,
    ) -> Result<(), HostError> {
        self.cookies.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    async fn get(&self, name: &str) -> Option<String> {
        self.cookies.get(name).cloned()
    }

    async fn delete(&mut self, name: &str) -> Result<(), HostError> {
        self.cookies.remove(name);
        Ok(())
    }
}

/// One redirect as the core issued it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRedirect {
    pub url: String,
    pub mode: RedirectMode,
}

/// Records every redirect instead of issuing it
#[derive(Default)]
pub struct RecordingRedirector {
    redirects: Vec<RecordedRedirect>,
}

impl RecordingRedirector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn redirects(&self) -> &[RecordedRedirect] {
        &self.redirects
    }

    #[must_use]
    pub fn last(&self) -> Option<&RecordedRedirect> {
        self.redirects.last()
    }
}

#[async_trait]
impl Redirector for RecordingRedirector {
    async fn redirect(&mut self, url: &str, mode: RedirectMode) {
        self.redirects.push(RecordedRedirect {
            url: url.to_owned(),
            mode,
        });
    }
}

/// Account store backed by a map keyed on email
#[derive(Default)]
pub struct InMemoryUserRepository {
    accounts: Mutex<HashMap<String, Account>>,
    next_id: AtomicU64,
}

impl InMemoryUserRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn account(&self, email: &str) -> Option<Account> {
        self.accounts
            .lock()
            .map(|accounts| accounts.get(email).cloned())
            .unwrap_or(None)
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create_account(&self, account: NewAccount) -> Result<Account, HostError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| HostError::new("repository lock poisoned"))?;
        if accounts.contains_key(&account.email) {
            return Err(HostError::new("account already exists"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let created = Account {
            id: format!("acct-{id}"),
            email: account.email.clone(),
            password_hash: Some(account.password_hash),
            email_verified: false,
            linked_providers: Vec::new(),
            extra: account.extra,
        };
        accounts.insert(account.email, created.clone());
        Ok(created)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, HostError> {
        let accounts = self
            .accounts
            .lock()
            .map_err(|_| HostError::new("repository lock poisoned"))?;
        Ok(accounts.get(email).cloned())
    }

    async fn mark_email_verified(&self, email: &str) -> Result<(), HostError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| HostError::new("repository lock poisoned"))?;
        match accounts.get_mut(email) {
            Some(account) => {
                account.email_verified = true;
                Ok(())
            }
            None => Err(HostError::new("no such account")),
        }
    }

    async fn change_password(&self, email: &str, password_hash: &str) -> Result<(), HostError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| HostError::new("repository lock poisoned"))?;
        match accounts.get_mut(email) {
            Some(account) => {
                account.password_hash = Some(password_hash.to_owned());
                Ok(())
            }
            None => Err(HostError::new("no such account")),
        }
    }

    async fn link_provider(
        &self,
        account_id: &str,
        provider_id: &str,
        _fields: &serde_json::Map<String, Value>,
    ) -> Result<(), HostError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| HostError::new("repository lock poisoned"))?;
        let account = accounts
            .values_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| HostError::new("no such account"))?;
        if !account.linked_providers.iter().any(|p| p == provider_id) {
            account.linked_providers.push(provider_id.to_owned());
        }
        Ok(())
    }
}

/// One captured outbound email
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Captures emails instead of sending them
#[derive(Default)]
pub struct CapturingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
}

impl CapturingEmailSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailSender for CapturingEmailSender {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), HostError> {
        self.sent
            .lock()
            .map_err(|_| HostError::new("sender lock poisoned"))?
            .push(SentEmail {
                to: to.to_owned(),
                subject: subject.to_owned(),
                html_body: html_body.to_owned(),
            });
        Ok(())
    }
}

/// One recorded token-exchange call
#[derive(Debug, Clone)]
pub struct ExchangeCall {
    pub provider_id: String,
    pub code: String,
    pub code_verifier: String,
}

/// Returns a canned token response and records every exchange call
///
/// Construct with the claims the stubbed identity token should carry.
pub struct StubCodeExchanger {
    id_token: String,
    calls: Mutex<Vec<ExchangeCall>>,
}

impl StubCodeExchanger {
    #[must_use]
    pub fn new(claims: &Value) -> Self {
        Self {
            id_token: make_id_token(claims),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CodeExchanger for StubCodeExchanger {
    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, OAuthError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ExchangeCall {
                provider_id: provider.id.clone(),
                code: code.to_owned(),
                code_verifier: code_verifier.to_owned(),
            });
        }
        Ok(TokenResponse {
            access_token: "stub-access-token".to_owned(),
            id_token: Some(self.id_token.clone()),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: Some("Bearer".to_owned()),
        })
    }
}

/// Build an unsigned compact JWS around the given claims
///
/// Good enough for the local (signature-free) identity-token decode path.
#[must_use]
pub fn make_id_token(claims: &Value) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.unsigned")
}
