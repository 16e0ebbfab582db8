//! Provider registry
//!
//! Built once from the validated config; lookups at request time are
//! infallible reads over an immutable map. A provider is exactly one of
//! two kinds, so the registry value is a closed enum rather than a trait
//! object.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AuthConfig, ConfigError};
use crate::credential::CredentialProvider;
use crate::host::{EmailSender, UserRepository};
use crate::oauth::provider::ProviderConfig;

/// Identifier the credential provider registers under
pub const CREDENTIAL_PROVIDER_ID: &str = "credential";

/// A registered provider: OAuth or email/password, nothing else
pub enum RegisteredProvider {
    OAuth(ProviderConfig),
    Credential(CredentialProvider),
}

/// All providers the host enabled, keyed by id
pub struct ProviderRegistry {
    providers: HashMap<String, RegisteredProvider>,
}

impl ProviderRegistry {
    /// Resolve every configured provider
    ///
    /// The credential provider is only built when the config enables it and
    /// the host supplied both a repository and an email sender.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] from provider resolution.
    pub fn from_config(
        config: &AuthConfig,
        repository: Option<Arc<dyn UserRepository>>,
        email_sender: Option<Arc<dyn EmailSender>>,
    ) -> Result<Self, ConfigError> {
        let mut providers = HashMap::new();
        for settings in &config.providers {
            let provider = ProviderConfig::from_settings(settings)?;
            if providers
                .insert(provider.id.clone(), RegisteredProvider::OAuth(provider))
                .is_some()
            {
                return Err(ConfigError::DuplicateProvider(settings.name.clone()));
            }
        }

        if let (Some(settings), Some(repository), Some(email_sender)) =
            (&config.credential, repository, email_sender)
        {
            providers.insert(
                CREDENTIAL_PROVIDER_ID.to_owned(),
                RegisteredProvider::Credential(CredentialProvider::new(
                    repository,
                    email_sender,
                    config.session_secret.clone(),
                    config.base_url.clone(),
                    settings.clone(),
                )),
            );
        }

        Ok(Self { providers })
    }

    #[must_use]
    pub fn get(&self, provider_id: &str) -> Option<&RegisteredProvider> {
        self.providers.get(provider_id)
    }

    #[must_use]
    pub fn oauth(&self, provider_id: &str) -> Option<&ProviderConfig> {
        match self.providers.get(provider_id) {
            Some(RegisteredProvider::OAuth(provider)) => Some(provider),
            _ => None,
        }
    }

    #[must_use]
    pub fn credential(&self) -> Option<&CredentialProvider> {
        match self.providers.get(CREDENTIAL_PROVIDER_ID) {
            Some(RegisteredProvider::Credential(provider)) => Some(provider),
            _ => None,
        }
    }

    /// Ids of every registered provider, sorted
    #[must_use]
    pub fn provider_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialSettings, OAuthProviderSettings};
    use crate::testing::{CapturingEmailSender, InMemoryUserRepository};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn google() -> OAuthProviderSettings {
        OAuthProviderSettings {
            name: "google".to_owned(),
            client_id: Some("cid".to_owned()),
            client_secret: Some("cs".to_owned()),
            redirect_uri: Some("https://app.example.com/api/auth/callback".to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn registry_resolves_configured_providers() {
        let config = AuthConfig::new(SECRET, "https://app.example.com")
            .with_provider(google())
            .with_credential_provider(CredentialSettings::default());

        let registry = ProviderRegistry::from_config(
            &config,
            Some(Arc::new(InMemoryUserRepository::new())),
            Some(Arc::new(CapturingEmailSender::new())),
        )
        .unwrap();

        assert!(registry.oauth("google").is_some());
        assert!(registry.oauth("microsoft").is_none());
        assert!(registry.credential().is_some());
        assert_eq!(registry.provider_ids(), ["credential", "google"]);
    }

    #[test]
    fn credential_provider_needs_both_collaborators() {
        let config = AuthConfig::new(SECRET, "https://app.example.com")
            .with_credential_provider(CredentialSettings::default());
        let registry = ProviderRegistry::from_config(
            &config,
            Some(Arc::new(InMemoryUserRepository::new())),
            None,
        )
        .unwrap();
        assert!(registry.credential().is_none());
    }

    #[test]
    fn lookups_do_not_cross_kinds() {
        let config = AuthConfig::new(SECRET, "https://app.example.com")
            .with_credential_provider(CredentialSettings::default());
        let registry = ProviderRegistry::from_config(
            &config,
            Some(Arc::new(InMemoryUserRepository::new())),
            Some(Arc::new(CapturingEmailSender::new())),
        )
        .unwrap();
        // The credential provider is not addressable as an OAuth provider
        assert!(registry.oauth(CREDENTIAL_PROVIDER_ID).is_none());
        assert!(matches!(
            registry.get(CREDENTIAL_PROVIDER_ID),
            Some(RegisteredProvider::Credential(_))
        ));
    }

    #[test]
    fn broken_provider_settings_fail_resolution() {
        let mut settings = google();
        settings.client_id = None;
        let config = AuthConfig::new(SECRET, "https://app.example.com").with_provider(settings);
        assert!(ProviderRegistry::from_config(&config, None, None).is_err());
    }
}
