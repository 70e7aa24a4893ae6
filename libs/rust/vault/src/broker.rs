//! The credential broker: provider, then login, then read.

use crate::config::AuthMethod;
use crate::error::{BrokerError, BrokerResult};
use crate::providers::{
    AppRoleProvider, AwsIamProvider, AzureProvider, CredentialProvider, GcpIamProvider, KubernetesProvider,
    ProviderConfig, ProviderRegistry, TokenProvider, UserpassProvider,
};
use crate::secrets::Secret;
use crate::store::StoreConnector;
use reqwest::Client;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Resolves a provider, acquires a credential, connects a store and reads.
///
/// Exactly one provider is tried per call. A failure at any step ends the
/// call; nothing is retried here.
#[derive(Clone)]
pub struct Broker {
    providers: ProviderRegistry,
    connector: Arc<dyn StoreConnector>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Broker with an empty registry.
    #[must_use]
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            providers: ProviderRegistry::new(),
            connector,
        }
    }

    /// Broker with every built-in provider registered.
    ///
    /// `http` is the transport for metadata endpoints and cloud APIs.
    #[must_use]
    pub fn with_default_providers(connector: Arc<dyn StoreConnector>, http: Client) -> Self {
        let providers = ProviderRegistry::new()
            .with(Arc::new(TokenProvider))
            .with(Arc::new(AppRoleProvider::new(Arc::clone(&connector))))
            .with(Arc::new(AwsIamProvider::new(http.clone())))
            .with(Arc::new(AzureProvider::new(http.clone())))
            .with(Arc::new(KubernetesProvider))
            .with(Arc::new(GcpIamProvider::new(http)))
            .with(Arc::new(UserpassProvider));
        Self { providers, connector }
    }

    /// Register `provider`, replacing any provider for the same method.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.providers.register(provider);
        self
    }

    /// Registered providers.
    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Authenticate with `method` and read the secret at `path`.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::UnsupportedMethod`] if no provider is registered
    /// - [`BrokerError::Acquisition`] if the provider fails
    /// - [`BrokerError::Login`] if Vault rejects the credential
    /// - [`BrokerError::SecretRead`] if the read fails
    #[instrument(skip(self, config), fields(method = %method))]
    pub async fn fetch_secret(&self, method: AuthMethod, config: &ProviderConfig, path: &str) -> BrokerResult<Secret> {
        let provider = self
            .providers
            .get(method)
            .ok_or(BrokerError::UnsupportedMethod(method))?;

        let credential = provider.acquire(config).await?;
        debug!(kind = ?credential.kind(), mount = credential.mount(), "Acquired credential");

        let store = self.connector.connect(&credential).await.map_err(BrokerError::Login)?;
        let secret = store.read(path, None).await.map_err(BrokerError::SecretRead)?;

        info!(path = %secret.path, version = ?secret.version, keys = secret.data.len(), "Read secret");
        Ok(secret)
    }

    /// [`Self::fetch_secret`], then pick out `key`.
    ///
    /// # Errors
    ///
    /// As [`Self::fetch_secret`], plus [`BrokerError::KeyNotFound`].
    pub async fn fetch_secret_value(
        &self,
        method: AuthMethod,
        config: &ProviderConfig,
        path: &str,
        key: &str,
    ) -> BrokerResult<SecretString> {
        let secret = self.fetch_secret(method, config, path).await?;
        secret
            .get(key)
            .map(|value| SecretString::from(value.to_string()))
            .ok_or_else(|| BrokerError::KeyNotFound {
                path: secret.path.clone(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AcquisitionError, StoreError};
    use crate::providers::{KubernetesConfig, TokenConfig};
    use crate::store::{InMemoryStore, MemoryConnector, SecretStore};
    use secrecy::ExposeSecret;
    use std::collections::BTreeMap;

    async fn seeded() -> Arc<MemoryConnector> {
        let store = InMemoryStore::new();
        let data = BTreeMap::from([("password".to_string(), "Hashi123".to_string())]);
        store.write("my-secret-password", &data, None).await.unwrap();
        Arc::new(MemoryConnector::new(store))
    }

    #[tokio::test]
    async fn test_token_flow_reads_secret() {
        let broker = Broker::with_default_providers(seeded().await, Client::new());
        let config = ProviderConfig::Token(TokenConfig::new("dev-only-token"));

        let value = broker
            .fetch_secret_value(AuthMethod::Token, &config, "/my-secret-password", "password")
            .await
            .unwrap();
        assert_eq!(value.expose_secret(), "Hashi123");
    }

    #[tokio::test]
    async fn test_unregistered_method() {
        let broker = Broker::new(seeded().await).with_provider(Arc::new(TokenProvider));
        let config = ProviderConfig::Kubernetes(KubernetesConfig::new("r"));
        assert!(matches!(
            broker.fetch_secret(AuthMethod::Kubernetes, &config, "x").await,
            Err(BrokerError::UnsupportedMethod(AuthMethod::Kubernetes))
        ));
    }

    #[tokio::test]
    async fn test_missing_token_never_connects() {
        let connector = seeded().await;
        let broker = Broker::with_default_providers(connector.clone(), Client::new());
        let err = broker
            .fetch_secret(AuthMethod::Token, &ProviderConfig::Token(TokenConfig::default()), "my-secret-password")
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::Acquisition(AcquisitionError::MissingCredential)));
        assert!(err.is_auth_error());
        assert!(connector.logins().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_path_is_read_error() {
        let broker = Broker::with_default_providers(seeded().await, Client::new());
        let config = ProviderConfig::Token(TokenConfig::new("dev-only-token"));
        assert!(matches!(
            broker.fetch_secret(AuthMethod::Token, &config, "nope").await,
            Err(BrokerError::SecretRead(StoreError::SecretNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let broker = Broker::with_default_providers(seeded().await, Client::new());
        let config = ProviderConfig::Token(TokenConfig::new("dev-only-token"));
        let err = broker
            .fetch_secret_value(AuthMethod::Token, &config, "my-secret-password", "username")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::KeyNotFound { ref key, .. } if key == "username"));
    }

    #[test]
    fn test_default_providers_cover_every_method() {
        let connector: Arc<dyn StoreConnector> = Arc::new(MemoryConnector::default());
        let broker = Broker::with_default_providers(connector, Client::new());
        assert_eq!(broker.providers().methods().count(), AuthMethod::ALL.len());
    }
}
