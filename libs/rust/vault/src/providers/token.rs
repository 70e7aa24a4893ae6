//! Static token pass-through.

use super::{mismatch, CredentialProvider, ProviderConfig};
use crate::config::{AuthMethod, EnvSource};
use crate::credential::Credential;
use crate::error::{AcquisitionError, AcquisitionResult};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

/// Token method configuration.
#[derive(Debug, Clone, Default)]
pub struct TokenConfig {
    /// Client token (`VAULT_TOKEN`)
    pub token: Option<SecretString>,
}

impl TokenConfig {
    /// Configuration around `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(SecretString::from(token.into())),
        }
    }

    /// Load `VAULT_TOKEN`.
    pub fn from_env(env: &impl EnvSource) -> Self {
        Self {
            token: env.var("VAULT_TOKEN").map(SecretString::from),
        }
    }
}

/// Hands the configured token straight through.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenProvider;

#[async_trait]
impl CredentialProvider for TokenProvider {
    fn method(&self) -> AuthMethod {
        AuthMethod::Token
    }

    async fn acquire(&self, config: &ProviderConfig) -> AcquisitionResult<Credential> {
        let ProviderConfig::Token(config) = config else {
            return Err(mismatch(AuthMethod::Token, config));
        };
        let token = config
            .token
            .as_ref()
            .map(|t| t.expose_secret().trim())
            .filter(|t| !t.is_empty())
            .ok_or(AcquisitionError::MissingCredential)?;
        Ok(Credential::token(SecretString::from(token.to_string())))
    }
}
