//! Userpass login.

use super::{mismatch, required, CredentialProvider, ProviderConfig};
use crate::config::{AuthMethod, EnvSource};
use crate::credential::Credential;
use crate::error::AcquisitionResult;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

/// Userpass method configuration.
#[derive(Debug, Clone)]
pub struct UserpassConfig {
    /// Vault username
    pub username: Option<String>,
    /// Password
    pub password: Option<SecretString>,
    /// Auth mount
    pub mount: String,
}

impl Default for UserpassConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            mount: AuthMethod::Userpass.default_mount().to_string(),
        }
    }
}

impl UserpassConfig {
    /// Configuration for `username` / `password`.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(SecretString::from(password.into())),
            ..Default::default()
        }
    }

    /// Load `VAULT_USERNAME` and `VAULT_PASSWORD`.
    pub fn from_env(env: &impl EnvSource) -> Self {
        Self {
            username: env.non_empty("VAULT_USERNAME"),
            password: env.var("VAULT_PASSWORD").map(SecretString::from),
            ..Default::default()
        }
    }
}

/// Username and password straight from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserpassProvider;

#[async_trait]
impl CredentialProvider for UserpassProvider {
    fn method(&self) -> AuthMethod {
        AuthMethod::Userpass
    }

    async fn acquire(&self, config: &ProviderConfig) -> AcquisitionResult<Credential> {
        let ProviderConfig::Userpass(config) = config else {
            return Err(mismatch(AuthMethod::Userpass, config));
        };
        let username = required(config.username.as_deref(), "username")?;
        let password = required(config.password.as_ref().map(ExposeSecret::expose_secret), "password")?;

        Ok(Credential::password(username, SecretString::from(password.to_string())).with_mount(&config.mount))
    }
}
