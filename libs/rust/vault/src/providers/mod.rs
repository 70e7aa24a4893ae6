//! Credential providers, one per Vault auth method.
//!
//! Every provider implements [`CredentialProvider`]: given its
//! [`ProviderConfig`] variant it turns ambient identity into a
//! [`Credential`]. Required configuration is checked before any file or
//! network access.

pub mod approle;
pub mod aws;
pub mod azure;
pub mod gcp;
pub mod kubernetes;
pub mod sigv4;
pub mod token;
pub mod userpass;

use crate::config::{AuthMethod, ConfigError, EnvSource};
use crate::credential::Credential;
use crate::error::{AcquisitionError, AcquisitionResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use approle::{AppRoleConfig, AppRoleProvider};
pub use aws::{AwsIamConfig, AwsIamProvider};
pub use azure::{AzureConfig, AzureProvider};
pub use gcp::{GcpIamConfig, GcpIamProvider};
pub use kubernetes::{KubernetesConfig, KubernetesProvider};
pub use token::{TokenConfig, TokenProvider};
pub use userpass::{UserpassConfig, UserpassProvider};

/// Per-method configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    /// Static token
    Token(TokenConfig),
    /// AppRole with response wrapping
    AppRole(AppRoleConfig),
    /// AWS IAM
    AwsIam(AwsIamConfig),
    /// Azure managed identity
    Azure(AzureConfig),
    /// Kubernetes service account
    Kubernetes(KubernetesConfig),
    /// GCP IAM
    GcpIam(GcpIamConfig),
    /// Userpass
    Userpass(UserpassConfig),
}

impl ProviderConfig {
    /// The method this configuration belongs to.
    #[must_use]
    pub const fn method(&self) -> AuthMethod {
        match self {
            Self::Token(_) => AuthMethod::Token,
            Self::AppRole(_) => AuthMethod::AppRole,
            Self::AwsIam(_) => AuthMethod::AwsIam,
            Self::Azure(_) => AuthMethod::Azure,
            Self::Kubernetes(_) => AuthMethod::Kubernetes,
            Self::GcpIam(_) => AuthMethod::GcpIam,
            Self::Userpass(_) => AuthMethod::Userpass,
        }
    }

    /// Load the configuration for `method` from `env`.
    ///
    /// Absent values stay absent; providers report them as
    /// [`AcquisitionError::ConfigMissing`] at acquire time.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] only for present-but-malformed values.
    pub fn from_env(method: AuthMethod, env: &impl EnvSource) -> Result<Self, ConfigError> {
        Ok(match method {
            AuthMethod::Token => Self::Token(TokenConfig::from_env(env)),
            AuthMethod::AppRole => Self::AppRole(AppRoleConfig::from_env(env)),
            AuthMethod::AwsIam => Self::AwsIam(AwsIamConfig::from_env(env)),
            AuthMethod::Azure => Self::Azure(AzureConfig::from_env(env)),
            AuthMethod::Kubernetes => Self::Kubernetes(KubernetesConfig::from_env(env)),
            AuthMethod::GcpIam => Self::GcpIam(GcpIamConfig::from_env(env)?),
            AuthMethod::Userpass => Self::Userpass(UserpassConfig::from_env(env)),
        })
    }
}

/// Turns ambient identity into a Vault credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The method this provider implements.
    fn method(&self) -> AuthMethod;

    /// Produce a credential from `config`.
    async fn acquire(&self, config: &ProviderConfig) -> AcquisitionResult<Credential>;
}

/// Error for a provider handed another method's configuration.
pub(crate) const fn mismatch(expected: AuthMethod, config: &ProviderConfig) -> AcquisitionError {
    AcquisitionError::MethodMismatch {
        expected,
        actual: config.method(),
    }
}

/// Require a non-blank value.
pub(crate) fn required<'a>(value: Option<&'a str>, field: &'static str) -> AcquisitionResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AcquisitionError::ConfigMissing(field))
}

/// Read a single-value token file, trimmed.
pub(crate) async fn read_token_file(path: &std::path::Path) -> AcquisitionResult<String> {
    let display = path.display().to_string();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AcquisitionError::token_file(&display, e.to_string()))?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(AcquisitionError::token_file(display, "file is empty"));
    }
    Ok(token.to_string())
}

/// Providers indexed by method.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<AuthMethod, Arc<dyn CredentialProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("methods", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its method, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn CredentialProvider>) {
        self.providers.insert(provider.method(), provider);
    }

    /// Builder-style [`Self::register`].
    #[must_use]
    pub fn with(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Provider for `method`.
    #[must_use]
    pub fn get(&self, method: AuthMethod) -> Option<Arc<dyn CredentialProvider>> {
        self.providers.get(&method).cloned()
    }

    /// Registered methods.
    pub fn methods(&self) -> impl Iterator<Item = AuthMethod> + '_ {
        self.providers.keys().copied()
    }
}
