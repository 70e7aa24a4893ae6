//! Kubernetes service-account login.

use super::{mismatch, read_token_file, required, CredentialProvider, ProviderConfig};
use crate::config::{AuthMethod, EnvSource};
use crate::credential::Credential;
use crate::error::AcquisitionResult;
use async_trait::async_trait;
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Where Kubernetes mounts the pod's service-account token.
pub const DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Kubernetes method configuration.
#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    /// Vault role bound to the service account
    pub role: Option<String>,
    /// Service-account token path
    pub token_path: PathBuf,
    /// Auth mount
    pub mount: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            role: None,
            token_path: PathBuf::from(DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH),
            mount: AuthMethod::Kubernetes.default_mount().to_string(),
        }
    }
}

impl KubernetesConfig {
    /// Configuration for `role` with the default token path.
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Default::default()
        }
    }

    /// Read the token from `path` instead.
    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Load `K8S_ROLE` (or `VAULT_ROLE`) and `SA_TOKEN_PATH`.
    pub fn from_env(env: &impl EnvSource) -> Self {
        let mut config = Self {
            role: env.first_of(&["K8S_ROLE", "VAULT_ROLE"]),
            ..Default::default()
        };
        if let Some(path) = env.non_empty("SA_TOKEN_PATH") {
            config.token_path = PathBuf::from(path);
        }
        if let Some(mount) = env.non_empty("K8S_AUTH_MOUNT") {
            config.mount = mount;
        }
        config
    }
}

/// Pairs the pod's service-account JWT with a Vault role.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubernetesProvider;

#[async_trait]
impl CredentialProvider for KubernetesProvider {
    fn method(&self) -> AuthMethod {
        AuthMethod::Kubernetes
    }

    #[instrument(skip_all, fields(method = "kubernetes"))]
    async fn acquire(&self, config: &ProviderConfig) -> AcquisitionResult<Credential> {
        let ProviderConfig::Kubernetes(config) = config else {
            return Err(mismatch(AuthMethod::Kubernetes, config));
        };
        let role = required(config.role.as_deref(), "kubernetes role")?;

        let jwt = read_token_file(&config.token_path).await?;
        debug!(path = %config.token_path.display(), role, "Read service account token");

        Ok(Credential::jwt(&config.mount, role, SecretString::from(jwt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialKind;
    use crate::error::AcquisitionError;

    #[tokio::test]
    async fn test_reads_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "eyJhbGciOiJSUzI1NiJ9.sa.sig\n").unwrap();

        let config = ProviderConfig::Kubernetes(KubernetesConfig::new("dev-role-k8s").with_token_path(&path));
        let cred = KubernetesProvider.acquire(&config).await.unwrap();

        assert_eq!(cred.kind(), CredentialKind::Jwt);
        assert_eq!(cred.role(), Some("dev-role-k8s"));
        assert_eq!(cred.expose_value(), "eyJhbGciOiJSUzI1NiJ9.sa.sig");
        assert_eq!(cred.login_path().as_deref(), Some("auth/kubernetes/login"));
    }

    #[tokio::test]
    async fn test_missing_role_checked_before_file() {
        let config = ProviderConfig::Kubernetes(
            KubernetesConfig::default().with_token_path("/definitely/not/here"),
        );
        assert!(matches!(
            KubernetesProvider.acquire(&config).await,
            Err(AcquisitionError::ConfigMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_file() {
        let config = ProviderConfig::Kubernetes(
            KubernetesConfig::new("dev-role-k8s").with_token_path("/definitely/not/here"),
        );
        assert!(matches!(
            KubernetesProvider.acquire(&config).await,
            Err(AcquisitionError::TokenFileUnreadable { .. })
        ));
    }

    #[test]
    fn test_from_env_falls_back_to_vault_role() {
        let env = std::collections::HashMap::from([
            ("VAULT_ROLE", "shared-role"),
            ("SA_TOKEN_PATH", "/tmp/sa-token"),
        ]);
        let config = KubernetesConfig::from_env(&env);
        assert_eq!(config.role.as_deref(), Some("shared-role"));
        assert_eq!(config.token_path, PathBuf::from("/tmp/sa-token"));
    }
}
