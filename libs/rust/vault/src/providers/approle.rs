//! AppRole login with a response-wrapped secret id.
//!
//! The orchestrator hands the workload a wrapping token on disk. Unwrapping
//! it spends the token, so the unwrap happens exactly once and is never
//! retried.

use super::{mismatch, read_token_file, required, CredentialProvider, ProviderConfig};
use crate::config::{AuthMethod, EnvSource};
use crate::credential::Credential;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::store::StoreConnector;
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Where the wrapping token is dropped when no path is configured.
pub const DEFAULT_WRAPPING_TOKEN_PATH: &str = "/etc/vault/wrapping-token";

/// AppRole method configuration.
#[derive(Debug, Clone)]
pub struct AppRoleConfig {
    /// Role id (not secret)
    pub role_id: Option<String>,
    /// File holding the single-use wrapping token
    pub wrapping_token_path: PathBuf,
    /// Auth mount
    pub mount: String,
}

impl Default for AppRoleConfig {
    fn default() -> Self {
        Self {
            role_id: None,
            wrapping_token_path: PathBuf::from(DEFAULT_WRAPPING_TOKEN_PATH),
            mount: AuthMethod::AppRole.default_mount().to_string(),
        }
    }
}

impl AppRoleConfig {
    /// Configuration for `role_id` reading the token from `wrapping_token_path`.
    #[must_use]
    pub fn new(role_id: impl Into<String>, wrapping_token_path: impl Into<PathBuf>) -> Self {
        Self {
            role_id: Some(role_id.into()),
            wrapping_token_path: wrapping_token_path.into(),
            ..Default::default()
        }
    }

    /// Load `APPROLE_ROLE_ID` and `APPROLE_WRAPPING_TOKEN_PATH`.
    pub fn from_env(env: &impl EnvSource) -> Self {
        let mut config = Self {
            role_id: env.non_empty("APPROLE_ROLE_ID"),
            ..Default::default()
        };
        if let Some(path) = env.non_empty("APPROLE_WRAPPING_TOKEN_PATH") {
            config.wrapping_token_path = PathBuf::from(path);
        }
        if let Some(mount) = env.non_empty("APPROLE_AUTH_MOUNT") {
            config.mount = mount;
        }
        config
    }
}

/// Unwraps a secret id and pairs it with the configured role id.
pub struct AppRoleProvider {
    connector: Arc<dyn StoreConnector>,
}

impl std::fmt::Debug for AppRoleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRoleProvider").finish_non_exhaustive()
    }
}

impl AppRoleProvider {
    /// Provider unwrapping through stores from `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl CredentialProvider for AppRoleProvider {
    fn method(&self) -> AuthMethod {
        AuthMethod::AppRole
    }

    #[instrument(skip_all, fields(method = "approle"))]
    async fn acquire(&self, config: &ProviderConfig) -> AcquisitionResult<Credential> {
        let ProviderConfig::AppRole(config) = config else {
            return Err(mismatch(AuthMethod::AppRole, config));
        };
        let role_id = required(config.role_id.as_deref(), "role_id")?;

        let wrapping_token = read_token_file(&config.wrapping_token_path).await?;
        debug!(path = %config.wrapping_token_path.display(), "Read wrapping token");

        let store = self
            .connector
            .connect(&Credential::token(SecretString::from(wrapping_token)))
            .await
            .map_err(|e| AcquisitionError::WrappingTokenInvalid(e.to_string()))?;

        let data = store
            .unwrap(None)
            .await
            .map_err(|e| AcquisitionError::WrappingTokenInvalid(e.to_string()))?;

        let secret_id = match data.get("secret_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => {
                return Err(AcquisitionError::WrappingTokenInvalid(
                    "unwrapped payload has no secret_id".to_string(),
                ))
            }
        };

        info!(role_id, "Unwrapped AppRole secret id");
        Ok(Credential::role_secret(role_id, SecretString::from(secret_id)).with_mount(&config.mount))
    }
}
