//! Azure managed identity login.

use super::{mismatch, required, CredentialProvider, ProviderConfig};
use crate::config::{AuthMethod, EnvSource};
use crate::credential::Credential;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::http::fetch_json;
use crate::retry::{RetryConfig, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

/// Azure instance metadata base URL.
pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";

/// Audience Vault's Azure auth method expects by default.
pub const DEFAULT_RESOURCE: &str = "https://management.azure.com/";

const TOKEN_API_VERSION: &str = "2018-02-01";
const INSTANCE_API_VERSION: &str = "2021-05-01";

/// Azure method configuration.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    /// Vault role
    pub role: Option<String>,
    /// Token audience
    pub resource: String,
    /// Client id of a user-assigned identity
    pub client_id: Option<String>,
    /// Instance metadata base URL
    pub imds_endpoint: String,
    /// Auth mount
    pub mount: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            role: None,
            resource: DEFAULT_RESOURCE.to_string(),
            client_id: None,
            imds_endpoint: DEFAULT_IMDS_ENDPOINT.to_string(),
            mount: AuthMethod::Azure.default_mount().to_string(),
        }
    }
}

impl AzureConfig {
    /// Configuration for `role` with the system-assigned identity.
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Default::default()
        }
    }

    /// Query metadata at `endpoint` instead of the link-local address.
    #[must_use]
    pub fn with_imds_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.imds_endpoint = endpoint.into();
        self
    }

    /// Load `AZURE_ROLE_NAME` (or `VAULT_ROLE`), `AZURE_CLIENT_ID` and friends.
    pub fn from_env(env: &impl EnvSource) -> Self {
        let defaults = Self::default();
        Self {
            role: env.first_of(&["AZURE_ROLE_NAME", "VAULT_ROLE"]),
            resource: env.non_empty("AZURE_RESOURCE").unwrap_or(defaults.resource),
            client_id: env.non_empty("AZURE_CLIENT_ID"),
            imds_endpoint: env.non_empty("AZURE_IMDS_ENDPOINT").unwrap_or(defaults.imds_endpoint),
            mount: env.non_empty("AZURE_AUTH_MOUNT").unwrap_or(defaults.mount),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<Value>,
}

#[derive(Deserialize)]
struct InstanceResponse {
    compute: Compute,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Compute {
    subscription_id: String,
    resource_group_name: String,
    name: String,
    #[serde(default)]
    vm_scale_set_name: String,
}

/// `expires_on` arrives as epoch seconds, as a string or a number.
fn parse_expires_on(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let secs = match value? {
        Value::String(s) => s.parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    DateTime::from_timestamp(secs, 0)
}

/// Reads a managed-identity token and VM identity from instance metadata.
#[derive(Debug, Clone)]
pub struct AzureProvider {
    http: Client,
    retry: RetryPolicy,
}

impl AzureProvider {
    /// Provider using `http`, retrying metadata once.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self {
            http,
            retry: RetryPolicy::new(RetryConfig::single_retry()),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = RetryPolicy::new(config);
        self
    }

    async fn query_metadata(&self, config: &AzureConfig) -> AcquisitionResult<(TokenResponse, Compute)> {
        let base = config.imds_endpoint.trim_end_matches('/');

        let mut query = vec![("api-version", TOKEN_API_VERSION), ("resource", config.resource.as_str())];
        if let Some(client_id) = &config.client_id {
            query.push(("client_id", client_id.as_str()));
        }
        let token: TokenResponse = fetch_json(
            self.http
                .get(format!("{base}/metadata/identity/oauth2/token"))
                .query(&query)
                .header("Metadata", "true"),
        )
        .await
        .map_err(|e| AcquisitionError::metadata(format!("identity token: {e}")))?;

        let instance: InstanceResponse = fetch_json(
            self.http
                .get(format!("{base}/metadata/instance"))
                .query(&[("api-version", INSTANCE_API_VERSION)])
                .header("Metadata", "true"),
        )
        .await
        .map_err(|e| AcquisitionError::metadata(format!("instance metadata: {e}")))?;

        Ok((token, instance.compute))
    }
}

#[async_trait]
impl CredentialProvider for AzureProvider {
    fn method(&self) -> AuthMethod {
        AuthMethod::Azure
    }

    #[instrument(skip_all, fields(method = "azure"))]
    async fn acquire(&self, config: &ProviderConfig) -> AcquisitionResult<Credential> {
        let ProviderConfig::Azure(config) = config else {
            return Err(mismatch(AuthMethod::Azure, config));
        };
        let role = required(config.role.as_deref(), "azure role")?;

        let (token, compute) = self.retry.execute(|| self.query_metadata(config)).await?;
        if token.access_token.is_empty() {
            return Err(AcquisitionError::metadata("identity token response has no access_token"));
        }
        debug!(vm = %compute.name, resource_group = %compute.resource_group_name, "Read managed identity");

        let mut credential = Credential::jwt(&config.mount, role, SecretString::from(token.access_token))
            .with_attribute("subscription_id", compute.subscription_id)
            .with_attribute("resource_group_name", compute.resource_group_name)
            .with_attribute("vm_name", compute.name);
        if !compute.vm_scale_set_name.is_empty() {
            credential = credential.with_attribute("vmss_name", compute.vm_scale_set_name);
        }
        if let Some(expires_at) = parse_expires_on(token.expires_on.as_ref()) {
            credential = credential.with_expiry(expires_at);
        }
        Ok(credential)
    }
}
