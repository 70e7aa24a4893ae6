//! Vault HTTP client.

use crate::{
    config::VaultConfig,
    credential::{Credential, CredentialKind},
    error::{StoreError, StoreResult},
    http::{build_http_client, error_detail},
    secrets::{normalize_path, AuthResponse, KvResponse, Secret, UnwrapResponse},
    store::{SecretStore, StoreConnector},
};
use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, info, instrument, warn};

/// A Vault client bound to one client token.
pub struct VaultClient {
    config: VaultConfig,
    http: Client,
    token: SecretString,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("addr", &self.config.addr)
            .field("namespace", &self.config.namespace)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl VaultClient {
    /// Bind a client to an existing token.
    #[must_use]
    pub const fn new(config: VaultConfig, http: Client, token: SecretString) -> Self {
        Self { config, http, token }
    }

    /// Exchange a non-token credential for a client token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AuthenticationFailed`] when Vault rejects the
    /// credential or answers without a client token, and
    /// [`StoreError::InvalidConfig`] when the credential lacks its login path.
    #[instrument(skip(config, http, credential), fields(mount = credential.mount(), kind = ?credential.kind()))]
    pub async fn login(config: VaultConfig, http: Client, credential: &Credential) -> StoreResult<Self> {
        if credential.kind() == CredentialKind::Token {
            return Ok(Self::new(
                config,
                http,
                SecretString::from(credential.expose_value().to_string()),
            ));
        }
        let (Some(path), Some(body)) = (credential.login_path(), credential.login_body()) else {
            return Err(StoreError::InvalidConfig(format!(
                "{:?} credential for mount {} has no login path",
                credential.kind(),
                credential.mount()
            )));
        };

        let response: AuthResponse = send(&config, &http, Method::POST, &path, None, Some(body))
            .await
            .map_err(|e| match e {
                StoreError::BadRequest(msg) | StoreError::PermissionDenied(msg) => {
                    StoreError::auth_failed(msg)
                }
                other => other,
            })?;

        let auth = response
            .auth
            .filter(|auth| !auth.client_token.is_empty())
            .ok_or_else(|| StoreError::auth_failed("login response did not return client token"))?;

        info!(
            ttl_secs = auth.lease_duration,
            renewable = auth.renewable,
            policies = ?auth.policies,
            "Authenticated with Vault"
        );
        Ok(Self::new(config, http, SecretString::from(auth.client_token)))
    }

    /// Renew the bound token's lease, returning the new TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if Vault refuses the renewal.
    #[instrument(skip(self))]
    pub async fn renew_self(&self, increment: Duration) -> StoreResult<Duration> {
        let body = json!({ "increment": format!("{}s", increment.as_secs()) });
        let response: AuthResponse = self
            .request(Method::POST, "auth/token/renew-self", Some(body))
            .await?;
        let auth = response
            .auth
            .ok_or_else(|| StoreError::auth_failed("renewal response did not return auth data"))?;
        debug!(ttl_secs = auth.lease_duration, "Renewed token");
        Ok(Duration::from_secs(auth.lease_duration))
    }

    fn kv_path(&self, path: &str, mount: Option<&str>) -> String {
        let mount = mount.unwrap_or(&self.config.kv_mount).trim_matches('/');
        format!("{mount}/data/{}", normalize_path(path))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> StoreResult<T> {
        send(&self.config, &self.http, method, path, Some(&self.token), body).await
    }
}

async fn send<T: DeserializeOwned>(
    config: &VaultConfig,
    http: &Client,
    method: Method,
    path: &str,
    token: Option<&SecretString>,
    body: Option<Value>,
) -> StoreResult<T> {
    let url = config
        .api_url(path)
        .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;

    let mut request = http.request(method, url).header("X-Vault-Request", "true");
    if let Some(token) = token {
        request = request.header("X-Vault-Token", token.expose_secret());
    }
    if let Some(namespace) = &config.namespace {
        request = request.header("X-Vault-Namespace", namespace);
    }
    if let Some(b) = body {
        request = request.json(&b);
    }

    let response = request
        .send()
        .await
        .map_err(|e| StoreError::unavailable(e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| StoreError::unavailable(format!("reading response body: {e}")))?;
    match status.as_u16() {
        400 => return Err(StoreError::BadRequest(error_detail(&text))),
        403 => return Err(StoreError::PermissionDenied(format!("{path}: {}", error_detail(&text)))),
        404 => return Err(StoreError::not_found(path)),
        429 => return Err(StoreError::RateLimited),
        _ if !status.is_success() => {
            warn!(path, status = status.as_u16(), "Vault request failed");
            return Err(StoreError::unavailable(format!(
                "Status {status}: {}",
                error_detail(&text)
            )));
        }
        _ => {}
    }

    let value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text)?
    };
    serde_json::from_value(value).map_err(StoreError::from)
}

#[async_trait]
impl SecretStore for VaultClient {
    #[instrument(skip(self))]
    async fn read(&self, path: &str, mount: Option<&str>) -> StoreResult<Secret> {
        debug!("Reading secret");
        let api_path = self.kv_path(path, mount);
        let response: KvResponse = self
            .request(Method::GET, &api_path, None)
            .await
            .map_err(|e| match e {
                StoreError::SecretNotFound(_) => StoreError::not_found(normalize_path(path)),
                other => other,
            })?;

        let data = response
            .data
            .data
            .ok_or_else(|| StoreError::not_found(normalize_path(path)))?;
        let version = response.data.metadata.map(|m| m.version);
        Ok(Secret::from_json(normalize_path(path), data, version))
    }

    #[instrument(skip(self, data), fields(keys = data.len()))]
    async fn write(
        &self,
        path: &str,
        data: &BTreeMap<String, String>,
        mount: Option<&str>,
    ) -> StoreResult<()> {
        let api_path = self.kv_path(path, mount);
        let body = json!({ "data": data });
        self.request::<Value>(Method::POST, &api_path, Some(body))
            .await?;
        debug!("Wrote secret");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn unwrap(&self, wrapping_token: Option<&SecretString>) -> StoreResult<Map<String, Value>> {
        let body = wrapping_token.map(|token| json!({ "token": token.expose_secret() }));
        // With an explicit token in the body the call is made with our own
        // token; otherwise our token is the wrapping token.
        let response: UnwrapResponse = self
            .request(Method::POST, "sys/wrapping/unwrap", body)
            .await
            .map_err(|e| match e {
                StoreError::BadRequest(msg) | StoreError::PermissionDenied(msg) => {
                    StoreError::InvalidWrappingToken(msg)
                }
                StoreError::SecretNotFound(_) => {
                    StoreError::InvalidWrappingToken("wrapping token does not exist".to_string())
                }
                other => other,
            })?;

        response
            .data
            .ok_or_else(|| StoreError::InvalidWrappingToken("unwrap returned no data".to_string()))
    }
}

/// Connects [`VaultClient`]s over one shared transport.
#[derive(Debug, Clone)]
pub struct VaultConnector {
    config: VaultConfig,
    http: Client,
}

impl VaultConnector {
    /// Create a connector with its own transport.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Http`] if the transport cannot be built.
    pub fn new(config: VaultConfig) -> StoreResult<Self> {
        let http = build_http_client(&config)?;
        Ok(Self { config, http })
    }

    /// Create a connector over an existing transport.
    #[must_use]
    pub const fn with_client(config: VaultConfig, http: Client) -> Self {
        Self { config, http }
    }

    /// Log in, returning the concrete client.
    ///
    /// # Errors
    ///
    /// See [`VaultClient::login`].
    pub async fn login(&self, credential: &Credential) -> StoreResult<VaultClient> {
        if credential.kind() == CredentialKind::Token {
            return Ok(VaultClient::new(
                self.config.clone(),
                self.http.clone(),
                SecretString::from(credential.expose_value().to_string()),
            ));
        }
        VaultClient::login(self.config.clone(), self.http.clone(), credential).await
    }
}

#[async_trait]
impl StoreConnector for VaultConnector {
    async fn connect(&self, credential: &Credential) -> StoreResult<Box<dyn SecretStore>> {
        Ok(Box::new(self.login(credential).await?))
    }
}
