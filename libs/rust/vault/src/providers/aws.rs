//! AWS IAM login.
//!
//! Vault verifies the caller by replaying a signed STS `GetCallerIdentity`
//! request. The request is signed here and shipped to Vault as base64 login
//! fields; AWS itself is never contacted.

use super::sigv4::{self, AwsCredentials, Scope, UnsignedRequest};
use super::{mismatch, required, CredentialProvider, ProviderConfig};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthMethod, EnvSource};
use crate::credential::{Credential, CredentialKind};
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::http::{fetch_json, fetch_text};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Region whose STS endpoint is the global one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// EC2 instance metadata base URL.
pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";

/// Header Vault checks against its configured server id.
pub const SERVER_ID_HEADER: &str = "X-Vault-AWS-IAM-Server-ID";

const STS_BODY: &str = "Action=GetCallerIdentity&Version=2011-06-15";
const STS_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const IMDS_TOKEN_TTL_SECS: &str = "21600";
const SIGNATURE_VALIDITY_MINUTES: i64 = 15;

/// AWS IAM method configuration.
#[derive(Debug, Clone)]
pub struct AwsIamConfig {
    /// Vault role
    pub role: Option<String>,
    /// Signing region
    pub region: String,
    /// Static access key id
    pub access_key_id: Option<String>,
    /// Static secret access key
    pub secret_access_key: Option<SecretString>,
    /// Session token for temporary static credentials
    pub session_token: Option<SecretString>,
    /// Value for the `X-Vault-AWS-IAM-Server-ID` header
    pub server_id: Option<String>,
    /// STS endpoint override
    pub sts_endpoint: Option<String>,
    /// Instance metadata base URL
    pub imds_endpoint: String,
    /// Auth mount
    pub mount: String,
}

impl Default for AwsIamConfig {
    fn default() -> Self {
        Self {
            role: None,
            region: DEFAULT_REGION.to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            server_id: None,
            sts_endpoint: None,
            imds_endpoint: DEFAULT_IMDS_ENDPOINT.to_string(),
            mount: AuthMethod::AwsIam.default_mount().to_string(),
        }
    }
}

impl AwsIamConfig {
    /// Configuration for `role` using instance credentials.
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Default::default()
        }
    }

    /// Use static credentials instead of the instance profile.
    #[must_use]
    pub fn with_static_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(SecretString::from(secret_access_key.into()));
        self.session_token = session_token.map(SecretString::from);
        self
    }

    /// Load role, region, credentials and endpoints from `env`.
    pub fn from_env(env: &impl EnvSource) -> Self {
        let defaults = Self::default();
        Self {
            role: env.first_of(&["AWS_ROLE_NAME", "VAULT_ROLE"]),
            region: env
                .first_of(&["AWS_REGION", "AWS_DEFAULT_REGION"])
                .unwrap_or(defaults.region),
            access_key_id: env.non_empty("AWS_ACCESS_KEY_ID"),
            secret_access_key: env.non_empty("AWS_SECRET_ACCESS_KEY").map(SecretString::from),
            session_token: env.non_empty("AWS_SESSION_TOKEN").map(SecretString::from),
            server_id: env.non_empty("VAULT_AWS_IAM_SERVER_ID"),
            sts_endpoint: env.non_empty("AWS_STS_ENDPOINT"),
            imds_endpoint: env
                .non_empty("AWS_EC2_METADATA_SERVICE_ENDPOINT")
                .unwrap_or(defaults.imds_endpoint),
            mount: env.non_empty("AWS_AUTH_MOUNT").unwrap_or(defaults.mount),
        }
    }

    /// STS endpoint for the configured region.
    #[must_use]
    pub fn sts_url(&self) -> String {
        if let Some(endpoint) = &self.sts_endpoint {
            return endpoint.clone();
        }
        if self.region == DEFAULT_REGION {
            "https://sts.amazonaws.com/".to_string()
        } else {
            format!("https://sts.{}.amazonaws.com/", self.region)
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<DateTime<Utc>>,
}

/// Signs an STS `GetCallerIdentity` request for Vault to replay.
pub struct AwsIamProvider {
    http: Client,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AwsIamProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsIamProvider").finish_non_exhaustive()
    }
}

impl AwsIamProvider {
    /// Provider using `http` for instance metadata.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self {
            http,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the signing clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn credentials(&self, config: &AwsIamConfig) -> AcquisitionResult<(AwsCredentials, Option<DateTime<Utc>>)> {
        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Ok((
                AwsCredentials {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    session_token: config.session_token.clone(),
                },
                None,
            )),
            (None, None) => self.instance_credentials(&config.imds_endpoint).await,
            _ => Err(AcquisitionError::SigningError(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together".to_string(),
            )),
        }
    }

    /// Instance-profile credentials over IMDSv2.
    async fn instance_credentials(&self, base: &str) -> AcquisitionResult<(AwsCredentials, Option<DateTime<Utc>>)> {
        let base = base.trim_end_matches('/');
        let no_credentials = |e: String| AcquisitionError::SigningError(format!("no AWS credentials available: {e}"));

        let session = fetch_text(
            self.http
                .put(format!("{base}/latest/api/token"))
                .header("X-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECS),
        )
        .await
        .map_err(no_credentials)?;

        let listing_url = format!("{base}/latest/meta-data/iam/security-credentials/");
        let profiles = fetch_text(
            self.http
                .get(&listing_url)
                .header("X-aws-ec2-metadata-token", session.trim()),
        )
        .await
        .map_err(no_credentials)?;
        let profile = profiles
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| no_credentials("instance has no IAM profile".to_string()))?;
        debug!(profile, "Using instance profile credentials");

        let creds: InstanceCredentials = fetch_json(
            self.http
                .get(format!("{listing_url}{profile}"))
                .header("X-aws-ec2-metadata-token", session.trim()),
        )
        .await
        .map_err(no_credentials)?;

        Ok((
            AwsCredentials {
                access_key_id: creds.access_key_id,
                secret_access_key: SecretString::from(creds.secret_access_key),
                session_token: creds.token.map(SecretString::from),
            },
            creds.expiration,
        ))
    }
}

#[async_trait]
impl CredentialProvider for AwsIamProvider {
    fn method(&self) -> AuthMethod {
        AuthMethod::AwsIam
    }

    #[instrument(skip_all, fields(method = "aws", region))]
    async fn acquire(&self, config: &ProviderConfig) -> AcquisitionResult<Credential> {
        let ProviderConfig::AwsIam(config) = config else {
            return Err(mismatch(AuthMethod::AwsIam, config));
        };
        let role = required(config.role.as_deref(), "aws role")?;
        tracing::Span::current().record("region", config.region.as_str());

        let (credentials, credentials_expiry) = self.credentials(config).await?;

        let sts_url = config.sts_url();
        let url = Url::parse(&sts_url).map_err(|e| AcquisitionError::SigningError(format!("{sts_url}: {e}")))?;
        let mut headers = BTreeMap::from([("Content-Type".to_string(), STS_CONTENT_TYPE.to_string())]);
        if let Some(server_id) = &config.server_id {
            headers.insert(SERVER_ID_HEADER.to_string(), server_id.clone());
        }
        let request = UnsignedRequest {
            method: "POST".to_string(),
            url,
            headers,
            body: STS_BODY.to_string(),
        };

        let now = self.clock.now();
        let scope = Scope {
            region: &config.region,
            service: "sts",
            time: now,
        };
        let signed = sigv4::sign(&request, &credentials, &scope)?;

        let header_values: BTreeMap<&str, [&str; 1]> =
            signed.iter().map(|(name, value)| (name.as_str(), [value.as_str()])).collect();
        let headers_json =
            serde_json::to_string(&header_values).map_err(|e| AcquisitionError::SigningError(e.to_string()))?;

        let mut expires_at = now + Duration::minutes(SIGNATURE_VALIDITY_MINUTES);
        if let Some(expiry) = credentials_expiry {
            expires_at = expires_at.min(expiry);
        }

        debug!(role, sts_url = %sts_url, "Signed GetCallerIdentity request");
        Ok(
            Credential::new(CredentialKind::SignedRequest, SecretString::from(STANDARD.encode(headers_json)), &config.mount)
                .with_role(role)
                .with_attribute("iam_http_request_method", request.method)
                .with_attribute("iam_request_url", STANDARD.encode(sts_url))
                .with_attribute("iam_request_body", STANDARD.encode(STS_BODY))
                .with_expiry(expires_at),
        )
    }
}
