//! GCP IAM login.
//!
//! Vault's `iam` login type takes a JWT signed by Google on behalf of the
//! service account. Getting there takes two hops: an OAuth access token for
//! the workload, then a `signJwt` call on the IAM Credentials API.

use super::{mismatch, required, CredentialProvider, ProviderConfig};
use crate::clock::{Clock, SystemClock};
use crate::config::{parse_env, AuthMethod, ConfigError, EnvSource};
use crate::credential::Credential;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::http::{fetch_json, fetch_text};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// IAM Credentials API base URL.
pub const DEFAULT_IAM_ENDPOINT: &str = "https://iamcredentials.googleapis.com";

/// GCE metadata server base URL.
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://metadata.google.internal";

/// OAuth token endpoint used when the key file names none.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Default lifetime of the JWT handed to Vault.
pub const DEFAULT_JWT_TTL: std::time::Duration = std::time::Duration::from_secs(900);

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// GCP IAM method configuration.
#[derive(Debug, Clone)]
pub struct GcpIamConfig {
    /// Vault role
    pub role: Option<String>,
    /// Service account to sign as
    pub service_account_email: Option<String>,
    /// Service-account key file
    pub credentials_file: Option<PathBuf>,
    /// Lifetime of the signed JWT
    pub jwt_ttl: std::time::Duration,
    /// IAM Credentials API base URL
    pub iam_endpoint: String,
    /// Metadata server base URL
    pub metadata_endpoint: String,
    /// Auth mount
    pub mount: String,
}

impl Default for GcpIamConfig {
    fn default() -> Self {
        Self {
            role: None,
            service_account_email: None,
            credentials_file: None,
            jwt_ttl: DEFAULT_JWT_TTL,
            iam_endpoint: DEFAULT_IAM_ENDPOINT.to_string(),
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            mount: AuthMethod::GcpIam.default_mount().to_string(),
        }
    }
}

impl GcpIamConfig {
    /// Configuration for `role` signing as `service_account_email`.
    #[must_use]
    pub fn new(role: impl Into<String>, service_account_email: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            service_account_email: Some(service_account_email.into()),
            ..Default::default()
        }
    }

    /// Load role, service account and endpoints from `env`.
    ///
    /// The service account is `GCP_SERVICE_ACCOUNT_EMAIL`, or
    /// `<GCP_SERVICE_ACCOUNT_NAME>@<GOOGLE_CLOUD_PROJECT>.iam.gserviceaccount.com`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] for a malformed `GCP_JWT_TTL_SECS`.
    pub fn from_env(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let service_account_email = env.non_empty("GCP_SERVICE_ACCOUNT_EMAIL").or_else(|| {
            match (env.non_empty("GCP_SERVICE_ACCOUNT_NAME"), env.non_empty("GOOGLE_CLOUD_PROJECT")) {
                (Some(name), Some(project)) => Some(format!("{name}@{project}.iam.gserviceaccount.com")),
                _ => None,
            }
        });
        let metadata_endpoint = env
            .non_empty("GCE_METADATA_HOST")
            .map_or(defaults.metadata_endpoint, |host| format!("http://{host}"));

        Ok(Self {
            role: env.first_of(&["GCP_ROLE", "VAULT_ROLE"]),
            service_account_email,
            credentials_file: env.non_empty("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            jwt_ttl: parse_env::<u64>(env, "GCP_JWT_TTL_SECS")?
                .map_or(defaults.jwt_ttl, std::time::Duration::from_secs),
            iam_endpoint: env.non_empty("GCP_IAM_ENDPOINT").unwrap_or(defaults.iam_endpoint),
            metadata_endpoint,
            mount: env.non_empty("GCP_AUTH_MOUNT").unwrap_or(defaults.mount),
        })
    }
}

/// The fields of a service-account key file this provider uses.
#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignJwtResponse {
    signed_jwt: String,
}

/// The unsigned claims Vault expects for `role`.
fn vault_claims(role: &str, email: &str, exp: DateTime<Utc>) -> serde_json::Value {
    json!({
        "aud": format!("vault/{role}"),
        "sub": email,
        "exp": exp.timestamp(),
    })
}

fn signing_error(step: &str) -> impl Fn(String) -> AcquisitionError + '_ {
    move |e| AcquisitionError::JwtSigningError(format!("{step}: {e}"))
}

/// Has Google sign a Vault login JWT for the workload's service account.
pub struct GcpIamProvider {
    http: Client,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for GcpIamProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpIamProvider").finish_non_exhaustive()
    }
}

impl GcpIamProvider {
    /// Provider using `http` for Google APIs.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self {
            http,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for expiry claims.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Access token and key-file email from a service-account key.
    async fn key_file_token(&self, path: &Path) -> AcquisitionResult<(SecretString, String)> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AcquisitionError::JwtSigningError(format!("{}: {e}", path.display())))?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)
            .map_err(|e| AcquisitionError::JwtSigningError(format!("{}: {e}", path.display())))?;

        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let now = self.clock.now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&key.private_key_id);
        let private_key = SecretString::from(key.private_key);
        let encoding_key = EncodingKey::from_rsa_pem(private_key.expose_secret().as_bytes())
            .map_err(|e| AcquisitionError::JwtSigningError(format!("service account key: {e}")))?;
        let assertion = encode(&header, &claims, &encoding_key)
            .map_err(|e| AcquisitionError::JwtSigningError(format!("assertion: {e}")))?;

        let token: AccessToken = fetch_json(
            self.http
                .post(token_uri)
                .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())]),
        )
        .await
        .map_err(signing_error("token exchange"))?;

        Ok((SecretString::from(token.access_token), key.client_email))
    }

    /// Access token of the instance's default service account.
    async fn metadata_token(&self, base: &str) -> AcquisitionResult<SecretString> {
        let token: AccessToken = fetch_json(
            self.http
                .get(format!("{base}/computeMetadata/v1/instance/service-accounts/default/token"))
                .header("Metadata-Flavor", "Google"),
        )
        .await
        .map_err(signing_error("metadata token"))?;
        Ok(SecretString::from(token.access_token))
    }

    async fn metadata_email(&self, base: &str) -> AcquisitionResult<String> {
        let email = fetch_text(
            self.http
                .get(format!("{base}/computeMetadata/v1/instance/service-accounts/default/email"))
                .header("Metadata-Flavor", "Google"),
        )
        .await
        .map_err(signing_error("metadata email"))?;
        Ok(email.trim().to_string())
    }
}

#[async_trait]
impl CredentialProvider for GcpIamProvider {
    fn method(&self) -> AuthMethod {
        AuthMethod::GcpIam
    }

    #[instrument(skip_all, fields(method = "gcp"))]
    async fn acquire(&self, config: &ProviderConfig) -> AcquisitionResult<Credential> {
        let ProviderConfig::GcpIam(config) = config else {
            return Err(mismatch(AuthMethod::GcpIam, config));
        };
        let role = required(config.role.as_deref(), "gcp role")?;
        let metadata = config.metadata_endpoint.trim_end_matches('/');
        let ttl = Duration::from_std(config.jwt_ttl)
            .map_err(|e| AcquisitionError::JwtSigningError(format!("jwt ttl: {e}")))?;
        let exp = self.clock.now().checked_add_signed(ttl).ok_or_else(|| {
            AcquisitionError::JwtSigningError(format!("jwt ttl of {}s is out of range", config.jwt_ttl.as_secs()))
        })?;

        let (access_token, email) = if let Some(path) = &config.credentials_file {
            let (token, key_email) = self.key_file_token(path).await?;
            (token, config.service_account_email.clone().unwrap_or(key_email))
        } else {
            warn!("GOOGLE_APPLICATION_CREDENTIALS not set, using the metadata server");
            let token = self.metadata_token(metadata).await?;
            let email = match &config.service_account_email {
                Some(email) => email.clone(),
                None => self.metadata_email(metadata).await?,
            };
            (token, email)
        };

        let claims = vault_claims(role, &email, exp);

        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{email}:signJwt",
            config.iam_endpoint.trim_end_matches('/')
        );
        let signed: SignJwtResponse = fetch_json(
            self.http
                .post(url)
                .bearer_auth(access_token.expose_secret())
                .json(&json!({ "payload": claims.to_string() })),
        )
        .await
        .map_err(signing_error("signJwt"))?;

        if signed.signed_jwt.is_empty() {
            return Err(AcquisitionError::JwtSigningError("signJwt returned no token".to_string()));
        }
        debug!(role, service_account = %email, "Signed Vault login JWT");

        Ok(Credential::jwt(&config.mount, role, SecretString::from(signed.signed_jwt)).with_expiry(exp))
    }
}
