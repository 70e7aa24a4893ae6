//! Broker configuration.
//!
//! Everything is read once at startup through an [`EnvSource`] so tests can
//! inject a plain map instead of touching the process environment.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default Vault address used by dev-mode servers.
pub const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";

/// Default KV v2 mount in dev mode.
pub const DEFAULT_KV_MOUNT: &str = "secret";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl {
        /// Variable name
        field: String,
        /// Parser message
        reason: String,
    },

    /// Unknown auth method name
    #[error("Unknown auth method: {0}")]
    UnknownMethod(String),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser message
        reason: String,
    },
}

/// Source of configuration values.
pub trait EnvSource {
    /// Raw value of `key`, if set.
    fn var(&self, key: &str) -> Option<String>;

    /// Value of `key` when set to something other than whitespace.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key).filter(|v| !v.trim().is_empty())
    }

    /// First non-empty value among `keys`.
    fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.non_empty(key))
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvSource for HashMap<&str, &str> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| (*v).to_string())
    }
}

/// Supported Vault auth methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuthMethod {
    /// Static client token
    Token,
    /// AppRole with a response-wrapped secret id
    AppRole,
    /// AWS IAM signed `GetCallerIdentity`
    AwsIam,
    /// Azure managed identity
    Azure,
    /// Kubernetes service account
    Kubernetes,
    /// GCP IAM signed JWT
    GcpIam,
    /// Username and password
    Userpass,
}

impl AuthMethod {
    /// All methods, in registration order.
    pub const ALL: [Self; 7] = [
        Self::Token,
        Self::AppRole,
        Self::AwsIam,
        Self::Azure,
        Self::Kubernetes,
        Self::GcpIam,
        Self::Userpass,
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::AppRole => "approle",
            Self::AwsIam => "aws",
            Self::Azure => "azure",
            Self::Kubernetes => "kubernetes",
            Self::GcpIam => "gcp",
            Self::Userpass => "userpass",
        }
    }

    /// Path under `auth/` where Vault enables this method by default.
    #[must_use]
    pub const fn default_mount(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "approle" | "app-role" => Ok(Self::AppRole),
            "aws" | "aws-iam" | "iam" => Ok(Self::AwsIam),
            "azure" => Ok(Self::Azure),
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            "gcp" | "gcp-iam" => Ok(Self::GcpIam),
            "userpass" => Ok(Self::Userpass),
            other => Err(ConfigError::UnknownMethod(other.to_string())),
        }
    }
}

/// Vault connection settings shared by every method.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Vault server address, without trailing slash
    pub addr: String,
    /// Enterprise namespace sent as `X-Vault-Namespace`
    pub namespace: Option<String>,
    /// KV v2 mount used when a read or write names none
    pub kv_mount: String,
    /// Transport timeout for every HTTP call
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_VAULT_ADDR.to_string(),
            namespace: None,
            kv_mount: DEFAULT_KV_MOUNT.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("vault-broker/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl VaultConfig {
    /// Create a configuration for `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] when `addr` does not parse.
    pub fn new(addr: &str) -> Result<Self, ConfigError> {
        let parsed = parse_url("VAULT_ADDR", addr)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                field: "VAULT_ADDR".to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
        Ok(Self {
            addr: addr.trim_end_matches('/').to_string(),
            ..Default::default()
        })
    }

    /// Load from `VAULT_ADDR`, `VAULT_NAMESPACE`, `SECRET_MOUNT` and
    /// `VAULT_CLIENT_TIMEOUT` (seconds).
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but malformed.
    pub fn from_env(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let addr = env
            .non_empty("VAULT_ADDR")
            .unwrap_or_else(|| DEFAULT_VAULT_ADDR.to_string());
        let mut config = Self::new(&addr)?;
        config.namespace = env.non_empty("VAULT_NAMESPACE");
        if let Some(mount) = env.non_empty("SECRET_MOUNT") {
            config.kv_mount = mount.trim_matches('/').to_string();
        }
        if let Some(secs) = parse_env::<u64>(env, "VAULT_CLIENT_TIMEOUT")? {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the default KV mount.
    #[must_use]
    pub fn with_kv_mount(mut self, mount: impl Into<String>) -> Self {
        self.kv_mount = mount.into();
        self
    }

    /// Full URL of an API path under `/v1/`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the joined URL is invalid.
    pub fn api_url(&self, path: &str) -> Result<Url, ConfigError> {
        let path = path.trim_start_matches('/');
        parse_url("VAULT_ADDR", &format!("{}/v1/{path}", self.addr))
    }
}

/// Parse a URL, tagging the error with the originating field.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidUrl`] on parse failure.
pub fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an optional typed environment value.
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] when the value is set but malformed.
pub fn parse_env<T>(env: &impl EnvSource, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env.non_empty(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
