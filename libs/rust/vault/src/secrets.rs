//! Secret types and Vault wire structures.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A key-value secret read from the store.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    /// Path the secret was read from (relative to its mount)
    pub path: String,
    /// Key-value payload
    pub data: BTreeMap<String, String>,
    /// KV v2 version, when the store reports one
    pub version: Option<u64>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("path", &self.path)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("version", &self.version)
            .finish()
    }
}

impl Secret {
    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Build from a KV v2 `data` object. Non-string values keep their
    /// compact JSON text.
    #[must_use]
    pub fn from_json(path: impl Into<String>, data: Map<String, Value>, version: Option<u64>) -> Self {
        let data = data
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect();
        Self {
            path: path.into(),
            data,
            version,
        }
    }
}

/// Strip leading and trailing slashes from a secret path.
#[must_use]
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Vault KV v2 read response.
#[derive(Debug, Deserialize)]
pub struct KvResponse {
    /// Payload wrapper
    pub data: KvData,
}

/// KV v2 payload wrapper.
#[derive(Debug, Deserialize)]
pub struct KvData {
    /// Secret payload; `null` for a soft-deleted version
    pub data: Option<Map<String, Value>>,
    /// Version metadata
    pub metadata: Option<KvMetadata>,
}

/// KV v2 version metadata.
#[derive(Debug, Deserialize)]
pub struct KvMetadata {
    /// Creation time (RFC 3339)
    #[serde(default)]
    pub created_time: String,
    /// Deletion time, empty when live
    #[serde(default)]
    pub deletion_time: String,
    /// Destroyed flag
    #[serde(default)]
    pub destroyed: bool,
    /// Version number
    pub version: u64,
}

/// Vault auth response.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    /// Auth block
    pub auth: Option<AuthData>,
}

/// Auth block of a login or renew response.
#[derive(Debug, Deserialize)]
pub struct AuthData {
    /// Client token
    pub client_token: String,
    /// Token accessor
    #[serde(default)]
    pub accessor: String,
    /// Attached policies
    #[serde(default)]
    pub policies: Vec<String>,
    /// Lease duration in seconds
    #[serde(default)]
    pub lease_duration: u64,
    /// Whether the token can be renewed
    #[serde(default)]
    pub renewable: bool,
}

/// Response of `sys/wrapping/unwrap`.
#[derive(Debug, Deserialize)]
pub struct UnwrapResponse {
    /// Unwrapped payload
    pub data: Option<Map<String, Value>>,
}
