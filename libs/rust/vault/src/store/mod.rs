//! Secret store capability.
//!
//! The broker only ever talks to Vault through these two traits, so tests
//! and local runs can swap in [`memory::InMemoryStore`].

pub mod memory;
pub mod vault;

use crate::credential::Credential;
use crate::error::StoreResult;
use crate::secrets::Secret;
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub use memory::{InMemoryStore, MemoryConnector};
pub use vault::{VaultClient, VaultConnector};

/// An authenticated handle on a key-value secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the KV v2 secret at `path` under `mount` (store default when
    /// `None`).
    async fn read(&self, path: &str, mount: Option<&str>) -> StoreResult<Secret>;

    /// Write `data` as a new version of the secret at `path`.
    async fn write(
        &self,
        path: &str,
        data: &BTreeMap<String, String>,
        mount: Option<&str>,
    ) -> StoreResult<()>;

    /// Unwrap a response-wrapped payload.
    ///
    /// With `None` the handle's own token is used as the wrapping token, so a
    /// store bound to a wrapping token spends it exactly once.
    async fn unwrap(&self, wrapping_token: Option<&SecretString>) -> StoreResult<Map<String, Value>>;
}

/// Builds store handles bound to a credential.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Bind a store to `credential`, logging in first unless it is already a
    /// client token.
    async fn connect(&self, credential: &Credential) -> StoreResult<Box<dyn SecretStore>>;
}
