//! In-process secret store for tests and local runs.
//!
//! Mirrors the KV v2 and response-wrapping semantics the broker relies on:
//! writes create versions, and a wrapping token unwraps at most once.

use crate::{
    credential::{Credential, CredentialKind},
    error::{StoreError, StoreResult},
    secrets::{normalize_path, Secret},
    store::{SecretStore, StoreConnector},
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug)]
struct Inner {
    secrets: RwLock<HashMap<String, Vec<BTreeMap<String, String>>>>,
    wrapped: Mutex<HashMap<String, Map<String, Value>>>,
    next_id: AtomicU64,
    default_mount: String,
}

/// KV store held in memory. Clones share state.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
    token: Option<SecretString>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("default_mount", &self.inner.default_mount)
            .field("bound", &self.token.is_some())
            .finish()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store with the dev-mode `secret` mount as default.
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_mount(crate::config::DEFAULT_KV_MOUNT)
    }

    /// Empty store with a custom default mount.
    #[must_use]
    pub fn with_default_mount(mount: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                secrets: RwLock::new(HashMap::new()),
                wrapped: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                default_mount: mount.into(),
            }),
            token: None,
        }
    }

    /// A handle sharing this store's state, bound to `token`.
    #[must_use]
    pub fn bind(&self, token: SecretString) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            token: Some(token),
        }
    }

    /// Wrap `payload`, returning the single-use wrapping token.
    pub async fn wrap(&self, payload: Map<String, Value>) -> SecretString {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = format!("hvs.wrapping-{id:08}");
        self.inner.wrapped.lock().await.insert(token.clone(), payload);
        SecretString::from(token)
    }

    /// Number of wrapping tokens not yet unwrapped.
    pub async fn pending_wraps(&self) -> usize {
        self.inner.wrapped.lock().await.len()
    }

    fn key(&self, path: &str, mount: Option<&str>) -> String {
        let mount = mount.unwrap_or(&self.inner.default_mount).trim_matches('/');
        format!("{mount}/{}", normalize_path(path))
    }
}

#[async_trait]
impl SecretStore for InMemoryStore {
    async fn read(&self, path: &str, mount: Option<&str>) -> StoreResult<Secret> {
        let key = self.key(path, mount);
        let secrets = self.inner.secrets.read().await;
        let versions = secrets
            .get(&key)
            .ok_or_else(|| StoreError::not_found(normalize_path(path)))?;
        let latest = versions
            .last()
            .ok_or_else(|| StoreError::not_found(normalize_path(path)))?;
        Ok(Secret {
            path: normalize_path(path).to_string(),
            data: latest.clone(),
            version: Some(versions.len() as u64),
        })
    }

    async fn write(
        &self,
        path: &str,
        data: &BTreeMap<String, String>,
        mount: Option<&str>,
    ) -> StoreResult<()> {
        let key = self.key(path, mount);
        self.inner
            .secrets
            .write()
            .await
            .entry(key)
            .or_default()
            .push(data.clone());
        Ok(())
    }

    async fn unwrap(&self, wrapping_token: Option<&SecretString>) -> StoreResult<Map<String, Value>> {
        let token = wrapping_token
            .or(self.token.as_ref())
            .ok_or_else(|| StoreError::InvalidWrappingToken("no wrapping token supplied".to_string()))?;
        self.inner
            .wrapped
            .lock()
            .await
            .remove(token.expose_secret())
            .ok_or_else(|| {
                StoreError::InvalidWrappingToken("wrapping token is not valid or does not exist".to_string())
            })
    }
}

/// Connector over an [`InMemoryStore`] that records every credential it is
/// handed.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    store: InMemoryStore,
    logins: Mutex<Vec<Credential>>,
    reject_logins: Option<String>,
}

impl MemoryConnector {
    /// Connector that accepts every credential.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            logins: Mutex::new(Vec::new()),
            reject_logins: None,
        }
    }

    /// Connector that rejects non-token logins with `reason`.
    #[must_use]
    pub fn rejecting(store: InMemoryStore, reason: impl Into<String>) -> Self {
        Self {
            reject_logins: Some(reason.into()),
            ..Self::new(store)
        }
    }

    /// Credentials seen so far, in order.
    pub async fn logins(&self) -> Vec<Credential> {
        self.logins.lock().await.clone()
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &InMemoryStore {
        &self.store
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, credential: &Credential) -> StoreResult<Box<dyn SecretStore>> {
        self.logins.lock().await.push(credential.clone());

        let token = if credential.kind() == CredentialKind::Token {
            SecretString::from(credential.expose_value().to_string())
        } else {
            if let Some(reason) = &self.reject_logins {
                return Err(StoreError::auth_failed(reason.clone()));
            }
            let id = self.store.inner.next_id.fetch_add(1, Ordering::Relaxed);
            SecretString::from(format!("hvs.memory-{id:08}"))
        };
        Ok(Box::new(self.store.bind(token)))
    }
}
