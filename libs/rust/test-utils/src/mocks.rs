//! Mock providers and connectors for broker tests.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vault_broker::{
    AcquisitionError, AcquisitionResult, AuthMethod, Credential, CredentialProvider, ProviderConfig, Secret,
    SecretStore, StoreConnector, StoreError, StoreResult,
};

/// What a [`CountingProvider`] answers with.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Hand out this credential
    Issue(Credential),
    /// Fail with the error built by this function
    Fail(fn() -> AcquisitionError),
}

/// Provider with a canned outcome that counts its calls.
#[derive(Debug, Clone)]
pub struct CountingProvider {
    method: AuthMethod,
    outcome: Outcome,
    calls: Arc<AtomicUsize>,
}

impl CountingProvider {
    /// Provider for `method` answering with `credential`.
    #[must_use]
    pub fn issuing(method: AuthMethod, credential: Credential) -> Self {
        Self {
            method,
            outcome: Outcome::Issue(credential),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Provider for `method` failing with `error()`.
    #[must_use]
    pub fn failing(method: AuthMethod, error: fn() -> AcquisitionError) -> Self {
        Self {
            method,
            outcome: Outcome::Fail(error),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Calls so far, shared across clones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    fn method(&self) -> AuthMethod {
        self.method
    }

    async fn acquire(&self, _config: &ProviderConfig) -> AcquisitionResult<Credential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Outcome::Issue(credential) => Ok(credential.clone()),
            Outcome::Fail(error) => Err(error()),
        }
    }
}

/// Store whose every call fails as if Vault were down.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

#[async_trait]
impl SecretStore for UnavailableStore {
    async fn read(&self, _path: &str, _mount: Option<&str>) -> StoreResult<Secret> {
        Err(StoreError::unavailable(self.reason.clone()))
    }

    async fn write(&self, _path: &str, _data: &BTreeMap<String, String>, _mount: Option<&str>) -> StoreResult<()> {
        Err(StoreError::unavailable(self.reason.clone()))
    }

    async fn unwrap(&self, _wrapping_token: Option<&secrecy::SecretString>) -> StoreResult<Map<String, Value>> {
        Err(StoreError::unavailable(self.reason.clone()))
    }
}

/// Connector that always connects, to an [`UnavailableStore`].
#[derive(Debug, Clone)]
pub struct UnavailableConnector {
    reason: String,
    connects: Arc<AtomicUsize>,
}

impl UnavailableConnector {
    /// Connector whose stores fail with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connections made so far.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for UnavailableConnector {
    async fn connect(&self, _credential: &Credential) -> StoreResult<Box<dyn SecretStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(UnavailableStore {
            reason: self.reason.clone(),
        }))
    }
}
