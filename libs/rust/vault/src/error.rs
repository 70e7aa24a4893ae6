//! Broker error types using thiserror 2.0.
//!
//! Three layers: [`StoreError`] for the secret store collaborator,
//! [`AcquisitionError`] for credential providers and [`BrokerError`] for the
//! orchestrator. Each carries a retryability classification.

use crate::config::AuthMethod;
use thiserror::Error;

/// Errors raised by a secret store (Vault HTTP API or in-memory store).
#[derive(Error, Debug)]
pub enum StoreError {
    /// Vault server unavailable
    #[error("Vault unavailable: {0}")]
    Unavailable(String),

    /// Login or token rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Secret not found
    #[error("Secret not found at path: {0}")]
    SecretNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Request rejected as malformed or invalid
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Wrapping token already used, expired or malformed
    #[error("Wrapping token invalid: {0}")]
    InvalidWrappingToken(String),

    /// Rate limited
    #[error("Rate limited")]
    RateLimited,

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for secret store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Check if error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited | Self::Http(_))
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an authentication failed error.
    #[must_use]
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed(msg.into())
    }

    /// Create a secret not found error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::SecretNotFound(path.into())
    }
}

/// Errors raised while turning ambient identity into a [`crate::Credential`].
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// A required configuration value is absent
    #[error("Missing required configuration: {0}")]
    ConfigMissing(&'static str),

    /// The static token is empty
    #[error("No credential was provided")]
    MissingCredential,

    /// Provider was handed the configuration of another method
    #[error("Provider for {expected} received configuration for {actual}")]
    MethodMismatch {
        /// Method the provider implements
        expected: AuthMethod,
        /// Method the configuration belongs to
        actual: AuthMethod,
    },

    /// Response-wrapping token could not be unwrapped
    #[error("Wrapping token invalid: {0}")]
    WrappingTokenInvalid(String),

    /// Token file missing, unreadable or empty
    #[error("Token file unreadable at {path}: {reason}")]
    TokenFileUnreadable {
        /// File path
        path: String,
        /// Underlying cause
        reason: String,
    },

    /// AWS credentials absent or request signing failed
    #[error("AWS request signing failed: {0}")]
    SigningError(String),

    /// GCP IAM JWT signing failed
    #[error("GCP JWT signing failed: {0}")]
    JwtSigningError(String),

    /// Instance metadata endpoint unreachable or malformed
    #[error("Instance metadata unavailable: {0}")]
    MetadataUnavailable(String),
}

/// Result type for credential acquisition.
pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

impl AcquisitionError {
    /// Only metadata hiccups are worth a (bounded) retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::MetadataUnavailable(_))
    }

    /// Create a token file error.
    #[must_use]
    pub fn token_file(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TokenFileUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a metadata error.
    #[must_use]
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::MetadataUnavailable(msg.into())
    }
}

/// Errors surfaced by the [`crate::Broker`].
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Provider could not produce a credential
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    /// Vault rejected the credential at login
    #[error("Vault login failed: {0}")]
    Login(#[source] StoreError),

    /// No provider registered for the selected method
    #[error("No provider registered for auth method {0}")]
    UnsupportedMethod(AuthMethod),

    /// Reading the secret failed
    #[error("Secret read failed: {0}")]
    SecretRead(#[source] StoreError),

    /// Secret has no such key
    #[error("Key {key} not present in secret {path}")]
    KeyNotFound {
        /// Secret path
        path: String,
        /// Requested key
        key: String,
    },
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// True for failures that happened before a secret could be read.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::Acquisition(_) | Self::Login(_) | Self::UnsupportedMethod(_)
        )
    }

    /// Never retried automatically; exposed so callers can decide.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Acquisition(e) => e.is_retryable(),
            Self::Login(e) | Self::SecretRead(e) => e.is_retryable(),
            Self::UnsupportedMethod(_) | Self::KeyNotFound { .. } => false,
        }
    }
}
