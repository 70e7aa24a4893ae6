//! Vault credential broker.
//!
//! Turns ambient workload identity into a Vault login and reads KV v2
//! secrets:
//!
//! - [`providers`]: one [`CredentialProvider`] per auth method
//! - [`store`]: the [`SecretStore`] capability, over HTTP or in memory
//! - [`Broker`]: provider, login and read in one call
//!
//! ```no_run
//! use std::sync::Arc;
//! use vault_broker::http::build_http_client;
//! use vault_broker::{AuthMethod, Broker, ProcessEnv, ProviderConfig, VaultConfig, VaultConnector};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let env = ProcessEnv;
//! let vault = VaultConfig::from_env(&env)?;
//! let http = build_http_client(&vault)?;
//! let connector = VaultConnector::with_client(vault, http.clone());
//! let broker = Broker::with_default_providers(Arc::new(connector), http);
//!
//! let config = ProviderConfig::from_env(AuthMethod::Token, &env)?;
//! let secret = broker.fetch_secret(AuthMethod::Token, &config, "creds").await?;
//! println!("read {} keys", secret.data.len());
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod providers;
pub mod retry;
pub mod secrets;
pub mod store;
pub mod telemetry;

pub use broker::Broker;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AuthMethod, ConfigError, EnvSource, ProcessEnv, VaultConfig};
pub use credential::{Credential, CredentialKind};
pub use error::{AcquisitionError, AcquisitionResult, BrokerError, BrokerResult, StoreError, StoreResult};
pub use providers::{CredentialProvider, ProviderConfig, ProviderRegistry};
pub use retry::{RetryConfig, RetryPolicy};
pub use secrets::Secret;
pub use store::{InMemoryStore, MemoryConnector, SecretStore, StoreConnector, VaultClient, VaultConnector};
pub use telemetry::{init_tracing, TracingConfig};
