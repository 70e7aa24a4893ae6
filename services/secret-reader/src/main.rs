//! Secret Reader - Main Entry Point
//!
//! Authenticates to Vault with the method named by `VAULT_AUTH_METHOD` and
//! prints one key of one KV secret.

use std::sync::Arc;

use anyhow::Context;
use secrecy::ExposeSecret;
use tracing::{error, info};
use vault_broker::http::build_http_client;
use vault_broker::{
    init_tracing, AuthMethod, Broker, EnvSource, ProcessEnv, ProviderConfig, TracingConfig, VaultConfig,
    VaultConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment still applies.
    let _ = dotenvy::dotenv();

    let env = ProcessEnv;
    init_tracing(&TracingConfig::from_env(&env))?;

    let method: AuthMethod = env
        .non_empty("VAULT_AUTH_METHOD")
        .unwrap_or_else(|| "token".to_string())
        .parse()?;
    let path = env.non_empty("SECRET_PATH").unwrap_or_else(|| "creds".to_string());
    let key = env.non_empty("SECRET_KEY").unwrap_or_else(|| "password".to_string());

    let vault_config = VaultConfig::from_env(&env)?;
    let provider_config = ProviderConfig::from_env(method, &env)?;
    info!(%method, addr = %vault_config.addr, path = %path, "Starting Secret Reader");

    let http = build_http_client(&vault_config).context("building HTTP client")?;
    let connector = VaultConnector::with_client(vault_config, http.clone());
    let broker = Broker::with_default_providers(Arc::new(connector), http);

    match broker.fetch_secret_value(method, &provider_config, &path, &key).await {
        Ok(value) => {
            println!("{key}: {}", value.expose_secret());
            Ok(())
        }
        Err(e) => {
            error!(%method, auth_error = e.is_auth_error(), error = %e, "Could not read secret");
            Err(e).with_context(|| format!("reading {key} from {path}"))
        }
    }
}
