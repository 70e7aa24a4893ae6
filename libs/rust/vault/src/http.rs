//! Shared HTTP transport.
//!
//! One reqwest client serves Vault, the cloud metadata endpoints and the
//! cloud signing APIs. Its timeout is the only timeout in the crate.

use crate::config::VaultConfig;
use crate::error::{StoreError, StoreResult};
use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::de::DeserializeOwned;

/// Build the transport for `config`.
///
/// # Errors
///
/// Returns [`StoreError::Http`] if the client cannot be built (e.g. TLS
/// initialization fails).
pub fn build_http_client(config: &VaultConfig) -> StoreResult<Client> {
    ClientBuilder::new()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .use_rustls_tls()
        .build()
        .map_err(StoreError::Http)
}

/// Render a non-success response body for an error message, keeping Vault's
/// `{"errors": [...]}` shape readable.
pub(crate) fn error_detail(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct VaultErrors {
        errors: Vec<String>,
    }

    match serde_json::from_str::<VaultErrors>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ => body.trim().to_string(),
    }
}

/// Send `request` and return the body of a success response.
///
/// Failures are flattened to a message; callers wrap it in their own error.
pub(crate) async fn fetch_text(request: RequestBuilder) -> Result<String, String> {
    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    let body = response.text().await.map_err(|e| e.to_string())?;
    if !status.is_success() {
        return Err(format!("HTTP {status}: {}", error_detail(&body)));
    }
    Ok(body)
}

/// [`fetch_text`], then parse the body as JSON.
pub(crate) async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, String> {
    let body = fetch_text(request).await?;
    serde_json::from_str(&body).map_err(|e| format!("malformed response: {e}"))
}
