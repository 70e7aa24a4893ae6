//! AWS Signature Version 4.
//!
//! Only what the IAM login needs: header-based signing of a single request
//! with a known body.

use crate::error::{AcquisitionError, AcquisitionResult};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// AWS access key material.
#[derive(Clone)]
pub struct AwsCredentials {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: SecretString,
    /// Session token for temporary credentials
    pub session_token: Option<SecretString>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A request about to be signed.
#[derive(Debug, Clone)]
pub struct UnsignedRequest {
    /// HTTP method
    pub method: String,
    /// Full URL
    pub url: Url,
    /// Extra headers to sign, by display name
    pub headers: BTreeMap<String, String>,
    /// Request body
    pub body: String,
}

/// Credential scope: where and when a signature is valid.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// AWS region
    pub region: &'a str,
    /// Service name, e.g. `sts`
    pub service: &'a str,
    /// Signing time
    pub time: DateTime<Utc>,
}

impl Scope<'_> {
    fn date(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn credential_scope(&self) -> String {
        format!("{}/{}/{}/aws4_request", self.date(), self.region, self.service)
    }
}

fn hmac(key: &[u8], data: &[u8]) -> AcquisitionResult<Zeroizing<Vec<u8>>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| AcquisitionError::SigningError(e.to_string()))?;
    mac.update(data);
    Ok(Zeroizing::new(mac.finalize().into_bytes().to_vec()))
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive the signing key for `scope`.
///
/// # Errors
///
/// Returns [`AcquisitionError::SigningError`] if HMAC cannot be keyed.
pub fn signing_key(secret_access_key: &SecretString, scope: &Scope<'_>) -> AcquisitionResult<Zeroizing<Vec<u8>>> {
    let seed = Zeroizing::new(format!("AWS4{}", secret_access_key.expose_secret()));
    let k_date = hmac(seed.as_bytes(), scope.date().as_bytes())?;
    let k_region = hmac(&k_date, scope.region.as_bytes())?;
    let k_service = hmac(&k_region, scope.service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// RFC 3986 encoding with the unreserved set AWS expects.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k, true), uri_encode(&v, true)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn host_header(url: &Url) -> AcquisitionResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| AcquisitionError::SigningError(format!("URL has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Canonical request and signed-header list for `headers`.
fn canonical_request(request: &UnsignedRequest, headers: &BTreeMap<String, String>) -> (String, String) {
    let normalized: BTreeMap<String, String> = headers
        .iter()
        .map(|(name, value)| {
            let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
            (name.to_ascii_lowercase(), collapsed)
        })
        .collect();

    let canonical_headers: String = normalized
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = normalized.keys().cloned().collect::<Vec<_>>().join(";");

    let path = match request.url.path() {
        "" => "/",
        path => path,
    };

    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.to_ascii_uppercase(),
        uri_encode(path, false),
        canonical_query(&request.url),
        canonical_headers,
        signed_headers,
        sha256_hex(request.body.as_bytes()),
    );
    (canonical, signed_headers)
}

/// Sign `request`, returning every header the request must carry,
/// `Authorization` included.
///
/// # Errors
///
/// Returns [`AcquisitionError::SigningError`] for a URL without a host or
/// unusable key material.
pub fn sign(
    request: &UnsignedRequest,
    credentials: &AwsCredentials,
    scope: &Scope<'_>,
) -> AcquisitionResult<BTreeMap<String, String>> {
    if credentials.access_key_id.trim().is_empty() {
        return Err(AcquisitionError::SigningError("empty access key id".to_string()));
    }

    let mut headers = request.headers.clone();
    headers.insert("Host".to_string(), host_header(&request.url)?);
    headers.insert("X-Amz-Date".to_string(), scope.amz_date());
    if let Some(token) = &credentials.session_token {
        headers.insert("X-Amz-Security-Token".to_string(), token.expose_secret().to_string());
    }

    let (canonical, signed_headers) = canonical_request(request, &headers);
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{}\n{}",
        scope.amz_date(),
        scope.credential_scope(),
        sha256_hex(canonical.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, scope)?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?.as_slice());

    headers.insert(
        "Authorization".to_string(),
        format!(
            "{ALGORITHM} Credential={}/{}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id,
            scope.credential_scope()
        ),
    );
    Ok(headers)
}
