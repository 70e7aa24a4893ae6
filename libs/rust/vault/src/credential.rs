//! Credentials produced by providers and consumed at Vault login.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// What a credential's secret value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// A Vault client token, usable as-is
    Token,
    /// An AppRole secret id, paired with a `role_id` attribute
    RoleSecret,
    /// Base64 headers of a signed cloud request
    SignedRequest,
    /// A JWT issued by a cloud or cluster identity provider
    Jwt,
    /// A userpass password, paired with a `username` attribute
    Password,
}

impl CredentialKind {
    /// Login body field that carries the secret value.
    #[must_use]
    pub const fn login_field(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::RoleSecret => "secret_id",
            Self::SignedRequest => "iam_request_headers",
            Self::Jwt => "jwt",
            Self::Password => "password",
        }
    }
}

/// Bearer material for one authentication attempt.
///
/// Immutable once built; never cache beyond [`Credential::expires_at`].
#[derive(Clone)]
pub struct Credential {
    kind: CredentialKind,
    value: SecretString,
    mount: String,
    role: Option<String>,
    attributes: BTreeMap<String, String>,
    expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("value", &"[REDACTED]")
            .field("mount", &self.mount)
            .field("role", &self.role)
            .field("attributes", &self.attributes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// Generic constructor.
    #[must_use]
    pub fn new(kind: CredentialKind, value: SecretString, mount: impl Into<String>) -> Self {
        Self {
            kind,
            value,
            mount: mount.into(),
            role: None,
            attributes: BTreeMap::new(),
            expires_at: None,
        }
    }

    /// A ready-to-use client token.
    #[must_use]
    pub fn token(value: SecretString) -> Self {
        Self::new(CredentialKind::Token, value, "token")
    }

    /// An AppRole `role_id` / `secret_id` pair.
    #[must_use]
    pub fn role_secret(role_id: impl Into<String>, secret_id: SecretString) -> Self {
        Self::new(CredentialKind::RoleSecret, secret_id, "approle").with_attribute("role_id", role_id)
    }

    /// A JWT tagged with the Vault role it logs in as.
    #[must_use]
    pub fn jwt(mount: impl Into<String>, role: impl Into<String>, jwt: SecretString) -> Self {
        Self::new(CredentialKind::Jwt, jwt, mount).with_role(role)
    }

    /// A userpass username / password pair.
    #[must_use]
    pub fn password(username: impl Into<String>, password: SecretString) -> Self {
        Self::new(CredentialKind::Password, password, "userpass").with_attribute("username", username)
    }

    /// Override the auth mount.
    #[must_use]
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    /// Tag with a Vault role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Attach a non-secret login attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the expiry instant.
    #[must_use]
    pub const fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Credential kind.
    #[must_use]
    pub const fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// The secret value. Do not log it.
    #[must_use]
    pub fn expose_value(&self) -> &str {
        self.value.expose_secret()
    }

    /// Auth mount, without the `auth/` prefix.
    #[must_use]
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Vault role, if tagged.
    #[must_use]
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Look up a login attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All login attributes.
    #[must_use]
    pub const fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Expiry, if the issuer stated one.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True once `now` has reached the stated expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// API path of the login endpoint.
    ///
    /// `None` for a plain token, and for a password credential without a
    /// username.
    #[must_use]
    pub fn login_path(&self) -> Option<String> {
        let mount = self.mount.trim_matches('/');
        match self.kind {
            CredentialKind::Token => None,
            CredentialKind::Password => {
                let username = self.attribute("username").filter(|u| !u.is_empty())?;
                Some(format!("auth/{mount}/login/{}", urlencoding::encode(username)))
            }
            _ => Some(format!("auth/{mount}/login")),
        }
    }

    /// JSON body of the login request, or `None` for a plain token.
    #[must_use]
    pub fn login_body(&self) -> Option<Value> {
        if self.kind == CredentialKind::Token {
            return None;
        }

        let mut body = Map::new();
        for (key, value) in &self.attributes {
            if self.kind == CredentialKind::Password && key == "username" {
                continue;
            }
            body.insert(key.clone(), Value::String(value.clone()));
        }
        if let Some(role) = &self.role {
            body.insert("role".to_string(), Value::String(role.clone()));
        }
        body.insert(
            self.kind.login_field().to_string(),
            Value::String(self.value.expose_secret().to_string()),
        );
        Some(Value::Object(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_debug_redacts_value() {
        let cred = Credential::jwt("kubernetes", "dev-role-k8s", SecretString::from("eyJhbGciOi.payload.sig"));
        let debug = format!("{cred:?}");
        assert!(!debug.contains("eyJhbGciOi"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("dev-role-k8s"));
    }

    #[test]
    fn test_token_has_no_login() {
        let cred = Credential::token(SecretString::from("dev-only-token"));
        assert_eq!(cred.login_path(), None);
        assert_eq!(cred.login_body(), None);
        assert_eq!(cred.expose_value(), "dev-only-token");
    }

    #[test]
    fn test_role_secret_login_body() {
        let cred = Credential::role_secret("role-123", SecretString::from("secret-456"));
        assert_eq!(cred.login_path().as_deref(), Some("auth/approle/login"));
        assert_eq!(
            cred.login_body().unwrap(),
            serde_json::json!({"role_id": "role-123", "secret_id": "secret-456"})
        );
    }

    #[test]
    fn test_password_login_uses_username_in_path() {
        let cred = Credential::password("my-user", SecretString::from("my-password"));
        assert_eq!(cred.login_path().as_deref(), Some("auth/userpass/login/my-user"));
        assert_eq!(
            cred.login_body().unwrap(),
            serde_json::json!({"password": "my-password"})
        );
    }

    #[test]
    fn test_username_is_a_single_path_segment() {
        let cred = Credential::password("ops/admin?x=1", SecretString::from("p"));
        assert_eq!(
            cred.login_path().as_deref(),
            Some("auth/userpass/login/ops%2Fadmin%3Fx%3D1")
        );
    }

    #[test]
    fn test_password_without_username_has_no_login_path() {
        let cred = Credential::new(CredentialKind::Password, SecretString::from("p"), "userpass");
        assert_eq!(cred.login_path(), None);
        assert_eq!(Credential::password("", SecretString::from("p")).login_path(), None);
    }

    #[test]
    fn test_custom_mount() {
        let cred = Credential::jwt("kubernetes", "r", SecretString::from("j")).with_mount("/k8s-prod/");
        assert_eq!(cred.login_path().as_deref(), Some("auth/k8s-prod/login"));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let cred = Credential::token(SecretString::from("t")).with_expiry(now + Duration::seconds(60));
        assert!(!cred.is_expired(now));
        assert!(cred.is_expired(now + Duration::seconds(60)));
        assert!(!Credential::token(SecretString::from("t")).is_expired(now));
    }
}
