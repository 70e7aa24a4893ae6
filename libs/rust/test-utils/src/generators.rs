//! Shared proptest generators for broker domain types.

use proptest::prelude::*;
use secrecy::SecretString;
use std::collections::BTreeMap;
use vault_broker::{AuthMethod, Credential, CredentialKind};

/// Any auth method.
pub fn auth_method_strategy() -> impl Strategy<Value = AuthMethod> {
    prop::sample::select(AuthMethod::ALL.to_vec())
}

/// Secret material long enough never to collide with field names in
/// `Debug` output.
pub fn secret_value_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9!@#$%^&*]{12,64}"
}

/// Vault role names.
pub fn role_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,20}"
}

/// KV paths, with or without a leading slash.
pub fn secret_path_strategy() -> impl Strategy<Value = String> {
    (
        prop::bool::ANY,
        prop::collection::vec("[a-z][a-z0-9-]{0,20}", 1..4),
    )
        .prop_map(|(leading_slash, segments)| {
            let path = segments.join("/");
            if leading_slash { format!("/{path}") } else { path }
        })
}

/// KV v2 secret data.
pub fn kv_data_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z][a-z0-9_]{0,15}", "[ -~]{0,40}", 1..6)
}

/// Credential kinds.
pub fn credential_kind_strategy() -> impl Strategy<Value = CredentialKind> {
    prop_oneof![
        Just(CredentialKind::Token),
        Just(CredentialKind::RoleSecret),
        Just(CredentialKind::SignedRequest),
        Just(CredentialKind::Jwt),
        Just(CredentialKind::Password),
    ]
}

/// A credential of any kind together with its secret value.
pub fn credential_strategy() -> impl Strategy<Value = (Credential, String)> {
    (credential_kind_strategy(), secret_value_strategy(), role_strategy()).prop_map(|(kind, value, role)| {
        let secret = SecretString::from(value.clone());
        let credential = match kind {
            CredentialKind::Token => Credential::token(secret),
            CredentialKind::RoleSecret => Credential::role_secret(role, secret),
            CredentialKind::Password => Credential::password(role, secret),
            CredentialKind::Jwt => Credential::jwt("kubernetes", role, secret),
            CredentialKind::SignedRequest => Credential::new(kind, secret, "aws").with_role(role),
        };
        (credential, value)
    })
}
