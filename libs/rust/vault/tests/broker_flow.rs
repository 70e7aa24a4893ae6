//! End-to-end broker flows: provider, login, read.

use broker_test_utils::fixtures::{
    env, secret_id_payload, seeded_store, token_env, vault_auth_body, vault_kv_body, vault_unwrap_body,
    DEV_TOKEN, SAMPLE_PASSWORD,
};
use broker_test_utils::mocks::{CountingProvider, UnavailableConnector};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use vault_broker::providers::{AppRoleConfig, KubernetesConfig};
use vault_broker::{
    AcquisitionError, AuthMethod, Broker, BrokerError, Credential, CredentialKind, MemoryConnector, ProviderConfig,
    StoreError, VaultConfig, VaultConnector,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_dev_token_reads_sample_password() {
    let connector = Arc::new(MemoryConnector::new(seeded_store().await));
    let broker = Broker::with_default_providers(connector.clone(), Client::new());

    let config = ProviderConfig::from_env(AuthMethod::Token, &token_env()).unwrap();
    let password = broker
        .fetch_secret_value(AuthMethod::Token, &config, "/my-secret-password", "password")
        .await
        .unwrap();

    assert_eq!(password.expose_secret(), SAMPLE_PASSWORD);
    let logins = connector.logins().await;
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].expose_value(), DEV_TOKEN);
}

#[tokio::test]
async fn test_missing_key_is_reported() {
    let broker = Broker::with_default_providers(Arc::new(MemoryConnector::new(seeded_store().await)), Client::new());
    let config = ProviderConfig::from_env(AuthMethod::Token, &token_env()).unwrap();

    let err = broker
        .fetch_secret_value(AuthMethod::Token, &config, "my-secret-password", "username")
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::KeyNotFound { ref key, .. } if key == "username"));
    assert!(!err.is_auth_error());
}

#[tokio::test]
async fn test_missing_token_fails_before_login() {
    let connector = Arc::new(MemoryConnector::new(seeded_store().await));
    let broker = Broker::with_default_providers(connector.clone(), Client::new());
    let config = ProviderConfig::from_env(AuthMethod::Token, &env(&[])).unwrap();

    let err = broker
        .fetch_secret(AuthMethod::Token, &config, "my-secret-password")
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Acquisition(AcquisitionError::MissingCredential)));
    assert!(connector.logins().await.is_empty());
}

#[tokio::test]
async fn test_failed_provider_has_no_fallback() {
    let azure = CountingProvider::failing(AuthMethod::Azure, || AcquisitionError::metadata("IMDS unreachable"));
    let token = CountingProvider::issuing(AuthMethod::Token, Credential::token(SecretString::from(DEV_TOKEN)));
    let broker = Broker::new(Arc::new(MemoryConnector::new(seeded_store().await)))
        .with_provider(Arc::new(azure.clone()))
        .with_provider(Arc::new(token.clone()));

    let config = ProviderConfig::from_env(AuthMethod::Azure, &env(&[("VAULT_ROLE", "dev-role-azure")])).unwrap();
    let err = broker
        .fetch_secret(AuthMethod::Azure, &config, "my-secret-password")
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::Acquisition(AcquisitionError::MetadataUnavailable(_))));
    assert!(err.is_auth_error());
    assert_eq!(azure.calls(), 1);
    assert_eq!(token.calls(), 0);
}

#[tokio::test]
async fn test_unregistered_method() {
    let broker = Broker::new(Arc::new(MemoryConnector::new(seeded_store().await)));
    let config = ProviderConfig::from_env(AuthMethod::Userpass, &env(&[])).unwrap();
    assert!(matches!(
        broker.fetch_secret(AuthMethod::Userpass, &config, "creds").await,
        Err(BrokerError::UnsupportedMethod(AuthMethod::Userpass))
    ));
}

#[tokio::test]
async fn test_rejected_login() {
    let connector = MemoryConnector::rejecting(seeded_store().await, "permission denied");
    let broker = Broker::with_default_providers(Arc::new(connector), Client::new());

    let dir = tempfile::tempdir().unwrap();
    let sa_token = dir.path().join("token");
    std::fs::write(&sa_token, "sa.jwt.value\n").unwrap();
    let config = ProviderConfig::Kubernetes(KubernetesConfig::new("dev-role-k8s").with_token_path(&sa_token));

    let err = broker
        .fetch_secret(AuthMethod::Kubernetes, &config, "my-secret-password")
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Login(StoreError::AuthenticationFailed(_))));
    assert!(err.is_auth_error());
}

#[tokio::test]
async fn test_store_down_is_a_read_failure() {
    let connector = UnavailableConnector::new("connection refused");
    let broker = Broker::with_default_providers(Arc::new(connector.clone()), Client::new());
    let config = ProviderConfig::from_env(AuthMethod::Token, &token_env()).unwrap();

    let err = broker
        .fetch_secret(AuthMethod::Token, &config, "my-secret-password")
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::SecretRead(StoreError::Unavailable(ref msg)) if msg == "connection refused"));
    assert!(err.is_retryable());
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_approle_with_in_memory_vault() {
    let store = seeded_store().await;
    let wrapping = store.wrap(secret_id_payload("3b3b-secret")).await;
    let connector = Arc::new(MemoryConnector::new(store));
    let broker = Broker::with_default_providers(connector.clone(), Client::new());

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("wrapping-token");
    std::fs::write(&token_path, wrapping.expose_secret()).unwrap();
    let config = ProviderConfig::AppRole(AppRoleConfig::new("role-123", &token_path));

    let secret = broker
        .fetch_secret(AuthMethod::AppRole, &config, "my-secret-password")
        .await
        .unwrap();
    assert_eq!(secret.get("password"), Some(SAMPLE_PASSWORD));

    let logins = connector.logins().await;
    let approle = logins.last().unwrap();
    assert_eq!(approle.kind(), CredentialKind::RoleSecret);
    assert_eq!(approle.expose_value(), "3b3b-secret");
    assert_eq!(connector.store().pending_wraps().await, 0);

    // The wrapping token is spent.
    assert!(matches!(
        broker.fetch_secret(AuthMethod::AppRole, &config, "my-secret-password").await,
        Err(BrokerError::Acquisition(AcquisitionError::WrappingTokenInvalid(_)))
    ));
}

#[tokio::test]
async fn test_approle_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/wrapping/unwrap"))
        .and(header("X-Vault-Token", "hvs.wrapping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_unwrap_body(secret_id_payload("3b3b-secret"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .and(body_json(json!({"role_id": "role-123", "secret_id": "3b3b-secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_auth_body("hvs.approle")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/my-secret-password"))
        .and(header("X-Vault-Token", "hvs.approle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_kv_body(json!({"password": SAMPLE_PASSWORD}), 1)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("wrapping-token");
    std::fs::write(&token_path, "hvs.wrapping\n").unwrap();

    let connector = VaultConnector::new(VaultConfig::new(&server.uri()).unwrap()).unwrap();
    let broker = Broker::with_default_providers(Arc::new(connector), Client::new());
    let config = ProviderConfig::AppRole(AppRoleConfig::new("role-123", &token_path));

    let password = broker
        .fetch_secret_value(AuthMethod::AppRole, &config, "my-secret-password", "password")
        .await
        .unwrap();
    assert_eq!(password.expose_secret(), SAMPLE_PASSWORD);
}

#[tokio::test]
async fn test_missing_role_makes_no_network_calls() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let connector = VaultConnector::new(VaultConfig::new(&server.uri()).unwrap()).unwrap();
    let broker = Broker::with_default_providers(Arc::new(connector), Client::new());

    for method in [AuthMethod::AwsIam, AuthMethod::Azure, AuthMethod::GcpIam, AuthMethod::Kubernetes] {
        let config = ProviderConfig::from_env(method, &env(&[])).unwrap();
        let err = broker.fetch_secret(method, &config, "creds").await.unwrap_err();
        assert!(
            matches!(err, BrokerError::Acquisition(AcquisitionError::ConfigMissing(_))),
            "{method}: {err}"
        );
    }
}
