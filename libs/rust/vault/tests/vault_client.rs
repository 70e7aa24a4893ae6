//! Vault HTTP client against a wiremock server.

use broker_test_utils::fixtures::{
    sample_data, secret_id_payload, vault_auth_body, vault_kv_body, vault_unwrap_body, DEV_TOKEN, SAMPLE_PASSWORD,
    SAMPLE_PATH,
};
use secrecy::SecretString;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use vault_broker::{Credential, CredentialKind, SecretStore, StoreConnector, StoreError, VaultConfig, VaultConnector};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector(server: &MockServer) -> VaultConnector {
    let config = VaultConfig::new(&server.uri()).unwrap().with_timeout(Duration::from_secs(5));
    VaultConnector::new(config).unwrap()
}

fn dev_token() -> Credential {
    Credential::token(SecretString::from(DEV_TOKEN))
}

#[tokio::test]
async fn test_read_sends_token_and_parses_kv_v2() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/my-secret-password"))
        .and(header("X-Vault-Token", DEV_TOKEN))
        .and(header("X-Vault-Request", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_kv_body(json!({"password": SAMPLE_PASSWORD}), 3)))
        .expect(1)
        .mount(&server)
        .await;

    let store = connector(&server).connect(&dev_token()).await.unwrap();
    let secret = store.read("/my-secret-password", None).await.unwrap();

    assert_eq!(secret.path, SAMPLE_PATH);
    assert_eq!(secret.get("password"), Some(SAMPLE_PASSWORD));
    assert_eq!(secret.version, Some(3));
}

#[tokio::test]
async fn test_namespace_and_custom_mount() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv-v2/data/creds"))
        .and(header("X-Vault-Namespace", "team-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_kv_body(json!({"password": "p"}), 1)))
        .expect(1)
        .mount(&server)
        .await;

    let config = VaultConfig::new(&server.uri()).unwrap().with_namespace("team-a");
    let store = VaultConnector::new(config).unwrap().connect(&dev_token()).await.unwrap();
    assert!(store.read("creds", Some("kv-v2")).await.is_ok());
}

#[tokio::test]
async fn test_status_mapping() {
    let server = MockServer::start().await;
    let cases = [
        ("missing", ResponseTemplate::new(404).set_body_json(json!({"errors": []}))),
        ("denied", ResponseTemplate::new(403).set_body_json(json!({"errors": ["permission denied"]}))),
        ("throttled", ResponseTemplate::new(429)),
        ("sealed", ResponseTemplate::new(503).set_body_json(json!({"errors": ["Vault is sealed"]}))),
    ];
    for (name, response) in cases {
        Mock::given(method("GET"))
            .and(path(format!("/v1/secret/data/{name}")))
            .respond_with(response)
            .mount(&server)
            .await;
    }

    let store = connector(&server).connect(&dev_token()).await.unwrap();

    assert!(matches!(
        store.read("missing", None).await,
        Err(StoreError::SecretNotFound(p)) if p == "missing"
    ));
    assert!(matches!(
        store.read("denied", None).await,
        Err(StoreError::PermissionDenied(msg)) if msg.contains("permission denied")
    ));
    assert!(matches!(store.read("throttled", None).await, Err(StoreError::RateLimited)));

    let sealed = store.read("sealed", None).await.unwrap_err();
    assert!(matches!(sealed, StoreError::Unavailable(ref msg) if msg.contains("Vault is sealed")));
    assert!(sealed.is_retryable());
}

#[tokio::test]
async fn test_deleted_version_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/creds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"data": null, "metadata": {"version": 2, "destroyed": false}}})))
        .mount(&server)
        .await;

    let store = connector(&server).connect(&dev_token()).await.unwrap();
    assert!(matches!(store.read("creds", None).await, Err(StoreError::SecretNotFound(_))));
}

#[tokio::test]
async fn test_unreachable_server() {
    let config = VaultConfig::new("http://127.0.0.1:1").unwrap().with_timeout(Duration::from_secs(2));
    let store = VaultConnector::new(config).unwrap().connect(&dev_token()).await.unwrap();
    assert!(matches!(store.read("creds", None).await, Err(StoreError::Unavailable(_))));
}

/// Serve one response that promises more body than it sends, then hang up.
async fn truncated_body_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 500\r\n\r\n{\"data\":")
            .await;
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_cut_off_body_is_a_transport_failure() {
    let config = VaultConfig::new(&truncated_body_server().await).unwrap().with_timeout(Duration::from_secs(5));
    let store = VaultConnector::new(config).unwrap().connect(&dev_token()).await.unwrap();

    let err = store.read("creds", None).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(ref msg) if msg.contains("response body")), "{err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_write_posts_data_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/secret/data/my-secret-password"))
        .and(body_json(json!({"data": {"password": SAMPLE_PASSWORD}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"version": 1}})))
        .expect(1)
        .mount(&server)
        .await;

    let store = connector(&server).connect(&dev_token()).await.unwrap();
    store.write(SAMPLE_PATH, &sample_data(), None).await.unwrap();
}

#[tokio::test]
async fn test_login_binds_issued_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/kubernetes/login"))
        .and(body_json(json!({"role": "dev-role-k8s", "jwt": "sa.jwt.value"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_auth_body("hvs.issued")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/creds"))
        .and(header("X-Vault-Token", "hvs.issued"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_kv_body(json!({"password": "p"}), 1)))
        .expect(1)
        .mount(&server)
        .await;

    let credential = Credential::jwt("kubernetes", "dev-role-k8s", SecretString::from("sa.jwt.value"));
    let store = connector(&server).connect(&credential).await.unwrap();
    assert_eq!(store.read("creds", None).await.unwrap().get("password"), Some("p"));
}

#[tokio::test]
async fn test_login_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"errors": ["invalid role or secret ID"]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/userpass/login/my-user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": null})))
        .mount(&server)
        .await;

    let connector = connector(&server);
    let approle = Credential::role_secret("role-123", SecretString::from("bad-secret"));
    assert!(matches!(
        connector.connect(&approle).await,
        Err(StoreError::AuthenticationFailed(msg)) if msg.contains("invalid role or secret ID")
    ));

    let userpass = Credential::password("my-user", SecretString::from("my-password"));
    assert!(matches!(
        connector.connect(&userpass).await,
        Err(StoreError::AuthenticationFailed(msg)) if msg.contains("client token")
    ));
}

#[tokio::test]
async fn test_userpass_username_is_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/userpass/login/ops%2Fadmin"))
        .and(body_json(json!({"password": "my-password"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_auth_body("hvs.userpass")))
        .expect(1)
        .mount(&server)
        .await;

    let credential = Credential::password("ops/admin", SecretString::from("my-password"));
    assert!(connector(&server).connect(&credential).await.is_ok());
}

#[tokio::test]
async fn test_password_without_username_never_logs_in() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_auth_body("hvs.unexpected")))
        .expect(0)
        .mount(&server)
        .await;

    let credential = Credential::new(CredentialKind::Password, SecretString::from("my-password"), "userpass");
    assert!(matches!(
        connector(&server).connect(&credential).await,
        Err(StoreError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_unwrap_spends_wrapping_token_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/wrapping/unwrap"))
        .and(header("X-Vault-Token", "hvs.wrapping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_unwrap_body(secret_id_payload("3b3b-secret"))))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/wrapping/unwrap"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"errors": ["wrapping token is not valid or does not exist"]})),
        )
        .mount(&server)
        .await;

    let store = connector(&server)
        .connect(&Credential::token(SecretString::from("hvs.wrapping")))
        .await
        .unwrap();

    let data = store.unwrap(None).await.unwrap();
    assert_eq!(data["secret_id"], "3b3b-secret");
    assert!(matches!(
        store.unwrap(None).await,
        Err(StoreError::InvalidWrappingToken(msg)) if msg.contains("not valid")
    ));
}

#[tokio::test]
async fn test_unwrap_with_explicit_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/wrapping/unwrap"))
        .and(header("X-Vault-Token", DEV_TOKEN))
        .and(body_json(json!({"token": "hvs.wrapping"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(vault_unwrap_body(secret_id_payload("s"))))
        .expect(1)
        .mount(&server)
        .await;

    let store = connector(&server).connect(&dev_token()).await.unwrap();
    let wrapping = SecretString::from("hvs.wrapping");
    assert_eq!(store.unwrap(Some(&wrapping)).await.unwrap()["secret_id"], "s");
}

#[tokio::test]
async fn test_renew_self() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/token/renew-self"))
        .and(header("X-Vault-Token", DEV_TOKEN))
        .and(body_json(json!({"increment": "3600s"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": {"client_token": DEV_TOKEN, "policies": ["default"], "lease_duration": 3600, "renewable": true}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = connector(&server).login(&dev_token()).await.unwrap();
    let ttl = client.renew_self(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(ttl, Duration::from_secs(3600));
    assert!(!format!("{client:?}").contains(DEV_TOKEN));
}
