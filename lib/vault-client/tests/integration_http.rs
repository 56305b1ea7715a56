// lib/vault-client/tests/integration_http.rs

use std::time::Duration;
use tokio::time::Instant;
use vault_client::{VaultClient, VaultError};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROOT_TOKEN: &str = "s.root";

fn mock_vault_client(mock_uri: &str) -> VaultClient {
    VaultClient::builder()
        .base_url(mock_uri)
        .token(ROOT_TOKEN)
        .task_token_ttl(Duration::from_secs(3600))
        .derive_policies(["app"])
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn assert_due_in(next: Option<Instant>, registered_at: Instant, expected: Duration) {
    let next = next.expect("entry should be scheduled");
    let offset = next - registered_at;
    assert!(
        offset >= expected && offset < expected + Duration::from_secs(2),
        "expected next renewal ~{:?} out, got {:?}",
        expected,
        offset
    );
}

#[tokio::test]
async fn test_renew_lease_schedules_half_life() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/renew"))
        .and(header("X-Vault-Token", ROOT_TOKEN))
        .and(body_json(serde_json::json!({
            "lease_id": "lease-A",
            "increment": 10
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "request_id": "req-1",
            "lease_id": "lease-A",
            "lease_duration": 100,
            "renewable": true,
            "data": null
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = mock_vault_client(&mock_server.uri());

    let registered_at = Instant::now();
    let mut handle = client
        .renew_lease("lease-A", Duration::from_secs(10))
        .await
        .expect("registration should succeed");

    assert!(
        tokio::time::timeout(Duration::from_millis(200), &mut handle)
            .await
            .is_err(),
        "no failure expected"
    );
    assert!(client.is_tracked("lease-A").await);
    assert_due_in(
        client.next_renewal("lease-A").await,
        registered_at,
        Duration::from_secs(50),
    );
}

#[tokio::test]
async fn test_renew_token_uses_task_token_ttl() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/token/renew"))
        .and(header("X-Vault-Token", ROOT_TOKEN))
        .and(body_json(serde_json::json!({
            "token": "s.child",
            "increment": 3600
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "auth": {
                "client_token": "s.child",
                "lease_duration": 7200,
                "renewable": true
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = mock_vault_client(&mock_server.uri());

    let registered_at = Instant::now();
    let mut handle = client.renew_token("s.child").await.unwrap();

    assert!(handle.try_failure().is_none());
    assert_due_in(
        client.next_renewal("s.child").await,
        registered_at,
        Duration::from_secs(3600),
    );
}

#[tokio::test]
async fn test_first_renewal_failure_reaches_handle() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/token/renew"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "errors": ["permission denied"]
        })))
        .mount(&mock_server)
        .await;

    let client = mock_vault_client(&mock_server.uri());

    let handle = client.renew_token("s.revoked").await.unwrap();

    match handle.await {
        Some(VaultError::RenewalFailed { source, .. }) => {
            assert!(
                matches!(*source, VaultError::ClientError { status: 403, .. }),
                "unexpected source: {}",
                source
            );
        }
        other => panic!("expected renewal failure, got {:?}", other),
    }
    assert!(!client.is_tracked("s.revoked").await);
    assert_eq!(client.tracked_count().await, 0);
}

#[tokio::test]
async fn test_stop_does_not_renew_again() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/renew"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "lease_id": "lease-C",
            "lease_duration": 600,
            "renewable": true
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = mock_vault_client(&mock_server.uri());
    client
        .renew_lease("lease-C", Duration::from_secs(600))
        .await
        .unwrap();
    client.start().await;

    tokio::time::timeout(Duration::from_secs(1), client.stop())
        .await
        .expect("stop should return promptly");
    assert!(!client.is_running().await);
}

#[tokio::test]
async fn test_concurrent_registrations() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/renew"))
        .and(body_json(serde_json::json!({"lease_id": "lease-1", "increment": 60})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "lease_duration": 120
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/renew"))
        .and(body_json(serde_json::json!({"lease_id": "lease-2", "increment": 60})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "lease_duration": 1200
        })))
        .mount(&mock_server)
        .await;

    let client = mock_vault_client(&mock_server.uri());
    let registered_at = Instant::now();

    let other = client.clone();
    let first = tokio::spawn(async move {
        other.renew_lease("lease-1", Duration::from_secs(60)).await
    });
    let second = client.renew_lease("lease-2", Duration::from_secs(60)).await;

    assert!(first.await.unwrap().is_ok());
    assert!(second.is_ok());
    assert_eq!(client.tracked_count().await, 2);
    assert_due_in(
        client.next_renewal("lease-1").await,
        registered_at,
        Duration::from_secs(60),
    );
    assert_due_in(
        client.next_renewal("lease-2").await,
        registered_at,
        Duration::from_secs(600),
    );
}

#[tokio::test]
async fn test_derive_token_unwraps_wrapped_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/token/create"))
        .and(header("X-Vault-Token", ROOT_TOKEN))
        .and(header("X-Vault-Wrap-TTL", "60s"))
        .and(body_json(serde_json::json!({
            "policies": ["app"],
            "ttl": "10s",
            "display_name": "derived-for-task",
            "renewable": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "wrap_info": {
                "token": "s.wrapping",
                "accessor": "wrap-accessor",
                "ttl": 60,
                "wrapped_accessor": "child-accessor"
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/sys/wrapping/unwrap"))
        .and(header("X-Vault-Token", "s.wrapping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "auth": {
                "client_token": "s.derived",
                "accessor": "child-accessor",
                "policies": ["app"],
                "lease_duration": 10,
                "renewable": true
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = mock_vault_client(&mock_server.uri());

    let token = client.derive_token().await.expect("should derive token");
    assert_eq!(token, "s.derived");
}

#[tokio::test]
async fn test_derive_token_without_wrap_info_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/token/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "auth": {"client_token": "s.unwrapped"}
        })))
        .mount(&mock_server)
        .await;

    let client = mock_vault_client(&mock_server.uri());

    let result = client.derive_token().await;
    assert!(matches!(result, Err(VaultError::RequestError(_))));
}

#[tokio::test]
async fn test_read_secret_with_caller_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/database/credentials"))
        .and(header("X-Vault-Token", "s.reader"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "request_id": "req-2",
            "lease_id": "",
            "lease_duration": 0,
            "renewable": false,
            "data": {
                "data": {"username": "admin", "password": "secret123"},
                "metadata": {"version": 1}
            },
            "warnings": null
        })))
        .mount(&mock_server)
        .await;

    let client = mock_vault_client(&mock_server.uri());

    let secret = client
        .read_secret("s.reader", "secret/data/database/credentials")
        .await
        .expect("should read secret");

    assert_eq!(secret.data["data"]["password"], serde_json::json!("secret123"));
    assert!(secret.warnings.is_empty());
}

#[tokio::test]
async fn test_read_secret_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/nonexistent"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "errors": []
        })))
        .mount(&mock_server)
        .await;

    let client = mock_vault_client(&mock_server.uri());

    let result = client.read_secret("s.reader", "secret/data/nonexistent").await;
    match result {
        Err(VaultError::SecretNotFound { path }) => assert_eq!(path, "secret/data/nonexistent"),
        other => panic!("expected SecretNotFound, got {:?}", other),
    }
}
