use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vault_lifecycle::{Credentials, DriverConfig, Error, KvClient, Token, TokenManager};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_token(client_token: &str) -> Token {
    Token::new(
        Arc::new(Credentials::token("root-x")),
        serde_json::json!({
            "auth": {
                "client_token": client_token,
                "accessor": "acc-1",
                "renewable": true,
                "policies": ["default"],
            }
        }),
        true,
    )
}

fn kv_client(mock_uri: &str, manager: &TokenManager) -> KvClient {
    let config = DriverConfig::builder().address(mock_uri).unwrap().build();
    KvClient::new(Arc::new(config), manager.subscribe())
        .with_wait_timeout(Duration::from_millis(100))
}

#[tokio::test]
async fn test_read_uses_distributed_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/database/credentials"))
        .and(header("X-Vault-Token", "s.kv"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "data": {"username": "admin", "password": "secret123"},
                "metadata": {"version": 2, "created_time": "2026-01-01T00:00:00Z", "destroyed": false}
            }
        })))
        .mount(&mock_server)
        .await;

    let mut manager = TokenManager::new();
    let client = kv_client(&mock_server.uri(), &manager);
    manager.fire_login(&sample_token("s.kv"));

    let secret = client.read("database/credentials").await.unwrap();
    assert_eq!(secret.version, 2);
    assert_eq!(secret.data["username"], serde_json::json!("admin"));
}

#[tokio::test]
async fn test_operation_blocks_until_login() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "data": {"key": "value"},
                "metadata": {"version": 1}
            }
        })))
        .mount(&mock_server)
        .await;

    let mut manager = TokenManager::new();
    let client = kv_client(&mock_server.uri(), &manager);

    let read = tokio::spawn(async move { client.read("app/config").await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.fire_login(&sample_token("s.kv"));

    let secret = read.await.unwrap().unwrap();
    assert_eq!(secret.data["key"], serde_json::json!("value"));
}

#[tokio::test]
async fn test_gate_timeout_fails_the_call() {
    let mock_server = MockServer::start().await;

    let manager = TokenManager::new();
    let client = kv_client(&mock_server.uri(), &manager);

    // no login ever fires
    let result = client.read("app/config").await;
    assert!(matches!(result, Err(Error::ReadinessTimeout { .. })));
}

#[tokio::test]
async fn test_write_returns_new_version() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/secret/data/app/config"))
        .and(body_json(serde_json::json!({"data": {"key": "value"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"version": 3, "created_time": "2026-01-01T00:00:00Z"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut manager = TokenManager::new();
    let client = kv_client(&mock_server.uri(), &manager);
    manager.fire_login(&sample_token("s.kv"));

    let mut data = HashMap::new();
    data.insert("key".to_string(), serde_json::json!("value"));
    let version = client.write("app/config", &data).await.unwrap();
    assert_eq!(version, 3);
}

#[tokio::test]
async fn test_list_keys() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/metadata/app"))
        .and(query_param("list", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"keys": ["config", "credentials/"]}
        })))
        .mount(&mock_server)
        .await;

    let mut manager = TokenManager::new();
    let client = kv_client(&mock_server.uri(), &manager);
    manager.fire_login(&sample_token("s.kv"));

    let keys = client.list("app").await.unwrap();
    assert_eq!(keys, vec!["config", "credentials/"]);
}

#[tokio::test]
async fn test_missing_path_is_read_failed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"errors": []})))
        .mount(&mock_server)
        .await;

    let mut manager = TokenManager::new();
    let client = kv_client(&mock_server.uri(), &manager);
    manager.fire_login(&sample_token("s.kv"));

    let result = client.read("missing").await;
    assert!(matches!(result, Err(Error::ReadFailed(_))));
}
