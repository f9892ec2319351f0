//! Response envelope handling over HTTP.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use serde_json::{Value, json};
use storefront_integration_tests::MockServer;
use storefront_session::{ClientError, MemoryStore};

#[tokio::test]
async fn test_success_envelope_is_unwrapped() {
    let server = MockServer::start().await;
    let client = server.client(Arc::new(MemoryStore::new()));

    let product: Value = client.get("products/P1").await.unwrap();
    assert_eq!(product, json!({ "id": "P1", "name": "Logo Hoodie" }));
}

#[tokio::test]
async fn test_plain_text_passes_through() {
    let server = MockServer::start().await;
    let client = server.client(Arc::new(MemoryStore::new()));

    let health: String = client.get("health").await.unwrap();
    assert_eq!(health, "ok");
}

#[tokio::test]
async fn test_failure_envelope_becomes_resource_error() {
    let server = MockServer::start().await;
    let client = server.client(Arc::new(MemoryStore::new()));

    let err = client.get::<Value>("products/missing").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Resource { status, message }
            if status.as_u16() == 404 && message == "Product not found"
    ));
}

#[tokio::test]
async fn test_http_error_without_envelope() {
    let server = MockServer::start().await;
    let client = server.client(Arc::new(MemoryStore::new()));

    let err = client.get::<Value>("products/broken").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Resource { status, message }
            if status.as_u16() == 502 && message == "upstream unavailable"
    ));
}

#[tokio::test]
async fn test_unknown_route_is_resource_error() {
    let server = MockServer::start().await;
    let client = server.client(Arc::new(MemoryStore::new()));

    let err = client.get::<Value>("nowhere").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Resource { status, .. } if status.as_u16() == 404
    ));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = storefront_session::ClientConfig::new(
        url::Url::parse(&format!("http://{addr}/api")).unwrap(),
    );
    let client =
        storefront_session::SessionClient::connect(&config, Arc::new(MemoryStore::new())).unwrap();

    let err = client.get::<Value>("health").await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}
