//! The inbound HTTP surface through a real listener: discovery documents,
//! health endpoint, unknown paths, method handling, payload bounds and
//! graceful shutdown.

// Rust guideline compliant 2026-02

use std::sync::Arc;
use std::time::Duration;

use pushbridge::config::{Config, ConfigHandle, GotifyConfig};
use pushbridge::{server, translator, AppState, ClientPool, Dispatcher};
use reqwest::{StatusCode, Url};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestServer {
    base: String,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

async fn start(config: Config) -> TestServer {
    let registry = translator::build_registry(&config).expect("registry");
    let pool = ClientPool::with_timeouts(
        &["127.0.0.0/8".to_string()],
        Duration::from_millis(500),
        Duration::from_millis(500),
    )
    .expect("pool");
    let state = Arc::new(AppState {
        config: ConfigHandle::new(config),
        routes: registry.routes,
        dispatcher: Dispatcher::new(pool),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server::serve(listener, state, shutdown.clone()));
    TestServer {
        base: format!("http://{addr}"),
        shutdown,
        handle,
    }
}

fn test_config(gotify_address: Option<String>) -> Config {
    let mut config = Config::default();
    config.user_agent_id = "surface-test".to_string();
    config.gateway.matrix.enable = true;
    if let Some(address) = gotify_address {
        config.rewrite.gotify = GotifyConfig {
            enable: true,
            address,
            scheme: "http".to_string(),
        };
    }
    assert!(!config.defaults());
    config
}

fn host_of(server: &MockServer) -> String {
    let url = Url::parse(&server.uri()).expect("mock uri");
    format!(
        "{}:{}",
        url.host_str().expect("host"),
        url.port().expect("port")
    )
}

#[tokio::test]
async fn test_health_always_answers() {
    let server = start(test_config(None)).await;
    let response = reqwest::get(format!("{}/health", server.base))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.expect("body");
    assert!(body.contains("OK"), "{body:?}");
    assert!(body.contains("surface-test"), "{body:?}");
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let server = start(test_config(None)).await;
    let response = reqwest::get(format!("{}/nope", server.base))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.expect("body"), "Endpoint doesn't exist\n");
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_get_serves_discovery_documents() {
    let gotify = MockServer::start().await;
    let server = start(test_config(Some(host_of(&gotify)))).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/_matrix/push/v1/notify", server.base))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.expect("body"),
        r#"{"unifiedpush":{"version":1,"gateway":"matrix"}}"#
    );

    let response = client
        .get(format!("{}/UP", server.base))
        .send()
        .await
        .expect("request");
    assert_eq!(
        response.text().await.expect("body"),
        r#"{"unifiedpush":{"version":1}}"#
    );
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_unsupported_method_is_405() {
    let server = start(test_config(None)).await;
    let client = reqwest::Client::new();
    let response = client
        .delete(format!("{}/_matrix/push/v1/notify", server.base))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_oversized_proxy_body_is_413_without_forwarding() {
    let gotify = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&gotify)
        .await;

    let server = start(test_config(Some(host_of(&gotify)))).await;
    let client = reqwest::Client::new();

    for size in [4097_usize, 10_000] {
        let response = client
            .post(format!("{}/UP?token=t", server.base))
            .body(vec![0u8; size])
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE, "size {size}");
    }
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_oversized_gateway_body_is_413() {
    let server = start(test_config(None)).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/_matrix/push/v1/notify", server.base))
        .body(vec![b'x'; 25_000])
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_proxy_dispatch_through_real_server() {
    let gotify = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&gotify)
        .await;

    let server = start(test_config(Some(host_of(&gotify)))).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/UP?token=t", server.base))
        .body("hello")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let requests = gotify.received_requests().await.expect("requests");
    assert_eq!(requests[0].body, br#"{"message":"hello"}"#);
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_stops_accept_loop() {
    let server = start(test_config(None)).await;
    server.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("serve must return after shutdown")
        .expect("join");
    assert!(result.is_ok());
}
