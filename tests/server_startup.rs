//! Server Startup Tests
//!
//! Server lifecycle, configuration loading and startup behavior.

use std::fs;
use std::time::Duration;

use axum::{body::Body, http::Request};
use serial_test::serial;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tower::util::ServiceExt;

use voicerag_gateway::{RelayServer, ServerConfig, core::realtime::RealtimeProvider, state::AppState};

fn create_minimal_config() -> ServerConfig {
    let mut config = ServerConfig::new(
        RealtimeProvider::Azure,
        "https://rt.openai.azure.com",
        "gpt-4o-realtime-preview",
    );
    config.host = "127.0.0.1".to_string();
    config.realtime_api_key = Some("test-key".to_string());
    config
}

/// The server boots without search or email configured
#[tokio::test]
async fn test_minimal_config_boot() {
    let state = AppState::new(create_minimal_config()).unwrap();
    let app = RelayServer::from_state(state.clone()).router();

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    assert_eq!(state.tools.len(), 4);
}

/// A plain GET on the relay endpoint is not an upgrade
#[tokio::test]
async fn test_realtime_requires_upgrade() {
    let app = RelayServer::new(create_minimal_config()).unwrap().router();

    let request = Request::builder()
        .uri("/realtime")
        .extension(axum::extract::ConnectInfo(std::net::SocketAddr::from((
            [127, 0, 0, 1],
            5000,
        ))))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(response.status().is_client_error());
}

/// Serving stops promptly when the shutdown future resolves
#[tokio::test]
async fn test_serve_and_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RelayServer::new(create_minimal_config()).unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(server.serve_listener(listener, async move {
        let _ = rx.await;
    }));

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "OK");

    tx.send(()).unwrap();
    timeout(Duration::from_secs(15), handle)
        .await
        .expect("server stops in time")
        .unwrap()
        .unwrap();
}

/// Configuration from YAML reaches the running state
#[tokio::test]
#[serial]
async fn test_yaml_config_boot() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(
        &config_path,
        r#"
server:
  host: "127.0.0.1"
  port: 0

realtime:
  endpoint: "https://rt.openai.azure.com"
  deployment: "gpt-4o-realtime-preview"
  api_key: "yaml-key"
  system_prompt: "Short answers only."

relay:
  tool_timeout_seconds: 3
"#,
    )
    .unwrap();

    let config = ServerConfig::from_file(&config_path).unwrap();
    let state = AppState::new(config).unwrap();

    let setup = state.session_setup("s-1", state.sessions.child_token());
    assert_eq!(&*setup.system_prompt, "Short answers only.");
    assert_eq!(setup.tool_timeout, Duration::from_secs(3));
}
