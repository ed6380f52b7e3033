//! HTTP server assembly and lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::{Router, middleware};
use http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::middleware::connection_limit_middleware;
use crate::routes;
use crate::state::AppState;

/// How long shutdown waits for live sessions to close.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The relay server: routes, shared state and graceful shutdown.
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let state = AppState::new(config).map_err(|e| anyhow!("Failed to build tool registry: {e}"))?;
        Ok(Self::from_state(state))
    }

    pub fn from_state(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Full application router with CORS and security headers.
    pub fn router(&self) -> Router {
        let state = self.state.clone();

        let realtime_routes = routes::realtime::create_realtime_router().layer(
            middleware::from_fn_with_state(state.clone(), connection_limit_middleware),
        );

        let mut app = routes::api::create_api_router().merge(realtime_routes);
        if let Some(dir) = &state.config.static_dir {
            info!(dir = %dir.display(), "Serving static client");
            app = app.merge(routes::static_files::create_static_router(dir));
        }

        let security_headers = tower::ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                http::header::X_CONTENT_TYPE_OPTIONS,
                http::HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                http::header::X_FRAME_OPTIONS,
                http::HeaderValue::from_static("DENY"),
            ));

        app.with_state(state.clone())
            .layer(cors_layer(state.config.cors_allowed_origins.as_deref()))
            .layer(security_headers)
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = self.state.config.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| anyhow!("Failed to bind {address}: {e}"))?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already-bound listener.
    ///
    /// When `shutdown` resolves, new upgrades are refused, every session is
    /// stopped, and the call returns once sessions drain or the grace period
    /// passes.
    pub async fn serve_listener<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!("Server listening on http://{}", local_addr);

        let app = self.router();
        let sessions = self.state.sessions.clone();
        let stopper = sessions.clone();

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutdown requested");
            stopper.stop_all();
        })
        .await?;

        if !sessions.wait_idle(SHUTDOWN_GRACE).await {
            warn!(
                remaining = sessions.len(),
                "Sessions still open after shutdown grace period"
            );
        }
        info!("Server stopped");
        Ok(())
    }
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [AUTHORIZATION, CONTENT_TYPE];

    match origins {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(false),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(methods)
                .allow_headers(headers)
                .allow_credentials(true)
        }
        None => {
            // No allow_origin: browsers block cross-origin requests
            CorsLayer::new()
                .allow_methods(methods)
                .allow_headers(headers)
                .allow_credentials(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::RealtimeProvider;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::new(
            RealtimeProvider::Azure,
            "https://rt.openai.azure.com",
            "gpt-4o-realtime-preview",
        );
        config.realtime_api_key = Some("test-key".to_string());
        config
    }

    #[tokio::test]
    async fn test_health_reports_sessions_and_headers() {
        let server = RelayServer::new(test_config()).unwrap();
        let response = server
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()["x-frame-options"], "DENY");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "OK");
        assert_eq!(json["active_sessions"], 0);
    }

    #[tokio::test]
    async fn test_static_client_with_index_fallback() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<html>voice</html>").unwrap();
        fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();

        let mut config = test_config();
        config.static_dir = Some(dir.path().to_path_buf());
        let router = RelayServer::new(config).unwrap().router();

        let response = router
            .clone()
            .oneshot(Request::get("/app.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<html>voice</html>");
    }

    #[tokio::test]
    async fn test_unknown_path_without_static_dir_is_404() {
        let router = RelayServer::new(test_config()).unwrap().router();
        let response = router
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_wildcard_allows_any_origin() {
        let mut config = test_config();
        config.cors_allowed_origins = Some("*".to_string());
        let router = RelayServer::new(config).unwrap().router();

        let response = router
            .oneshot(
                Request::get("/health")
                    .header("origin", "https://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_sessions() {
        let server = RelayServer::new(test_config()).unwrap();
        server.state().sessions.stop_all();

        let response = server
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "SHUTTING_DOWN");
    }
}
