//! Connection limit middleware for the relay WebSocket
//!
//! Enforces a global cap on open sockets and a cap per client IP. The slot
//! taken here is released by the handler when the socket closes.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use voicerag_gateway::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/realtime", get(realtime_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client IP carried to the handler so it can release the slot.
#[derive(Clone, Copy, Debug)]
pub struct ClientIp(pub IpAddr);

/// Reject WebSocket upgrades over the configured limits.
///
/// - 503 when the global limit is reached
/// - 429 when the per-IP limit is reached
///
/// Plain HTTP requests pass through unchecked.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: global limit reached");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting connection: per-IP limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::core::realtime::RealtimeProvider;
    use axum::{Extension, Router, extract::connect_info::MockConnectInfo, routing::get};
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    fn limited_state(max_total: Option<usize>, max_per_ip: u32) -> Arc<AppState> {
        let mut config = ServerConfig::new(
            RealtimeProvider::Azure,
            "https://rt.openai.azure.com",
            "gpt-4o-realtime-preview",
        );
        config.realtime_api_key = Some("test-key".to_string());
        config.max_websocket_connections = max_total;
        config.max_connections_per_ip = max_per_ip;
        AppState::new(config).unwrap()
    }

    fn app(state: Arc<AppState>) -> Router {
        async fn echo_ip(ip: Option<Extension<ClientIp>>) -> String {
            ip.map(|Extension(ClientIp(ip))| ip.to_string())
                .unwrap_or_default()
        }

        Router::new()
            .route("/realtime", get(echo_ip))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                connection_limit_middleware,
            ))
            .with_state(state)
            .layer(MockConnectInfo(SocketAddr::from((
                Ipv4Addr::new(10, 1, 2, 3),
                40000,
            ))))
    }

    fn upgrade_request() -> Request<Body> {
        Request::builder()
            .uri("/realtime")
            .header("upgrade", "websocket")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_upgrade_acquires_slot_and_tags_ip() {
        let state = limited_state(Some(10), 3);
        let response = app(state.clone()).oneshot(upgrade_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"10.1.2.3");
        // Released by the socket handler, not here
        assert_eq!(state.ws_connection_count(), 1);
    }

    #[tokio::test]
    async fn test_global_limit_returns_503() {
        let state = limited_state(Some(0), 3);
        let response = app(state).oneshot(upgrade_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_per_ip_limit_returns_429() {
        let state = limited_state(None, 1);
        let ip: IpAddr = Ipv4Addr::new(10, 1, 2, 3).into();
        state.try_acquire_connection(ip).unwrap();

        let response = app(state).oneshot(upgrade_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_plain_requests_bypass_limits() {
        let state = limited_state(Some(0), 0);
        let request = Request::builder()
            .uri("/realtime")
            .body(Body::empty())
            .unwrap();

        let response = app(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.ws_connection_count(), 0);
    }
}
