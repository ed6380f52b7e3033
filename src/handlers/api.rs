use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::state::AppState;

/// Liveness plus the number of sessions currently relayed.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    let status = if state.sessions.is_shutting_down() {
        "SHUTTING_DOWN"
    } else {
        "OK"
    };

    Ok(Json(json!({
        "status": status,
        "active_sessions": state.sessions.len(),
        "websocket_connections": state.ws_connection_count(),
    })))
}
