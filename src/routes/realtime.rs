//! Realtime WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::realtime_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /realtime` - WebSocket upgrade
///
/// # Protocol
///
/// Frames are realtime API events in both directions. The client never sends
/// instructions or tools; the server configures the session itself.
///
/// ```json
/// // Client
/// {"type": "input_audio_buffer.append", "audio": "<base64 pcm16>"}
///
/// // Server, after a grounded answer
/// {"type": "extension.middle_tier_tool_response", "previous_item_id": "...",
///  "tool_name": "report_grounding", "tool_result": "{\"sources\": [...]}"}
/// ```
pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime", get(realtime_handler))
        .layer(TraceLayer::new_for_http())
}
