//! Realtime WebSocket handler
//!
//! Each upgraded socket becomes one session bridge. Text frames are handed to
//! the bridge verbatim; whatever the bridge emits is written back as text.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::bridge::SessionBridge;
use crate::core::realtime::{EventLink, LINK_CHANNEL_CAPACITY};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Releases the connection slot taken by the limit middleware.
struct ConnectionGuard {
    state: Arc<AppState>,
    ip: Option<IpAddr>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(ip) = self.ip {
            self.state.release_connection(ip);
        }
    }
}

/// Realtime WebSocket handler
///
/// Upgrades the HTTP connection and relays it to a fresh upstream session.
/// Refused with 503 once the server has started shutting down.
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let guard = ConnectionGuard {
        state: state.clone(),
        ip: client_ip.map(|Extension(ClientIp(ip))| ip),
    };

    if state.sessions.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down.").into_response();
    }

    debug!(ip = ?guard.ip, "Realtime WebSocket upgrade requested");

    let tracker = state.sessions.tracker().clone();
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            tracker.track_future(handle_realtime_socket(socket, state, guard))
        })
}

/// Run one browser session until either side ends it.
async fn handle_realtime_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    guard: ConnectionGuard,
) {
    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, ip = ?guard.ip, "Realtime WebSocket connection established");

    let (browser, bridge_side) = EventLink::duplex(LINK_CHANNEL_CAPACITY);
    let (to_bridge, from_bridge) = browser.split();
    let (ws_sender, ws_receiver) = socket.split();

    let cancel = app_state.sessions.child_token();
    let writer = tokio::spawn(write_frames(ws_sender, from_bridge));
    let reader = tokio::spawn(read_frames(ws_receiver, to_bridge, cancel.clone()));

    let setup = app_state.session_setup(session_id.clone(), cancel.clone());
    match SessionBridge::start(bridge_side, app_state.connector.as_ref(), setup).await {
        Ok(bridge) => {
            app_state.sessions.insert(bridge.handle());
            bridge.join().await;
            app_state.sessions.remove(&session_id);

            let stats = bridge.stats();
            info!(
                session_id = %session_id,
                tool_calls = stats.tool_calls_received,
                tool_results = stats.tool_results_sent,
                client_events = stats.client_events_forwarded,
                upstream_events = stats.upstream_events_forwarded,
                rejected = stats.client_events_rejected,
                dropped = stats.events_dropped,
                "Session ended"
            );
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Session could not start");
        }
    }

    cancel.cancel();
    let _ = reader.await;
    let _ = writer.await;

    drop(guard);
    info!(session_id = %session_id, "Realtime WebSocket connection terminated");
}

/// Browser socket to bridge. Ends on close, error, or cancellation.
async fn read_frames(
    mut receiver: futures::stream::SplitStream<WebSocket>,
    to_bridge: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = receiver.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if to_bridge.send(text.to_string()).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                debug!(bytes = data.len(), "Ignoring binary frame from browser");
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                debug!("Browser closed the WebSocket");
                break;
            }
            Some(Err(e)) => {
                warn!("Realtime WebSocket error: {}", e);
                break;
            }
        }
    }
}

/// Bridge to browser socket. Ends once the bridge drops its sender.
async fn write_frames(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut from_bridge: mpsc::Receiver<String>,
) {
    while let Some(frame) = from_bridge.recv().await {
        if let Err(e) = sender.send(Message::Text(frame.into())).await {
            debug!("Failed to write to browser socket: {}", e);
            return;
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}
