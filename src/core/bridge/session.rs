//! One bridged client/upstream session.
//!
//! `start` opens the upstream, configures it, and spawns two pumps:
//!
//! - client pump: client frames go upstream verbatim, except `session.update`,
//!   which is reviewed by the [`SessionPolicy`];
//! - upstream pump: upstream frames go to the client, except tool-call traffic,
//!   which is intercepted and answered, and session echoes, which are redacted.
//!
//! Tool handlers run inline in the upstream pump, so each result is injected
//! before the next upstream event is looked at. The client pump never waits
//! on a tool, which keeps microphone audio flowing during a slow call.
//!
//! Both pumps share one [`CancellationToken`]; whichever ends first cancels it
//! and the other follows, dropping its link senders.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{BridgeError, BridgeResult};
use super::events::{
    self, ClientNotice, EventEnvelope, FunctionCallDone, SessionSettings, UpstreamCommand,
};
use super::policy::{self, ClientUpdateReview, SessionPolicy};
use crate::core::realtime::{EventLink, UpstreamConnector};
use crate::core::tools::{ToolCallResult, ToolContext, ToolError, ToolRegistry, parse_arguments};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(20);

// =============================================================================
// Setup & Stats
// =============================================================================

/// Audio-facing session options sent with the initial `session.update`.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub voice: Option<String>,
    pub turn_detection: Option<Value>,
    pub input_audio_transcription: Option<Value>,
}

/// Everything a bridge needs besides its two links.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub session_id: String,
    pub system_prompt: Arc<str>,
    pub tools: ToolRegistry,
    pub policy: Arc<SessionPolicy>,
    pub tool_timeout: Duration,
    pub options: SessionOptions,
    /// Parent-linked token; cancelling it stops the session.
    pub cancel: CancellationToken,
}

impl SessionSetup {
    pub fn new(session_id: impl Into<String>, system_prompt: impl Into<Arc<str>>, tools: ToolRegistry) -> Self {
        Self {
            session_id: session_id.into(),
            system_prompt: system_prompt.into(),
            tools,
            policy: Arc::new(SessionPolicy::default()),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            options: SessionOptions::default(),
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionStats {
    tool_calls_received: AtomicU64,
    tool_results_sent: AtomicU64,
    client_events_forwarded: AtomicU64,
    upstream_events_forwarded: AtomicU64,
    client_events_rejected: AtomicU64,
    events_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatsSnapshot {
    pub tool_calls_received: u64,
    pub tool_results_sent: u64,
    pub client_events_forwarded: u64,
    pub upstream_events_forwarded: u64,
    pub client_events_rejected: u64,
    pub events_dropped: u64,
}

impl SessionStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            tool_calls_received: self.tool_calls_received.load(Ordering::Relaxed),
            tool_results_sent: self.tool_results_sent.load(Ordering::Relaxed),
            client_events_forwarded: self.client_events_forwarded.load(Ordering::Relaxed),
            upstream_events_forwarded: self.upstream_events_forwarded.load(Ordering::Relaxed),
            client_events_rejected: self.client_events_rejected.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

struct SessionState {
    id: String,
    system_prompt: Arc<str>,
    tools: ToolRegistry,
    context: ToolContext,
    policy: Arc<SessionPolicy>,
    tool_timeout: Duration,
    options: SessionOptions,
    stats: SessionStats,
}

impl SessionState {
    fn new(setup: SessionSetup) -> Self {
        Self {
            context: ToolContext::new(setup.session_id.clone()),
            id: setup.session_id,
            system_prompt: setup.system_prompt,
            tools: setup.tools,
            policy: setup.policy,
            tool_timeout: setup.tool_timeout,
            options: setup.options,
            stats: SessionStats::default(),
        }
    }

    fn session_update_frame(&self) -> BridgeResult<String> {
        let tools = self.tools.session_tools();
        let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());
        UpstreamCommand::SessionUpdate {
            session: SessionSettings {
                instructions: Some(self.system_prompt.to_string()),
                tools,
                tool_choice,
                voice: self.options.voice.clone(),
                turn_detection: self.options.turn_detection.clone(),
                input_audio_transcription: self.options.input_audio_transcription.clone(),
            },
        }
        .to_frame()
    }

    async fn execute_tool(
        &self,
        call_id: &str,
        name: &str,
        raw_arguments: &str,
    ) -> Result<ToolCallResult, ToolError> {
        let arguments = parse_arguments(name, raw_arguments)?;
        let dispatch = self.tools.dispatch(call_id, name, arguments, &self.context);
        match tokio::time::timeout(self.tool_timeout, dispatch).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                seconds: self.tool_timeout.as_secs(),
            }),
        }
    }
}

// =============================================================================
// Session Bridge
// =============================================================================

/// Cheap handle used to stop a session from elsewhere.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct SessionBridge {
    state: Arc<SessionState>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SessionBridge {
    /// Open the upstream for `client` and start relaying.
    ///
    /// On failure the client receives a `connection_error` event and its link
    /// is closed.
    pub async fn start(
        client: EventLink,
        connector: &dyn UpstreamConnector,
        setup: SessionSetup,
    ) -> BridgeResult<Self> {
        let (client_tx, client_rx) = client.split();
        let cancel = setup.cancel.clone();
        let state = Arc::new(SessionState::new(setup));

        let upstream = match connector.connect().await {
            Ok(link) => link,
            Err(e) => {
                error!(session_id = %state.id, target = %connector.describe(), error = %e, "Upstream connection failed");
                notify_connection_error(&client_tx, "The voice service is unavailable right now.").await;
                return Err(e.into());
            }
        };
        let (upstream_tx, upstream_rx) = upstream.split();

        let configure = state.session_update_frame()?;
        if upstream_tx.send(configure).await.is_err() {
            error!(session_id = %state.id, "Upstream closed before the session was configured");
            notify_connection_error(&client_tx, "The voice service closed the session.").await;
            return Err(BridgeError::Connection(
                "upstream closed before session configuration".to_string(),
            ));
        }

        let client_task = tokio::spawn(client_pump(
            state.clone(),
            client_rx,
            upstream_tx.clone(),
            client_tx.clone(),
            cancel.clone(),
        ));
        let upstream_task = tokio::spawn(
            UpstreamPump::new(state.clone(), upstream_tx, client_tx).run(upstream_rx, cancel.clone()),
        );

        info!(
            session_id = %state.id,
            target = %connector.describe(),
            tools = state.tools.len(),
            "Session bridge started"
        );

        Ok(Self {
            state,
            cancel,
            tasks: tokio::sync::Mutex::new(vec![client_task, upstream_task]),
        })
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.state.id.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Stop relaying and close both links. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(session_id = %self.state.id, "Stopping session bridge");
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.state.stats.snapshot()
    }

    /// Wait until both pumps have finished.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                error!(session_id = %self.state.id, "Session pump panicked: {}", e);
            }
        }
    }

    /// Stop, then wait at most `grace` for the pumps; abort them afterwards.
    ///
    /// Returns `true` when the pumps finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        let mut tasks = self.tasks.lock().await;
        let finished = tokio::time::timeout(grace, async {
            for task in tasks.iter_mut() {
                let _ = task.await;
            }
        })
        .await
        .is_ok();

        if !finished {
            warn!(session_id = %self.state.id, "Session pumps did not stop in time; aborting");
            for task in tasks.iter() {
                task.abort();
            }
        }
        tasks.clear();
        finished
    }
}

impl Drop for SessionBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn notify_connection_error(client_tx: &mpsc::Sender<String>, message: &str) {
    match ClientNotice::error("connection_error", "upstream_unavailable", message).to_frame() {
        Ok(frame) => {
            let _ = client_tx.send(frame).await;
        }
        Err(e) => error!("Failed to encode connection error: {}", e),
    }
}

// =============================================================================
// Client -> Upstream
// =============================================================================

enum ClientRoute {
    Forward(String),
    Reply(String),
    Drop,
}

async fn client_pump(
    state: Arc<SessionState>,
    mut client_rx: mpsc::Receiver<String>,
    upstream_tx: mpsc::Sender<String>,
    client_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = client_rx.recv() => frame,
        };
        let Some(frame) = frame else {
            info!(session_id = %state.id, "Client link closed");
            break;
        };

        match route_client_frame(&state, frame) {
            ClientRoute::Forward(frame) => {
                if upstream_tx.send(frame).await.is_err() {
                    warn!(session_id = %state.id, "Upstream link closed while forwarding client event");
                    break;
                }
                SessionStats::bump(&state.stats.client_events_forwarded);
            }
            ClientRoute::Reply(notice) => {
                SessionStats::bump(&state.stats.client_events_rejected);
                if client_tx.send(notice).await.is_err() {
                    break;
                }
            }
            ClientRoute::Drop => SessionStats::bump(&state.stats.events_dropped),
        }
    }

    cancel.cancel();
    debug!(session_id = %state.id, "Client pump finished");
}

fn route_client_frame(state: &SessionState, frame: String) -> ClientRoute {
    let envelope = match serde_json::from_str::<EventEnvelope>(&frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(session_id = %state.id, error = %e, "Dropping malformed client event");
            return reply(state, "invalid_request_error", "invalid_event", "Event is not valid JSON.");
        }
    };

    match envelope.kind.as_deref() {
        None => {
            warn!(session_id = %state.id, "Dropping client event without type");
            reply(state, "invalid_request_error", "invalid_event", "Event has no type.")
        }
        Some(events::SESSION_UPDATE) => review_session_update(state, &frame),
        Some(kind @ (events::RESPONSE_CREATE | events::CONVERSATION_ITEM_CREATE)) => {
            let offending = match serde_json::from_str::<Value>(&frame) {
                Ok(event) if kind == events::RESPONSE_CREATE => policy::response_overrides(&event),
                Ok(event) => policy::item_override(&event).into_iter().collect(),
                Err(_) => return ClientRoute::Drop,
            };
            if offending.is_empty() {
                ClientRoute::Forward(frame)
            } else {
                reject_override(state, kind, &offending)
            }
        }
        Some(_) => ClientRoute::Forward(frame),
    }
}

fn reject_override(state: &SessionState, kind: &str, fields: &[String]) -> ClientRoute {
    warn!(session_id = %state.id, kind, ?fields, "Rejected client configuration override");
    reply(
        state,
        "invalid_request_error",
        "config_override_rejected",
        &format!(
            "Session configuration is managed by the server; rejected fields: {}",
            fields.join(", ")
        ),
    )
}

fn review_session_update(state: &SessionState, frame: &str) -> ClientRoute {
    let event: Value = match serde_json::from_str(frame) {
        Ok(event) => event,
        Err(_) => return ClientRoute::Drop,
    };

    match state.policy.review_client_update(&event) {
        ClientUpdateReview::Forward(reduced) => {
            debug!(session_id = %state.id, "Forwarding client audio settings update");
            ClientRoute::Forward(reduced.to_string())
        }
        ClientUpdateReview::Reject(fields) => reject_override(state, events::SESSION_UPDATE, &fields),
    }
}

fn reply(state: &SessionState, error_type: &str, code: &str, message: &str) -> ClientRoute {
    match ClientNotice::error(error_type, code, message).to_frame() {
        Ok(frame) => ClientRoute::Reply(frame),
        Err(e) => {
            error!(session_id = %state.id, "Failed to encode client notice: {}", e);
            ClientRoute::Drop
        }
    }
}

// =============================================================================
// Upstream -> Client
// =============================================================================

enum Flow {
    Continue,
    Stop,
}

struct UpstreamPump {
    state: Arc<SessionState>,
    upstream_tx: mpsc::Sender<String>,
    client_tx: mpsc::Sender<String>,
    /// call_id -> tool name, from `function_call` items seen before the call completes.
    pending_calls: HashMap<String, String>,
    /// A tool ran since the last `response.done`.
    followup_pending: bool,
}

impl UpstreamPump {
    fn new(
        state: Arc<SessionState>,
        upstream_tx: mpsc::Sender<String>,
        client_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            state,
            upstream_tx,
            client_tx,
            pending_calls: HashMap::new(),
            followup_pending: false,
        }
    }

    async fn run(mut self, mut upstream_rx: mpsc::Receiver<String>, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = upstream_rx.recv() => frame,
            };
            let Some(frame) = frame else {
                info!(session_id = %self.state.id, "Upstream link closed");
                break;
            };

            match self.route(frame, &cancel).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(BridgeError::Protocol(reason)) => {
                    warn!(session_id = %self.state.id, %reason, "Dropping upstream event");
                    SessionStats::bump(&self.state.stats.events_dropped);
                }
                Err(BridgeError::ClientClosed) => {
                    info!(session_id = %self.state.id, "Client link closed");
                    break;
                }
                Err(e) => {
                    error!(session_id = %self.state.id, error = %e, "Upstream relay failed");
                    break;
                }
            }
        }

        cancel.cancel();
        debug!(session_id = %self.state.id, "Upstream pump finished");
    }

    async fn route(&mut self, frame: String, cancel: &CancellationToken) -> BridgeResult<Flow> {
        let envelope: EventEnvelope = serde_json::from_str(&frame)
            .map_err(|e| BridgeError::Protocol(format!("unparseable upstream event: {e}")))?;
        let Some(kind) = envelope.kind else {
            return Err(BridgeError::Protocol("upstream event without type".to_string()));
        };

        match kind.as_str() {
            events::SESSION_CREATED | events::SESSION_UPDATED => {
                let event = parse_value(&frame)?;
                let redacted = self.state.policy.redact_session_event(&event);
                self.to_client(redacted.to_string()).await?;
            }
            events::RESPONSE_OUTPUT_ITEM_ADDED
            | events::RESPONSE_OUTPUT_ITEM_DONE
            | events::CONVERSATION_ITEM_CREATED => {
                let event = parse_value(&frame)?;
                match event.get("item") {
                    Some(item) if events::is_function_item(item) => self.remember_call(item),
                    _ => self.to_client(frame).await?,
                }
            }
            events::FUNCTION_CALL_ARGUMENTS_DELTA => {}
            events::FUNCTION_CALL_ARGUMENTS_DONE => return self.handle_tool_call(&frame, cancel).await,
            events::RESPONSE_DONE => {
                let mut event = parse_value(&frame)?;
                policy::strip_function_calls(&mut event);
                if std::mem::take(&mut self.followup_pending) {
                    self.to_upstream(UpstreamCommand::ResponseCreate.to_frame()?).await?;
                }
                self.to_client(event.to_string()).await?;
            }
            events::ERROR => {
                let terminal = serde_json::from_str::<Value>(&frame)
                    .map(|event| events::is_terminal_error(&event))
                    .unwrap_or(false);
                self.to_client(frame).await?;
                if terminal {
                    warn!(session_id = %self.state.id, "Upstream reported the session as ended");
                    return Ok(Flow::Stop);
                }
            }
            _ => self.to_client(frame).await?,
        }

        Ok(Flow::Continue)
    }

    fn remember_call(&mut self, item: &Value) {
        if item.get("type").and_then(Value::as_str) != Some(events::FUNCTION_CALL_ITEM) {
            return;
        }
        if let (Some(call_id), Some(name)) = (
            item.get("call_id").and_then(Value::as_str),
            item.get("name").and_then(Value::as_str),
        ) {
            self.pending_calls.insert(call_id.to_string(), name.to_string());
        }
    }

    async fn handle_tool_call(&mut self, frame: &str, cancel: &CancellationToken) -> BridgeResult<Flow> {
        let call: FunctionCallDone = serde_json::from_str(frame)
            .map_err(|e| BridgeError::Protocol(format!("malformed function call: {e}")))?;
        let Some(call_id) = call.call_id.filter(|id| !id.is_empty()) else {
            return Err(BridgeError::Protocol("function call without call_id".to_string()));
        };

        let remembered = self.pending_calls.remove(&call_id);
        let name = call
            .name
            .filter(|name| !name.is_empty())
            .or(remembered)
            .unwrap_or_default();
        SessionStats::bump(&self.state.stats.tool_calls_received);
        info!(session_id = %self.state.id, %call_id, tool = %name, "Executing tool call");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(session_id = %self.state.id, %call_id, "Session stopping; discarding pending tool call");
                return Ok(Flow::Stop);
            }
            outcome = self.state.execute_tool(&call_id, &name, &call.arguments) => outcome,
        };

        let (payload, echo_to_client) = match outcome {
            Ok(result) => (result.output.payload, result.output.echo_to_client),
            Err(e) => {
                warn!(session_id = %self.state.id, %call_id, tool = %name, error = %e, "Tool call failed");
                (e.to_payload(), false)
            }
        };

        let output = UpstreamCommand::function_call_output(&call_id, payload.clone()).to_frame()?;
        self.to_upstream(output).await?;
        SessionStats::bump(&self.state.stats.tool_results_sent);
        self.followup_pending = true;

        if echo_to_client {
            let notice = ClientNotice::ToolResponse {
                previous_item_id: call.item_id,
                tool_name: name,
                tool_result: payload,
            };
            self.to_client(notice.to_frame()?).await?;
        }

        Ok(Flow::Continue)
    }

    async fn to_client(&self, frame: String) -> BridgeResult<()> {
        self.client_tx
            .send(frame)
            .await
            .map_err(|_| BridgeError::ClientClosed)?;
        SessionStats::bump(&self.state.stats.upstream_events_forwarded);
        Ok(())
    }

    async fn to_upstream(&self, frame: String) -> BridgeResult<()> {
        self.upstream_tx
            .send(frame)
            .await
            .map_err(|_| BridgeError::UpstreamClosed("upstream link closed".to_string()))
    }
}

fn parse_value(frame: &str) -> BridgeResult<Value> {
    serde_json::from_str(frame).map_err(|e| BridgeError::Protocol(format!("unparseable upstream event: {e}")))
}
