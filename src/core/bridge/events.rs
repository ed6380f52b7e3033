//! Realtime protocol events the bridge inspects or produces.
//!
//! Frames the bridge merely relays are never deserialized into typed events:
//! only the `type` tag is peeked at, and the original text is forwarded. The
//! typed enums below cover what the relay itself emits.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::BridgeResult;

// =============================================================================
// Event Type Tags
// =============================================================================

pub const SESSION_CREATED: &str = "session.created";
pub const SESSION_UPDATED: &str = "session.updated";
pub const SESSION_UPDATE: &str = "session.update";
pub const RESPONSE_CREATE: &str = "response.create";
pub const CONVERSATION_ITEM_CREATE: &str = "conversation.item.create";
pub const RESPONSE_OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
pub const RESPONSE_OUTPUT_ITEM_DONE: &str = "response.output_item.done";
pub const CONVERSATION_ITEM_CREATED: &str = "conversation.item.created";
pub const FUNCTION_CALL_ARGUMENTS_DELTA: &str = "response.function_call_arguments.delta";
pub const FUNCTION_CALL_ARGUMENTS_DONE: &str = "response.function_call_arguments.done";
pub const RESPONSE_DONE: &str = "response.done";
pub const ERROR: &str = "error";

pub const FUNCTION_CALL_ITEM: &str = "function_call";
pub const FUNCTION_CALL_OUTPUT_ITEM: &str = "function_call_output";

/// Upstream error codes after which the upstream session is gone.
pub const TERMINAL_ERROR_CODES: &[&str] = &["session_expired", "session_closed"];

// =============================================================================
// Incoming (peeked)
// =============================================================================

/// Just enough of an event to route it.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// `response.function_call_arguments.done`
#[derive(Debug, Deserialize)]
pub struct FunctionCallDone {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub item_id: Option<String>,
}

/// Whether a conversation item belongs to tool orchestration.
pub fn is_function_item(item: &Value) -> bool {
    matches!(
        item.get("type").and_then(Value::as_str),
        Some(FUNCTION_CALL_ITEM | FUNCTION_CALL_OUTPUT_ITEM)
    )
}

pub fn is_terminal_error(event: &Value) -> bool {
    event
        .pointer("/error/code")
        .and_then(Value::as_str)
        .is_some_and(|code| TERMINAL_ERROR_CODES.contains(&code))
}

// =============================================================================
// Outgoing to Upstream
// =============================================================================

/// Session parameters the relay owns.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionCallOutputItem {
    #[serde(rename = "type")]
    pub item_type: &'static str,
    pub call_id: String,
    pub output: String,
}

/// Events the relay sends upstream on its own behalf.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum UpstreamCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: FunctionCallOutputItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl UpstreamCommand {
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        UpstreamCommand::ConversationItemCreate {
            item: FunctionCallOutputItem {
                item_type: FUNCTION_CALL_OUTPUT_ITEM,
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    pub fn to_frame(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Outgoing to Client
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub message: String,
}

/// Events the relay sends to the browser on its own behalf.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientNotice {
    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    /// Result of an echo-to-client tool, rendered by the browser.
    #[serde(rename = "extension.middle_tier_tool_response")]
    ToolResponse {
        previous_item_id: Option<String>,
        tool_name: String,
        tool_result: String,
    },
}

impl ClientNotice {
    pub fn error(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ClientNotice::Error {
            error: ErrorDetail {
                error_type: error_type.into(),
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn to_frame(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
