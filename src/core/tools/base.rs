//! Types shared by every tool handler.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

use super::grounding::GroundingTracker;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by the registry or by a tool handler.
///
/// None of these end a session: the bridge turns each one into a result
/// payload for the model via [`ToolError::to_payload`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    /// `message` is shown to the model and must not carry transport detail.
    #[error("Tool {tool} failed: {message}")]
    Execution {
        tool: String,
        message: String,
        retryable: bool,
    },

    #[error("Tool {tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },
}

impl ToolError {
    pub fn execution(tool: &str, message: impl Into<String>, retryable: bool) -> Self {
        ToolError::Execution {
            tool: tool.to_string(),
            message: message.into(),
            retryable,
        }
    }

    /// Stable machine-readable error type.
    pub fn error_type(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::DuplicateTool(_) => "duplicate_tool",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::Execution { .. } => "tool_execution_error",
            ToolError::Timeout { .. } => "tool_timeout",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::Execution { retryable, .. } => *retryable,
            ToolError::Timeout { .. } => true,
            _ => false,
        }
    }

    fn model_message(&self) -> String {
        match self {
            ToolError::UnknownTool(name) => format!("The tool '{name}' is not available."),
            ToolError::DuplicateTool(name) => format!("The tool '{name}' is misconfigured."),
            ToolError::InvalidArguments { message, .. } => {
                format!("The arguments were not valid: {message}")
            }
            ToolError::Execution { message, .. } => message.clone(),
            ToolError::Timeout { .. } => {
                "The tool did not respond in time. Tell the user you will try again shortly."
                    .to_string()
            }
        }
    }

    /// Structured failure payload returned to the model in place of a result.
    pub fn to_payload(&self) -> String {
        json!({
            "status": "failed",
            "error": {
                "type": self.error_type(),
                "message": self.model_message(),
                "retryable": self.is_retryable(),
            }
        })
        .to_string()
    }
}

// =============================================================================
// Call Types
// =============================================================================

/// What a handler hands back to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text placed in the `function_call_output` item.
    pub payload: String,
    /// Also surface the payload to the browser as a middle-tier tool response.
    pub echo_to_client: bool,
}

impl ToolOutput {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            echo_to_client: false,
        }
    }

    pub fn json(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    pub fn echo_to_client(mut self) -> Self {
        self.echo_to_client = true;
        self
    }
}

/// Result of one dispatched call, correlated by `call_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub output: ToolOutput,
}

/// Per-session context handed to every handler.
#[derive(Clone)]
pub struct ToolContext {
    session_id: String,
    grounding: Arc<Mutex<GroundingTracker>>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            grounding: Arc::new(Mutex::new(GroundingTracker::new())),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run `f` with the session's grounding tracker locked.
    ///
    /// The lock is never held across an await point.
    pub fn with_grounding<R>(&self, f: impl FnOnce(&mut GroundingTracker) -> R) -> R {
        let mut tracker = self.grounding.lock();
        f(&mut tracker)
    }
}

// =============================================================================
// Handler Trait
// =============================================================================

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Name, schema and handler of one tool.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    /// Entry for the `tools` list of a `session.update`.
    pub fn to_session_tool(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Parse the raw `arguments` string of a function call.
///
/// An empty string is treated as an empty object.
pub fn parse_arguments(tool: &str, raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Deserialize an arguments object into a handler's typed argument struct.
pub fn typed_arguments<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}
