//! What the browser may see and what it may change.
//!
//! Session echoes are rebuilt from an allow-list: any key not listed is
//! dropped, so fields added to the protocol later stay hidden by default.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::events::{FUNCTION_CALL_ITEM, FUNCTION_CALL_OUTPUT_ITEM};

pub const DEFAULT_SESSION_FIELD_ALLOW_LIST: &[&str] = &[
    "id",
    "object",
    "model",
    "modalities",
    "input_audio_format",
    "output_audio_format",
    "input_audio_transcription",
    "turn_detection",
    "expires_at",
];

pub const DEFAULT_CLIENT_TUNABLE_FIELDS: &[&str] = &[
    "turn_detection",
    "input_audio_transcription",
    "input_audio_format",
    "output_audio_format",
];

/// Session fields that belong to the server alone. Never echoed, never tunable.
pub const RESERVED_SESSION_FIELDS: &[&str] = &["instructions", "tools", "tool_choice", "client_secret"];

/// Per-response overrides a client `response.create` may not carry.
const RESERVED_RESPONSE_FIELDS: &[&str] = &["instructions", "tools", "tool_choice"];

const ENVELOPE_FIELDS: &[&str] = &["type", "event_id"];

/// Outcome of reviewing a client `session.update`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientUpdateReview {
    /// Forward this reduced event upstream.
    Forward(Value),
    /// Reject; carries the offending field names.
    Reject(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    session_fields: HashSet<String>,
    client_tunable: HashSet<String>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_SESSION_FIELD_ALLOW_LIST.iter().copied(),
            DEFAULT_CLIENT_TUNABLE_FIELDS.iter().copied(),
        )
    }
}

impl SessionPolicy {
    pub fn new<A, T>(session_fields: A, client_tunable: T) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            session_fields: session_fields.into_iter().map(Into::into).collect(),
            client_tunable: client_tunable.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows_session_field(&self, field: &str) -> bool {
        self.session_fields.contains(field)
    }

    /// Rebuild a `session.created` / `session.updated` event from allowed keys.
    pub fn redact_session_event(&self, event: &Value) -> Value {
        let mut redacted = copy_envelope(event);

        if let Some(Value::Object(session)) = event.get("session") {
            let filtered: Map<String, Value> = session
                .iter()
                .filter(|(key, _)| self.session_fields.contains(key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            redacted.insert("session".to_string(), Value::Object(filtered));
        }

        Value::Object(redacted)
    }

    /// Review a client `session.update`: only tunable fields may pass.
    pub fn review_client_update(&self, event: &Value) -> ClientUpdateReview {
        let Some(Value::Object(session)) = event.get("session") else {
            return ClientUpdateReview::Reject(vec!["session".to_string()]);
        };

        let mut offending: Vec<String> = session
            .keys()
            .filter(|key| !self.client_tunable.contains(key.as_str()))
            .cloned()
            .collect();
        if !offending.is_empty() {
            offending.sort();
            return ClientUpdateReview::Reject(offending);
        }

        let mut reduced = copy_envelope(event);
        reduced.insert("session".to_string(), Value::Object(session.clone()));
        ClientUpdateReview::Forward(Value::Object(reduced))
    }
}

/// Fields of a client `response.create` that would override server configuration.
pub fn response_overrides(event: &Value) -> Vec<String> {
    let Some(Value::Object(response)) = event.get("response") else {
        return Vec::new();
    };
    let mut offending: Vec<String> = response
        .keys()
        .filter(|key| RESERVED_RESPONSE_FIELDS.contains(&key.as_str()))
        .cloned()
        .collect();
    offending.sort();
    offending
}

/// Why a client `conversation.item.create` may not pass, if it may not.
///
/// Tool traffic and system messages are produced by the server only.
pub fn item_override(event: &Value) -> Option<String> {
    let item = event.get("item")?;
    if let Some(kind @ (FUNCTION_CALL_ITEM | FUNCTION_CALL_OUTPUT_ITEM)) =
        item.get("type").and_then(Value::as_str)
    {
        return Some(format!("item.type={kind}"));
    }
    (item.get("role").and_then(Value::as_str) == Some("system")).then(|| "item.role=system".to_string())
}

/// Configured field names that collide with server-only session fields.
pub fn reserved_fields_in<'a>(fields: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    fields
        .into_iter()
        .filter(|field| RESERVED_SESSION_FIELDS.contains(field))
        .collect()
}

fn copy_envelope(event: &Value) -> Map<String, Value> {
    ENVELOPE_FIELDS
        .iter()
        .filter_map(|&field| {
            event
                .get(field)
                .map(|value| (field.to_string(), value.clone()))
        })
        .collect()
}

/// Remove `function_call` entries from `response.output` of a `response.done`.
///
/// Returns how many entries were removed.
pub fn strip_function_calls(event: &mut Value) -> usize {
    let Some(Value::Array(output)) = event.pointer_mut("/response/output") else {
        return 0;
    };
    let before = output.len();
    output.retain(|item| item.get("type").and_then(Value::as_str) != Some(FUNCTION_CALL_ITEM));
    before - output.len()
}
