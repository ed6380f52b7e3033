//! Citation tokens and the `report_grounding` tool.
//!
//! Search results are shown to the model under opaque tokens (`g1`, `g2`, ...)
//! instead of their source ids. The tracker remembers which passage each
//! token stands for, so that when the model cites tokens through
//! `report_grounding` the relay can resolve them back to sources for the
//! browser's citation panel.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use super::base::{ToolContext, ToolError, ToolHandler, ToolOutput, typed_arguments};

pub const REPORT_GROUNDING_TOOL_NAME: &str = "report_grounding";

pub const REPORT_GROUNDING_DESCRIPTION: &str = "Cite the knowledge base passages used in the \
answer you are giving. Each passage returned by 'search' is preceded by a citation token in \
square brackets, such as [g1]. Call this tool with the tokens of the passages you actually \
relied on whenever you answer from the knowledge base.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroundingError {
    #[error("Unknown citation token: {0}")]
    UnknownToken(String),
}

/// One passage the model has been shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundingCitation {
    pub token: String,
    pub source_id: String,
    pub title: Option<String>,
    pub content: String,
}

/// Per-session token table. Tokens are never reused within a session.
#[derive(Debug, Default)]
pub struct GroundingTracker {
    issued: u64,
    citations: HashMap<String, GroundingCitation>,
}

impl GroundingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for a passage.
    pub fn mint(
        &mut self,
        source_id: impl Into<String>,
        title: Option<String>,
        content: impl Into<String>,
    ) -> String {
        self.issued += 1;
        let token = format!("g{}", self.issued);
        self.citations.insert(
            token.clone(),
            GroundingCitation {
                token: token.clone(),
                source_id: source_id.into(),
                title,
                content: content.into(),
            },
        );
        token
    }

    pub fn lookup(&self, token: &str) -> Result<&GroundingCitation, GroundingError> {
        self.citations
            .get(token)
            .ok_or_else(|| GroundingError::UnknownToken(token.to_string()))
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

pub fn report_grounding_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sources": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Citation tokens of the passages used in the last answer. Leave out passages that were not used."
            }
        },
        "required": ["sources"],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct ReportGroundingArgs {
    sources: Vec<String>,
}

/// Resolves cited tokens to their passages and echoes them to the client.
pub struct ReportGroundingTool;

#[async_trait]
impl ToolHandler for ReportGroundingTool {
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let args: ReportGroundingArgs = typed_arguments(REPORT_GROUNDING_TOOL_NAME, arguments)?;

        let sources: Vec<Value> = ctx.with_grounding(|tracker| {
            args.sources
                .iter()
                .map(|raw| normalize_token(raw.as_str()))
                .map(|token| match tracker.lookup(token) {
                    Ok(citation) => json!({
                        "token": citation.token,
                        "chunk_id": citation.source_id,
                        "title": citation.title,
                        "chunk": citation.content,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            session_id = %ctx.session_id(),
                            token,
                            "{}", e
                        );
                        json!({ "token": token, "error": "unknown_citation" })
                    }
                })
                .collect()
        });

        Ok(ToolOutput::json(&json!({ "sources": sources })).echo_to_client())
    }
}

/// Models sometimes repeat the brackets they were shown.
fn normalize_token(raw: &str) -> &str {
    raw.trim().trim_start_matches('[').trim_end_matches(']').trim()
}
