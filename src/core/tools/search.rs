//! The `search` tool.
//!
//! Passages are returned to the model under fresh citation tokens; source ids
//! stay inside the relay.

use std::fmt::Write;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::base::{ToolContext, ToolError, ToolHandler, ToolOutput, typed_arguments};
use crate::core::search::{SearchError, SearchIndex};

pub const SEARCH_TOOL_NAME: &str = "search";

pub const SEARCH_DESCRIPTION: &str = "Search the knowledge base. The knowledge base is in \
English; translate the query to English if needed and translate the answer back. Each result \
starts with a citation token in square brackets, followed by the passage text, and ends with a \
line containing '-----'.";

pub const NO_RESULTS_TEXT: &str = "No results found in the knowledge base for this query.";

const RESULT_SEPARATOR: &str = "-----";

pub fn search_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Search query"
            }
        },
        "required": ["query"],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

pub struct SearchTool {
    index: Arc<dyn SearchIndex>,
}

impl SearchTool {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ToolHandler for SearchTool {
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let args: SearchArgs = typed_arguments(SEARCH_TOOL_NAME, arguments)?;
        tracing::info!(session_id = %ctx.session_id(), query = %args.query, "Searching knowledge base");

        let passages = self.index.search(&args.query).await.map_err(|e| {
            tracing::warn!(session_id = %ctx.session_id(), error = %e, "Search failed");
            match e {
                SearchError::NotConfigured => ToolError::execution(
                    SEARCH_TOOL_NAME,
                    "The knowledge base is not available.",
                    false,
                ),
                _ => ToolError::execution(
                    SEARCH_TOOL_NAME,
                    "The knowledge base could not be reached. Tell the user you will try again shortly.",
                    true,
                ),
            }
        })?;

        if passages.is_empty() {
            return Ok(ToolOutput::text(NO_RESULTS_TEXT));
        }

        let text = ctx.with_grounding(|tracker| {
            let mut text = String::new();
            for passage in passages {
                let token = tracker.mint(passage.source_id, passage.title, passage.content.as_str());
                let _ = writeln!(text, "[{token}]: {}\n{RESULT_SEPARATOR}", passage.content);
            }
            text
        });

        Ok(ToolOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::search::{Passage, UnconfiguredSearchIndex};

    struct FixedIndex(Vec<Passage>);

    #[async_trait]
    impl SearchIndex for FixedIndex {
        async fn search(&self, _query: &str) -> Result<Vec<Passage>, SearchError> {
            Ok(self.0.clone())
        }
    }

    struct DownIndex;

    #[async_trait]
    impl SearchIndex for DownIndex {
        async fn search(&self, _query: &str) -> Result<Vec<Passage>, SearchError> {
            Err(SearchError::Unavailable("connect timeout to 10.0.0.4".to_string()))
        }
    }

    fn passage(id: &str, content: &str) -> Passage {
        Passage {
            source_id: id.to_string(),
            title: None,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_results_use_tokens_not_source_ids() {
        let tool = SearchTool::new(Arc::new(FixedIndex(vec![
            passage("doc-17", "Refunds within 30 days."),
            passage("doc-4", "Exchanges are free."),
        ])));
        let ctx = ToolContext::new("s");

        let output = tool.call(json!({"query": "refund policy"}), &ctx).await.unwrap();
        assert_eq!(
            output.payload,
            "[g1]: Refunds within 30 days.\n-----\n[g2]: Exchanges are free.\n-----\n"
        );
        assert!(!output.payload.contains("doc-17"));
        assert!(!output.echo_to_client);
        assert_eq!(
            ctx.with_grounding(|g| g.lookup("g1").map(|c| c.source_id.clone())),
            Ok("doc-17".to_string())
        );
    }

    #[tokio::test]
    async fn test_tokens_continue_across_searches() {
        let tool = SearchTool::new(Arc::new(FixedIndex(vec![passage("doc-1", "a")])));
        let ctx = ToolContext::new("s");
        tool.call(json!({"query": "x"}), &ctx).await.unwrap();
        let second = tool.call(json!({"query": "x"}), &ctx).await.unwrap();
        assert!(second.payload.starts_with("[g2]"));
    }

    #[tokio::test]
    async fn test_empty_results() {
        let tool = SearchTool::new(Arc::new(FixedIndex(vec![])));
        let output = tool
            .call(json!({"query": "nothing"}), &ToolContext::new("s"))
            .await
            .unwrap();
        assert_eq!(output.payload, NO_RESULTS_TEXT);
    }

    #[tokio::test]
    async fn test_failure_does_not_leak_transport_detail() {
        let tool = SearchTool::new(Arc::new(DownIndex));
        let err = tool
            .call(json!({"query": "x"}), &ToolContext::new("s"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.to_payload().contains("10.0.0.4"));
    }

    #[tokio::test]
    async fn test_unconfigured_index_is_not_retryable() {
        let tool = SearchTool::new(Arc::new(UnconfiguredSearchIndex));
        let err = tool
            .call(json!({"query": "x"}), &ToolContext::new("s"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_query() {
        let tool = SearchTool::new(Arc::new(FixedIndex(vec![])));
        let err = tool.call(json!({}), &ToolContext::new("s")).await.unwrap_err();
        assert_eq!(err.error_type(), "invalid_arguments");
    }
}
