//! Tool registry and the standard tool set.
//!
//! # Architecture
//!
//! - [`ToolHandler`] is the seam: one async call per function call, given the
//!   parsed arguments and the per-session [`ToolContext`].
//! - [`ToolRegistry`] binds names to handlers and produces the `tools` list
//!   advertised upstream.
//! - Every failure is a [`ToolError`], which the bridge turns into a result
//!   payload; tool failures never end a session.
//!
//! # Standard tools
//!
//! | Name | Purpose |
//! |------|---------|
//! | `search` | Query the knowledge base, mint citation tokens |
//! | `report_grounding` | Resolve cited tokens, echo sources to the client |
//! | `current_date` | Today's date in UTC |
//! | `send_email` | Send an email through the configured relay |

pub mod base;
pub mod current_date;
pub mod grounding;
pub mod registry;
pub mod search;
pub mod send_email;

use std::sync::Arc;

pub use base::{
    ToolCallResult, ToolContext, ToolDefinition, ToolError, ToolHandler, ToolOutput,
    parse_arguments, typed_arguments,
};
pub use current_date::{CURRENT_DATE_TOOL_NAME, Clock, CurrentDateTool};
pub use grounding::{
    GroundingCitation, GroundingError, GroundingTracker, REPORT_GROUNDING_TOOL_NAME,
    ReportGroundingTool,
};
pub use registry::ToolRegistry;
pub use search::{SEARCH_TOOL_NAME, SearchTool};
pub use send_email::{SEND_EMAIL_TOOL_NAME, SendEmailTool};

use crate::core::email::EmailSender;
use crate::core::search::SearchIndex;

/// Collaborators the standard tools are built from.
#[derive(Clone)]
pub struct ToolDependencies {
    pub search: Arc<dyn SearchIndex>,
    pub email: Arc<dyn EmailSender>,
    pub clock: Option<Clock>,
}

/// Registry holding `search`, `report_grounding`, `current_date` and `send_email`.
pub fn standard_registry(deps: &ToolDependencies) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();

    registry.register(
        SEARCH_TOOL_NAME,
        search::SEARCH_DESCRIPTION,
        search::search_parameters(),
        Arc::new(SearchTool::new(deps.search.clone())),
    )?;
    registry.register(
        REPORT_GROUNDING_TOOL_NAME,
        grounding::REPORT_GROUNDING_DESCRIPTION,
        grounding::report_grounding_parameters(),
        Arc::new(ReportGroundingTool),
    )?;

    let date_tool = match &deps.clock {
        Some(clock) => CurrentDateTool::with_clock(clock.clone()),
        None => CurrentDateTool::new(),
    };
    registry.register(
        CURRENT_DATE_TOOL_NAME,
        current_date::CURRENT_DATE_DESCRIPTION,
        current_date::current_date_parameters(),
        Arc::new(date_tool),
    )?;
    registry.register(
        SEND_EMAIL_TOOL_NAME,
        send_email::SEND_EMAIL_DESCRIPTION,
        send_email::send_email_parameters(),
        Arc::new(SendEmailTool::new(deps.email.clone())),
    )?;

    Ok(registry)
}
