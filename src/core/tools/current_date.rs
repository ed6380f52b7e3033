use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::macros::format_description;

use super::base::{ToolContext, ToolError, ToolHandler, ToolOutput};

pub const CURRENT_DATE_TOOL_NAME: &str = "current_date";

pub const CURRENT_DATE_DESCRIPTION: &str =
    "Get today's date (UTC) and day of the week. Use it whenever the user asks about the date.";

pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

pub fn current_date_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    })
}

pub struct CurrentDateTool {
    clock: Clock,
}

impl CurrentDateTool {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(OffsetDateTime::now_utc))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }
}

impl Default for CurrentDateTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for CurrentDateTool {
    async fn call(&self, _arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let now = (self.clock)().to_offset(time::UtcOffset::UTC);
        let date = now
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(|e| ToolError::execution(CURRENT_DATE_TOOL_NAME, e.to_string(), false))?;
        Ok(ToolOutput::json(&json!({
            "date": date,
            "weekday": now.weekday().to_string(),
        })))
    }
}
