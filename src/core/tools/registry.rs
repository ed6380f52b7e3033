use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::base::{
    ToolCallResult, ToolContext, ToolDefinition, ToolError, ToolHandler,
};

/// Named tool handlers bound to one session.
///
/// Built once, then only read. Cloning is cheap: handlers are shared.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }

        self.index.insert(name.clone(), self.definitions.len());
        self.definitions.push(ToolDefinition {
            name,
            description: description.into(),
            parameters,
            handler,
        });
        Ok(())
    }

    /// Run the handler bound to `name`.
    pub async fn dispatch(
        &self,
        call_id: &str,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<ToolCallResult, ToolError> {
        let definition = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let output = definition.handler.call(arguments, ctx).await?;
        Ok(ToolCallResult {
            call_id: call_id.to_string(),
            tool_name: definition.name.clone(),
            output,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.definitions[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.name.as_str())
    }

    /// The `tools` array advertised in `session.update`.
    pub fn session_tools(&self) -> Vec<Value> {
        self.definitions
            .iter()
            .map(ToolDefinition::to_session_tool)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
