//! Tool registry - name to tool lookup, implements [`ToolExecutor`]

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use super::{CurrentTimeTool, Tool, ToolContext, ToolError, ToolExecutor, ToolInvocation};
use crate::llm::types::ToolDefinition;

/// Registered tools by name
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a registry with the built-in tools
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add_tool(Box::new(CurrentTimeTool));
        registry
    }

    /// Create an empty registry (for custom tool sets)
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Add a tool, replacing any tool of the same name
    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Tool definitions, sorted by name so requests are stable
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, invocation: &ToolInvocation, ctx: &ToolContext) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&invocation.name)
            .ok_or_else(|| ToolError::UnknownTool(invocation.name.clone()))?;

        debug!("Executing tool {} for {:?}", invocation.name, ctx.user_id);
        tool.execute(invocation.arguments.clone(), ctx).await
    }
}
