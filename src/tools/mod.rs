//! Tool execution
//!
//! The conversation loop only sees [`ToolExecutor`]. Tool arguments originate
//! from model output, so every implementation must treat them as untrusted.

mod current_time;
mod registry;

pub use current_time::CurrentTimeTool;
pub use registry::ToolRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::access::{AccessLevel, Caller};

/// Errors a tool can report back into the conversation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// One permitted call, arguments already parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Who is calling
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    pub user_id: Option<String>,
    pub access_level: AccessLevel,
}

impl ToolContext {
    pub fn new(user_id: Option<String>, access_level: AccessLevel) -> Self {
        Self { user_id, access_level }
    }
}

impl From<&Caller> for ToolContext {
    fn from(caller: &Caller) -> Self {
        Self::new(caller.user_id.clone(), caller.access_level)
    }
}

/// Performs the side effect of a tool call
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, invocation: &ToolInvocation, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// A single tool that can be registered with a [`ToolRegistry`]
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the name the model calls)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}
