//! LLM types shared by every provider adapter
//!
//! This module defines the conversation messages the loop owns, the tool-call
//! records the accumulators produce, and the inbound request shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Calls echoed by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ProposedToolCall>,
    /// Set on tool turns that carry a failure or denial
    #[serde(default)]
    pub is_error: bool,
}

impl ConversationMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            is_error: false,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message that echoes the tool calls of a round
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ProposedToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create a tool-result message
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            is_error,
            ..Self::new(Role::Tool, content)
        }
    }

    /// Whether this assistant turn requested tools
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool call as the provider streams it: arguments stay raw until closure
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProposedToolCall {
    pub id: String,
    pub name: String,
    pub raw_arguments: String,
}

impl ProposedToolCall {
    /// Create a new proposed call
    pub fn new(id: impl Into<String>, name: impl Into<String>, raw_arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }

    /// Parse the raw argument string into a JSON object.
    ///
    /// An empty string means "no arguments" and parses to `{}`.
    pub fn parse_arguments(&self) -> Result<Value, String> {
        if self.name.is_empty() {
            return Err("Tool call is missing a function name".to_string());
        }

        let raw = self.raw_arguments.trim();
        if raw.is_empty() {
            return Ok(Value::Object(Map::new()));
        }

        match serde_json::from_str::<Value>(raw) {
            Ok(value) if value.is_object() => Ok(value),
            Ok(_) => Err(format!("Arguments for {} must be a JSON object", self.name)),
            Err(e) => Err(format!("Invalid arguments for {}: {}", self.name, e)),
        }
    }

    /// Arguments as a JSON value for echoing back to providers that want
    /// structured input. Unparseable arguments echo as `{}`.
    pub fn arguments_or_empty(&self) -> Value {
        self.parse_arguments()
            .unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// A closed tool call together with the outcome of parsing its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedToolCall {
    pub call: ProposedToolCall,
    pub arguments: Result<Value, String>,
}

impl CompletedToolCall {
    /// Close a proposed call, parsing its arguments once
    pub fn close(call: ProposedToolCall) -> Self {
        let arguments = call.parse_arguments();
        Self { call, arguments }
    }

    pub fn id(&self) -> &str {
        &self.call.id
    }

    pub fn name(&self) -> &str {
        &self.call.name
    }
}

/// Tool definition advertised to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Convert to the messages API schema format
    pub fn to_anthropic_schema(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema
        })
    }

    /// Convert to the chat-completions function schema format
    pub fn to_openai_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema
            }
        })
    }
}

/// One message as the caller sends it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub role: String,
    pub content: String,
}

impl InboundMessage {
    /// Map into a conversation message. Only `user` stays a user turn; every
    /// other role becomes an assistant turn so callers cannot inject system text.
    pub fn to_conversation(&self) -> ConversationMessage {
        if self.role == "user" {
            ConversationMessage::user(&self.content)
        } else {
            ConversationMessage::assistant(&self.content)
        }
    }
}

/// Inbound request for one conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<InboundMessage>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_context: Option<String>,
    #[serde(default)]
    pub enable_tools: bool,
}

fn default_model() -> String {
    "default".to_string()
}

impl ChatRequest {
    /// Create a request with a single user message
    pub fn from_user_message(content: impl Into<String>) -> Self {
        Self {
            messages: vec![InboundMessage {
                role: "user".to_string(),
                content: content.into(),
            }],
            model: default_model(),
            theme_context: None,
            enable_tools: false,
        }
    }

    /// Content of the last user message, empty if there is none
    pub fn last_user_message(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Conversation history in engine form
    pub fn conversation(&self) -> Vec<ConversationMessage> {
        self.messages.iter().map(InboundMessage::to_conversation).collect()
    }
}
