//! Messages API adapter
//!
//! Also provides the message encoding the tunnel reuses, since the tunnel
//! proxy accepts the same request shape.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{ProviderAdapter, RoundRequest, http_client, post_stream};
use crate::error::Result;
use crate::llm::accumulator::WireShape;
use crate::llm::streaming::ByteStream;
use crate::llm::types::{ConversationMessage, Role};

/// Messages API base URL
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";

/// Messages API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const OPUS_MODEL: &str = "claude-3-opus-20240229";
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Configuration for the messages adapter
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: ANTHROPIC_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(60),
        }
    }
}

impl AnthropicConfig {
    /// Config for a caller-requested model identifier
    pub fn for_requested_model(requested: &str) -> Self {
        Self {
            model: resolve_model(requested, DEFAULT_MODEL),
            ..Default::default()
        }
    }
}

/// Map a caller-facing alias to a concrete model id.
pub fn resolve_model(requested: &str, default_model: &str) -> String {
    match requested {
        "opus" => OPUS_MODEL.to_string(),
        "sonnet" | "claude" => DEFAULT_MODEL.to_string(),
        explicit if explicit.starts_with("claude-") => explicit.to_string(),
        _ => default_model.to_string(),
    }
}

pub struct AnthropicAdapter {
    client: Client,
    api_key: String,
    config: AnthropicConfig,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, config: AnthropicConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout)?,
            api_key: api_key.into(),
            config,
        })
    }

    /// Build the streaming request body
    pub fn build_request(&self, request: &RoundRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": encode_messages(request.messages),
            "stream": true
        });

        if !request.system_prompt.is_empty() {
            body["system"] = json!(request.system_prompt);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_anthropic_schema()).collect();
            body["tools"] = json!(tools);
        }

        body
    }
}

/// Render the conversation as messages-API turns.
///
/// Assistant turns that requested tools become `tool_use` blocks. Runs of
/// consecutive tool results are grouped into one user turn of `tool_result`
/// blocks. System turns travel in the top-level `system` field instead.
pub(crate) fn encode_messages(messages: &[ConversationMessage]) -> Vec<Value> {
    let mut encoded: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_results: Vec<Value> = Vec::new();

    for message in messages {
        if message.role == Role::Tool {
            pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.as_deref().unwrap_or_default(),
                "content": message.content,
                "is_error": message.is_error
            }));
            continue;
        }

        if !pending_results.is_empty() {
            encoded.push(json!({"role": "user", "content": std::mem::take(&mut pending_results)}));
        }

        match message.role {
            Role::User => encoded.push(json!({"role": "user", "content": message.content})),
            Role::Assistant if message.has_tool_calls() => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": message.content}));
                }
                for call in &message.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments_or_empty()
                    }));
                }
                encoded.push(json!({"role": "assistant", "content": blocks}));
            }
            // The API rejects empty text turns
            Role::Assistant if message.content.is_empty() => {}
            Role::Assistant => encoded.push(json!({"role": "assistant", "content": message.content})),
            Role::System | Role::Tool => {}
        }
    }

    if !pending_results.is_empty() {
        encoded.push(json!({"role": "user", "content": pending_results}));
    }

    encoded
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn shape(&self) -> WireShape {
        WireShape::Messages
    }

    async fn open_stream(&self, request: &RoundRequest<'_>) -> Result<ByteStream> {
        let body = self.build_request(request);
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        let builder = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        post_stream(builder, self.name(), self.config.timeout).await
    }
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("model", &self.config.model)
            .field("max_tokens", &self.config.max_tokens)
            .finish()
    }
}
