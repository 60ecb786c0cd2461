//! Chat-completions adapter

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{ProviderAdapter, RoundRequest, http_client, post_stream};
use crate::error::Result;
use crate::llm::accumulator::WireShape;
use crate::llm::streaming::ByteStream;
use crate::llm::types::{ConversationMessage, Role};

/// Chat-completions API base URL
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Configuration for the chat-completions adapter
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: OPENAI_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct OpenAiAdapter {
    client: Client,
    api_key: String,
    config: OpenAiConfig,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>, config: OpenAiConfig) -> Result<Self> {
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
            "messages": encode_messages(request.system_prompt, request.messages),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "stream": true
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_openai_schema()).collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }
}

/// Render the conversation as chat-completions messages, system prompt first.
pub fn encode_messages(system_prompt: &str, messages: &[ConversationMessage]) -> Vec<Value> {
    let mut encoded = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        encoded.push(json!({"role": "system", "content": system_prompt}));
    }

    for message in messages {
        let value = match message.role {
            Role::System => json!({"role": "system", "content": message.content}),
            Role::User => json!({"role": "user", "content": message.content}),
            Role::Assistant if message.has_tool_calls() => {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments_or_empty().to_string()
                            }
                        })
                    })
                    .collect();
                let content = if message.content.is_empty() {
                    Value::Null
                } else {
                    json!(message.content)
                };
                json!({"role": "assistant", "content": content, "tool_calls": calls})
            }
            Role::Assistant => json!({"role": "assistant", "content": message.content}),
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id.as_deref().unwrap_or_default(),
                "content": message.content
            }),
        };
        encoded.push(value);
    }

    encoded
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn shape(&self) -> WireShape {
        WireShape::ChatCompletions
    }

    async fn open_stream(&self, request: &RoundRequest<'_>) -> Result<ByteStream> {
        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let builder = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body);

        post_stream(builder, self.name(), self.config.timeout).await
    }
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}
