//! Provider adapters
//!
//! Each adapter translates a round request into its provider's native
//! streaming request and hands back the raw response body. Decoding and
//! accumulation happen outside the adapter, keyed only by [`WireShape`].

pub mod anthropic;
pub mod openai;
pub mod selection;
pub mod tunnel;

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, warn};

use crate::error::{ChatError, Result};
use crate::llm::accumulator::WireShape;
use crate::llm::streaming::{ByteStream, FrameDecoder};
use crate::llm::types::{ConversationMessage, ToolDefinition};

pub use anthropic::{AnthropicAdapter, AnthropicConfig};
pub use openai::{OpenAiAdapter, OpenAiConfig};
pub use selection::{ProviderAvailability, ProviderChoice, TunnelStatus, select_provider, wants_messages_family};
pub use tunnel::{TunnelAdapter, TunnelConfig, TunnelHealth};

/// Default retry-after when a 429 carries no usable header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Everything one provider round needs
#[derive(Debug, Clone, Copy)]
pub struct RoundRequest<'a> {
    pub system_prompt: &'a str,
    pub messages: &'a [ConversationMessage],
    pub tools: &'a [ToolDefinition],
}

/// One streaming LLM backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Model identifier sent upstream
    fn model(&self) -> &str;

    /// Wire shape of the response stream
    fn shape(&self) -> WireShape;

    /// Send the request and return the response body as raw chunks.
    async fn open_stream(&self, request: &RoundRequest<'_>) -> Result<ByteStream>;

    /// Frame decoder suited to this provider's body
    fn decoder(&self) -> FrameDecoder {
        match self.shape() {
            WireShape::Tunnel => FrameDecoder::with_bare_json(),
            WireShape::ChatCompletions | WireShape::Messages => FrameDecoder::new(),
        }
    }
}

/// Send a streaming request and map failures onto the error taxonomy.
///
/// `timeout` bounds the wait for response headers; once streaming starts the
/// body is read for as long as the provider keeps sending.
pub(crate) async fn post_stream(
    request: reqwest::RequestBuilder,
    provider: &str,
    timeout: Duration,
) -> Result<ByteStream> {
    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| ChatError::Transport(format!("{} request timed out after {:?}", provider, timeout)))?
        .map_err(|e| ChatError::Transport(format!("{} request failed: {}", provider, e)))?;

    let status = response.status();

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        warn!("{} rate limited, retry after {}s", provider, retry_after);
        return Err(ChatError::RateLimited {
            retry_after: Duration::from_secs(retry_after),
        });
    }

    if !status.is_success() {
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!("{} API error {}: {}", provider, status, error_body);
        return Err(ChatError::Api {
            status: status.as_u16(),
            message: error_body,
        });
    }

    debug!("{} stream opened ({})", provider, status);

    Ok(response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ChatError::from))
        .boxed())
}

/// Build an HTTP client for provider traffic.
pub(crate) fn http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| ChatError::Config(format!("Failed to create HTTP client: {}", e)))
}
