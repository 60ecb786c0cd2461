//! LLM layer - provider adapters, stream framing and delta accumulation
//!
//! This module provides:
//! - Conversation and tool-call types
//! - Frame decoding for SSE and bare JSON bodies
//! - One accumulator per provider wire shape
//! - Provider adapters and selection

pub mod accumulator;
pub mod providers;
pub mod streaming;
pub mod types;

pub use accumulator::{Accumulator, AccumulatorDelta, AccumulatorState, FinishReason, WireShape};
pub use providers::{ProviderAdapter, RoundRequest};
pub use streaming::{ByteStream, FrameDecoder, FrameStream, parse_sse_event};
pub use types::{
    ChatRequest, CompletedToolCall, ConversationMessage, InboundMessage, ProposedToolCall, Role, ToolDefinition,
};
