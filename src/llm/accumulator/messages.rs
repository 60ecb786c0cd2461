//! Messages family: explicit content-block lifecycle.
//!
//! ```text
//! content_block_start  {index, content_block: {type: tool_use, id, name}}
//! content_block_delta  {index, delta: {type: input_json_delta, partial_json}}
//! content_block_stop   {index}
//! message_stop
//! ```

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AccumulatorDelta, AccumulatorState, error_message};

/// Kind of an open content block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    Other,
}

impl BlockKind {
    fn from_type(block_type: Option<&str>) -> Self {
        match block_type {
            Some("text") => BlockKind::Text,
            Some("thinking") | Some("redacted_thinking") => BlockKind::Thinking,
            Some("tool_use") => BlockKind::ToolUse,
            _ => BlockKind::Other,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagesAccumulator {
    state: AccumulatorState,
    /// Blocks started and not yet stopped
    blocks: BTreeMap<u32, BlockKind>,
    /// Most recently started block, for frames that omit `index`
    current_block: Option<u32>,
    next_index: u32,
    stop_reason: Option<String>,
}

impl MessagesAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    pub(super) fn state_mut(&mut self) -> &mut AccumulatorState {
        &mut self.state
    }

    /// Provider-declared stop reason from `message_delta`, if any
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn apply(&mut self, frame: &Value) -> Vec<AccumulatorDelta> {
        let mut deltas = Vec::new();

        match frame["type"].as_str() {
            Some("message_start") | Some("ping") => {}
            Some("content_block_start") => self.block_start(frame),
            Some("content_block_delta") => self.block_delta(frame, &mut deltas),
            Some("content_block_stop") => self.block_stop(frame, &mut deltas),
            Some("message_delta") => {
                if let Some(reason) = frame["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
            }
            Some("message_stop") => {
                debug!("Messages round finished: {:?}", self.stop_reason);
                // Tool blocks never stopped are closed with what they have
                deltas.extend(self.state.close_all().into_iter().map(AccumulatorDelta::ToolCall));
                deltas.push(self.state.finish_round());
            }
            Some("error") => {
                deltas.push(AccumulatorDelta::ProviderError(error_message(&frame["error"])));
            }
            other => debug!("Ignoring frame type {:?}", other),
        }

        deltas
    }

    fn block_index(&self, frame: &Value) -> u32 {
        frame["index"]
            .as_u64()
            .and_then(|i| u32::try_from(i).ok())
            .or(self.current_block)
            .unwrap_or(self.next_index)
    }

    fn block_start(&mut self, frame: &Value) {
        let index = self.block_index(frame);
        let block = &frame["content_block"];
        let kind = BlockKind::from_type(block["type"].as_str());

        if kind == BlockKind::ToolUse
            && let Err(e) = self.state.open_call(index, block["id"].as_str(), block["name"].as_str())
        {
            warn!("Rejected tool_use block start: {}", e);
            return;
        }

        self.blocks.insert(index, kind);
        self.current_block = Some(index);
        self.next_index = self.next_index.max(index.saturating_add(1));
    }

    fn block_delta(&mut self, frame: &Value, deltas: &mut Vec<AccumulatorDelta>) {
        let index = self.block_index(frame);
        let delta = &frame["delta"];

        match delta["type"].as_str() {
            Some("text_delta") => {
                if let Some(text) = delta["text"].as_str()
                    && !text.is_empty()
                {
                    deltas.push(self.state.push_text(text));
                }
            }
            Some("thinking_delta") => {
                if let Some(thinking) = delta["thinking"].as_str()
                    && !thinking.is_empty()
                {
                    deltas.push(AccumulatorDelta::Thinking(thinking.to_string()));
                }
            }
            Some("input_json_delta") => {
                let fragment = delta["partial_json"].as_str().unwrap_or("");
                if let Err(e) = self.state.append_arguments(index, fragment) {
                    warn!("Rejected input_json_delta: {}", e);
                }
            }
            other => debug!("Ignoring delta type {:?}", other),
        }
    }

    fn block_stop(&mut self, frame: &Value, deltas: &mut Vec<AccumulatorDelta>) {
        let index = self.block_index(frame);
        if self.current_block == Some(index) {
            self.current_block = None;
        }

        match self.blocks.remove(&index) {
            Some(BlockKind::ToolUse) => {
                if let Some(call) = self.state.close_call(index) {
                    deltas.push(AccumulatorDelta::ToolCall(call));
                }
            }
            Some(_) => {}
            None => debug!("content_block_stop for index {} without a matching start", index),
        }
    }
}
