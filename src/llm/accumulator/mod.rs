//! Per-round delta accumulation.
//!
//! Every provider family folds its frames into the same [`AccumulatorState`]
//! and reports the same [`AccumulatorDelta`]s: text as it arrives, and a
//! [`CompletedToolCall`] only once the provider has closed the call. The
//! state is a plain serializable record so frame sequences can be replayed in
//! tests without a network.

mod chat_completions;
mod messages;
mod tunnel;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::types::{CompletedToolCall, ProposedToolCall};

pub use chat_completions::ChatCompletionsAccumulator;
pub use messages::{BlockKind, MessagesAccumulator};
pub use tunnel::TunnelAccumulator;

/// Streaming wire shape spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireShape {
    ChatCompletions,
    Messages,
    Tunnel,
}

/// How a round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    None,
    ToolCalls,
    Stop,
}

/// Observable output of folding one frame
#[derive(Debug, Clone, PartialEq)]
pub enum AccumulatorDelta {
    /// Visible text, forwarded immediately
    Text(String),
    /// Reasoning text, forwarded but never part of the visible answer
    Thinking(String),
    /// A call whose arguments are fully assembled
    ToolCall(CompletedToolCall),
    /// The round is over
    Finished(FinishReason),
    /// The provider reported an error inside the stream
    ProviderError(String),
}

/// Why a tool-call fragment was not applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentRejected {
    #[error("fragment for already closed tool call index {0}")]
    Closed(u32),
    #[error("fragment for tool call index {0} that was never opened")]
    NeverOpened(u32),
}

/// Accumulated state of one round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorState {
    pub text_so_far: String,
    pub open_calls: BTreeMap<u32, ProposedToolCall>,
    /// Indexes already finalized; they never reopen
    pub closed: BTreeSet<u32>,
    pub finish_reason: FinishReason,
}

impl AccumulatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finish_reason != FinishReason::None
    }

    /// Whether any call was closed this round
    pub fn has_tool_calls(&self) -> bool {
        !self.closed.is_empty()
    }

    pub fn push_text(&mut self, text: &str) -> AccumulatorDelta {
        self.text_so_far.push_str(text);
        AccumulatorDelta::Text(text.to_string())
    }

    /// Open the call at `index`, or fill in its id/name if already open.
    ///
    /// A new index only opens on a fragment carrying an id or a name; a bare
    /// argument fragment for an unknown index is rejected.
    pub fn open_call(&mut self, index: u32, id: Option<&str>, name: Option<&str>) -> Result<(), FragmentRejected> {
        if self.closed.contains(&index) {
            return Err(FragmentRejected::Closed(index));
        }

        let id = id.filter(|id| !id.is_empty());
        let name = name.filter(|name| !name.is_empty());
        if !self.open_calls.contains_key(&index) && id.is_none() && name.is_none() {
            return Err(FragmentRejected::NeverOpened(index));
        }

        let call = self.open_calls.entry(index).or_default();
        if let Some(id) = id {
            call.id = id.to_string();
        }
        if let Some(name) = name {
            call.name = name.to_string();
        }
        Ok(())
    }

    /// Append an argument fragment to an open call.
    pub fn append_arguments(&mut self, index: u32, fragment: &str) -> Result<(), FragmentRejected> {
        if self.closed.contains(&index) {
            return Err(FragmentRejected::Closed(index));
        }

        let call = self
            .open_calls
            .get_mut(&index)
            .ok_or(FragmentRejected::NeverOpened(index))?;
        call.raw_arguments.push_str(fragment);
        Ok(())
    }

    /// Finalize the call at `index` and parse its arguments.
    pub fn close_call(&mut self, index: u32) -> Option<CompletedToolCall> {
        let mut call = self.open_calls.remove(&index)?;
        self.closed.insert(index);
        if call.id.is_empty() {
            call.id = format!("call_{}", index);
        }
        Some(CompletedToolCall::close(call))
    }

    /// Finalize every open call in index order.
    pub fn close_all(&mut self) -> Vec<CompletedToolCall> {
        let indexes: Vec<u32> = self.open_calls.keys().copied().collect();
        indexes.into_iter().filter_map(|index| self.close_call(index)).collect()
    }

    /// Mark the round finished. The reason follows what was actually closed.
    pub fn finish_round(&mut self) -> AccumulatorDelta {
        self.finish_reason = if self.has_tool_calls() {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };
        AccumulatorDelta::Finished(self.finish_reason)
    }

    /// Close everything and finish, as when the body ends without a signal.
    pub fn close_and_finish(&mut self) -> Vec<AccumulatorDelta> {
        let mut deltas: Vec<AccumulatorDelta> = self.close_all().into_iter().map(AccumulatorDelta::ToolCall).collect();
        deltas.push(self.finish_round());
        deltas
    }
}

/// Tagged union over the three provider families
#[derive(Debug, Clone)]
pub enum Accumulator {
    ChatCompletions(ChatCompletionsAccumulator),
    Messages(MessagesAccumulator),
    Tunnel(TunnelAccumulator),
}

impl Accumulator {
    /// Fresh accumulator for a round of the given shape
    pub fn for_shape(shape: WireShape) -> Self {
        match shape {
            WireShape::ChatCompletions => Accumulator::ChatCompletions(ChatCompletionsAccumulator::new()),
            WireShape::Messages => Accumulator::Messages(MessagesAccumulator::new()),
            WireShape::Tunnel => Accumulator::Tunnel(TunnelAccumulator::new()),
        }
    }

    /// Fold one frame. Frames after the round finished are ignored.
    pub fn apply(&mut self, frame: &Value) -> Vec<AccumulatorDelta> {
        if self.state().is_finished() {
            return Vec::new();
        }

        match self {
            Accumulator::ChatCompletions(acc) => acc.apply(frame),
            Accumulator::Messages(acc) => acc.apply(frame),
            Accumulator::Tunnel(acc) => acc.apply(frame),
        }
    }

    /// The response body ended. Finishes the round if the provider never did.
    pub fn finish(&mut self) -> Vec<AccumulatorDelta> {
        if self.state().is_finished() {
            return Vec::new();
        }
        self.state_mut().close_and_finish()
    }

    pub fn state(&self) -> &AccumulatorState {
        match self {
            Accumulator::ChatCompletions(acc) => acc.state(),
            Accumulator::Messages(acc) => acc.state(),
            Accumulator::Tunnel(acc) => acc.state(),
        }
    }

    fn state_mut(&mut self) -> &mut AccumulatorState {
        match self {
            Accumulator::ChatCompletions(acc) => acc.state_mut(),
            Accumulator::Messages(acc) => acc.state_mut(),
            Accumulator::Tunnel(acc) => acc.state_mut(),
        }
    }
}

/// Best-effort message out of a provider error payload
pub(crate) fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .unwrap_or("Provider error")
        .to_string()
}
