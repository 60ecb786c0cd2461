//! Conversation loop controller
//!
//! One turn runs as a sequence of provider rounds:
//!
//! ```text
//! Requesting -> Streaming -> ToolPhase -> Requesting -> ... -> Terminal
//!                         \-> Terminal
//! ```
//!
//! Text is forwarded to the caller as soon as a frame yields it. When a round
//! ends in tool calls, the calls are filtered by the access policy and the
//! permitted ones run one at a time in the order the model proposed them.
//! The loop stops after `max_iterations` rounds no matter what the model asks
//! for, and every exit path emits `done`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};

use crate::access::{ACCESS_DENIED_REASON, AccessPolicy, Caller, filter_tool_calls};
use crate::error::ChatError;
use crate::events::{EventEmitter, NormalizedEvent};
use crate::llm::accumulator::{Accumulator, AccumulatorDelta};
use crate::llm::providers::{ProviderAdapter, RoundRequest};
use crate::llm::streaming::FrameStream;
use crate::llm::types::{CompletedToolCall, ConversationMessage, ToolDefinition};
use crate::recorder::{Interaction, RecorderHandle};
use crate::tools::{ToolContext, ToolError, ToolExecutor, ToolInvocation};

/// Hard ceiling on provider rounds per turn
pub const MAX_ITERATIONS: u32 = 10;

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A round finished without tool calls
    Completed,
    /// The round limit was hit
    BoundReached,
    /// Talking to the provider failed; carries the message sent to the caller
    TransportFailed(String),
    /// The caller went away
    Disconnected,
}

/// Loop bookkeeping for one turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopState {
    pub iteration: u32,
    pub max_iterations: u32,
    pub tools_used: Vec<String>,
    pub visible_text: String,
}

impl LoopState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            tools_used: Vec::new(),
            visible_text: String::new(),
        }
    }

    pub fn at_bound(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}

/// Summary of a finished turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopReport {
    pub iterations: u32,
    pub tools_used: Vec<String>,
    pub visible_text: String,
    pub termination: Termination,
}

/// Everything a turn starts from
#[derive(Debug, Clone)]
pub struct LoopTurn {
    pub system_prompt: String,
    pub messages: Vec<ConversationMessage>,
    /// Tool definitions already filtered for the caller
    pub tools: Vec<ToolDefinition>,
    pub caller: Caller,
    /// Text recorded as the user's side of the interaction
    pub user_message: String,
}

enum RoundOutcome {
    Finished {
        text: String,
        calls: Vec<CompletedToolCall>,
    },
    Failed(ChatError),
}

/// Drives provider rounds and tool execution for one turn
pub struct ConversationLoop {
    provider: Arc<dyn ProviderAdapter>,
    executor: Arc<dyn ToolExecutor>,
    policy: Arc<dyn AccessPolicy>,
    recorder: Option<RecorderHandle>,
    max_iterations: u32,
}

impl ConversationLoop {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        executor: Arc<dyn ToolExecutor>,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            provider,
            executor,
            policy,
            recorder: None,
            max_iterations: MAX_ITERATIONS,
        }
    }

    pub fn with_recorder(mut self, recorder: RecorderHandle) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Lower the round limit. Clamped to `1..=MAX_ITERATIONS`.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.clamp(1, MAX_ITERATIONS);
        self
    }

    /// Run the turn to completion, streaming events to `events`.
    pub async fn run(&self, turn: LoopTurn, events: &EventEmitter) -> LoopReport {
        let mut state = LoopState::new(self.max_iterations);
        let mut messages = turn.messages.clone();

        info!(
            "Starting turn with {} via {} ({} messages, {} tools)",
            self.provider.model(),
            self.provider.name(),
            messages.len(),
            turn.tools.len()
        );

        let termination = loop {
            if events.is_closed() {
                info!("Caller disconnected before round {}", state.iteration + 1);
                break Termination::Disconnected;
            }

            state.iteration += 1;
            let outcome = self.run_round(&turn, &messages, &mut state, events).await;

            match outcome {
                RoundOutcome::Failed(e) => {
                    warn!("Round {} failed: {}", state.iteration, e);
                    let message = e.client_message();
                    events.emit(NormalizedEvent::Error(message.clone())).await;
                    break Termination::TransportFailed(message);
                }
                RoundOutcome::Finished { calls, .. } if calls.is_empty() => break Termination::Completed,
                RoundOutcome::Finished { calls, .. } if state.at_bound() => {
                    info!(
                        "Iteration bound {} reached with {} pending tool calls",
                        state.max_iterations,
                        calls.len()
                    );
                    break Termination::BoundReached;
                }
                RoundOutcome::Finished { text, calls } => {
                    if !self.tool_phase(&turn.caller, text, calls, &mut messages, &mut state, events).await {
                        break Termination::Completed;
                    }
                }
            }

            debug!(
                "Loop state after round {}: {}",
                state.iteration,
                serde_json::to_string(&state).unwrap_or_default()
            );
        };

        events.emit(NormalizedEvent::Done).await;

        if let (Some(recorder), Some(user_id)) = (&self.recorder, &turn.caller.user_id) {
            recorder.submit(Interaction::new(
                user_id.clone(),
                turn.user_message.clone(),
                state.visible_text.clone(),
                state.tools_used.clone(),
            ));
        }

        info!(
            "Turn finished after {} rounds: {:?}",
            state.iteration, termination
        );

        LoopReport {
            iterations: state.iteration,
            tools_used: state.tools_used,
            visible_text: state.visible_text,
            termination,
        }
    }

    /// Requesting and Streaming for one round.
    async fn run_round(
        &self,
        turn: &LoopTurn,
        messages: &[ConversationMessage],
        state: &mut LoopState,
        events: &EventEmitter,
    ) -> RoundOutcome {
        let request = RoundRequest {
            system_prompt: &turn.system_prompt,
            messages,
            tools: &turn.tools,
        };

        let bytes = match self.provider.open_stream(&request).await {
            Ok(bytes) => bytes,
            Err(e) => return RoundOutcome::Failed(e),
        };

        let mut frames = FrameStream::new(bytes, self.provider.decoder());
        let mut accumulator = Accumulator::for_shape(self.provider.shape());
        let mut calls = Vec::new();
        // Once the caller is gone the round still drains, silently
        let mut connected = true;

        loop {
            let deltas = match frames.next_frame().await {
                Some(Ok(frame)) => accumulator.apply(&frame),
                Some(Err(e)) => return RoundOutcome::Failed(e),
                None => accumulator.finish(),
            };

            for delta in deltas {
                match delta {
                    AccumulatorDelta::Text(text) => {
                        state.visible_text.push_str(&text);
                        if connected {
                            connected = events.emit(NormalizedEvent::Content(text)).await;
                        }
                    }
                    AccumulatorDelta::Thinking(text) => {
                        if connected {
                            connected = events.emit(NormalizedEvent::Thinking(text)).await;
                        }
                    }
                    AccumulatorDelta::ToolCall(call) => {
                        debug!("Tool call closed: {} ({})", call.name(), call.id());
                        calls.push(call);
                    }
                    AccumulatorDelta::Finished(reason) => {
                        debug!("Round {} finished: {:?}", state.iteration, reason);
                    }
                    AccumulatorDelta::ProviderError(message) => {
                        return RoundOutcome::Failed(ChatError::ProviderStream(message));
                    }
                }
            }

            if accumulator.state().is_finished() {
                break;
            }
        }

        debug!("Round {} accumulator: {:?}", state.iteration, accumulator.state());

        RoundOutcome::Finished {
            text: accumulator.state().text_so_far.clone(),
            calls,
        }
    }

    /// Filter, execute and append results. Returns false when nothing was
    /// fed back into the conversation, which ends the turn.
    async fn tool_phase(
        &self,
        caller: &Caller,
        round_text: String,
        calls: Vec<CompletedToolCall>,
        messages: &mut Vec<ConversationMessage>,
        state: &mut LoopState,
        events: &EventEmitter,
    ) -> bool {
        // No provider accepts a nameless call echoed back, so these only
        // surface as errors
        let (calls, nameless): (Vec<_>, Vec<_>) = calls.into_iter().partition(|c| !c.name().is_empty());
        for call in nameless {
            let error = call.arguments.err().unwrap_or_else(|| "Tool call is missing a function name".to_string());
            warn!("Dropping tool call {} without a name", call.call.id);
            events
                .emit(NormalizedEvent::ToolError {
                    id: call.call.id,
                    name: String::new(),
                    error,
                })
                .await;
        }

        if calls.is_empty() {
            return false;
        }

        messages.push(ConversationMessage::assistant_with_tool_calls(
            round_text,
            calls.iter().map(|c| c.call.clone()).collect(),
        ));

        let indexed: Vec<(usize, CompletedToolCall)> = calls.into_iter().enumerate().collect();
        let partition = filter_tool_calls(indexed, caller.access_level, self.policy.as_ref());

        // Denials and executions are reported in proposed order
        let mut decided: Vec<(usize, CompletedToolCall, bool)> = partition
            .permitted
            .into_iter()
            .map(|(index, call)| (index, call, true))
            .chain(partition.denied.into_iter().map(|(index, call)| (index, call, false)))
            .collect();
        decided.sort_by_key(|(index, _, _)| *index);

        let ctx = ToolContext::from(caller);
        for (_, call, permitted) in decided {
            let result = if !permitted {
                info!("Denied tool {} for {} caller", call.name(), caller.access_level);
                events
                    .emit(NormalizedEvent::ToolDenied {
                        id: call.id().to_string(),
                        name: call.name().to_string(),
                        reason: ACCESS_DENIED_REASON.to_string(),
                    })
                    .await;
                error_result(call.id(), ACCESS_DENIED_REASON)
            } else if events.is_closed() {
                error_result(call.id(), "Skipped because the caller disconnected")
            } else {
                self.execute_call(&call, &ctx, state, events).await
            };
            messages.push(result);
        }
        true
    }

    /// Execute one permitted call and produce its tool-result turn.
    async fn execute_call(
        &self,
        call: &CompletedToolCall,
        ctx: &ToolContext,
        state: &mut LoopState,
        events: &EventEmitter,
    ) -> ConversationMessage {
        let id = call.id().to_string();
        let name = call.name().to_string();

        let arguments = match &call.arguments {
            Ok(arguments) => arguments.clone(),
            Err(error) => {
                warn!("Tool {} has unusable arguments: {}", name, error);
                events
                    .emit(NormalizedEvent::ToolError {
                        id: id.clone(),
                        name,
                        error: error.clone(),
                    })
                    .await;
                return error_result(&id, error);
            }
        };

        events.emit(NormalizedEvent::executing(&id, &name)).await;

        let invocation = ToolInvocation::new(&name, arguments);
        let outcome = match AssertUnwindSafe(self.executor.execute(&invocation, ctx))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Tool {} panicked", name);
                Err(ToolError::Failed("Tool execution failed unexpectedly".to_string()))
            }
        };

        match outcome {
            Ok(result) => {
                debug!("Tool {} succeeded", name);
                state.tools_used.push(name.clone());
                let content = result.to_string();
                events
                    .emit(NormalizedEvent::ToolResult {
                        id: id.clone(),
                        name,
                        result,
                    })
                    .await;
                ConversationMessage::tool_result(id, content, false)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                let error = e.to_string();
                events
                    .emit(NormalizedEvent::ToolError {
                        id: id.clone(),
                        name,
                        error: error.clone(),
                    })
                    .await;
                error_result(&id, &error)
            }
        }
    }
}

fn error_result(id: &str, error: &str) -> ConversationMessage {
    let content: Value = json!({"error": error});
    ConversationMessage::tool_result(id, content.to_string(), true)
}
