//! Chat-completions family: content fragments plus tool-call fragments keyed
//! by position, ended by a frame carrying `finish_reason`.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AccumulatorDelta, AccumulatorState, error_message};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionsAccumulator {
    state: AccumulatorState,
}

impl ChatCompletionsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    pub(super) fn state_mut(&mut self) -> &mut AccumulatorState {
        &mut self.state
    }

    pub fn apply(&mut self, frame: &Value) -> Vec<AccumulatorDelta> {
        let mut deltas = Vec::new();

        if let Some(error) = frame.get("error") {
            deltas.push(AccumulatorDelta::ProviderError(error_message(error)));
            return deltas;
        }

        // Usage-only frames carry no choices
        let Some(choice) = frame.get("choices").and_then(|c| c.get(0)) else {
            return deltas;
        };
        let delta = &choice["delta"];

        if let Some(reasoning) = delta["reasoning_content"].as_str()
            && !reasoning.is_empty()
        {
            deltas.push(AccumulatorDelta::Thinking(reasoning.to_string()));
        }

        if let Some(content) = delta["content"].as_str()
            && !content.is_empty()
        {
            deltas.push(self.state.push_text(content));
        }

        if let Some(fragments) = delta["tool_calls"].as_array() {
            for fragment in fragments {
                self.apply_tool_fragment(fragment);
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            debug!("Chat-completions round finished: {}", reason);
            deltas.extend(self.state.close_all().into_iter().map(AccumulatorDelta::ToolCall));
            deltas.push(self.state.finish_round());
        }

        deltas
    }

    fn apply_tool_fragment(&mut self, fragment: &Value) {
        let Some(index) = fragment["index"].as_u64().and_then(|i| u32::try_from(i).ok()) else {
            debug!("Skipping tool-call fragment without index");
            return;
        };

        let function = &fragment["function"];
        if let Err(e) = self
            .state
            .open_call(index, fragment["id"].as_str(), function["name"].as_str())
        {
            warn!("Rejected tool-call fragment: {}", e);
            return;
        }

        if let Some(arguments) = function["arguments"].as_str()
            && !arguments.is_empty()
            && let Err(e) = self.state.append_arguments(index, arguments)
        {
            warn!("Rejected tool-call fragment: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::accumulator::FinishReason;
    use serde_json::json;

    fn tool_fragment(index: u32, id: Option<&str>, name: Option<&str>, arguments: &str) -> Value {
        let mut function = json!({"arguments": arguments});
        if let Some(name) = name {
            function["name"] = json!(name);
        }
        let mut fragment = json!({"index": index, "function": function});
        if let Some(id) = id {
            fragment["id"] = json!(id);
        }
        json!({"choices": [{"delta": {"tool_calls": [fragment]}, "finish_reason": null}]})
    }

    #[test]
    fn test_content_fragments_forwarded() {
        let mut acc = ChatCompletionsAccumulator::new();
        let d1 = acc.apply(&json!({"choices": [{"delta": {"role": "assistant", "content": "Hel"}}]}));
        let d2 = acc.apply(&json!({"choices": [{"delta": {"content": "lo"}}]}));

        assert_eq!(d1, vec![AccumulatorDelta::Text("Hel".to_string())]);
        assert_eq!(d2, vec![AccumulatorDelta::Text("lo".to_string())]);
        assert_eq!(acc.state().text_so_far, "Hello");
    }

    #[test]
    fn test_tool_call_fragments_concatenate() {
        let mut acc = ChatCompletionsAccumulator::new();
        assert!(acc.apply(&tool_fragment(0, Some("call_1"), Some("create_booking"), "")).is_empty());
        assert!(acc.apply(&tool_fragment(0, None, None, "{\"time\":")).is_empty());
        assert!(acc.apply(&tool_fragment(0, None, None, "\"15:00\"}")).is_empty());

        let deltas = acc.apply(&json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}));
        assert_eq!(deltas.len(), 2);
        match &deltas[0] {
            AccumulatorDelta::ToolCall(call) => {
                assert_eq!(call.id(), "call_1");
                assert_eq!(call.name(), "create_booking");
                assert_eq!(call.call.raw_arguments, "{\"time\":\"15:00\"}");
                assert_eq!(call.arguments, Ok(json!({"time": "15:00"})));
            }
            other => panic!("expected tool call, got {:?}", other),
        }
        assert_eq!(deltas[1], AccumulatorDelta::Finished(FinishReason::ToolCalls));
    }

    #[test]
    fn test_interleaved_indexes_close_in_index_order() {
        let mut acc = ChatCompletionsAccumulator::new();
        acc.apply(&tool_fragment(0, Some("a"), Some("first"), "{\"n\":"));
        acc.apply(&tool_fragment(1, Some("b"), Some("second"), "{\"n\":"));
        acc.apply(&tool_fragment(1, None, None, "2}"));
        acc.apply(&tool_fragment(0, None, None, "1}"));

        let deltas = acc.apply(&json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}));
        let calls: Vec<_> = deltas
            .iter()
            .filter_map(|d| match d {
                AccumulatorDelta::ToolCall(c) => Some((c.id().to_string(), c.arguments.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            calls,
            vec![("a".to_string(), Ok(json!({"n": 1}))), ("b".to_string(), Ok(json!({"n": 2})))]
        );
    }

    #[test]
    fn test_stop_without_calls() {
        let mut acc = ChatCompletionsAccumulator::new();
        acc.apply(&json!({"choices": [{"delta": {"content": "Done."}}]}));
        let deltas = acc.apply(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}));
        assert_eq!(deltas, vec![AccumulatorDelta::Finished(FinishReason::Stop)]);
        assert_eq!(acc.state().finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_stop_with_accumulated_calls_counts_as_tool_calls() {
        let mut acc = ChatCompletionsAccumulator::new();
        acc.apply(&tool_fragment(0, Some("a"), Some("x"), "{}"));
        let deltas = acc.apply(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}));
        assert_eq!(deltas.last(), Some(&AccumulatorDelta::Finished(FinishReason::ToolCalls)));
    }

    #[test]
    fn test_malformed_arguments_reported_at_closure() {
        let mut acc = ChatCompletionsAccumulator::new();
        acc.apply(&tool_fragment(0, Some("a"), Some("x"), "{\"broken\""));
        let deltas = acc.apply(&json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}));
        match &deltas[0] {
            AccumulatorDelta::ToolCall(call) => assert!(call.arguments.is_err()),
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_argument_fragment_for_unopened_index_dropped() {
        let mut acc = ChatCompletionsAccumulator::new();
        acc.apply(&tool_fragment(3, None, None, "{\"x\":1}"));
        assert!(acc.state().open_calls.is_empty());

        let deltas = acc.apply(&json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}));
        assert_eq!(deltas, vec![AccumulatorDelta::Finished(FinishReason::Stop)]);
    }

    #[test]
    fn test_fragment_without_index_skipped() {
        let mut acc = ChatCompletionsAccumulator::new();
        acc.apply(&json!({"choices": [{"delta": {"tool_calls": [{"function": {"arguments": "{}"}}]}}]}));
        assert!(acc.state().open_calls.is_empty());
    }

    #[test]
    fn test_usage_frame_ignored() {
        let mut acc = ChatCompletionsAccumulator::new();
        let deltas = acc.apply(&json!({"choices": [], "usage": {"prompt_tokens": 3}}));
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_reasoning_content_is_thinking() {
        let mut acc = ChatCompletionsAccumulator::new();
        let deltas = acc.apply(&json!({"choices": [{"delta": {"reasoning_content": "hmm"}}]}));
        assert_eq!(deltas, vec![AccumulatorDelta::Thinking("hmm".to_string())]);
        assert!(acc.state().text_so_far.is_empty());
    }

    #[test]
    fn test_error_frame() {
        let mut acc = ChatCompletionsAccumulator::new();
        let deltas = acc.apply(&json!({"error": {"message": "quota exceeded", "type": "insufficient_quota"}}));
        assert_eq!(deltas, vec![AccumulatorDelta::ProviderError("quota exceeded".to_string())]);
    }
}
