//! Provider adapters against mock HTTP servers
//!
//! Each adapter must send its provider's native request shape and hand back
//! the body untouched; failures map onto the error taxonomy.

use std::time::Duration;

use chatloop::ChatError;
use chatloop::llm::accumulator::{Accumulator, AccumulatorDelta};
use chatloop::llm::providers::{
    AnthropicAdapter, AnthropicConfig, OpenAiAdapter, OpenAiConfig, ProviderAdapter, RoundRequest, TunnelAdapter,
    TunnelConfig,
};
use chatloop::llm::streaming::FrameStream;
use chatloop::llm::types::{ConversationMessage, ToolDefinition};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(frames: &[Value]) -> String {
    let mut body: String = frames.iter().map(|f| format!("data: {}\n\n", f)).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn tools() -> Vec<ToolDefinition> {
    vec![ToolDefinition::new(
        "current_time",
        "Current UTC time",
        json!({"type": "object", "properties": {}}),
    )]
}

/// Drain a provider stream through its decoder and accumulator.
async fn drain(adapter: &dyn ProviderAdapter, request: &RoundRequest<'_>) -> Vec<AccumulatorDelta> {
    let bytes = adapter.open_stream(request).await.unwrap();
    let mut frames = FrameStream::new(bytes, adapter.decoder());
    let mut accumulator = Accumulator::for_shape(adapter.shape());
    let mut deltas = Vec::new();

    loop {
        match frames.next_frame().await {
            Some(frame) => deltas.extend(accumulator.apply(&frame.unwrap())),
            None => {
                deltas.extend(accumulator.finish());
                break;
            }
        }
        if accumulator.state().is_finished() {
            break;
        }
    }
    deltas
}

fn text_of(deltas: &[AccumulatorDelta]) -> String {
    deltas
        .iter()
        .filter_map(|d| match d {
            AccumulatorDelta::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_openai_request_shape_and_stream() {
    let mock_server = MockServer::start().await;

    let body = sse(&[
        json!({"choices": [{"delta": {"content": "Hel"}}]}),
        json!({"choices": [{"delta": {"content": "lo"}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-mock-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "stream": true,
            "tool_choice": "auto",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "hi"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/event-stream"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let adapter = OpenAiAdapter::new(
        "sk-mock-key",
        OpenAiConfig {
            base_url: mock_server.uri(),
            ..Default::default()
        },
    )
    .unwrap();

    let messages = vec![ConversationMessage::user("hi")];
    let tools = tools();
    let request = RoundRequest {
        system_prompt: "Be brief.",
        messages: &messages,
        tools: &tools,
    };

    let deltas = drain(&adapter, &request).await;
    assert_eq!(text_of(&deltas), "Hello");
}

#[tokio::test]
async fn test_openai_tool_call_arguments_reassembled() {
    let mock_server = MockServer::start().await;

    let body = sse(&[
        json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "create_booking", "arguments": ""}}]}}]}),
        json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"time\":"}}]}}]}),
        json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "\"15:00\"}"}}]}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let adapter = OpenAiAdapter::new(
        "sk-mock-key",
        OpenAiConfig {
            base_url: mock_server.uri(),
            ..Default::default()
        },
    )
    .unwrap();

    let messages = vec![ConversationMessage::user("book a meeting tomorrow at 3pm")];
    let request = RoundRequest {
        system_prompt: "",
        messages: &messages,
        tools: &[],
    };

    let deltas = drain(&adapter, &request).await;
    let call = deltas
        .iter()
        .find_map(|d| match d {
            AccumulatorDelta::ToolCall(call) => Some(call.clone()),
            _ => None,
        })
        .expect("tool call");
    assert_eq!(call.id(), "call_1");
    assert_eq!(call.name(), "create_booking");
    assert_eq!(call.arguments, Ok(json!({"time": "15:00"})));
}

#[tokio::test]
async fn test_openai_error_status_is_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("{\"error\":\"secret upstream detail\"}"))
        .mount(&mock_server)
        .await;

    let adapter = OpenAiAdapter::new(
        "sk-mock-key",
        OpenAiConfig {
            base_url: mock_server.uri(),
            ..Default::default()
        },
    )
    .unwrap();

    let messages = vec![ConversationMessage::user("hi")];
    let request = RoundRequest {
        system_prompt: "",
        messages: &messages,
        tools: &[],
    };

    let err = adapter.open_stream(&request).await.err().unwrap();
    assert!(matches!(err, ChatError::Api { status: 500, .. }));
    assert_eq!(err.client_message(), "API error");
}

#[tokio::test]
async fn test_openai_rate_limit_reads_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&mock_server)
        .await;

    let adapter = OpenAiAdapter::new(
        "sk-mock-key",
        OpenAiConfig {
            base_url: mock_server.uri(),
            ..Default::default()
        },
    )
    .unwrap();

    let messages = vec![ConversationMessage::user("hi")];
    let request = RoundRequest {
        system_prompt: "",
        messages: &messages,
        tools: &[],
    };

    match adapter.open_stream(&request).await {
        Err(ChatError::RateLimited { retry_after }) => assert_eq!(retry_after, Duration::from_secs(7)),
        other => panic!("Expected rate limit, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn test_anthropic_request_shape_and_tool_use() {
    let mock_server = MockServer::start().await;

    let body = sse(&[
        json!({"type": "message_start", "message": {"id": "msg_1"}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Checking."}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "current_time", "input": {}}}),
        json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{}"}}),
        json!({"type": "content_block_stop", "index": 1}),
        json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
        json!({"type": "message_stop"}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-mock"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-opus-20240229",
            "system": "Be brief.",
            "stream": true,
            "messages": [{"role": "user", "content": "what time is it"}],
            "tools": [{"name": "current_time"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = AnthropicConfig {
        base_url: mock_server.uri(),
        ..AnthropicConfig::for_requested_model("opus")
    };
    let adapter = AnthropicAdapter::new("sk-ant-mock", config).unwrap();

    let messages = vec![ConversationMessage::user("what time is it")];
    let tools = tools();
    let request = RoundRequest {
        system_prompt: "Be brief.",
        messages: &messages,
        tools: &tools,
    };

    let deltas = drain(&adapter, &request).await;
    assert_eq!(text_of(&deltas), "Checking.");
    let names: Vec<&str> = deltas
        .iter()
        .filter_map(|d| match d {
            AccumulatorDelta::ToolCall(call) => Some(call.name()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["current_time"]);
}

#[tokio::test]
async fn test_tunnel_heterogeneous_frames() {
    let mock_server = MockServer::start().await;

    // Bare JSON lines mixed with SSE, local-model field names
    let body = concat!(
        "{\"thinking\":\"let me see\"}\n",
        "data: {\"response\":\"Hi \"}\n\n",
        "{\"content\":\"there\"}\n",
        "{\"done\":true}\n"
    );

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "k".repeat(40).as_str()))
        .and(body_partial_json(json!({"model": "gpt-oss:20b", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let mut config = TunnelConfig::new(format!("{}/", mock_server.uri()), "k".repeat(40));
    config.skip_security = true;
    let adapter = TunnelAdapter::new(config).unwrap();
    assert!(adapter.validate().is_ok());

    let messages = vec![ConversationMessage::user("hi")];
    let request = RoundRequest {
        system_prompt: "",
        messages: &messages,
        tools: &[],
    };

    let deltas = drain(&adapter, &request).await;
    assert_eq!(text_of(&deltas), "Hi there");
    assert!(deltas.contains(&AccumulatorDelta::Thinking("let me see".to_string())));
}

#[tokio::test]
async fn test_tunnel_health_probe() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "provider": "ollama",
            "model": "gpt-oss:20b",
            "version": "1.2.0"
        })))
        .mount(&mock_server)
        .await;

    let adapter = TunnelAdapter::new(TunnelConfig::new(mock_server.uri(), "k".repeat(40))).unwrap();
    let health = adapter.check_health().await;
    assert!(health.connected);
    assert_eq!(health.provider.as_deref(), Some("ollama"));
    assert_eq!(health.model.as_deref(), Some("gpt-oss:20b"));
    assert_eq!(health.version.as_deref(), Some("1.2.0"));
}

#[tokio::test]
async fn test_tunnel_health_probe_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let adapter = TunnelAdapter::new(TunnelConfig::new(mock_server.uri(), "k".repeat(40))).unwrap();
    let health = adapter.check_health().await;
    assert!(!health.connected);
    assert!(health.error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_tunnel_health_probe_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let mut config = TunnelConfig::new(mock_server.uri(), "k".repeat(40));
    config.health_timeout = Duration::from_millis(50);
    let adapter = TunnelAdapter::new(config).unwrap();
    let health = adapter.check_health().await;
    assert!(!health.connected);
    assert_eq!(health.error.as_deref(), Some("Health check timed out"));
}
