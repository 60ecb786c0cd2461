//! Normalized events sent to the caller
//!
//! Every provider's output is reduced to [`NormalizedEvent`]. Events travel
//! from the conversation loop to the response body over a bounded channel;
//! when the caller goes away the channel closes and the loop sees it.

use std::convert::Infallible;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Wire sentinel that ends every stream
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Tool call lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Executing,
}

/// Provider-agnostic event, one populated field per frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NormalizedEvent {
    Content(String),
    Thinking(String),
    ToolCall {
        id: String,
        name: String,
        status: ToolCallStatus,
    },
    ToolResult {
        id: String,
        name: String,
        result: Value,
    },
    ToolDenied {
        id: String,
        name: String,
        reason: String,
    },
    ToolError {
        id: String,
        name: String,
        error: String,
    },
    Error(String),
    Done,
}

impl NormalizedEvent {
    pub fn executing(id: impl Into<String>, name: impl Into<String>) -> Self {
        NormalizedEvent::ToolCall {
            id: id.into(),
            name: name.into(),
            status: ToolCallStatus::Executing,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, NormalizedEvent::Done)
    }

    /// Render as one SSE frame.
    pub fn to_sse_frame(&self) -> String {
        if self.is_done() {
            return DONE_FRAME.to_string();
        }
        // Serializing these variants cannot fail: every field is a string or a Value
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {}\n\n", json)
    }
}

/// Create the channel between one conversation loop and its caller.
pub fn create_event_channel(buffer: usize) -> (EventEmitter, EventStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (EventEmitter { tx }, EventStream { rx })
}

/// Sending half, owned by the conversation loop
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<NormalizedEvent>,
}

impl EventEmitter {
    /// Send one event. Returns false once the caller has gone away.
    pub async fn emit(&self, event: NormalizedEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, handed to the caller
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<NormalizedEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<NormalizedEvent> {
        self.rx.recv().await
    }

    /// Drain every event until the loop finishes.
    pub async fn collect(mut self) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    /// SSE body frames, ending after the `done` sentinel.
    pub fn into_sse(self) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
        futures::stream::unfold((self, false), |(mut stream, finished)| async move {
            if finished {
                return None;
            }
            let event = stream.rx.recv().await?;
            let finished = event.is_done();
            Some((Ok(event.to_sse_frame()), (stream, finished)))
        })
    }
}
