//! Tunnel family: the proxy in front of local models forwards whatever the
//! backing server produced. Typed messages-family frames are handled by the
//! messages logic; anything else is checked for a direct text field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AccumulatorDelta, AccumulatorState, MessagesAccumulator, error_message};

const MESSAGE_FRAME_TYPES: &[&str] = &[
    "message_start",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
    "ping",
    "error",
];

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Text,
    Thinking,
}

/// Checked in order; only the first present field is forwarded.
const DIRECT_FIELDS: &[(&str, FieldKind)] = &[
    ("content", FieldKind::Text),
    ("thinking", FieldKind::Thinking),
    ("response", FieldKind::Text),
    ("text", FieldKind::Text),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelAccumulator {
    inner: MessagesAccumulator,
}

impl TunnelAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AccumulatorState {
        self.inner.state()
    }

    pub(super) fn state_mut(&mut self) -> &mut AccumulatorState {
        self.inner.state_mut()
    }

    pub fn apply(&mut self, frame: &Value) -> Vec<AccumulatorDelta> {
        if let Some(frame_type) = frame["type"].as_str()
            && MESSAGE_FRAME_TYPES.contains(&frame_type)
        {
            return self.inner.apply(frame);
        }

        let mut deltas = Vec::new();

        if let Some(error) = frame.get("error") {
            deltas.push(AccumulatorDelta::ProviderError(error_message(error)));
            return deltas;
        }

        let direct = DIRECT_FIELDS.iter().find_map(|(field, kind)| {
            frame[*field]
                .as_str()
                .filter(|value| !value.is_empty())
                .map(|value| (value, *kind))
        });

        match direct {
            Some((text, FieldKind::Text)) => deltas.push(self.inner.state_mut().push_text(text)),
            Some((thinking, FieldKind::Thinking)) => deltas.push(AccumulatorDelta::Thinking(thinking.to_string())),
            None => {}
        }

        if frame["done"].as_bool() == Some(true) {
            deltas.extend(self.inner.state_mut().close_and_finish());
        }

        deltas
    }
}
