//! Streaming support for provider responses.
//!
//! Providers stream Server-Sent Events:
//! ```text
//! event: content_block_delta
//! data: {"type": "content_block_delta", ...}
//!
//! data: [DONE]
//! ```
//! The decoder buffers raw bytes across network reads and only parses
//! complete lines, so a frame (or a multi-byte character) split between two
//! reads comes out whole.

use std::collections::VecDeque;

use futures::StreamExt;
use futures::stream::BoxStream;
use log::{debug, warn};
use serde_json::Value;

use crate::error::Result;

/// Raw body chunks as they arrive from the network
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

const DATA_PREFIX: &[u8] = b"data:";
const DONE_SENTINEL: &str = "[DONE]";
/// Longest line kept while waiting for its newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental SSE frame decoder.
#[derive(Debug, Default, Clone)]
pub struct FrameDecoder {
    /// Bytes after the last newline seen so far
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline
    scanned: usize,
    /// Dropping an oversized line until its newline arrives
    discarding: bool,
    /// Sentinel seen; further input is ignored
    done: bool,
    /// Also accept bare JSON object lines (NDJSON)
    accept_bare_json: bool,
}

impl FrameDecoder {
    /// Create a decoder for `data:` framed streams.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder that also accepts bare newline-delimited JSON
    /// objects, as local model servers stream them.
    pub fn with_bare_json() -> Self {
        Self {
            accept_bare_json: true,
            ..Self::default()
        }
    }

    /// Whether the end-of-stream sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one network read; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(chunk);

        let mut start = 0;
        let mut cursor = self.scanned;
        while let Some(offset) = buffer[cursor..].iter().position(|b| *b == b'\n') {
            let newline = cursor + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                self.decode_line(&buffer[start..newline], &mut frames);
            }
            start = newline + 1;
            cursor = start;
            if self.done {
                self.scanned = 0;
                return frames;
            }
        }

        buffer.drain(..start);
        if buffer.len() > MAX_LINE_BYTES {
            warn!("Dropping stream line longer than {} bytes", MAX_LINE_BYTES);
            buffer.clear();
            self.discarding = true;
        }
        self.scanned = buffer.len();
        self.buffer = buffer;
        frames
    }

    /// Flush a trailing line that had no newline when the body ended.
    pub fn finish(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        let line = std::mem::take(&mut self.buffer);
        if !self.done && !self.discarding && !line.is_empty() {
            self.decode_line(&line, &mut frames);
        }
        self.scanned = 0;
        self.discarding = false;
        frames
    }

    fn decode_line(&mut self, line: &[u8], frames: &mut Vec<Value>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        let payload = if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            rest.strip_prefix(b" ").unwrap_or(rest)
        } else if self.accept_bare_json && line.first() == Some(&b'{') {
            line
        } else {
            // event:, id:, retry:, ":" comments and blank separators
            return;
        };

        let Ok(payload) = std::str::from_utf8(payload) else {
            debug!("Skipping frame with invalid UTF-8");
            return;
        };
        let payload = payload.trim();

        if payload.is_empty() {
            return;
        }
        if payload == DONE_SENTINEL {
            self.done = true;
            return;
        }

        match parse_sse_event(payload) {
            Some(frame) => frames.push(frame),
            None => debug!("Skipping malformed frame: {}", truncate(payload, 120)),
        }
    }
}

/// Parse a single `data:` payload into a JSON frame.
pub fn parse_sse_event(data: &str) -> Option<Value> {
    if data.is_empty() || data == DONE_SENTINEL {
        return None;
    }

    serde_json::from_str(data).ok()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Lazy sequence of frames decoded from one provider response body.
pub struct FrameStream {
    bytes: ByteStream,
    decoder: FrameDecoder,
    pending: VecDeque<Value>,
    exhausted: bool,
}

impl FrameStream {
    /// Wrap a byte stream with the given decoder.
    pub fn new(bytes: ByteStream, decoder: FrameDecoder) -> Self {
        Self {
            bytes,
            decoder,
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next decoded frame. `None` once the body ends or the sentinel arrives;
    /// a transport error is returned once and ends the stream.
    pub async fn next_frame(&mut self) -> Option<Result<Value>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if self.exhausted || self.decoder.is_done() {
                return None;
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.push(&chunk)),
                Some(Err(e)) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }
}

/// Build a byte stream from in-memory chunks; used by scripted providers.
pub fn byte_stream_from_chunks(chunks: Vec<Vec<u8>>) -> ByteStream {
    futures::stream::iter(chunks.into_iter().map(Ok)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use serde_json::json;

    fn decode_all(chunks: &[&[u8]]) -> Vec<Value> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(decoder.push(chunk));
        }
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn test_single_frame() {
        let frames = decode_all(&[b"data: {\"a\":1}\n\n"]);
        assert_eq!(frames, vec![json!({"a": 1})]);
    }

    #[test]
    fn test_frame_split_mid_line() {
        let frames = decode_all(&[b"data: {\"te", b"xt\":\"hel", b"lo\"}\n\ndata: {\"b\":2}\n\n"]);
        assert_eq!(frames, vec![json!({"text": "hello"}), json!({"b": 2})]);
    }

    #[test]
    fn test_long_line_in_many_small_reads() {
        let text = "x".repeat(64 * 1024);
        let body = format!("data: {}\n\n", json!({"text": text}));
        let chunks: Vec<&[u8]> = body.as_bytes().chunks(16).collect();

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in &chunks {
            frames.extend(decoder.push(chunk));
            assert!(decoder.scanned <= decoder.buffer.len());
        }
        assert_eq!(frames, vec![json!({"text": text})]);
    }

    #[test]
    fn test_oversized_line_dropped_and_stream_recovers() {
        let mut decoder = FrameDecoder::new();
        let junk = vec![b'a'; 64 * 1024];

        let mut frames = decoder.push(b"data: {\"text\":\"");
        for _ in 0..(MAX_LINE_BYTES / junk.len() + 2) {
            frames.extend(decoder.push(&junk));
            assert!(decoder.buffer.len() <= MAX_LINE_BYTES);
        }
        frames.extend(decoder.push(b"\"}\n\ndata: {\"b\":2}\n\n"));
        frames.extend(decoder.finish());

        assert_eq!(frames, vec![json!({"b": 2})]);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let body = "data: {\"text\":\"caf\u{e9} \u{1f600}\"}\n\n".as_bytes();
        // Cut inside the four-byte emoji
        let (first, second) = body.split_at(body.len() - 6);
        let frames = decode_all(&[first, second]);
        assert_eq!(frames, vec![json!({"text": "caf\u{e9} \u{1f600}"})]);
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let frames = decode_all(&[b"data: {not json}\n\ndata: {\"ok\":true}\n\n"]);
        assert_eq!(frames, vec![json!({"ok": true})]);
    }

    #[test]
    fn test_empty_payload_ignored() {
        let frames = decode_all(&[b"data: \n\ndata:\n\ndata: {\"x\":1}\n\n"]);
        assert_eq!(frames, vec![json!({"x": 1})]);
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let frames = decode_all(&[b": keep-alive\nevent: ping\nid: 7\ndata: {\"x\":1}\n\n"]);
        assert_eq!(frames, vec![json!({"x": 1})]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let frames = decode_all(&[b"data: {\"x\":1}\r\n\r\ndata: {\"y\":2}\r\n"]);
        assert_eq!(frames, vec![json!({"x": 1}), json!({"y": 2})]);
    }

    #[test]
    fn test_no_space_after_prefix() {
        let frames = decode_all(&[b"data:{\"x\":1}\n"]);
        assert_eq!(frames, vec![json!({"x": 1})]);
    }

    #[test]
    fn test_done_sentinel_stops_decoding() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"x\":1}\n\ndata: [DONE]\n\ndata: {\"y\":2}\n\n");
        assert_eq!(frames, vec![json!({"x": 1})]);
        assert!(decoder.is_done());
        assert!(decoder.push(b"data: {\"z\":3}\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_trailing_line_without_newline_flushed() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"x\":1}").is_empty());
        assert_eq!(decoder.finish(), vec![json!({"x": 1})]);
    }

    #[test]
    fn test_bare_json_only_when_enabled() {
        let body: &[u8] = b"{\"response\":\"hi\",\"done\":false}\n";

        let mut strict = FrameDecoder::new();
        assert!(strict.push(body).is_empty());

        let mut lenient = FrameDecoder::with_bare_json();
        assert_eq!(lenient.push(body), vec![json!({"response": "hi", "done": false})]);
    }

    #[test]
    fn test_parse_sse_event_invalid() {
        assert!(parse_sse_event("not json").is_none());
        assert!(parse_sse_event("").is_none());
        assert!(parse_sse_event("[DONE]").is_none());
    }

    #[tokio::test]
    async fn test_frame_stream_yields_frames_in_order() {
        let bytes = byte_stream_from_chunks(vec![
            b"data: {\"n\":1}\n\nda".to_vec(),
            b"ta: {\"n\":2}\n\n".to_vec(),
            b"data: [DONE]\n\n".to_vec(),
        ]);
        let mut stream = FrameStream::new(bytes, FrameDecoder::new());

        assert_eq!(stream.next_frame().await.unwrap().unwrap(), json!({"n": 1}));
        assert_eq!(stream.next_frame().await.unwrap().unwrap(), json!({"n": 2}));
        assert!(stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_frame_stream_surfaces_transport_error_once() {
        let bytes: ByteStream = futures::stream::iter(vec![
            Ok(b"data: {\"n\":1}\n\n".to_vec()),
            Err(ChatError::Transport("reset".to_string())),
        ])
        .boxed();
        let mut stream = FrameStream::new(bytes, FrameDecoder::new());

        assert!(stream.next_frame().await.unwrap().is_ok());
        assert!(matches!(stream.next_frame().await, Some(Err(ChatError::Transport(_)))));
        assert!(stream.next_frame().await.is_none());
    }
}
