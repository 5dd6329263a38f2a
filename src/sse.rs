//! Server-sent-event framing
//!
//! Shared by the streaming completion client and the SSE MCP transport.
//! Events are separated by blank lines; within an event, `data:` lines are
//! joined with `\n`, `event:` and `id:` are kept, `retry:` and comment
//! lines (leading `:`) are ignored.

use crate::error::{AgentSmithError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// Joined `data:` lines
    pub data: String,
    /// Value of the `id:` field, if any
    pub id: Option<String>,
}

impl SseEvent {
    /// Event type, defaulting to `message` as browsers do
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental decoder
///
/// Bytes are buffered until a full event block is available, so a
/// multi-byte UTF-8 sequence split across network chunks is never
/// decoded in halves.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_event_block(&String::from_utf8_lossy(&block[..pos])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let block = std::mem::take(&mut self.buffer);
        parse_event_block(&String::from_utf8_lossy(&block))
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

/// Parse the text between two blank lines
///
/// Returns `None` for blocks carrying neither data nor an event type
/// (pure comments, keep-alives).
fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event = None;
    let mut id = None;

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() && event.is_none() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
        id,
    })
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    done: bool,
}

/// Turn an HTTP body into a stream of events
///
/// A transport failure is yielded once as an error and ends the stream.
pub fn decode_stream<S>(byte_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = DecodeState {
        inner: Box::pin(byte_stream),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(AgentSmithError::Http(e).into()), state));
                }
                None => {
                    state.done = true;
                    if let Some(event) = state.decoder.finish() {
                        state.pending.push_back(event);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_data_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[0].kind(), "message");
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: endpoint\nda").is_empty());
        assert!(decoder.push(b"ta: /messages?session=1").is_empty());
        let events = decoder.push(b"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "endpoint");
        assert_eq!(events[0].data, "/messages?session=1");
    }

    #[test]
    fn test_crlf_and_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\r\n\r\ndata: one\r\ndata: two\r\nid: 7\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_multibyte_split() {
        let text = "data: héllo\n\n".as_bytes();
        let (first, second) = text.split_at(8);
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(first).is_empty());
        let events = decoder.push(second);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish().map(|e| e.data), Some("[DONE]".to_string()));
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_decode_stream_yields_events_in_order() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: a\n\nda")),
            Ok(Bytes::from_static(b"ta: b\n\n")),
            Ok(Bytes::from_static(b"data: c")),
        ];
        let events: Vec<String> = decode_stream(futures::stream::iter(chunks))
            .map(|event| event.unwrap().data)
            .collect()
            .await;
        assert_eq!(events, vec!["a", "b", "c"]);
    }
}
