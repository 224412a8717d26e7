//! Server-Sent Events framing for the `text/event-stream` wire format.
//!
//! This crate owns the wire representation consumed by the stream client and
//! produced by test servers. It is transport-agnostic: callers feed raw body
//! chunks into [`SseDecoder`] and receive complete [`SseEvent`]s, regardless
//! of how the network split the bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name used when a block carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// MIME type an SSE endpoint must answer with.
pub const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Upper bound on a single unterminated line held in the decoder.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Error returned by the decoder and payload helpers.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A line grew past [`MAX_LINE_BYTES`] without a terminator.
    #[error("event-stream line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
    /// The `data` of an event is not valid JSON.
    #[error("invalid JSON event payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// One dispatched event from an event stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    /// Event name, e.g. `"message"`, `"connected"`, `"update"`.
    pub event: String,
    /// Payload; multiple `data:` lines are joined with `\n`.
    pub data: String,
    /// Last event id seen on the stream at dispatch time.
    pub id: Option<String>,
    /// Reconnection time requested by the server, in milliseconds.
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Build a default-named event carrying `data`.
    #[must_use]
    pub fn message(data: impl Into<String>) -> Self {
        Self::named(DEFAULT_EVENT, data)
    }

    /// Build a named event carrying `data`.
    #[must_use]
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self { event: event.into(), data: data.into(), id: None, retry: None }
    }

    /// Parse the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] when `data` is not a JSON document.
    pub fn json(&self) -> Result<Value, CodecError> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a full line is available, so UTF-8 sequences and
/// field lines split across network chunks are reassembled before parsing.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes not yet terminated by a newline.
    pending: Vec<u8>,
    /// `event:` field of the block being assembled.
    event: Option<String>,
    /// Accumulated `data:` lines of the block being assembled.
    data: Option<String>,
    /// Last event id; persists across events per the SSE processing model.
    last_id: Option<String>,
    /// `retry:` field of the block being assembled.
    retry: Option<u64>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last event id received, used for `Last-Event-ID` on reconnect.
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Feed a body chunk, returning every event completed by it.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::LineTooLong`] if an unterminated line exceeds
    /// [`MAX_LINE_BYTES`]. The decoder should be discarded afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, CodecError> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let mut line = &self.pending[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let line = String::from_utf8_lossy(line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_LINE_BYTES {
            self.pending.clear();
            return Err(CodecError::LineTooLong { limit: MAX_LINE_BYTES });
        }
        Ok(events)
    }

    /// Flush at end of stream.
    ///
    /// An event is only dispatched by the blank line that ends its block, so
    /// an unterminated trailing block is discarded. Returns `true` if a
    /// partial block or line was dropped.
    pub fn finish(&mut self) -> bool {
        let had_pending = !self.pending.is_empty();
        self.pending.clear();
        self.event = None;
        self.retry = None;
        self.data.take().is_some() || had_pending
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            },
            "id" => {
                if !value.contains('\0') {
                    self.last_id = Some(value.to_owned());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    self.retry = value.parse().ok();
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let retry = self.retry.take();
        let data = self.data.take()?;
        Some(SseEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
            data,
            id: self.last_id.clone(),
            retry,
        })
    }
}

/// Encode an event as an event-stream block, terminated by a blank line.
#[must_use]
pub fn encode_event(event: &SseEvent) -> String {
    let mut out = String::new();
    if event.event != DEFAULT_EVENT {
        out.push_str("event: ");
        out.push_str(&event.event);
        out.push('\n');
    }
    if let Some(id) = &event.id {
        out.push_str("id: ");
        out.push_str(id);
        out.push('\n');
    }
    if let Some(retry) = event.retry {
        out.push_str(&format!("retry: {retry}\n"));
    }
    for line in event.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Whether a `Content-Type` header value denotes an event stream.
#[must_use]
pub fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM_MIME))
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
