//! Inbound message model and payload parsing.
//!
//! Payloads are JSON objects in practice, but field names vary between
//! producers (`content` vs `text` vs `message`), so parsing picks the first
//! present key rather than binding a fixed schema.

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wire::SseEvent;

use crate::error::StreamError;

const TEXT_KEYS: [&str; 3] = ["content", "text", "message"];
const ACTIVE_CLIENT_KEYS: [&str; 3] = ["activeClients", "activeClientCount", "clientCount"];

/// How the `data` of an inbound event is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Data must be JSON; malformed data is a parse error.
    #[default]
    Json,
    /// Data is taken verbatim as the message text.
    Text,
}

/// A received message. Immutable once appended to a buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sequence number assigned by the buffer on append; 0 until then.
    pub id: u64,
    /// Event name or the payload's own `type` field.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable body.
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Remaining payload fields, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    /// Build a message from a stream event.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Parse`] when `format` is JSON and the payload
    /// is not valid JSON.
    pub fn from_event(event: &SseEvent, format: PayloadFormat, received_ms: i64) -> Result<Self, StreamError> {
        match format {
            PayloadFormat::Json => Ok(Self::from_json(&event.event, event.json()?, &event.data, received_ms)),
            PayloadFormat::Text => Ok(Self::from_text(event, received_ms)),
        }
    }

    /// Take the event data verbatim as the message text.
    #[must_use]
    pub fn from_text(event: &SseEvent, received_ms: i64) -> Self {
        Self { id: 0, kind: event.event.clone(), text: event.data.clone(), timestamp: received_ms, metadata: None }
    }

    /// Build a message from a decoded JSON payload.
    #[must_use]
    pub fn from_value(default_kind: &str, value: Value, received_ms: i64) -> Self {
        let raw = value.to_string();
        Self::from_json(default_kind, value, &raw, received_ms)
    }

    /// Build a message from `value`, already parsed from the JSON text `raw`.
    ///
    /// `raw` becomes the text when the payload has no text field.
    #[must_use]
    pub fn from_json(default_kind: &str, value: Value, raw: &str, received_ms: i64) -> Self {
        let mut fields = match value {
            Value::Object(fields) => fields,
            Value::String(text) => {
                return Self { id: 0, kind: default_kind.to_owned(), text, timestamp: received_ms, metadata: None };
            }
            _ => {
                return Self {
                    id: 0,
                    kind: default_kind.to_owned(),
                    text: raw.to_owned(),
                    timestamp: received_ms,
                    metadata: None,
                };
            }
        };

        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => default_kind.to_owned(),
        };
        let timestamp = fields
            .remove("timestamp")
            .and_then(|v| v.as_i64())
            .unwrap_or(received_ms);
        let text = TEXT_KEYS
            .iter()
            .find(|key| fields.get(**key).is_some_and(Value::is_string))
            .and_then(|key| fields.remove(*key))
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| raw.to_owned());
        let metadata = if fields.is_empty() { None } else { Some(fields) };

        Self { id: 0, kind, text, timestamp, metadata }
    }
}

/// Connected-client count announced by the server, if the payload has one.
#[must_use]
pub fn active_client_count(payload: &Value) -> Option<u64> {
    ACTIVE_CLIENT_KEYS
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_u64))
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(duration.as_millis()).unwrap_or(0)
}
