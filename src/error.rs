//! Error taxonomy for the stream client.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures feed the retry policy, parse failures are logged and
//! dropped, and remote-call failures become user notifications. None of them
//! escape a callback: the client classifies each one at the boundary.

use serde_json::Value;

/// Errors raised while configuring or running a stream client.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Pre-flight check or stream open failed before any event arrived.
    #[error("transport open failed: {0}")]
    TransportOpen(String),
    /// An established stream broke or ended.
    #[error("transport failed: {0}")]
    Transport(String),
    /// An inbound payload could not be decoded.
    #[error("malformed event payload: {0}")]
    Parse(#[from] wire::CodecError),
    /// A request/response collaborator call failed.
    #[error(transparent)]
    RemoteCall(#[from] RemoteCallError),
    /// Configuration is missing or invalid.
    #[error("invalid stream config: {0}")]
    ConfigParse(String),
}

/// Failure of a remote request/response call.
///
/// `message` is human-readable and suitable for a user notification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteCallError {
    pub message: String,
    /// HTTP status, when the call reached the server.
    pub status: Option<u16>,
}

impl RemoteCallError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), status: None }
    }

    /// Build an error from a non-success response body.
    ///
    /// Prefers `message`, then `error`, then `body.message` (the shape
    /// platform RPC layers wrap failures in), falling back to the status.
    #[must_use]
    pub fn from_response(status: u16, body: &Value) -> Self {
        let message = ["message", "error"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .or_else(|| body.pointer("/body/message").and_then(Value::as_str))
            .map_or_else(|| format!("HTTP {status}"), str::to_owned);
        Self { message, status: Some(status) }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
