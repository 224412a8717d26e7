//! Connection lifecycle status exposed to the view layer.

#[cfg(test)]
#[path = "status_test.rs"]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stream connection status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No transport; initial state and the state after teardown.
    #[default]
    Disconnected,
    /// Pre-flight health or registration call in flight.
    Validating,
    /// Transport opened, waiting for the server to accept the stream.
    Connecting,
    /// Stream is open and delivering events.
    Connected,
    /// Transport failed; a retry timer is pending.
    Retrying,
    /// Retries exhausted. Only an explicit reset leaves this state.
    Failed,
}

impl ConnectionStatus {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Validating => "validating",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        }
    }

    /// True while a connection attempt is underway or established.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Validating | Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
