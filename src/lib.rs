//! Durable client for long-lived Server-Sent-Events streams.
//!
//! SYSTEM CONTEXT
//! ==============
//! `client` holds the connection state machine and message buffer,
//! `runtime` drives it from a single tokio task, `transport` opens the HTTP
//! event stream, `remote` covers request/response collaborators and the
//! polling listener, and `notify` carries user-facing notifications.

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod notify;
pub mod remote;
pub mod runtime;
pub mod status;
pub mod transport;

pub use buffer::{EvictionPolicy, MessageBuffer};
pub use client::{PendingRetry, RetryStage, StreamClient};
pub use config::{Preflight, StreamConfig};
pub use error::{RemoteCallError, StreamError};
pub use message::{Message, PayloadFormat};
pub use notify::{ChannelSink, Notification, NotificationSink, Severity, TracingSink};
pub use remote::{HttpRemoteCall, Poller, PollerConfig, RemoteCall};
pub use runtime::{INBOUND_CAPACITY, StreamHandle, spawn_stream_client, spawn_with_transport};
pub use status::ConnectionStatus;
pub use transport::{HandleId, HttpTransport, Inbound, Transport, TransportEvent, TransportHandle};
