//! Transport seam between the client state machine and the network.
//!
//! DESIGN
//! ======
//! The client never awaits. It asks a [`Transport`] to open a stream or run a
//! pre-flight, and the outcome arrives later as an [`Inbound`] value on the
//! runtime's channel. Each opened stream is tagged with a [`HandleId`] so the
//! runtime can drop events from a handle that has since been closed.
//!
//! A handle is closed by consuming it, so closing the same handle twice
//! cannot be written.

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use wire::{EVENT_STREAM_MIME, SseDecoder, SseEvent};

use crate::config::{Preflight, StreamConfig};
use crate::error::StreamError;

/// Identifier of one opened transport handle.
pub type HandleId = u64;

/// Something that happened on an opened stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server accepted the stream.
    Open,
    /// One decoded event.
    Event(SseEvent),
    /// The stream failed to open, broke, or ended.
    Error(String),
}

/// Asynchronous outcome delivered back to the client.
#[derive(Debug)]
pub enum Inbound {
    Transport { handle: HandleId, event: TransportEvent },
    Preflight { attempt: u64, result: Result<(), StreamError> },
}

/// Opens streams and runs pre-flight checks on behalf of the client.
pub trait Transport: Send {
    type Handle: TransportHandle;

    /// Start opening the stream at `url`.
    ///
    /// Returns as soon as the attempt is underway; `Open`, `Event` and
    /// `Error` for handle `id` are delivered later.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::TransportOpen`] if the attempt cannot start.
    fn open(&mut self, id: HandleId, url: &str, last_event_id: Option<&str>) -> Result<Self::Handle, StreamError>;

    /// Start a pre-flight check; the result is delivered as
    /// [`Inbound::Preflight`] carrying `attempt`.
    fn preflight(&mut self, attempt: u64, endpoint_url: &str, check: &Preflight);
}

/// A live stream. Dropping the value without `close` must also release it.
pub trait TransportHandle: Send {
    fn id(&self) -> HandleId;
    fn close(self);
}

// =============================================================================
// HTTP TRANSPORT
// =============================================================================

/// Event-stream transport over `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    inbound: mpsc::Sender<Inbound>,
}

impl HttpTransport {
    /// Build a transport that reports outcomes on `inbound`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::TransportOpen`] if the HTTP client cannot be
    /// constructed.
    pub fn new(config: &StreamConfig, inbound: mpsc::Sender<Inbound>) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::TransportOpen(e.to_string()))?;
        Ok(Self { client, inbound })
    }
}

impl Transport for HttpTransport {
    type Handle = HttpHandle;

    fn open(&mut self, id: HandleId, url: &str, last_event_id: Option<&str>) -> Result<HttpHandle, StreamError> {
        let url = reqwest::Url::parse(url).map_err(|e| StreamError::TransportOpen(format!("invalid URL: {e}")))?;

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, EVENT_STREAM_MIME)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(last_id) = last_event_id {
            request = request.header("Last-Event-ID", last_id);
        }

        let inbound = self.inbound.clone();
        let task = tokio::spawn(async move {
            let reason = match read_stream(request, id, &inbound).await {
                Ok(()) => "stream ended".to_owned(),
                Err(e) => e.to_string(),
            };
            deliver(&inbound, Inbound::Transport { handle: id, event: TransportEvent::Error(reason) }).await;
        });

        debug!(handle = id, "transport opening");
        Ok(HttpHandle { id, task })
    }

    fn preflight(&mut self, attempt: u64, endpoint_url: &str, check: &Preflight) {
        let request = preflight_request(&self.client, endpoint_url, check);
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            let result = match request {
                Ok(Some(request)) => run_preflight(request).await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            deliver(&inbound, Inbound::Preflight { attempt, result }).await;
        });
    }
}

/// Background task reading one HTTP event stream.
pub struct HttpHandle {
    id: HandleId,
    task: JoinHandle<()>,
}

impl TransportHandle for HttpHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn close(self) {
        self.task.abort();
        debug!(handle = self.id, "transport closed");
    }
}

impl Drop for HttpHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Build the HTTP request for a pre-flight check.
///
/// `Health` is a GET and `Register` a POST carrying `userId`, both resolved
/// against the origin of `endpoint_url`. `Preflight::None` builds nothing.
///
/// # Errors
///
/// Returns [`StreamError::TransportOpen`] if the URL cannot be resolved.
pub fn preflight_request(
    client: &reqwest::Client,
    endpoint_url: &str,
    check: &Preflight,
) -> Result<Option<reqwest::RequestBuilder>, StreamError> {
    let (path, register_as) = match check {
        Preflight::None => return Ok(None),
        Preflight::Health { path } => (path, None),
        Preflight::Register { path, user_id } => (path, Some(user_id)),
    };

    let url = reqwest::Url::parse(endpoint_url)
        .and_then(|base| base.join(path))
        .map_err(|e| StreamError::TransportOpen(format!("invalid pre-flight URL: {e}")))?;

    let request = match register_as {
        None => client.get(url),
        Some(user_id) => client
            .post(url)
            .query(&[("userId", user_id.as_str())])
            .header(CONTENT_TYPE, "application/json"),
    };
    Ok(Some(request.timeout(PREFLIGHT_TIMEOUT)))
}

/// Upper bound on one pre-flight request.
pub const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(15);

async fn run_preflight(request: reqwest::RequestBuilder) -> Result<(), StreamError> {
    let response = request
        .send()
        .await
        .map_err(|e| StreamError::TransportOpen(format!("pre-flight failed: {e}")))?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(StreamError::TransportOpen(format!("pre-flight returned HTTP {}", response.status().as_u16())))
    }
}

async fn read_stream(
    request: reqwest::RequestBuilder,
    id: HandleId,
    inbound: &mpsc::Sender<Inbound>,
) -> Result<(), StreamError> {
    let response = request
        .send()
        .await
        .map_err(|e| StreamError::TransportOpen(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::TransportOpen(format!("HTTP {}", status.as_u16())));
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    if !wire::is_event_stream(&content_type) {
        return Err(StreamError::TransportOpen(format!("unexpected content type '{content_type}'")));
    }

    info!(handle = id, "event stream open");
    if !deliver(inbound, Inbound::Transport { handle: id, event: TransportEvent::Open }).await {
        return Ok(());
    }

    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| StreamError::Transport(e.to_string()))?;
        let events = decoder
            .feed(&chunk)
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        for event in events {
            if !deliver(inbound, Inbound::Transport { handle: id, event: TransportEvent::Event(event) }).await {
                return Ok(());
            }
        }
    }
    if decoder.finish() {
        debug!(handle = id, "discarding unterminated event at end of stream");
    }
    Ok(())
}

/// Send to the runtime, waiting while its queue is full; `false` once the
/// runtime has gone away.
async fn deliver(inbound: &mpsc::Sender<Inbound>, message: Inbound) -> bool {
    match inbound.send(message).await {
        Ok(()) => true,
        Err(_) => {
            debug!("runtime channel closed; dropping transport outcome");
            false
        }
    }
}
