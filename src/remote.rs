//! Request/response collaborators and the polling listener.
//!
//! DESIGN
//! ======
//! [`RemoteCall`] is the seam for anything that answers one JSON request
//! with one JSON value. [`Poller`] is the polling alternative to the event
//! stream: it calls a `RemoteCall` on a fixed interval and appends each
//! result to its own capped buffer. Failures become notifications and the
//! next tick simply tries again.

#[cfg(test)]
#[path = "remote_test.rs"]
mod tests;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::buffer::{DEFAULT_BUFFER_CAPACITY, EvictionPolicy, MessageBuffer};
use crate::error::RemoteCallError;
use crate::message::{self, Message};
use crate::notify::{Notification, NotificationSink};

/// Default polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

const POLLED_KIND: &str = "poll";

// =============================================================================
// REMOTE CALL
// =============================================================================

/// One request/response call returning JSON. Enables mocking in tests.
#[async_trait::async_trait]
pub trait RemoteCall: Send + Sync {
    /// Perform the call with a small parameter record.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteCallError`] whose `message` is suitable for showing
    /// to a user.
    async fn call(&self, params: &Value) -> Result<Value, RemoteCallError>;
}

/// `RemoteCall` that POSTs the params as JSON to a fixed URL.
#[derive(Clone, Debug)]
pub struct HttpRemoteCall {
    client: reqwest::Client,
    url: String,
}

impl HttpRemoteCall {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait::async_trait]
impl RemoteCall for HttpRemoteCall {
    async fn call(&self, params: &Value) -> Result<Value, RemoteCallError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .json(params)
            .send()
            .await
            .map_err(|e| RemoteCallError::new(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteCallError::new(format!("failed to read response: {e}")))?;
        let body = decode_body(&text);

        if !status.is_success() {
            return Err(RemoteCallError::from_response(status.as_u16(), &body));
        }
        Ok(body)
    }
}

/// Parse a response body, unwrapping one level of JSON-encoded string.
///
/// Non-JSON text is returned as a plain string value.
fn decode_body(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(inner)) => serde_json::from_str(&inner).unwrap_or(Value::String(inner)),
        Ok(value) => value,
        Err(_) => Value::String(text.to_owned()),
    }
}

// =============================================================================
// POLLER
// =============================================================================

#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub interval: Duration,
    pub buffer_capacity: usize,
    pub eviction: EvictionPolicy,
    /// Sent with every call.
    pub params: Value,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            eviction: EvictionPolicy::EvictOldest,
            params: Value::Object(serde_json::Map::new()),
        }
    }
}

struct PollShared {
    remote: Arc<dyn RemoteCall>,
    notifier: Arc<dyn NotificationSink>,
    params: Value,
    buffer: Mutex<MessageBuffer>,
    messages: watch::Sender<Arc<[Message]>>,
}

impl PollShared {
    async fn poll(&self) -> Result<(), RemoteCallError> {
        match self.remote.call(&self.params).await {
            Ok(value) => {
                let message = Message::from_value(POLLED_KIND, value, message::now_ms());
                let snapshot = self
                    .buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(message);
                debug!(buffered = snapshot.len(), "poll result appended");
                self.messages.send_replace(snapshot);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, status = ?e.status, "poll failed");
                self.notifier
                    .notify(Notification::error("Error fetching event data", e.message.clone()));
                Err(e)
            }
        }
    }
}

/// Fixed-interval poller over a [`RemoteCall`].
pub struct Poller {
    shared: Arc<PollShared>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteCall>, config: PollerConfig, notifier: Arc<dyn NotificationSink>) -> Self {
        let buffer = MessageBuffer::new(config.buffer_capacity, config.eviction);
        let (messages, _) = watch::channel(buffer.snapshot());
        let shared = PollShared {
            remote,
            notifier,
            params: config.params,
            buffer: Mutex::new(buffer),
            messages,
        };
        Self { shared: Arc::new(shared), interval: config.interval, task: None }
    }

    /// Begin polling. The first call happens one interval from now.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("poller already running");
            return;
        }
        let shared = Arc::clone(&self.shared);
        let period = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if shared.poll().await.is_err() {
                    debug!("poll failed; waiting for next tick");
                }
            }
        }));
        info!(interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "poller started");
    }

    /// Stop polling. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("poller stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Poll once, outside the schedule.
    ///
    /// # Errors
    ///
    /// Returns the remote-call failure after it has been reported to the
    /// notification sink.
    pub async fn poll_once(&self) -> Result<(), RemoteCallError> {
        self.shared.poll().await
    }

    #[must_use]
    pub fn messages(&self) -> watch::Receiver<Arc<[Message]>> {
        self.shared.messages.subscribe()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
