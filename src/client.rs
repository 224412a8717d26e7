//! Durable event stream client: connection state machine and message log.
//!
//! SYSTEM CONTEXT
//! ==============
//! `StreamClient` is driven by callbacks (`on_open`, `on_message`,
//! `on_error`, `on_preflight`, `on_retry_elapsed`) dispatched from one event
//! loop, normally `runtime::spawn_with_transport`. It never blocks and never
//! awaits; side effects go through the [`Transport`] and the notification
//! sink, and timers are requested by exposing a [`PendingRetry`].
//!
//! STATE MACHINE
//! =============
//! Disconnected -> Validating (pre-flight) -> Connecting -> Connected.
//! A transport error while retries remain moves to Retrying; the retry timer
//! moves back to Validating or Connecting. Exhausting retries moves to
//! Failed, which only `reset` leaves. `disconnect` is terminal for the
//! instance.
//!
//! OWNERSHIP
//! =========
//! The live transport handle and the pending retry are plain fields of the
//! client. Opening always closes the previous handle first, so at most one
//! handle is live. Timers and pre-flights carry a generation number; bumping
//! it cancels whatever is in flight.

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};
use wire::SseEvent;

use crate::buffer::MessageBuffer;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::message::{self, Message, PayloadFormat};
use crate::notify::{Notification, NotificationSink};
use crate::status::ConnectionStatus;
use crate::transport::{HandleId, Inbound, Transport, TransportEvent, TransportHandle};

/// Which step a retry resumes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryStage {
    /// Pre-flight failed; run it again.
    Preflight,
    /// The stream failed; reopen it directly.
    Transport,
}

/// A retry timer the event loop should arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingRetry {
    /// Pass back to [`StreamClient::on_retry_elapsed`] when the delay ends.
    pub generation: u64,
    pub delay: Duration,
    pub stage: RetryStage,
}

pub struct StreamClient<T: Transport> {
    config: StreamConfig,
    transport: T,
    notifier: Arc<dyn NotificationSink>,
    status: ConnectionStatus,
    retry_count: u32,
    handle: Option<T::Handle>,
    next_handle_id: HandleId,
    preflight_attempt: u64,
    pending_preflight: Option<u64>,
    retry_generation: u64,
    pending_retry: Option<PendingRetry>,
    buffer: MessageBuffer,
    active_client_count: Option<u64>,
    last_event_id: Option<String>,
    torn_down: bool,
}

impl<T: Transport> StreamClient<T> {
    #[must_use]
    pub fn new(config: StreamConfig, transport: T, notifier: Arc<dyn NotificationSink>) -> Self {
        let buffer = MessageBuffer::new(config.buffer_capacity, config.eviction);
        Self {
            config,
            transport,
            notifier,
            status: ConnectionStatus::Disconnected,
            retry_count: 0,
            handle: None,
            next_handle_id: 1,
            preflight_attempt: 0,
            pending_preflight: None,
            retry_generation: 0,
            pending_retry: None,
            buffer,
            active_client_count: None,
            last_event_id: None,
            torn_down: false,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn messages(&self) -> Arc<[Message]> {
        self.buffer.snapshot()
    }

    #[must_use]
    pub fn active_client_count(&self) -> Option<u64> {
        self.active_client_count
    }

    /// Retry timer to arm, if any.
    #[must_use]
    pub fn pending_retry(&self) -> Option<PendingRetry> {
        self.pending_retry
    }

    /// Id of the live transport handle, if any.
    #[must_use]
    pub fn live_handle(&self) -> Option<HandleId> {
        self.handle.as_ref().map(TransportHandle::id)
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Start connecting. No-op while a connection is active or in progress.
    ///
    /// A call while `Retrying` cancels the pending timer and connects now.
    pub fn connect(&mut self) {
        if self.torn_down {
            warn!("connect ignored: client has been torn down");
            return;
        }
        match self.status {
            ConnectionStatus::Validating | ConnectionStatus::Connecting | ConnectionStatus::Connected => {
                debug!(status = %self.status, "connect ignored: already active");
                return;
            }
            ConnectionStatus::Failed => {
                warn!("connect ignored: retries exhausted; reset required");
                return;
            }
            ConnectionStatus::Retrying => {
                info!(retry_count = self.retry_count, "manual connect cancels pending retry");
                self.cancel_retry();
            }
            ConnectionStatus::Disconnected => {}
        }
        self.begin_preflight();
    }

    /// Tear down: close the transport, cancel timers, and refuse further
    /// connects. Safe to call in any state, any number of times.
    pub fn disconnect(&mut self) {
        self.cancel_retry();
        self.pending_preflight = None;
        self.close_handle();
        self.set_status(ConnectionStatus::Disconnected);
        if !self.torn_down {
            self.torn_down = true;
            info!(endpoint = %self.config.endpoint_url, "stream client disconnected");
        }
    }

    /// Leave `Failed` so that `connect` is accepted again.
    pub fn reset(&mut self) {
        if self.torn_down || self.status != ConnectionStatus::Failed {
            debug!(status = %self.status, "reset ignored");
            return;
        }
        self.retry_count = 0;
        self.set_status(ConnectionStatus::Disconnected);
        info!("stream client reset");
    }

    // =========================================================================
    // CALLBACKS
    // =========================================================================

    /// Route an asynchronous outcome, dropping ones that are no longer current.
    pub fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Transport { handle, event } => {
                if self.live_handle() != Some(handle) {
                    debug!(handle, "dropping event from stale transport handle");
                    return;
                }
                match event {
                    TransportEvent::Open => self.on_open(),
                    TransportEvent::Event(event) => self.on_message(&event),
                    TransportEvent::Error(reason) => self.on_error(&reason),
                }
            }
            Inbound::Preflight { attempt, result } => self.on_preflight(attempt, result),
        }
    }

    /// Pre-flight finished.
    pub fn on_preflight(&mut self, attempt: u64, result: Result<(), StreamError>) {
        if self.pending_preflight != Some(attempt) {
            debug!(attempt, "dropping stale pre-flight result");
            return;
        }
        self.pending_preflight = None;

        match result {
            Ok(()) => {
                debug!(attempt, "pre-flight passed");
                self.open_transport();
            }
            Err(e) => {
                warn!(error = %e, attempt, "pre-flight failed");
                self.notifier
                    .notify(Notification::error("Error", preflight_failure_message(&self.config)));
                self.fail_attempt(RetryStage::Preflight, &e.to_string());
            }
        }
    }

    /// The transport reports the stream is established.
    pub fn on_open(&mut self) {
        if self.handle.is_none() || self.status != ConnectionStatus::Connecting {
            debug!(status = %self.status, "open ignored");
            return;
        }
        self.retry_count = 0;
        self.set_status(ConnectionStatus::Connected);
        info!(endpoint = %self.config.endpoint_url, "stream connected");
        self.notifier
            .notify(Notification::success("Success", "Connected to message service"));
    }

    /// One inbound event. Malformed payloads are logged and discarded.
    pub fn on_message(&mut self, event: &SseEvent) {
        if self.handle.is_none() {
            debug!(event = %event.event, "message ignored: no live transport");
            return;
        }

        let received_ms = message::now_ms();
        let message = match self.config.payload_format {
            PayloadFormat::Text => Message::from_text(event, received_ms),
            PayloadFormat::Json => {
                let payload = match event.json() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, event = %event.event, "discarding malformed event");
                        return;
                    }
                };
                if let Some(count) = message::active_client_count(&payload) {
                    self.active_client_count = Some(count);
                }
                Message::from_json(&event.event, payload, &event.data, received_ms)
            }
        };

        if let Some(id) = &event.id {
            self.last_event_id = Some(id.clone());
        }

        if self.config.notify_on_message {
            self.notifier
                .notify(Notification::info("New Message", message.text.clone()));
        }
        let snapshot = self.buffer.push(message);
        debug!(kind = %event.event, buffered = snapshot.len(), "message appended");
    }

    /// The transport failed or ended.
    pub fn on_error(&mut self, reason: &str) {
        if matches!(self.status, ConnectionStatus::Disconnected | ConnectionStatus::Failed) {
            debug!(status = %self.status, reason, "error ignored");
            return;
        }
        warn!(reason, retry_count = self.retry_count, "transport error");
        self.close_handle();
        self.fail_attempt(RetryStage::Transport, reason);
    }

    /// The retry timer of `generation` fired.
    pub fn on_retry_elapsed(&mut self, generation: u64) {
        let Some(pending) = self.pending_retry.filter(|p| p.generation == generation) else {
            debug!(generation, "dropping stale retry timer");
            return;
        };
        self.pending_retry = None;
        info!(retry_count = self.retry_count, stage = ?pending.stage, "retrying connection");
        match pending.stage {
            RetryStage::Preflight => self.begin_preflight(),
            RetryStage::Transport => self.open_transport(),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn begin_preflight(&mut self) {
        if self.config.preflight.is_none() {
            self.open_transport();
            return;
        }
        self.preflight_attempt += 1;
        let attempt = self.preflight_attempt;
        self.pending_preflight = Some(attempt);
        self.set_status(ConnectionStatus::Validating);
        self.transport
            .preflight(attempt, &self.config.endpoint_url, &self.config.preflight);
    }

    fn open_transport(&mut self) {
        self.close_handle();
        self.set_status(ConnectionStatus::Connecting);

        let id = self.next_handle_id;
        self.next_handle_id += 1;
        let url = self.config.stream_url();
        match self.transport.open(id, &url, self.last_event_id.as_deref()) {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                warn!(error = %e, "transport open failed");
                self.fail_attempt(RetryStage::Transport, &e.to_string());
            }
        }
    }

    fn fail_attempt(&mut self, stage: RetryStage, reason: &str) {
        self.pending_preflight = None;
        self.cancel_retry();
        self.retry_count = self.retry_count.saturating_add(1);

        if let Some(max) = self.config.max_retries {
            if self.retry_count >= max {
                self.set_status(ConnectionStatus::Failed);
                error!(retry_count = self.retry_count, max_retries = max, reason, "giving up on stream");
                self.notifier.notify(Notification::error(
                    "Connection failed",
                    format!("Gave up after {} attempts: {reason}", self.retry_count),
                ));
                return;
            }
        }

        self.retry_generation += 1;
        let delay = self.config.retry_delay + jitter(self.config.retry_jitter);
        self.pending_retry = Some(PendingRetry { generation: self.retry_generation, delay, stage });
        self.set_status(ConnectionStatus::Retrying);
        info!(
            retry_count = self.retry_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retry scheduled"
        );
    }

    fn cancel_retry(&mut self) {
        if self.pending_retry.take().is_some() {
            self.retry_generation += 1;
        }
    }

    fn close_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
    }

    fn set_status(&mut self, next: ConnectionStatus) {
        if self.status != next {
            debug!(from = %self.status, to = %next, "status change");
            self.status = next;
        }
    }
}

impl<T: Transport> Drop for StreamClient<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn preflight_failure_message(config: &StreamConfig) -> &'static str {
    match config.preflight {
        crate::config::Preflight::Register { .. } => "Failed to register for messages",
        _ => "Message service is unreachable",
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
