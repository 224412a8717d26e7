//! Event loop that owns a [`StreamClient`] and publishes its state.
//!
//! DESIGN
//! ======
//! One tokio task owns the client. It waits on three sources: commands from
//! the [`StreamHandle`], transport outcomes on the inbound channel, and the
//! retry deadline. Each wake runs one client callback to completion, then
//! publishes status, messages and the active client count on `watch`
//! channels. Nothing else touches the client, so no locking is needed.
//!
//! Transport outcomes travel on a channel bounded at [`INBOUND_CAPACITY`];
//! reader tasks wait while it is full.
//!
//! Dropping the handle disconnects the client and ends the task.

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::client::StreamClient;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::message::Message;
use crate::notify::NotificationSink;
use crate::status::ConnectionStatus;
use crate::transport::{HttpTransport, Inbound, Transport};

/// Transport outcomes queued for the event loop before readers wait.
pub const INBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Disconnect,
    Reset,
}

/// Owner-side handle to a running stream client.
pub struct StreamHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    messages: watch::Receiver<Arc<[Message]>>,
    active_clients: watch::Receiver<Option<u64>>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Ask the client to connect. Ignored while already active.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Leave `Failed` so `connect` is accepted again.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn messages(&self) -> watch::Receiver<Arc<[Message]>> {
        self.messages.clone()
    }

    #[must_use]
    pub fn active_clients(&self) -> watch::Receiver<Option<u64>> {
        self.active_clients.clone()
    }

    /// Disconnect and wait for the event loop to finish.
    pub async fn shutdown(mut self) {
        self.send(Command::Disconnect);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(error = %e, "stream task ended abnormally");
            }
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(?command, "stream task already stopped");
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.send(Command::Disconnect);
        }
    }
}

/// Spawn a client over the HTTP event-stream transport.
///
/// The client starts `Disconnected`; call [`StreamHandle::connect`].
///
/// # Errors
///
/// Returns an error if the config is invalid or the HTTP client cannot be
/// built.
pub fn spawn_stream_client(
    config: StreamConfig,
    notifier: Arc<dyn NotificationSink>,
) -> Result<StreamHandle, StreamError> {
    config.validate()?;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let transport = HttpTransport::new(&config, inbound_tx)?;
    Ok(spawn_with_transport(config, transport, inbound_rx, notifier))
}

/// Spawn a client over any transport whose outcomes arrive on `inbound`.
#[must_use]
pub fn spawn_with_transport<T>(
    config: StreamConfig,
    transport: T,
    inbound: mpsc::Receiver<Inbound>,
    notifier: Arc<dyn NotificationSink>,
) -> StreamHandle
where
    T: Transport + 'static,
{
    let client = StreamClient::new(config, transport, notifier);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(client.status());
    let (messages_tx, messages_rx) = watch::channel(client.messages());
    let (active_tx, active_rx) = watch::channel(client.active_client_count());

    let publisher = Publisher { status: status_tx, messages: messages_tx, active_clients: active_tx };
    let task = tokio::spawn(run(client, commands_rx, inbound, publisher));

    StreamHandle {
        commands: commands_tx,
        status: status_rx,
        messages: messages_rx,
        active_clients: active_rx,
        task: Some(task),
    }
}

struct Publisher {
    status: watch::Sender<ConnectionStatus>,
    messages: watch::Sender<Arc<[Message]>>,
    active_clients: watch::Sender<Option<u64>>,
}

impl Publisher {
    fn publish<T: Transport>(&self, client: &StreamClient<T>) {
        let status = client.status();
        self.status.send_if_modified(|current| replace_if_changed(current, status));

        let snapshot = client.messages();
        self.messages.send_if_modified(|current| {
            if Arc::ptr_eq(current, &snapshot) {
                return false;
            }
            *current = snapshot;
            true
        });

        let count = client.active_client_count();
        self.active_clients
            .send_if_modified(|current| replace_if_changed(current, count));
    }
}

fn replace_if_changed<V: PartialEq>(current: &mut V, next: V) -> bool {
    if *current == next {
        return false;
    }
    *current = next;
    true
}

async fn run<T: Transport>(
    mut client: StreamClient<T>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut inbound: mpsc::Receiver<Inbound>,
    publisher: Publisher,
) {
    info!(endpoint = %client.config().endpoint_url, "stream task started");
    let mut armed: Option<(u64, Instant)> = None;

    loop {
        armed = match (client.pending_retry(), armed) {
            (Some(pending), Some((generation, deadline))) if generation == pending.generation => {
                Some((generation, deadline))
            }
            (Some(pending), _) => Some((pending.generation, Instant::now() + pending.delay)),
            (None, _) => None,
        };

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connect) => client.connect(),
                Some(Command::Reset) => client.reset(),
                Some(Command::Disconnect) | None => {
                    client.disconnect();
                    publisher.publish(&client);
                    break;
                }
            },
            Some(event) = inbound.recv() => client.handle_inbound(event),
            () = retry_deadline(armed) => {
                if let Some((generation, _)) = armed.take() {
                    client.on_retry_elapsed(generation);
                }
            }
        }

        publisher.publish(&client);
    }

    info!("stream task stopped");
}

async fn retry_deadline(armed: Option<(u64, Instant)>) {
    match armed {
        Some((_, deadline)) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
