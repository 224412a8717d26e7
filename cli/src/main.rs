use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use eventstream::config::{DEFAULT_ENDPOINT_URL, DEFAULT_HEALTH_PATH, DEFAULT_REGISTER_PATH};
use eventstream::remote::DEFAULT_POLL_INTERVAL_MS;
use eventstream::transport::preflight_request;
use eventstream::{
    ConnectionStatus, HttpRemoteCall, Message, Poller, PollerConfig, Preflight, StreamConfig, StreamError,
    TracingSink, spawn_stream_client,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("no request to send for pre-flight {0:?}")]
    NoRequest(Preflight),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{what} returned HTTP {status}")]
    RequestFailed { what: &'static str, status: u16 },
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("stream failed after exhausting retries")]
    GaveUp,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "eventstream", about = "Durable event stream client CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the health path next to the stream endpoint.
    Ping(EndpointArgs),
    /// Register a caller identity for messages.
    Register(RegisterArgs),
    /// Connect to the event stream and print messages as they arrive.
    ///
    /// Configured from `STREAM_*` environment variables.
    Listen(ListenArgs),
    /// Poll a JSON endpoint on an interval and print each result.
    Poll(PollArgs),
}

#[derive(Args, Debug)]
struct EndpointArgs {
    #[arg(long, env = "STREAM_ENDPOINT_URL", default_value = DEFAULT_ENDPOINT_URL)]
    url: String,

    #[arg(long, env = "STREAM_HEALTH_PATH", default_value = DEFAULT_HEALTH_PATH)]
    path: String,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long, env = "STREAM_ENDPOINT_URL", default_value = DEFAULT_ENDPOINT_URL)]
    url: String,

    #[arg(long, env = "STREAM_REGISTER_PATH", default_value = DEFAULT_REGISTER_PATH)]
    path: String,

    #[arg(long, env = "STREAM_USER_ID", help = "Defaults to a random UUID")]
    user_id: Option<String>,
}

#[derive(Args, Debug)]
struct ListenArgs {
    #[arg(long, help = "Exit after printing this many messages")]
    max_messages: Option<usize>,

    #[arg(long, default_value_t = false, help = "Print each message as JSON")]
    json: bool,
}

#[derive(Args, Debug)]
struct PollArgs {
    /// URL the JSON params are POSTed to.
    url: String,

    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    interval_ms: u64,

    #[arg(long, default_value = "{}")]
    params: String,

    #[arg(long, help = "Exit after this many results")]
    count: Option<usize>,

    #[arg(long, default_value_t = false, help = "Print each message as JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Ping(args) => run_ping(args).await,
        Command::Register(args) => run_register(args).await,
        Command::Listen(args) => run_listen(args).await,
        Command::Poll(args) => run_poll(args).await,
    }
}

async fn run_ping(args: EndpointArgs) -> Result<(), CliError> {
    let check = Preflight::Health { path: args.path };
    let response = request_for(&args.url, &check)?.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::RequestFailed { what: "health check", status: status.as_u16() });
    }
    println!("ok");
    Ok(())
}

async fn run_register(args: RegisterArgs) -> Result<(), CliError> {
    let user_id = args.user_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let check = Preflight::Register { path: args.path, user_id: user_id.clone() };
    let response = request_for(&args.url, &check)?.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::RequestFailed { what: "registration", status: status.as_u16() });
    }
    println!("registered {user_id}");
    Ok(())
}

async fn run_listen(args: ListenArgs) -> Result<(), CliError> {
    let config = StreamConfig::from_env()?;
    info!(endpoint = %config.endpoint_url, preflight = ?config.preflight, "listening");
    let handle = spawn_stream_client(config, Arc::new(TracingSink))?;
    let mut status = handle.status();
    let mut messages = handle.messages();
    handle.connect();

    let mut printer = Printer::new(args.json, args.max_messages);
    let outcome = loop {
        tokio::select! {
            changed = messages.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = messages.borrow_and_update().clone();
                if printer.print_new(&snapshot)? {
                    break Ok(());
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *status.borrow_and_update();
                info!(status = %current, "connection status");
                if current == ConnectionStatus::Failed {
                    break Err(CliError::GaveUp);
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "ctrl-c handler failed");
                }
                break Ok(());
            }
        }
    };

    handle.shutdown().await;
    outcome
}

async fn run_poll(args: PollArgs) -> Result<(), CliError> {
    let params = serde_json::from_str::<Value>(&args.params)?;
    let remote = HttpRemoteCall::new(reqwest::Client::new(), args.url);
    let config = PollerConfig {
        interval: Duration::from_millis(args.interval_ms),
        params,
        ..PollerConfig::default()
    };
    let mut poller = Poller::new(Arc::new(remote), config, Arc::new(TracingSink));
    let mut messages = poller.messages();
    poller.start();

    let mut printer = Printer::new(args.json, args.count);
    let outcome = loop {
        tokio::select! {
            changed = messages.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = messages.borrow_and_update().clone();
                if printer.print_new(&snapshot)? {
                    break Ok(());
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "ctrl-c handler failed");
                }
                break Ok(());
            }
        }
    };

    poller.stop();
    outcome
}

/// The same request the stream client sends for `check` before connecting.
fn request_for(endpoint_url: &str, check: &Preflight) -> Result<reqwest::RequestBuilder, CliError> {
    preflight_request(&reqwest::Client::new(), endpoint_url, check)?.ok_or_else(|| CliError::NoRequest(check.clone()))
}

/// Prints each message once, in arrival order, whatever the buffer order.
struct Printer {
    json: bool,
    limit: Option<usize>,
    last_id: u64,
    printed: usize,
}

impl Printer {
    fn new(json: bool, limit: Option<usize>) -> Self {
        Self { json, limit, last_id: 0, printed: 0 }
    }

    /// Returns `true` once the limit is reached.
    fn print_new(&mut self, snapshot: &[Message]) -> Result<bool, CliError> {
        for message in unseen(snapshot, self.last_id) {
            if self.json {
                println!("{}", serde_json::to_string(message)?);
            } else {
                println!("{}", render(message));
            }
            self.last_id = message.id;
            self.printed += 1;
            if self.limit.is_some_and(|limit| self.printed >= limit) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn unseen(snapshot: &[Message], last_id: u64) -> Vec<&Message> {
    let mut fresh: Vec<&Message> = snapshot.iter().filter(|m| m.id > last_id).collect();
    fresh.sort_by_key(|m| m.id);
    fresh
}

fn render(message: &Message) -> String {
    format!("[{}] #{} {}: {}", message.timestamp, message.id, message.kind, message.text)
}
