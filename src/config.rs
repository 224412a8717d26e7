//! Stream client configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::time::Duration;

use crate::buffer::{DEFAULT_BUFFER_CAPACITY, EvictionPolicy};
use crate::error::StreamError;
use crate::message::PayloadFormat;

pub const DEFAULT_ENDPOINT_URL: &str = "http://127.0.0.1:8080/api/stream";
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_REGISTER_PATH: &str = "/api/register";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Check performed before the event stream is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    /// Open the stream directly.
    None,
    /// `GET` a health path on the endpoint's origin; any 2xx passes.
    Health { path: String },
    /// `POST` a registration path with `userId` as a query parameter.
    Register { path: String, user_id: String },
}

impl Preflight {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Absolute `http(s)` URL of the event stream.
    pub endpoint_url: String,
    pub preflight: Preflight,
    /// Consecutive failures tolerated before giving up; `None` retries forever.
    pub max_retries: Option<u32>,
    pub retry_delay: Duration,
    /// Upper bound of random delay added to each retry.
    pub retry_jitter: Duration,
    pub buffer_capacity: usize,
    pub eviction: EvictionPolicy,
    pub payload_format: PayloadFormat,
    /// Emit an info notification for every received message.
    pub notify_on_message: bool,
    pub connect_timeout: Duration,
}

impl StreamConfig {
    /// Config for `endpoint_url` with every other field at its default.
    #[must_use]
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            preflight: Preflight::None,
            max_retries: Some(DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            retry_jitter: Duration::ZERO,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            eviction: EvictionPolicy::EvictOldest,
            payload_format: PayloadFormat::Json,
            notify_on_message: false,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_preflight(mut self, preflight: Preflight) -> Self {
        self.preflight = preflight;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_buffer(mut self, capacity: usize, eviction: EvictionPolicy) -> Self {
        self.buffer_capacity = capacity;
        self.eviction = eviction;
        self
    }

    /// Build typed stream config from environment variables.
    ///
    /// Optional (defaults in parentheses):
    /// - `STREAM_ENDPOINT_URL` (`DEFAULT_ENDPOINT_URL`)
    /// - `STREAM_PREFLIGHT`: `none` (default), `health` or `register`
    /// - `STREAM_HEALTH_PATH` (`/health`), `STREAM_REGISTER_PATH` (`/api/register`)
    /// - `STREAM_USER_ID`: registration identity (random UUID)
    /// - `STREAM_MAX_RETRIES`: integer or `unbounded` (3)
    /// - `STREAM_RETRY_DELAY_MS` (5000), `STREAM_RETRY_JITTER_MS` (0)
    /// - `STREAM_BUFFER_CAPACITY` (50)
    /// - `STREAM_EVICTION`: `evict_oldest` (default) or `prepend_newest`
    /// - `STREAM_PAYLOAD_FORMAT`: `json` (default) or `text`
    /// - `STREAM_NOTIFY_ON_MESSAGE`: `true`/`false` (false)
    /// - `STREAM_CONNECT_TIMEOUT_SECS` (10)
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConfigParse`] for unknown enum values or an
    /// invalid endpoint.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StreamConfig::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// See [`StreamConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StreamError> {
        let endpoint_url = lookup("STREAM_ENDPOINT_URL").unwrap_or_else(|| DEFAULT_ENDPOINT_URL.to_owned());
        let preflight = parse_preflight(&lookup)?;
        let max_retries = parse_max_retries(lookup("STREAM_MAX_RETRIES").as_deref())?;
        let eviction = parse_eviction(lookup("STREAM_EVICTION").as_deref())?;
        let payload_format = parse_payload_format(lookup("STREAM_PAYLOAD_FORMAT").as_deref())?;

        let config = Self {
            endpoint_url: endpoint_url.trim().to_owned(),
            preflight,
            max_retries,
            retry_delay: Duration::from_millis(parse_or(&lookup, "STREAM_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)),
            retry_jitter: Duration::from_millis(parse_or(&lookup, "STREAM_RETRY_JITTER_MS", 0)),
            buffer_capacity: parse_or(&lookup, "STREAM_BUFFER_CAPACITY", DEFAULT_BUFFER_CAPACITY),
            eviction,
            payload_format,
            notify_on_message: parse_or(&lookup, "STREAM_NOTIFY_ON_MESSAGE", false),
            connect_timeout: Duration::from_secs(parse_or(
                &lookup,
                "STREAM_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
        };
        config.validate()?;
        Ok(config)
    }

    /// URL the event stream is opened at.
    ///
    /// With a `Register` pre-flight the registered identity is appended as
    /// `userId`, since the server routes messages by it.
    #[must_use]
    pub fn stream_url(&self) -> String {
        let Preflight::Register { user_id, .. } = &self.preflight else {
            return self.endpoint_url.clone();
        };
        match reqwest::Url::parse(&self.endpoint_url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("userId", user_id);
                url.to_string()
            }
            Err(_) => self.endpoint_url.clone(),
        }
    }

    /// Check invariants the client relies on.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConfigParse`] when the endpoint is not an
    /// absolute `http(s)` URL or the buffer capacity is zero.
    pub fn validate(&self) -> Result<(), StreamError> {
        let url = reqwest::Url::parse(&self.endpoint_url)
            .map_err(|e| StreamError::ConfigParse(format!("invalid endpoint URL '{}': {e}", self.endpoint_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(StreamError::ConfigParse(format!(
                "unsupported endpoint scheme '{}' (expected 'http' or 'https')",
                url.scheme()
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(StreamError::ConfigParse("buffer capacity must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_preflight(lookup: &impl Fn(&str) -> Option<String>) -> Result<Preflight, StreamError> {
    match lookup("STREAM_PREFLIGHT").as_deref().unwrap_or("none") {
        "none" => Ok(Preflight::None),
        "health" => Ok(Preflight::Health {
            path: lookup("STREAM_HEALTH_PATH").unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_owned()),
        }),
        "register" => Ok(Preflight::Register {
            path: lookup("STREAM_REGISTER_PATH").unwrap_or_else(|| DEFAULT_REGISTER_PATH.to_owned()),
            user_id: lookup("STREAM_USER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        }),
        other => Err(StreamError::ConfigParse(format!(
            "unknown STREAM_PREFLIGHT: {other} (expected 'none', 'health' or 'register')"
        ))),
    }
}

fn parse_max_retries(raw: Option<&str>) -> Result<Option<u32>, StreamError> {
    match raw.map(str::trim) {
        None => Ok(Some(DEFAULT_MAX_RETRIES)),
        Some("unbounded") => Ok(None),
        Some(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| StreamError::ConfigParse(format!("invalid STREAM_MAX_RETRIES: {value}"))),
    }
}

fn parse_eviction(raw: Option<&str>) -> Result<EvictionPolicy, StreamError> {
    match raw.unwrap_or("evict_oldest") {
        "evict_oldest" => Ok(EvictionPolicy::EvictOldest),
        "prepend_newest" => Ok(EvictionPolicy::PrependNewest),
        other => Err(StreamError::ConfigParse(format!(
            "unsupported eviction policy '{other}' (expected 'evict_oldest' or 'prepend_newest')"
        ))),
    }
}

fn parse_payload_format(raw: Option<&str>) -> Result<PayloadFormat, StreamError> {
    match raw.unwrap_or("json") {
        "json" => Ok(PayloadFormat::Json),
        "text" => Ok(PayloadFormat::Text),
        other => Err(StreamError::ConfigParse(format!("unknown STREAM_PAYLOAD_FORMAT: {other}"))),
    }
}
