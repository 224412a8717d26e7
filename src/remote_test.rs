use std::collections::VecDeque;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::notify::{ChannelSink, Severity};

struct MockRemote {
    replies: Mutex<VecDeque<Result<Value, RemoteCallError>>>,
    calls: Mutex<Vec<Value>>,
}

impl MockRemote {
    fn new(replies: Vec<Result<Value, RemoteCallError>>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into()), calls: Mutex::new(Vec::new()) })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }
}

#[async_trait::async_trait]
impl RemoteCall for MockRemote {
    async fn call(&self, params: &Value) -> Result<Value, RemoteCallError> {
        self.calls.lock().expect("lock").push(params.clone());
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "content": "tick" })))
    }
}

fn poller(
    remote: Arc<MockRemote>,
    config: PollerConfig,
) -> (Poller, mpsc::UnboundedReceiver<Notification>) {
    let (sink, notes) = ChannelSink::new();
    (Poller::new(remote, config, Arc::new(sink)), notes)
}

// =============================================================================
// decode_body
// =============================================================================

#[test]
fn decode_body_parses_json_object() {
    assert_eq!(decode_body("{\"a\":1}"), json!({ "a": 1 }));
}

#[test]
fn decode_body_unwraps_json_encoded_string() {
    assert_eq!(decode_body("\"{\\\"a\\\":1}\""), json!({ "a": 1 }));
}

#[test]
fn decode_body_keeps_plain_string_payloads() {
    assert_eq!(decode_body("\"hello\""), json!("hello"));
    assert_eq!(decode_body("not json"), json!("not json"));
}

// =============================================================================
// poller
// =============================================================================

#[tokio::test]
async fn poll_once_appends_result() {
    let remote = MockRemote::new(vec![Ok(json!({ "content": "first", "source": "apex" }))]);
    let (poller, _notes) = poller(Arc::clone(&remote), PollerConfig::default());
    let messages = poller.messages();

    poller.poll_once().await.expect("poll");
    let snapshot = messages.borrow().clone();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].text, "first");
    assert_eq!(snapshot[0].kind, "poll");
    assert_eq!(snapshot[0].id, 1);
}

#[tokio::test]
async fn poll_once_sends_configured_params() {
    let remote = MockRemote::new(Vec::new());
    let config = PollerConfig { params: json!({ "channel": "alerts" }), ..PollerConfig::default() };
    let (poller, _notes) = poller(Arc::clone(&remote), config);
    poller.poll_once().await.expect("poll");
    assert_eq!(remote.calls.lock().expect("lock")[0], json!({ "channel": "alerts" }));
}

#[tokio::test]
async fn poll_failure_notifies_and_keeps_buffer() {
    let remote = MockRemote::new(vec![Err(RemoteCallError::new("Apex exploded"))]);
    let (poller, mut notes) = poller(remote, PollerConfig::default());

    let err = poller.poll_once().await.expect_err("should fail");
    assert_eq!(err.message, "Apex exploded");
    assert!(poller.messages().borrow().is_empty());

    let note = notes.recv().await.expect("notification");
    assert_eq!(note.title, "Error fetching event data");
    assert_eq!(note.message, "Apex exploded");
    assert_eq!(note.severity, Severity::Error);
}

#[tokio::test]
async fn poller_respects_capacity() {
    let remote = MockRemote::new(Vec::new());
    let config = PollerConfig { buffer_capacity: 2, ..PollerConfig::default() };
    let (poller, _notes) = poller(remote, config);
    for _ in 0..3 {
        poller.poll_once().await.expect("poll");
    }
    let ids: Vec<u64> = poller.messages().borrow().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![2, 3]);
}

#[tokio::test]
async fn start_polls_on_interval_until_stopped() {
    let remote = MockRemote::new(Vec::new());
    let config = PollerConfig { interval: Duration::from_millis(20), ..PollerConfig::default() };
    let (mut poller, _notes) = poller(Arc::clone(&remote), config);
    let mut messages = poller.messages();

    poller.start();
    poller.start();
    assert!(poller.is_running());

    timeout(Duration::from_secs(5), messages.wait_for(|m| m.len() >= 2))
        .await
        .expect("polled in time")
        .expect("sender alive");

    poller.stop();
    poller.stop();
    assert!(!poller.is_running());
    let after_stop = remote.call_count();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(remote.call_count(), after_stop);
}

#[tokio::test]
async fn first_poll_waits_one_interval() {
    let remote = MockRemote::new(Vec::new());
    let config = PollerConfig { interval: Duration::from_secs(60), ..PollerConfig::default() };
    let (mut poller, _notes) = poller(Arc::clone(&remote), config);
    poller.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.call_count(), 0);
}

#[tokio::test]
async fn failures_do_not_stop_schedule() {
    let remote = MockRemote::new(vec![Err(RemoteCallError::new("down"))]);
    let config = PollerConfig { interval: Duration::from_millis(20), ..PollerConfig::default() };
    let (mut poller, mut notes) = poller(Arc::clone(&remote), config);
    let mut messages = poller.messages();
    poller.start();

    let note = timeout(Duration::from_secs(5), notes.recv())
        .await
        .expect("notified in time")
        .expect("notification");
    assert_eq!(note.severity, Severity::Error);
    timeout(Duration::from_secs(5), messages.wait_for(|m| !m.is_empty()))
        .await
        .expect("recovered in time")
        .expect("sender alive");
    assert!(poller.is_running());
}
