use super::*;
use serde_json::json;

#[test]
fn json_payload_picks_content_as_text() {
    let event = SseEvent::message(r#"{"content":"hello","sender":"ops"}"#);
    let msg = Message::from_event(&event, PayloadFormat::Json, 100).expect("parse");
    assert_eq!(msg.kind, "message");
    assert_eq!(msg.text, "hello");
    assert_eq!(msg.timestamp, 100);
    assert_eq!(msg.metadata.expect("metadata")["sender"], "ops");
}

#[test]
fn payload_type_and_timestamp_override_defaults() {
    let event = SseEvent::named("update", r#"{"type":"alert","text":"disk","timestamp":42}"#);
    let msg = Message::from_event(&event, PayloadFormat::Json, 100).expect("parse");
    assert_eq!(msg.kind, "alert");
    assert_eq!(msg.text, "disk");
    assert_eq!(msg.timestamp, 42);
    assert!(msg.metadata.is_none());
}

#[test]
fn text_key_precedence_is_content_text_message() {
    let msg = Message::from_value("message", json!({ "message": "m", "text": "t" }), 0);
    assert_eq!(msg.text, "t");
    assert_eq!(msg.metadata.expect("metadata")["message"], "m");
}

#[test]
fn object_without_text_field_renders_as_json() {
    let msg = Message::from_value("update", json!({ "count": 3 }), 0);
    assert_eq!(msg.text, r#"{"count":3}"#);
    assert_eq!(msg.metadata.expect("metadata")["count"], 3);
}

#[test]
fn object_without_text_field_keeps_raw_payload() {
    let raw = r#"{"type":"update","timestamp":5,"count":2}"#;
    let msg = Message::from_event(&SseEvent::named("update", raw), PayloadFormat::Json, 0).expect("parse");
    assert_eq!(msg.text, raw);
    assert_eq!(msg.kind, "update");
    assert_eq!(msg.timestamp, 5);
    assert_eq!(msg.metadata.expect("metadata")["count"], 2);
}

#[test]
fn from_json_uses_given_raw_text_as_fallback() {
    let raw = "{ \"count\": 2 }";
    let msg = Message::from_json("update", json!({ "count": 2 }), raw, 0);
    assert_eq!(msg.text, raw);
}

#[test]
fn string_payload_becomes_text() {
    let msg = Message::from_value("poll", json!("event data"), 7);
    assert_eq!(msg.kind, "poll");
    assert_eq!(msg.text, "event data");
    assert_eq!(msg.timestamp, 7);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let event = SseEvent::message("{oops");
    let err = Message::from_event(&event, PayloadFormat::Json, 0).expect_err("malformed");
    assert!(matches!(err, StreamError::Parse(_)));
}

#[test]
fn text_format_accepts_non_json_verbatim() {
    let event = SseEvent::message("plain notification");
    let msg = Message::from_event(&event, PayloadFormat::Text, 5).expect("text");
    assert_eq!(msg.text, "plain notification");
    assert_eq!(msg.kind, "message");
}

#[test]
fn active_client_count_reads_known_keys() {
    assert_eq!(active_client_count(&json!({ "activeClients": 4 })), Some(4));
    assert_eq!(active_client_count(&json!({ "clientCount": 2 })), Some(2));
    assert_eq!(active_client_count(&json!({ "activeClients": "many" })), None);
    assert_eq!(active_client_count(&json!([1, 2])), None);
}

#[test]
fn message_serializes_kind_as_type() {
    let msg = Message::from_value("update", json!({ "content": "x" }), 1);
    let value = serde_json::to_value(&msg).expect("serialize");
    assert_eq!(value["type"], "update");
    assert!(value.get("metadata").is_none());
}
