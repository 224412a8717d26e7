use super::*;
use serde_json::json;

#[test]
fn remote_error_prefers_message_field() {
    let err = RemoteCallError::from_response(400, &json!({ "message": "bad id", "error": "x" }));
    assert_eq!(err.message, "bad id");
    assert_eq!(err.status, Some(400));
}

#[test]
fn remote_error_reads_nested_body_message() {
    let err = RemoteCallError::from_response(500, &json!({ "body": { "message": "Apex failure" } }));
    assert_eq!(err.message, "Apex failure");
}

#[test]
fn remote_error_falls_back_to_status() {
    let err = RemoteCallError::from_response(503, &json!("unavailable"));
    assert_eq!(err.message, "HTTP 503");
    assert_eq!(err.to_string(), "HTTP 503");
}

#[test]
fn stream_error_wraps_remote_error_transparently() {
    let err = StreamError::from(RemoteCallError::new("boom"));
    assert_eq!(err.to_string(), "boom");
}

#[test]
fn parse_error_converts_from_codec_error() {
    let codec = wire::SseEvent::message("{").json().expect_err("malformed");
    let err = StreamError::from(codec);
    assert!(matches!(err, StreamError::Parse(_)));
}
