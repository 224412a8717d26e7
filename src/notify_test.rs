use super::*;

#[test]
fn constructors_set_severity() {
    assert_eq!(Notification::success("t", "m").severity, Severity::Success);
    assert_eq!(Notification::info("t", "m").severity, Severity::Info);
    assert_eq!(Notification::error("t", "m").severity, Severity::Error);
}

#[test]
fn channel_sink_forwards_in_order() {
    let (sink, mut rx) = ChannelSink::new();
    sink.notify(Notification::success("Success", "Connected"));
    sink.notify(Notification::info("New Message", "hi"));

    assert_eq!(rx.try_recv().expect("first").title, "Success");
    assert_eq!(rx.try_recv().expect("second").message, "hi");
    assert!(rx.try_recv().is_err());
}

#[test]
fn channel_sink_tolerates_closed_receiver() {
    let (sink, rx) = ChannelSink::new();
    drop(rx);
    sink.notify(Notification::error("Error", "nobody listening"));
}

#[test]
fn severity_serializes_lowercase() {
    let value = serde_json::to_value(Notification::new("t", "m", Severity::Warning)).expect("serialize");
    assert_eq!(value["severity"], "warning");
    assert_eq!(Severity::Warning.to_string(), "warning");
}
