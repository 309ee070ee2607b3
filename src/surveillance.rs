//! Turns device error reports into diagnostic events.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::{
    bus::{BusError, BusMessage, BusTransport, MessageHandler},
    diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticSink},
};

/// Error envelope published by the controller.
#[derive(Debug, Deserialize)]
pub struct ErrorReport {
    pub err: String,
}

/// Subscribe an error handler on every topic in `topics`.
pub fn install(
    bus: &dyn BusTransport,
    topics: &[String],
    sink: Arc<dyn DiagnosticSink>,
) -> Result<(), BusError> {
    let handler = error_report_handler(sink);
    for topic in topics {
        bus.subscribe(topic, handler.clone())?;
    }
    info!(topics = ?topics, "Error surveillance installed");
    Ok(())
}

pub fn error_report_handler(sink: Arc<dyn DiagnosticSink>) -> MessageHandler {
    Arc::new(move |message: &BusMessage| sink.emit(inspect(message)))
}

/// Exactly one event per message: the device's own error text when the
/// envelope decodes, a decode-failure marker otherwise.
fn inspect(message: &BusMessage) -> DiagnosticEvent {
    let (kind, error_message) = match serde_json::from_slice::<ErrorReport>(&message.payload) {
        Ok(report) => (DiagnosticKind::DeviceError, report.err),
        Err(e) => (
            DiagnosticKind::DecodeFailure,
            format!("can not decode error report: {e}"),
        ),
    };
    DiagnosticEvent::new(kind, message.topic.as_str(), message.payload.as_slice(), error_message)
        .with_message_id(message.message_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bus::testing::RecordingBus, diagnostics::testing::CollectingSink};

    fn setup(topics: &[&str]) -> (Arc<RecordingBus>, Arc<CollectingSink>) {
        let bus = RecordingBus::new();
        let sink = Arc::new(CollectingSink::new());
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        install(bus.as_ref(), &topics, sink.clone()).unwrap();
        (bus, sink)
    }

    #[test]
    fn subscribes_every_configured_topic() {
        let (bus, _) = setup(&["hydroponic/error", "hydroponic/pump/error"]);
        assert_eq!(
            bus.subscribed_topics(),
            vec!["hydroponic/error".to_owned(), "hydroponic/pump/error".to_owned()]
        );
    }

    #[test]
    fn device_error_carries_decoded_message() {
        let (bus, sink) = setup(&["hydroponic/error"]);
        let id = bus.deliver("hydroponic/error", br#"{"err":"pump jammed"}"#);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DiagnosticKind::DeviceError);
        assert_eq!(events[0].error_message, "pump jammed");
        assert_eq!(events[0].source, "hydroponic/error");
        assert_eq!(events[0].message_id, Some(id));
    }

    #[test]
    fn malformed_payload_yields_one_event_and_does_not_block_next() {
        let (bus, sink) = setup(&["hydroponic/error", "hydroponic/pump/error"]);

        let bad = bus.deliver("hydroponic/pump/error", b"not json");
        let good = bus.deliver("hydroponic/error", br#"{"err":"low water"}"#);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, DiagnosticKind::DecodeFailure);
        assert_eq!(events[0].raw_payload, b"not json".to_vec());
        assert!(events[0].error_message.contains("can not decode"));
        assert_eq!(events[1].kind, DiagnosticKind::DeviceError);

        // Both messages were acknowledged exactly once.
        assert_eq!(bus.acked(), vec![bad, good]);
    }

    #[test]
    fn unsurveilled_topic_is_ignored() {
        let (bus, sink) = setup(&["hydroponic/error"]);
        bus.deliver("hydroponic/other", br#"{"err":"x"}"#);
        assert!(sink.events().is_empty());
    }
}
