use std::fmt;

use tracing::{error, warn};

/// What kind of anomaly a [`DiagnosticEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A bus payload or store row could not be decoded.
    DecodeFailure,
    /// The device reported an error on one of its error topics.
    DeviceError,
    /// A publish was accepted by the transport but never confirmed.
    DeliveryFailure,
    /// A store row carried a field name nobody asked for.
    UnknownField,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::DecodeFailure => "decode_failure",
            DiagnosticKind::DeviceError => "device_error",
            DiagnosticKind::DeliveryFailure => "delivery_failure",
            DiagnosticKind::UnknownField => "unknown_field",
        };
        f.write_str(s)
    }
}

/// A single message or row that could not be turned into its typed form.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("field {field} expects a {expected} value, got {found}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("row has no usable {0} column")]
    MissingColumn(&'static str),
}

/// Structured record of something an operator should see but the caller
/// never will.
///
/// `source` is the bus topic for message-borne events and the measurement
/// (or field) name for time-series rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEvent {
    pub kind: DiagnosticKind,
    pub source: String,
    pub raw_payload: Vec<u8>,
    pub error_message: String,
    /// Bus packet id, when the event came off the bus.
    pub message_id: Option<u16>,
}

impl DiagnosticEvent {
    pub fn new(
        kind: DiagnosticKind,
        source: impl Into<String>,
        raw_payload: impl Into<Vec<u8>>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            raw_payload: raw_payload.into(),
            error_message: error_message.into(),
            message_id: None,
        }
    }

    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Payload rendered for log output; invalid UTF-8 is replaced, not dropped.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.raw_payload).into_owned()
    }
}

/// Fire-and-forget consumer of diagnostic events.
///
/// Implementations must not block: sinks are called from the bus dispatch
/// context and from detached delivery observers.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

/// Renders every event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: DiagnosticEvent) {
        let payload = event.payload_lossy();
        match event.kind {
            DiagnosticKind::UnknownField => warn!(
                kind = %event.kind,
                source = %event.source,
                payload = %payload,
                message_id = ?event.message_id,
                error = %event.error_message,
                "Diagnostic event"
            ),
            _ => error!(
                kind = %event.kind,
                source = %event.source,
                payload = %payload,
                message_id = ?event.message_id,
                error = %event.error_message,
                "Diagnostic event"
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Sink that keeps every event for later inspection.
    #[derive(Default)]
    pub struct CollectingSink {
        events: Mutex<Vec<DiagnosticEvent>>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<DiagnosticEvent> {
            self.events.lock().clone()
        }

        pub fn count(&self, kind: DiagnosticKind) -> usize {
            self.events.lock().iter().filter(|e| e.kind == kind).count()
        }
    }

    impl DiagnosticSink for CollectingSink {
        fn emit(&self, event: DiagnosticEvent) {
            self.events.lock().push(event);
        }
    }
}
