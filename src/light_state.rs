use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    bus::{BusMessage, MessageHandler},
    diagnostics::{DecodeError, DiagnosticEvent, DiagnosticKind, DiagnosticSink},
};

/// Light-state report as published by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightReport {
    #[serde(rename = "isUp")]
    pub is_up: bool,
}

/// Last light state the controller reported.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared between the bus
/// dispatcher (writer) and request handlers (readers). A best-effort mirror:
/// `false` until the first report arrives.
#[derive(Clone, Default)]
pub struct LightStateCache {
    inner: Arc<AtomicBool>,
}

impl LightStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    pub fn set(&self, is_up: bool) {
        self.inner.store(is_up, Ordering::Release);
    }

    /// Decode one report and apply it. On failure the cached value is left
    /// untouched.
    pub fn apply(&self, payload: &[u8]) -> Result<bool, DecodeError> {
        let report: LightReport = serde_json::from_slice(payload)?;
        self.set(report.is_up);
        Ok(report.is_up)
    }
}

/// Subscription handler for the light-state topic.
pub fn light_state_handler(cache: LightStateCache, sink: Arc<dyn DiagnosticSink>) -> MessageHandler {
    Arc::new(move |message: &BusMessage| match cache.apply(&message.payload) {
        Ok(is_up) => debug!(is_up, message_id = message.message_id, "Light state updated"),
        Err(e) => sink.emit(
            DiagnosticEvent::new(
                DiagnosticKind::DecodeFailure,
                message.topic.as_str(),
                message.payload.as_slice(),
                format!("can not decode light state: {e}"),
            )
            .with_message_id(message.message_id),
        ),
    })
}
