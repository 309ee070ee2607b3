use std::{sync::Arc, time::Duration};

use tracing::{debug, info};

use super::intent::{Intent, LIGHT_STATE_TOPIC};
use crate::{
    bus::{BusError, BusTransport, Delivery},
    diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticSink},
    light_state::{light_state_handler, LightStateCache},
    surveillance,
};

/// How long a detached observer waits for the broker's PUBACK.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("can not encode {intent} command")]
    Encode {
        intent: Intent,
        #[source]
        source: serde_json::Error,
    },

    #[error("can not submit {intent} command")]
    Submission {
        intent: Intent,
        #[source]
        source: BusError,
    },
}

/// Turns controller intents into bus publishes and owns the light-state
/// mirror.
///
/// Cheap to clone; clones share the transport, cache and sink.
#[derive(Clone)]
pub struct DeviceBridge {
    bus: Arc<dyn BusTransport>,
    light: LightStateCache,
    sink: Arc<dyn DiagnosticSink>,
    ack_timeout: Duration,
}

impl DeviceBridge {
    pub fn new(bus: Arc<dyn BusTransport>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            bus,
            light: LightStateCache::new(),
            sink,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// Subscribe the light-state handler and error surveillance.
    pub fn install(&self, error_topics: &[String]) -> Result<(), BusError> {
        self.bus.subscribe(
            LIGHT_STATE_TOPIC,
            light_state_handler(self.light.clone(), self.sink.clone()),
        )?;
        surveillance::install(self.bus.as_ref(), error_topics, self.sink.clone())
    }

    /// Publish `intent` and return as soon as the transport accepted it.
    ///
    /// Broker-level delivery is watched by a detached task that only reports
    /// to the diagnostic sink. No deduplication: every call publishes.
    pub fn send(&self, intent: Intent) -> Result<(), BridgeError> {
        let payload = intent
            .payload()
            .map_err(|source| BridgeError::Encode { intent, source })?;
        let topic = intent.topic();

        let delivery = self
            .bus
            .publish(topic, payload.clone())
            .map_err(|source| BridgeError::Submission { intent, source })?;
        info!(intent = %intent, topic = %topic, "Command submitted");

        tokio::spawn(observe_delivery(
            intent,
            delivery,
            payload,
            self.sink.clone(),
            self.ack_timeout,
        ));
        Ok(())
    }

    pub fn send_up_ph(&self) -> Result<(), BridgeError> {
        self.send(Intent::PhUp)
    }

    pub fn send_down_ph(&self) -> Result<(), BridgeError> {
        self.send(Intent::PhDown)
    }

    pub fn toggle_light(&self) -> Result<(), BridgeError> {
        self.send(Intent::ToggleLight)
    }

    pub fn add_soil(&self) -> Result<(), BridgeError> {
        self.send(Intent::AddSoil)
    }

    pub fn add_water(&self) -> Result<(), BridgeError> {
        self.send(Intent::AddWater)
    }

    /// Last reported light state, `false` if none arrived yet.
    pub fn light_state(&self) -> bool {
        self.light.get()
    }
}

async fn observe_delivery(
    intent: Intent,
    delivery: Delivery,
    payload: Vec<u8>,
    sink: Arc<dyn DiagnosticSink>,
    ack_timeout: Duration,
) {
    match delivery.outcome_within(ack_timeout).await {
        Ok(()) => debug!(intent = %intent, "Command delivered"),
        Err(e) => sink.emit(DiagnosticEvent::new(
            DiagnosticKind::DeliveryFailure,
            intent.topic(),
            payload,
            format!("can not send {intent} command: {e}"),
        )),
    }
}
