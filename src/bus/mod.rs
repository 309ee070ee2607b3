//! Publish/subscribe transport contract between the gateway and the
//! hydroponic controller.
//!
//! The core only talks to [`BusTransport`]; [`mqtt::MqttBus`] is the
//! production implementation.

pub mod mqtt;

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tokio::sync::oneshot;

/// One inbound message as seen by subscription handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Transport packet id. Opaque to handlers; only used for diagnostics.
    pub message_id: u16,
}

/// Subscription callback. Runs on the transport's dispatch context, so it
/// must decode and log only.
pub type MessageHandler = Arc<dyn Fn(&BusMessage) + Send + Sync>;

/// A publish could not be handed to the transport.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus transport is not connected")]
    NotConnected,

    #[error("bus transport rejected the request: {0}")]
    Rejected(String),
}

/// A publish was handed over but the broker never confirmed it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection lost before the broker acknowledged the message")]
    ConnectionLost,

    #[error("transport dropped the delivery without an outcome")]
    Abandoned,

    #[error("no broker acknowledgement within {0:?}")]
    TimedOut(std::time::Duration),
}

/// Handle to the broker-level outcome of one publish.
#[derive(Debug)]
pub struct Delivery {
    rx: oneshot::Receiver<Result<(), DeliveryError>>,
}

/// Transport-side half of a [`Delivery`].
#[derive(Debug)]
pub struct DeliveryNotifier {
    tx: oneshot::Sender<Result<(), DeliveryError>>,
}

impl Delivery {
    /// A delivery whose outcome will be reported through the returned notifier.
    pub fn pending() -> (DeliveryNotifier, Delivery) {
        let (tx, rx) = oneshot::channel();
        (DeliveryNotifier { tx }, Delivery { rx })
    }

    /// A delivery that is already settled.
    pub fn settled(outcome: Result<(), DeliveryError>) -> Self {
        let (notifier, delivery) = Self::pending();
        notifier.resolve(outcome);
        delivery
    }

    /// Wait for the broker's verdict. A notifier dropped without resolving
    /// counts as [`DeliveryError::Abandoned`].
    pub async fn outcome(self) -> Result<(), DeliveryError> {
        self.rx.await.unwrap_or(Err(DeliveryError::Abandoned))
    }

    /// Like [`Delivery::outcome`], giving up after `limit`.
    pub async fn outcome_within(self, limit: std::time::Duration) -> Result<(), DeliveryError> {
        tokio::time::timeout(limit, self.outcome())
            .await
            .unwrap_or(Err(DeliveryError::TimedOut(limit)))
    }
}

impl DeliveryNotifier {
    pub fn resolve(self, outcome: Result<(), DeliveryError>) {
        // Receiver gone means nobody is watching this delivery any more.
        let _ = self.tx.send(outcome);
    }
}

/// Connected publish/subscribe client.
pub trait BusTransport: Send + Sync {
    /// Submit `payload` on `topic` at-least-once. Never waits for the broker.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery, BusError>;

    /// Register `handler` for every message arriving on `topic`.
    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError>;
}

/// Topic → handlers registry shared by transport implementations.
#[derive(Clone, Default)]
pub struct Subscriptions {
    inner: Arc<RwLock<HashMap<String, Vec<MessageHandler>>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, topic: &str, handler: MessageHandler) {
        self.inner
            .write()
            .entry(topic.to_owned())
            .or_default()
            .push(handler);
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Run every handler registered for `message.topic`; returns how many ran.
    ///
    /// Handlers are cloned out first so none of them runs under the lock.
    pub fn dispatch(&self, message: &BusMessage) -> usize {
        let handlers = self
            .inner
            .read()
            .get(&message.topic)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// In-memory transport: records publishes and lets tests inject messages.
    pub struct RecordingBus {
        connected: AtomicBool,
        fail_deliveries: AtomicBool,
        hold_deliveries: AtomicBool,
        held: Mutex<Vec<DeliveryNotifier>>,
        next_id: AtomicU16,
        published: Mutex<Vec<(String, Vec<u8>)>>,
        acked: Mutex<Vec<u16>>,
        subscriptions: Subscriptions,
    }

    impl Default for RecordingBus {
        fn default() -> Self {
            Self {
                connected: AtomicBool::new(true),
                fail_deliveries: AtomicBool::new(false),
                hold_deliveries: AtomicBool::new(false),
                held: Mutex::new(Vec::new()),
                next_id: AtomicU16::new(1),
                published: Mutex::new(Vec::new()),
                acked: Mutex::new(Vec::new()),
                subscriptions: Subscriptions::new(),
            }
        }
    }

    impl RecordingBus {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }

        pub fn fail_deliveries(&self, fail: bool) {
            self.fail_deliveries.store(fail, Ordering::SeqCst);
        }

        /// Leave later deliveries unanswered, as if the broker never acked.
        pub fn hold_deliveries(&self, hold: bool) {
            self.hold_deliveries.store(hold, Ordering::SeqCst);
        }

        pub fn held_count(&self) -> usize {
            self.held.lock().len()
        }

        pub fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.published.lock().clone()
        }

        pub fn acked(&self) -> Vec<u16> {
            self.acked.lock().clone()
        }

        pub fn subscribed_topics(&self) -> Vec<String> {
            let mut topics = self.subscriptions.topics();
            topics.sort();
            topics
        }

        /// Deliver a message the way the dispatch loop does: handlers, then one ack.
        pub fn deliver(&self, topic: &str, payload: &[u8]) -> u16 {
            let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let message = BusMessage {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
                message_id,
            };
            self.subscriptions.dispatch(&message);
            self.acked.lock().push(message_id);
            message_id
        }
    }

    impl BusTransport for RecordingBus {
        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery, BusError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(BusError::NotConnected);
            }
            self.published.lock().push((topic.to_owned(), payload));
            if self.hold_deliveries.load(Ordering::SeqCst) {
                let (notifier, delivery) = Delivery::pending();
                self.held.lock().push(notifier);
                return Ok(delivery);
            }
            if self.fail_deliveries.load(Ordering::SeqCst) {
                Ok(Delivery::settled(Err(DeliveryError::ConnectionLost)))
            } else {
                Ok(Delivery::settled(Ok(())))
            }
        }

        fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError> {
            self.subscriptions.add(topic, handler);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn message(topic: &str) -> BusMessage {
        BusMessage {
            topic: topic.to_owned(),
            payload: b"{}".to_vec(),
            message_id: 7,
        }
    }

    #[tokio::test]
    async fn settled_delivery_reports_outcome() {
        assert_eq!(Delivery::settled(Ok(())).outcome().await, Ok(()));
        assert_eq!(
            Delivery::settled(Err(DeliveryError::ConnectionLost)).outcome().await,
            Err(DeliveryError::ConnectionLost)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_delivery_times_out() {
        let (_notifier, delivery) = Delivery::pending();
        let limit = std::time::Duration::from_secs(30);
        assert_eq!(
            delivery.outcome_within(limit).await,
            Err(DeliveryError::TimedOut(limit))
        );
    }

    #[tokio::test]
    async fn dropped_notifier_means_abandoned() {
        let (notifier, delivery) = Delivery::pending();
        drop(notifier);
        assert_eq!(delivery.outcome().await, Err(DeliveryError::Abandoned));
    }

    #[test]
    fn dispatch_runs_only_matching_handlers() {
        let subs = Subscriptions::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        subs.add("a", Arc::new(move |_: &BusMessage| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let h = hits.clone();
        subs.add("a", Arc::new(move |_: &BusMessage| {
            h.fetch_add(10, Ordering::SeqCst);
        }));
        subs.add("b", Arc::new(|_: &BusMessage| panic!("wrong topic")));

        assert_eq!(subs.dispatch(&message("a")), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 11);
        assert_eq!(subs.dispatch(&message("c")), 0);
    }

    #[test]
    fn handler_may_subscribe_while_dispatching() {
        let subs = Subscriptions::new();
        let inner = subs.clone();
        subs.add("a", Arc::new(move |_: &BusMessage| inner.add("b", Arc::new(|_: &BusMessage| {}))));

        subs.dispatch(&message("a"));
        assert!(subs.topics().contains(&"b".to_owned()));
    }
}
