use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    BusError, BusMessage, BusTransport, Delivery, DeliveryError, DeliveryNotifier, MessageHandler,
    Subscriptions,
};

/// Pause between event-loop polls after a connection error. rumqttc
/// reconnects on the next poll.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the rumqttc request channel.
const REQUEST_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Username and password, when the broker URL carries them.
    pub credentials: Option<(String, String)>,
}

/// rumqttc-backed [`BusTransport`].
///
/// Owns a dispatcher task that drives the event loop, runs subscription
/// handlers, acks every inbound publish and matches PUBACKs to pending
/// deliveries.
pub struct MqttBus {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    inflight: Arc<Mutex<Inflight>>,
    subscriptions: Subscriptions,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Create the client and spawn its dispatcher. The broker connection is
    /// established asynchronously; until the first CONNACK, publishes fail
    /// with [`BusError::NotConnected`].
    pub fn connect(settings: &MqttSettings) -> Arc<Self> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_manual_acks(true);
        if let Some((username, password)) = &settings.credentials {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let inflight = Arc::new(Mutex::new(Inflight::default()));
        let subscriptions = Subscriptions::new();

        let dispatcher = Dispatcher {
            client: client.clone(),
            eventloop,
            connected: connected.clone(),
            inflight: inflight.clone(),
            subscriptions: subscriptions.clone(),
        };
        info!(host = %settings.host, port = settings.port, client_id = %settings.client_id, "Starting MQTT client");
        let handle = tokio::spawn(dispatcher.run());

        Arc::new(Self {
            client,
            connected,
            inflight,
            subscriptions,
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Disconnect from the broker and stop the dispatcher.
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "Failed to send MQTT disconnect");
        }
        let handle = self.dispatcher.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle).await.is_err() {
                warn!("MQTT dispatcher did not stop in time, aborting it");
                handle.abort();
            }
        }
        self.connected.store(false, Ordering::Release);
        self.inflight.lock().fail_all(DeliveryError::ConnectionLost);
        info!("MQTT client stopped");
    }
}

impl BusTransport for MqttBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery, BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        let (notifier, delivery) = Delivery::pending();

        // Held across the submit so queue order matches request-channel order.
        let mut inflight = self.inflight.lock();
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| BusError::Rejected(e.to_string()))?;
        inflight.queued.push_back(notifier);

        Ok(delivery)
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError> {
        self.subscriptions.add(topic, handler);
        // Otherwise the next CONNACK subscribes it.
        if self.is_connected() {
            self.client
                .try_subscribe(topic, QoS::AtLeastOnce)
                .map_err(|e| BusError::Rejected(e.to_string()))?;
        }
        debug!(topic = %topic, "Subscription registered");
        Ok(())
    }
}

struct Dispatcher {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    inflight: Arc<Mutex<Inflight>>,
    subscriptions: Subscriptions,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        self.on_connected();
                    } else {
                        error!(code = ?ack.code, "MQTT broker refused connection");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => self.on_publish(publish),
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    self.inflight.lock().acknowledge(ack.pkid);
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.inflight.lock().assign(pkid);
                }
                Ok(Event::Outgoing(Outgoing::AwaitAck(pkid))) => {
                    self.inflight.lock().await_ack(pkid);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.connected.store(false, Ordering::Release);
                    info!("MQTT disconnect sent, dispatcher exiting");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::Release);
                    error!(error = %e, "MQTT connection error. Reconnecting...");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
        self.inflight.lock().fail_all(DeliveryError::ConnectionLost);
    }

    fn on_connected(&self) {
        info!("Connected to MQTT broker");
        self.connected.store(true, Ordering::Release);
        for topic in self.subscriptions.topics() {
            if let Err(e) = self.client.try_subscribe(&topic, QoS::AtLeastOnce) {
                error!(topic = %topic, error = %e, "Failed to subscribe");
            }
        }
    }

    fn on_publish(&self, publish: Publish) {
        let message = BusMessage {
            topic: publish.topic.clone(),
            payload: publish.payload.to_vec(),
            message_id: publish.pkid,
        };
        if self.subscriptions.dispatch(&message) == 0 {
            debug!(topic = %message.topic, "Received message with no handler");
        }
        // Exactly one ack per message, whatever the handlers made of it.
        if let Err(e) = self.client.try_ack(&publish) {
            warn!(topic = %message.topic, message_id = message.message_id, error = %e, "Failed to ack message");
        }
    }
}

/// Deliveries awaiting a PUBACK.
///
/// `queued` holds notifiers in submission order until the event loop reports
/// the packet id it assigned; `by_pkid` holds them until the broker acks.
///
/// When the next packet id is still unacked, rumqttc holds the new publish
/// (`AwaitAck`) and releases it right after that id's PUBACK, emitting the
/// release before the PUBACK event itself. `held` remembers such ids and
/// `stale_acks` swallows the PUBACK that trails the release.
#[derive(Default)]
struct Inflight {
    queued: VecDeque<DeliveryNotifier>,
    by_pkid: HashMap<u16, DeliveryNotifier>,
    held: HashSet<u16>,
    stale_acks: HashSet<u16>,
}

impl Inflight {
    fn await_ack(&mut self, pkid: u16) {
        debug!(pkid, "Publish held until packet id is acked");
        self.held.insert(pkid);
    }

    fn assign(&mut self, pkid: u16) {
        // pkid 0 is QoS 0.
        if pkid == 0 {
            return;
        }
        if self.by_pkid.contains_key(&pkid) {
            if !self.held.remove(&pkid) {
                // Retransmission after reconnect.
                return;
            }
            // The held publish only goes out once the previous owner of
            // this id was acked.
            if let Some(previous) = self.by_pkid.remove(&pkid) {
                previous.resolve(Ok(()));
            }
            self.stale_acks.insert(pkid);
        }
        match self.queued.pop_front() {
            Some(notifier) => {
                self.by_pkid.insert(pkid, notifier);
            }
            None => debug!(pkid, "Outgoing publish without a tracked delivery"),
        }
    }

    fn acknowledge(&mut self, pkid: u16) {
        if self.stale_acks.remove(&pkid) {
            return;
        }
        match self.by_pkid.remove(&pkid) {
            Some(notifier) => notifier.resolve(Ok(())),
            None => debug!(pkid, "PUBACK for untracked packet"),
        }
    }

    fn fail_all(&mut self, error: DeliveryError) {
        for notifier in self.queued.drain(..) {
            notifier.resolve(Err(error.clone()));
        }
        for (_, notifier) in self.by_pkid.drain() {
            notifier.resolve(Err(error.clone()));
        }
        self.held.clear();
        self.stale_acks.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queued.len() + self.by_pkid.len()
    }
}
