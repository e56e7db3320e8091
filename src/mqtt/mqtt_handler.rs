//! Broker connection.
//!
//! [`MqttHandler`] owns the rumqttc client and event loop until [`MqttHandler::connect`] spawns
//! the driver task. From then on everything goes through the clonable [`MqttHandle`]:
//! publishing, status snapshots and shutdown.
//!
//! The driver is the only reader of the event loop. It resubscribes the full topic set on every
//! connection acknowledgment, forwards inbound publishes to the dispatcher queue, matches
//! `PubAck`s to waiting publishers, and on any connection error marks the state `Offline`,
//! waits `reconnect_interval` and polls again. Unacknowledged publishes are replayed by the
//! client after the reconnect and their callers keep waiting for that acknowledgment.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::error::{TransportError, TransportResult};
use super::message_manager::InboundMessage;
use super::topics::subscription_set;

const MAX_ERROR_MESSAGES: usize = 20;
const MIN_KEEP_ALIVE_SECS: u64 = 5;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Lost after a successful connect; the reconnect loop is running.
    Offline,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    /// Oldest first, capped at the last 20.
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl MqttStatus {
    fn push_error(&mut self, message: String) {
        self.error_messages.push(message);
        if self.error_messages.len() > MAX_ERROR_MESSAGES {
            let overflow = self.error_messages.len() - MAX_ERROR_MESSAGES;
            self.error_messages.drain(..overflow);
        }
    }
}

/// Publishing seam. The command publisher only needs this, which lets tests swap in a
/// recording transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes `payload` at QoS 1 and resolves once the broker acknowledged it.
    async fn publish(&self, topic: &str, payload: String) -> TransportResult<()>;

    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckOutcome {
    Acked,
    Lost,
}

type AckSender = oneshot::Sender<AckOutcome>;

/// Waiters for broker acknowledgments.
///
/// `queued` holds publishers in the order their requests entered the client; the event loop
/// emits `Outgoing::Publish(pkid)` in that same order, which is when a waiter moves to
/// `in_flight` under its packet id.
///
/// A lost connection leaves both sides alone. The event loop replays in-flight publishes under
/// their old packet ids first, then the requests that were still queued, in order. A replayed
/// id already in `in_flight` keeps its waiter, so the queue stays aligned with the requests.
#[derive(Default)]
struct AckTracker {
    queued: VecDeque<AckSender>,
    in_flight: HashMap<u16, AckSender>,
}

impl AckTracker {
    fn assign(&mut self, pkid: u16) {
        if self.in_flight.contains_key(&pkid) {
            debug!(pkid, "Publish replayed");
            return;
        }
        if let Some(waiter) = self.queued.pop_front() {
            self.in_flight.insert(pkid, waiter);
        }
    }

    fn resolve(&mut self, pkid: u16) {
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            let _ = waiter.send(AckOutcome::Acked);
        }
    }

    fn fail_all(&mut self) {
        for waiter in self.queued.drain(..).chain(self.in_flight.drain().map(|(_, w)| w)) {
            let _ = waiter.send(AckOutcome::Lost);
        }
    }
}

struct Shared {
    client: AsyncClient,
    config: MqttConfig,
    status: RwLock<MqttStatus>,
    state_tx: watch::Sender<ConnectionState>,
    publish_lock: Mutex<()>,
    acks: Mutex<AckTracker>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Shared {
    async fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        self.status.write().await.connection_state = state;
    }

    async fn record_error(&self, message: String) {
        self.status.write().await.push_error(message);
    }
}

pub struct MqttHandler {
    shared: Arc<Shared>,
    eventloop: EventLoop,
    inbound: mpsc::Sender<InboundMessage>,
}

impl MqttHandler {
    /// Builds the client without touching the network.
    pub fn new(config: MqttConfig, inbound: mpsc::Sender<InboundMessage>) -> TransportResult<Self> {
        let (host, port) = config.broker_address()?;
        let mut mqtt_options = MqttOptions::new(config.client_id.clone(), host, port);
        mqtt_options
            .set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS)))
            .set_clean_session(config.clean_session);
        if let Some(username) = &config.username {
            mqtt_options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, config.request_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Arc::new(Shared {
            client,
            config,
            status: RwLock::new(MqttStatus::default()),
            state_tx,
            publish_lock: Mutex::new(()),
            acks: Mutex::new(AckTracker::default()),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        Ok(MqttHandler {
            shared,
            eventloop,
            inbound,
        })
    }

    /// A handle usable before the connection is up. Publishing through it fails with
    /// `NotConnected` until the first acknowledgment.
    pub fn handle(&self) -> MqttHandle {
        MqttHandle {
            shared: self.shared.clone(),
        }
    }

    /// Starts the driver and waits for the first connection acknowledgment.
    ///
    /// Failed attempts inside the guard window are retried on the reconnect interval. When the
    /// guard fires first the driver is stopped and `ConnectionTimeout` is returned.
    pub async fn connect(self) -> TransportResult<MqttHandle> {
        let MqttHandler {
            shared,
            eventloop,
            inbound,
        } = self;
        let guard = shared.config.connect_guard();
        info!(
            broker = %shared.config.broker_url,
            client_id = %shared.config.client_id,
            "Connecting to MQTT broker"
        );

        shared.set_state(ConnectionState::Connecting).await;
        let (ready_tx, ready_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(shared.clone(), eventloop, inbound, ready_tx));
        *shared.driver.lock().await = Some(driver);

        let handle = MqttHandle { shared };
        match timeout(guard, ready_rx).await {
            Ok(Ok(())) => {
                info!("MQTT connected");
                Ok(handle)
            }
            Ok(Err(_)) | Err(_) => {
                let guard_ms = guard.as_millis() as u64;
                error!(timeout_ms = guard_ms, "MQTT connection timeout");
                handle.shutdown().await;
                Err(TransportError::ConnectionTimeout(guard_ms))
            }
        }
    }
}

async fn drive(
    shared: Arc<Shared>,
    mut eventloop: EventLoop,
    inbound: mpsc::Sender<InboundMessage>,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    let connect_timeout = shared.config.connect_timeout();
    let reconnect_interval = shared.config.reconnect_interval();

    loop {
        let connected = *shared.state_tx.borrow() == ConnectionState::Connected;
        let polled = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            polled = async {
                if connected {
                    eventloop.poll().await.map_err(|e| e.to_string())
                } else {
                    match timeout(connect_timeout, eventloop.poll()).await {
                        Ok(result) => result.map_err(|e| e.to_string()),
                        Err(_) => Err(format!(
                            "connection attempt timed out after {} ms",
                            connect_timeout.as_millis()
                        )),
                    }
                }
            } => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(session_present = ack.session_present, "MQTT connection acknowledged");
                shared.set_state(ConnectionState::Connected).await;
                subscribe_all(&shared).await;
                if let Some(ready) = ready.take() {
                    let _ = ready.send(());
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                {
                    let mut status = shared.status.write().await;
                    status.messages_received += 1;
                    status.last_activity = Some(Local::now());
                }
                let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                if inbound.send(message).await.is_err() {
                    warn!("Inbound dispatcher is gone, dropping message");
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                shared.acks.lock().await.resolve(ack.pkid);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker sent disconnect");
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                shared.acks.lock().await.assign(pkid);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if connected {
                    warn!(error = %e, "MQTT connection lost, reconnecting");
                    shared.set_state(ConnectionState::Offline).await;
                } else {
                    warn!(error = %e, "MQTT connection attempt failed");
                }
                shared.record_error(e).await;

                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_interval) => {
                        debug!("MQTT reconnecting");
                    }
                }
            }
        }
    }

    shared.acks.lock().await.fail_all();
    debug!("MQTT driver stopped");
}

/// Sends the whole subscription set as one request. The driver is the only reader of the
/// request channel, so this must fit in a single slot whatever `request_capacity` is.
async fn subscribe_all(shared: &Shared) {
    let topics = subscription_set();
    let count = topics.len();
    let filters = topics
        .into_iter()
        .map(|topic| SubscribeFilter::new(topic, QoS::AtLeastOnce));

    if let Err(e) = shared.client.try_subscribe_many(filters) {
        let err = TransportError::Subscribe {
            topic: format!("{} topics", count),
            reason: e.to_string(),
        };
        error!(error = %err, "Subscribe error");
        shared.record_error(err.to_string()).await;
    } else {
        debug!(count, "Subscribed to topic set");
    }
}

/// Clonable access to a (possibly not yet) connected broker session.
#[derive(Clone)]
pub struct MqttHandle {
    shared: Arc<Shared>,
}

impl MqttHandle {
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub async fn status(&self) -> MqttStatus {
        self.shared.status.read().await.clone()
    }

    /// Closes the session. Safe to call more than once; later calls are no-ops.
    pub async fn disconnect(&self) -> TransportResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Disconnecting from MQTT broker");

        let result = if self.is_connected() {
            self.shared
                .client
                .try_disconnect()
                .map_err(|e| TransportError::PublishRejected(e.to_string()))
        } else {
            Ok(())
        };

        let driver = self.shared.driver.lock().await.take();
        if let Some(mut driver) = driver {
            if timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
                self.shared.cancel.cancel();
                let _ = driver.await;
            }
        }
        self.shared.cancel.cancel();
        self.shared.acks.lock().await.fail_all();
        self.shared.set_state(ConnectionState::Disconnected).await;
        info!("MQTT disconnected");
        result
    }

    async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.cancel.cancel();
        let driver = self.shared.driver.lock().await.take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        self.shared.set_state(ConnectionState::Disconnected).await;
    }
}

#[async_trait]
impl Transport for MqttHandle {
    async fn publish(&self, topic: &str, payload: String) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let _ordered = self.shared.publish_lock.lock().await;
            self.shared.acks.lock().await.queued.push_back(ack_tx);
            if let Err(e) = self
                .shared
                .client
                .publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())
                .await
            {
                self.shared.acks.lock().await.queued.pop_back();
                let err = TransportError::PublishRejected(e.to_string());
                self.shared.record_error(err.to_string()).await;
                return Err(err);
            }
        }

        let ack_timeout = self.shared.config.publish_ack_timeout();
        match timeout(ack_timeout, ack_rx).await {
            Ok(Ok(AckOutcome::Acked)) => {
                let mut status = self.shared.status.write().await;
                status.messages_sent += 1;
                status.last_activity = Some(Local::now());
                Ok(())
            }
            Ok(Ok(AckOutcome::Lost)) | Ok(Err(_)) => {
                Err(TransportError::AckLost(topic.to_string()))
            }
            Err(_) => Err(TransportError::AckTimeout {
                topic: topic.to_string(),
                timeout_ms: ack_timeout.as_millis() as u64,
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const WAIT: Duration = Duration::from_secs(5);
    const TOPIC: &str = "20211214/cmd/DEV1/setConfig";

    fn config(broker_url: &str) -> MqttConfig {
        MqttConfig {
            broker_url: broker_url.to_string(),
            connect_timeout_ms: 200,
            reconnect_interval_ms: 50,
            connect_guard_ms: 300,
            ..MqttConfig::default()
        }
    }

    #[tokio::test]
    async fn publish_before_connect_is_rejected_without_queueing() {
        let (tx, _rx) = mpsc::channel(8);
        let handler = MqttHandler::new(config("mqtt://127.0.0.1:1883"), tx).unwrap();
        let handle = handler.handle();

        let err = handle
            .publish("20211214/cmd/DEV1/setConfig", "{}".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::NotConnected));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(handle.status().await.messages_sent, 0);
        assert!(handle.shared.acks.lock().await.queued.is_empty());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (tx, _rx) = mpsc::channel(8);
        let handle = MqttHandler::new(config("localhost"), tx).unwrap().handle();

        handle.disconnect().await.unwrap();
        handle.disconnect().await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_guard_fires_when_broker_is_unreachable() {
        let (tx, _rx) = mpsc::channel(8);
        let handler = MqttHandler::new(config("mqtt://127.0.0.1:1"), tx).unwrap();

        let err = match handler.connect().await {
            Ok(_) => panic!("connected to a closed port"),
            Err(e) => e,
        };
        assert!(matches!(err, TransportError::ConnectionTimeout(300)));
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let (tx, _rx) = mpsc::channel(8);
        assert!(matches!(
            MqttHandler::new(config("ws://broker:80"), tx),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn error_history_is_bounded() {
        let mut status = MqttStatus::default();
        for i in 0..30 {
            status.push_error(format!("e{}", i));
        }
        assert_eq!(status.error_messages.len(), MAX_ERROR_MESSAGES);
        assert_eq!(status.error_messages[0], "e10");
    }

    #[test]
    fn ack_tracker_pairs_in_order_and_fails_leftovers() {
        let mut tracker = AckTracker::default();
        let (a_tx, mut a_rx) = oneshot::channel();
        let (b_tx, mut b_rx) = oneshot::channel();
        tracker.queued.push_back(a_tx);
        tracker.queued.push_back(b_tx);

        tracker.assign(7);
        tracker.resolve(7);
        tracker.fail_all();

        assert_eq!(a_rx.try_recv().unwrap(), AckOutcome::Acked);
        assert_eq!(b_rx.try_recv().unwrap(), AckOutcome::Lost);
    }

    #[test]
    fn replayed_publish_keeps_its_own_waiter() {
        let mut tracker = AckTracker::default();
        let (old_tx, mut old_rx) = oneshot::channel();
        let (stuck_tx, mut stuck_rx) = oneshot::channel();
        tracker.queued.push_back(old_tx);
        tracker.queued.push_back(stuck_tx);
        tracker.assign(1);

        // Connection drops here; a new publish queues up behind the stuck one.
        let (new_tx, mut new_rx) = oneshot::channel();
        tracker.queued.push_back(new_tx);

        // Replay order: in-flight id 1 again, then the stuck request under a fresh id.
        tracker.assign(1);
        tracker.assign(2);
        tracker.resolve(1);
        assert_eq!(old_rx.try_recv().unwrap(), AckOutcome::Acked);
        assert_eq!(new_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty));

        tracker.resolve(2);
        assert_eq!(stuck_rx.try_recv().unwrap(), AckOutcome::Acked);
        assert_eq!(new_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty));

        tracker.assign(3);
        tracker.resolve(3);
        assert_eq!(new_rx.try_recv().unwrap(), AckOutcome::Acked);
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum BrokerEvent {
        Connected,
        Subscribed(Vec<String>),
        Published(String),
    }

    /// Loopback MQTT 3.1.1 broker that speaks just enough of the protocol for the client.
    struct FakeBroker {
        addr: SocketAddr,
        events: mpsc::UnboundedReceiver<BrokerEvent>,
        /// One message drops the live session; the next lets the client back in.
        step: mpsc::UnboundedSender<()>,
        ack_publishes: Arc<AtomicBool>,
    }

    impl FakeBroker {
        async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (event_tx, events) = mpsc::unbounded_channel();
            let (step, mut step_rx) = mpsc::unbounded_channel::<()>();
            let ack_publishes = Arc::new(AtomicBool::new(true));
            let acks = ack_publishes.clone();

            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let dropped = tokio::select! {
                        _ = serve(&mut stream, &event_tx, &acks) => false,
                        step = step_rx.recv() => step.is_some(),
                    };
                    drop(stream);
                    if dropped && step_rx.recv().await.is_none() {
                        return;
                    }
                }
            });

            FakeBroker {
                addr,
                events,
                step,
                ack_publishes,
            }
        }

        fn config(&self) -> MqttConfig {
            MqttConfig {
                broker_url: format!("mqtt://{}", self.addr),
                connect_timeout_ms: 2_000,
                reconnect_interval_ms: 50,
                connect_guard_ms: 5_000,
                publish_ack_timeout_ms: 5_000,
                ..MqttConfig::default()
            }
        }

        async fn next_matching(&mut self, wanted: impl Fn(&BrokerEvent) -> bool) -> BrokerEvent {
            loop {
                let event = timeout(WAIT, self.events.recv())
                    .await
                    .expect("broker went quiet")
                    .expect("broker stopped");
                if wanted(&event) {
                    return event;
                }
            }
        }

        async fn next_subscription(&mut self) -> Vec<String> {
            match self
                .next_matching(|e| matches!(e, BrokerEvent::Subscribed(_)))
                .await
            {
                BrokerEvent::Subscribed(filters) => filters,
                other => panic!("unexpected {:?}", other),
            }
        }

        async fn next_publish(&mut self) -> String {
            match self
                .next_matching(|e| matches!(e, BrokerEvent::Published(_)))
                .await
            {
                BrokerEvent::Published(topic) => topic,
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    fn put_remaining_length(buf: &mut Vec<u8>, mut len: usize) {
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            buf.push(byte);
            if len == 0 {
                break;
            }
        }
    }

    fn utf8_at(body: &[u8], at: usize) -> (String, usize) {
        let len = usize::from(u16::from_be_bytes([body[at], body[at + 1]]));
        let text = String::from_utf8_lossy(&body[at + 2..at + 2 + len]).into_owned();
        (text, at + 2 + len)
    }

    async fn serve(
        stream: &mut TcpStream,
        events: &mpsc::UnboundedSender<BrokerEvent>,
        ack_publishes: &AtomicBool,
    ) -> std::io::Result<()> {
        loop {
            let (header, body) = read_packet(stream).await?;
            match header >> 4 {
                // CONNECT
                1 => {
                    stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await?;
                    let _ = events.send(BrokerEvent::Connected);
                }
                // PUBLISH
                3 => {
                    let (topic, at) = utf8_at(&body, 0);
                    if header & 0x06 != 0 && ack_publishes.load(Ordering::SeqCst) {
                        stream.write_all(&[0x40, 0x02, body[at], body[at + 1]]).await?;
                    }
                    let _ = events.send(BrokerEvent::Published(topic));
                }
                // SUBSCRIBE
                8 => {
                    let mut filters = Vec::new();
                    let mut at = 2;
                    while at < body.len() {
                        let (filter, next) = utf8_at(&body, at);
                        filters.push(filter);
                        at = next + 1;
                    }
                    let mut suback = vec![0x90];
                    put_remaining_length(&mut suback, 2 + filters.len());
                    suback.extend_from_slice(&body[..2]);
                    suback.extend(std::iter::repeat(0x01).take(filters.len()));
                    stream.write_all(&suback).await?;
                    let _ = events.send(BrokerEvent::Subscribed(filters));
                }
                // PINGREQ
                12 => stream.write_all(&[0xD0, 0x00]).await?,
                _ => {}
            }
        }
    }

    async fn wait_for_state(states: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
        timeout(WAIT, states.wait_for(|state| *state == want))
            .await
            .expect("state never reached")
            .unwrap();
    }

    #[tokio::test]
    async fn full_topic_set_is_resubscribed_with_a_small_request_channel() {
        let mut broker = FakeBroker::start().await;
        let (tx, _rx) = mpsc::channel(8);
        let config = MqttConfig {
            request_capacity: 8,
            ..broker.config()
        };
        let handle = MqttHandler::new(config, tx).unwrap().connect().await.unwrap();

        let expected = subscription_set();
        assert!(expected.len() > 8);
        assert_eq!(broker.next_subscription().await, expected);

        broker.step.send(()).unwrap();
        broker.step.send(()).unwrap();
        assert_eq!(broker.next_subscription().await, expected);
        assert!(handle
            .status()
            .await
            .error_messages
            .iter()
            .all(|e| !e.starts_with("Subscribe")));

        handle.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_session_goes_offline_and_comes_back() {
        let mut broker = FakeBroker::start().await;
        let (tx, _rx) = mpsc::channel(8);
        let handle = MqttHandler::new(broker.config(), tx)
            .unwrap()
            .connect()
            .await
            .unwrap();
        assert_eq!(handle.state(), ConnectionState::Connected);
        assert_eq!(broker.next_subscription().await, subscription_set());
        let mut states = handle.watch_state();

        broker.step.send(()).unwrap();
        wait_for_state(&mut states, ConnectionState::Offline).await;
        let err = handle.publish(TOPIC, "{}".to_string()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(!handle.status().await.error_messages.is_empty());

        broker.step.send(()).unwrap();
        wait_for_state(&mut states, ConnectionState::Connected).await;
        assert_eq!(broker.next_subscription().await, subscription_set());

        handle.publish(TOPIC, "{}".to_string()).await.unwrap();
        assert_eq!(broker.next_publish().await, TOPIC);
        assert_eq!(handle.status().await.messages_sent, 1);

        handle.disconnect().await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn unacked_publish_resolves_on_the_replay_after_reconnect() {
        let mut broker = FakeBroker::start().await;
        let (tx, _rx) = mpsc::channel(8);
        let handle = MqttHandler::new(broker.config(), tx)
            .unwrap()
            .connect()
            .await
            .unwrap();
        let mut states = handle.watch_state();

        broker.ack_publishes.store(false, Ordering::SeqCst);
        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.publish(TOPIC, "{\"n\":1}".to_string()).await }
        });
        assert_eq!(broker.next_publish().await, TOPIC);

        broker.step.send(()).unwrap();
        wait_for_state(&mut states, ConnectionState::Offline).await;
        broker.ack_publishes.store(true, Ordering::SeqCst);
        broker.step.send(()).unwrap();
        wait_for_state(&mut states, ConnectionState::Connected).await;

        assert_eq!(broker.next_publish().await, TOPIC);
        timeout(WAIT, pending).await.unwrap().unwrap().unwrap();

        handle.publish(TOPIC, "{\"n\":2}".to_string()).await.unwrap();
        assert_eq!(handle.status().await.messages_sent, 2);

        handle.disconnect().await.unwrap();
    }
}
