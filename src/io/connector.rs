//! Stream ingest connector
//!
//! Owns the broker link and drives it through
//! `Disconnected -> Connecting -> Subscribed -> Receiving | ReconnectBackoff`.
//! Messages are routed by topic, normalized and forwarded to the engine with
//! `try_send` so a slow engine never stalls the MQTT event loop.
//!
//! When the link stays down longer than the fallback grace period the
//! fallback generator is switched on through a `watch` flag; it is switched
//! off again on the next ConnAck, before any live record is forwarded.

use crate::domain::error::IngestError;
use crate::domain::types::{epoch_ms, Inbound};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::payload::Normalizer;
use crate::io::topics::TopicRouter;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
    ReconnectBackoff,
}

impl ConnectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorState::Disconnected => "disconnected",
            ConnectorState::Connecting => "connecting",
            ConnectorState::Subscribed => "subscribed",
            ConnectorState::Receiving => "receiving",
            ConnectorState::ReconnectBackoff => "reconnect_backoff",
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectorState::Subscribed | ConnectorState::Receiving)
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectorState::Disconnected => 0,
            ConnectorState::Connecting => 1,
            ConnectorState::Subscribed => 2,
            ConnectorState::Receiving => 3,
            ConnectorState::ReconnectBackoff => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectorState::Connecting,
            2 => ConnectorState::Subscribed,
            3 => ConnectorState::Receiving,
            4 => ConnectorState::ReconnectBackoff,
            _ => ConnectorState::Disconnected,
        }
    }
}

/// Shared, lock-free view of the connector for queries and health checks
pub struct ConnectorStatus {
    state: AtomicU8,
    fallback_active: AtomicBool,
    reconnect_attempts: AtomicU64,
    /// Epoch ms of the last live message, 0 = never
    last_live_ms: AtomicU64,
}

impl ConnectorStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectorState::Disconnected.to_u8()),
            fallback_active: AtomicBool::new(false),
            reconnect_attempts: AtomicU64::new(0),
            last_live_ms: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectorState {
        ConnectorState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectorState) {
        let previous = ConnectorState::from_u8(self.state.swap(state.to_u8(), Ordering::AcqRel));
        if previous != state {
            debug!(from = previous.as_str(), to = state.as_str(), "connector_state");
        }
    }

    pub fn is_fallback_active(&self) -> bool {
        self.fallback_active.load(Ordering::Acquire)
    }

    pub fn set_fallback_active(&self, active: bool) {
        self.fallback_active.store(active, Ordering::Release);
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_live_message(&self, ts_ms: u64) {
        self.last_live_ms.store(ts_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectorSnapshot {
        let state = self.state();
        let last = self.last_live_ms.load(Ordering::Relaxed);
        ConnectorSnapshot {
            state,
            connected: state.is_connected(),
            fallback_active: self.is_fallback_active(),
            reconnect_attempts: self.reconnect_attempts(),
            last_live_message_ms: (last > 0).then_some(last),
        }
    }
}

impl Default for ConnectorStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorSnapshot {
    pub state: ConnectorState,
    pub connected: bool,
    pub fallback_active: bool,
    pub reconnect_attempts: u64,
    pub last_live_message_ms: Option<u64>,
}

/// What a broker session reports on each poll
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Broker accepted the connection (ConnAck)
    Connected,
    /// Broker acknowledged a subscription
    Subscribed,
    Message { topic: String, payload: Bytes },
    /// Anything else (pings, outgoing packets)
    Idle,
}

/// Broker link. After an error the next `poll` starts a reconnect.
#[async_trait]
pub trait BrokerSession: Send {
    /// Request subscriptions; acknowledged later as `BrokerEvent::Subscribed`
    async fn subscribe(&mut self, filters: &[String]) -> Result<(), IngestError>;

    async fn poll(&mut self) -> Result<BrokerEvent, IngestError>;
}

/// rumqttc-backed session
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttSession {
    pub fn new(config: &Config) -> Self {
        let suffix = Uuid::now_v7().simple().to_string();
        // Low-order uuid v7 characters are random; high-order ones are the clock
        let client_id = format!("{}-{}", config.mqtt_client_id(), &suffix[suffix.len() - 8..]);

        let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        options.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs().max(5)));
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 100);
        Self { client, eventloop }
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn subscribe(&mut self, filters: &[String]) -> Result<(), IngestError> {
        for filter in filters {
            // try_subscribe: the request queue is drained by poll(), which we are not in
            self.client
                .try_subscribe(filter.as_str(), QoS::AtMostOnce)
                .map_err(|e| IngestError::BrokerUnavailable(format!("subscribe {}: {}", filter, e)))?;
        }
        Ok(())
    }

    async fn poll(&mut self) -> Result<BrokerEvent, IngestError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => Ok(BrokerEvent::Connected),
            Ok(Event::Incoming(Packet::SubAck(_))) => Ok(BrokerEvent::Subscribed),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                Ok(BrokerEvent::Message { topic: publish.topic, payload: publish.payload })
            }
            Ok(_) => Ok(BrokerEvent::Idle),
            Err(e) => Err(IngestError::BrokerUnavailable(e.to_string())),
        }
    }
}

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        let max = max.max(initial);
        Self { initial, max, current: initial }
    }

    /// Delay to wait now; doubles the next one up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectorSettings {
    pub connect_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub fallback_grace: Duration,
    pub fallback_enabled: bool,
}

impl ConnectorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms().max(1)),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms()),
            backoff_max: Duration::from_millis(config.backoff_max_ms()),
            fallback_grace: Duration::from_millis(config.fallback_grace_ms()),
            fallback_enabled: config.fallback_enabled(),
        }
    }
}

pub struct Connector<S> {
    session: S,
    router: TopicRouter,
    normalizer: Normalizer,
    settings: ConnectorSettings,
    status: Arc<ConnectorStatus>,
    metrics: Arc<Metrics>,
    ingest_tx: mpsc::Sender<Inbound>,
    fallback_tx: watch::Sender<bool>,
    /// When the link was last seen going down (None while connected)
    down_since: Option<Instant>,
    last_drop_warn: std::time::Instant,
    last_malformed_warn: std::time::Instant,
}

impl<S: BrokerSession> Connector<S> {
    pub fn new(
        session: S,
        config: &Config,
        status: Arc<ConnectorStatus>,
        metrics: Arc<Metrics>,
        ingest_tx: mpsc::Sender<Inbound>,
        fallback_tx: watch::Sender<bool>,
    ) -> Self {
        let now = std::time::Instant::now();
        let stale = now.checked_sub(Duration::from_secs(2)).unwrap_or(now);
        Self {
            session,
            router: TopicRouter::from_config(config),
            normalizer: Normalizer::from_config(config),
            settings: ConnectorSettings::from_config(config),
            status,
            metrics,
            ingest_tx,
            fallback_tx,
            down_since: None,
            last_drop_warn: stale,
            last_malformed_warn: stale,
        }
    }

    /// Run until shutdown or until the engine's channel closes
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.settings.backoff_initial, self.settings.backoff_max);
        self.down_since = Some(Instant::now());
        self.status.set_state(ConnectorState::Connecting);
        info!(filters = ?self.router.filters(), "connector_started");

        loop {
            let connected = self.status.state().is_connected();
            let polled = tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                polled = self.poll_once(connected) => polled,
            };

            match polled {
                Ok(BrokerEvent::Connected) => {
                    if let Err(e) = self.on_connected(&mut backoff).await {
                        warn!(error = %e, "mqtt_subscribe_failed");
                        if !self.wait_backoff(&mut backoff, &mut shutdown).await {
                            break;
                        }
                    }
                }
                Ok(BrokerEvent::Subscribed) => {
                    if self.status.state() != ConnectorState::Receiving {
                        self.status.set_state(ConnectorState::Subscribed);
                    }
                }
                Ok(BrokerEvent::Message { topic, payload }) => {
                    if !self.status.state().is_connected() {
                        // Sessions can deliver before a SubAck arrives
                        self.status.set_state(ConnectorState::Subscribed);
                    }
                    self.status.set_state(ConnectorState::Receiving);
                    if !self.handle_message(&topic, &payload) {
                        break;
                    }
                }
                Ok(BrokerEvent::Idle) => {}
                Err(e) => {
                    warn!(error = %e, attempts = self.status.reconnect_attempts(), "mqtt_connection_error");
                    if !self.wait_backoff(&mut backoff, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.status.set_state(ConnectorState::Disconnected);
        info!("connector_shutdown");
    }

    /// One poll; connect attempts are bounded by the connect timeout
    async fn poll_once(&mut self, connected: bool) -> Result<BrokerEvent, IngestError> {
        if connected {
            return self.session.poll().await;
        }
        match tokio::time::timeout(self.settings.connect_timeout, self.session.poll()).await {
            Ok(res) => res,
            Err(_) => Err(IngestError::BrokerUnavailable(format!(
                "no response within {}ms",
                self.settings.connect_timeout.as_millis()
            ))),
        }
    }

    async fn on_connected(&mut self, backoff: &mut Backoff) -> Result<(), IngestError> {
        backoff.reset();
        self.down_since = None;
        if self.status.is_fallback_active() {
            self.set_fallback(false);
        }

        let filters = self.router.filters();
        self.session.subscribe(&filters).await?;
        self.status.set_state(ConnectorState::Subscribed);
        info!(filters = ?filters, "mqtt_subscribed");
        Ok(())
    }

    /// Route, normalize and forward one message. Returns false if the engine is gone.
    fn handle_message(&mut self, topic: &str, payload: &[u8]) -> bool {
        self.metrics.record_message_received();

        let Some(kind) = self.router.route(topic) else {
            self.metrics.record_malformed();
            debug!(topic = %topic, "mqtt_unrouted_topic");
            return true;
        };

        let record = match self.normalizer.decode(kind, topic, payload) {
            Ok(record) => record,
            Err(e) => {
                self.metrics.record_malformed();
                // Rate-limit malformed warnings to 1 per second
                if self.last_malformed_warn.elapsed() > Duration::from_secs(1) {
                    warn!(error = %e, stream = kind.as_str(), "payload_malformed");
                    self.last_malformed_warn = std::time::Instant::now();
                }
                return true;
            }
        };

        self.status.record_live_message(epoch_ms());
        match self.ingest_tx.try_send(Inbound::live(record)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.record_ingest_dropped();
                // Rate-limit drop warnings to 1 per second
                if self.last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!(stream = kind.as_str(), "ingest_record_dropped: channel full");
                    self.last_drop_warn = std::time::Instant::now();
                }
                true
            }
            Err(TrySendError::Closed(_)) => {
                warn!("ingest channel closed");
                false
            }
        }
    }

    /// Sleep out one backoff step, switching the fallback on if the grace
    /// period runs out meanwhile. Returns false on shutdown.
    async fn wait_backoff(&mut self, backoff: &mut Backoff, shutdown: &mut watch::Receiver<bool>) -> bool {
        let down_since = *self.down_since.get_or_insert_with(Instant::now);
        self.status.set_state(ConnectorState::ReconnectBackoff);
        self.status.record_reconnect_attempt();

        let delay = backoff.next_delay();
        let deadline = Instant::now() + delay;
        let grace_deadline = down_since + self.settings.fallback_grace;
        debug!(delay_ms = delay.as_millis() as u64, "mqtt_reconnect_backoff");

        loop {
            let fallback_pending = self.settings.fallback_enabled && !self.status.is_fallback_active();
            if fallback_pending && Instant::now() >= grace_deadline {
                self.set_fallback(true);
                continue;
            }
            if Instant::now() >= deadline {
                break;
            }
            let wake = if fallback_pending { deadline.min(grace_deadline) } else { deadline };
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }

        self.status.set_state(ConnectorState::Connecting);
        true
    }

    fn set_fallback(&self, active: bool) {
        self.status.set_fallback_active(active);
        // send_replace works with no receivers (fallback disabled)
        self.fallback_tx.send_replace(active);
        if active {
            info!(grace_ms = self.settings.fallback_grace.as_millis() as u64, "fallback_activated");
        } else {
            info!("fallback_deactivated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Provenance, Record};
    use std::collections::HashMap;

    /// Session that replays queued events, then waits
    struct QueuedSession {
        events: mpsc::UnboundedReceiver<Result<BrokerEvent, IngestError>>,
    }

    #[async_trait]
    impl BrokerSession for QueuedSession {
        async fn subscribe(&mut self, _filters: &[String]) -> Result<(), IngestError> {
            Ok(())
        }

        async fn poll(&mut self) -> Result<BrokerEvent, IngestError> {
            match self.events.recv().await {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_collar_message_forwarded_with_rfid() {
        let mut rfid = HashMap::new();
        rfid.insert("sensor1".to_string(), "E3882528".to_string());
        let config = Config::default().with_connector_timing(50, 20, 40, 150).with_sensor_rfid(rfid);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ingest_tx, mut ingest_rx) = mpsc::channel(8);
        let (fallback_tx, _fallback_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status = Arc::new(ConnectorStatus::new());
        let metrics = Arc::new(Metrics::new());

        let connector = Connector::new(
            QueuedSession { events: events_rx },
            &config,
            status.clone(),
            metrics.clone(),
            ingest_tx,
            fallback_tx,
        );
        let task = tokio::spawn(connector.run(shutdown_rx));

        events_tx.send(Ok(BrokerEvent::Connected)).unwrap();
        events_tx
            .send(Ok(BrokerEvent::Message {
                topic: "farm/sensor1".to_string(),
                payload: Bytes::from_static(br#"{"timestamp": 1767607200, "acc_x": 120, "temperature": 38.5}"#),
            }))
            .unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(1), ingest_rx.recv()).await.unwrap().unwrap();
        assert_eq!(inbound.provenance, Provenance::Live);
        let Record::Sensor(reading) = inbound.record else { panic!("expected sensor record") };
        assert_eq!(reading.cattle_id, "E3882528");
        assert_eq!(reading.timestamp, 1_767_607_200_000);
        assert_eq!(status.state(), ConnectorState::Receiving);
        assert_eq!(metrics.messages_received(), 1);

        // Link drops: short backoff, then a reconnect attempt is counted
        events_tx.send(Err(IngestError::BrokerUnavailable("reset".to_string()))).unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);
        while status.reconnect_attempts() == 0 {
            assert!(Instant::now() < deadline, "no reconnect attempt");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_max_below_initial() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_status_snapshot() {
        let status = ConnectorStatus::new();
        assert_eq!(status.state(), ConnectorState::Disconnected);
        assert_eq!(status.snapshot().last_live_message_ms, None);

        status.set_state(ConnectorState::Receiving);
        status.record_reconnect_attempt();
        status.record_live_message(1234);
        status.set_fallback_active(true);

        let snap = status.snapshot();
        assert!(snap.connected);
        assert!(snap.fallback_active);
        assert_eq!(snap.reconnect_attempts, 1);
        assert_eq!(snap.last_live_message_ms, Some(1234));
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            ConnectorState::Disconnected,
            ConnectorState::Connecting,
            ConnectorState::Subscribed,
            ConnectorState::Receiving,
            ConnectorState::ReconnectBackoff,
        ] {
            assert_eq!(ConnectorState::from_u8(state.to_u8()), state);
        }
    }
}
