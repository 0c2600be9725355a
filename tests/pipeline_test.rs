//! End-to-end pipeline tests with a scripted broker session
//!
//! Connector -> ingest channel -> engine -> fan-out, with the fallback
//! generator attached the way the gateway binary wires it.

use async_trait::async_trait;
use bytes::Bytes;
use cattlenet::domain::error::IngestError;
use cattlenet::infra::{Config, Metrics};
use cattlenet::io::connector::{BrokerEvent, BrokerSession, Connector, ConnectorState, ConnectorStatus};
use cattlenet::io::fanout::UpdatePayload;
use cattlenet::services::{Engine, FallbackGenerator};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const T0: u64 = 1_767_607_200_000;

type Script = mpsc::UnboundedSender<Result<BrokerEvent, IngestError>>;

/// Broker session fed from a channel; pends when the script is empty
struct ScriptedSession {
    events: mpsc::UnboundedReceiver<Result<BrokerEvent, IngestError>>,
    subscribed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl BrokerSession for ScriptedSession {
    async fn subscribe(&mut self, filters: &[String]) -> Result<(), IngestError> {
        self.subscribed.lock().extend_from_slice(filters);
        Ok(())
    }

    async fn poll(&mut self) -> Result<BrokerEvent, IngestError> {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

struct Harness {
    engine: Arc<Engine>,
    status: Arc<ConnectorStatus>,
    script: Script,
    subscribed: Arc<Mutex<Vec<String>>>,
    shutdown: watch::Sender<bool>,
    connector: JoinHandle<()>,
}

fn start(config: Config) -> Harness {
    let metrics = Arc::new(Metrics::new());
    let status = Arc::new(ConnectorStatus::new());
    let engine = Arc::new(Engine::new(&config, status.clone(), metrics.clone()));

    let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_channel_capacity());
    let (fallback_tx, fallback_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (script_tx, script_rx) = mpsc::unbounded_channel();
    let subscribed = Arc::new(Mutex::new(Vec::new()));

    let generator = FallbackGenerator::from_config(&config);
    tokio::spawn(generator.run(ingest_tx.clone(), fallback_rx, shutdown_rx.clone(), metrics.clone()));

    let session = ScriptedSession { events: script_rx, subscribed: subscribed.clone() };
    let connector = Connector::new(session, &config, status.clone(), metrics, ingest_tx, fallback_tx);
    let connector = tokio::spawn(connector.run(shutdown_rx.clone()));

    tokio::spawn(engine.clone().run(ingest_rx, shutdown_rx));

    Harness { engine, status, script: script_tx, subscribed, shutdown: shutdown_tx, connector }
}

/// Short connector timings; `extra` is appended as further TOML tables
fn config(fallback_enabled: bool, extra: &str) -> Config {
    let toml = format!(
        r#"
[connector]
connect_timeout_ms = 50
backoff_initial_ms = 20
backoff_max_ms = 40
fallback_grace_ms = 150

[fallback]
enabled = {}
interval_ms = 20
seed = 7

{}
"#,
        fallback_enabled, extra
    );
    Config::from_toml_str(&toml, "pipeline_test").unwrap()
}

fn message(topic: &str, payload: &str) -> Result<BrokerEvent, IngestError> {
    Ok(BrokerEvent::Message { topic: topic.to_string(), payload: Bytes::from(payload.to_string()) })
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_fallback_activates_after_grace_and_stops_on_reconnect() {
    let h = start(config(true, ""));

    // No broker: connect attempts time out until the grace period runs out
    wait_until("fallback activation", || h.status.is_fallback_active()).await;
    assert!(h.status.reconnect_attempts() >= 1);
    wait_until("synthetic records", || h.engine.metrics().synthetic_total() > 0).await;

    let mut sub = h.engine.subscribe();

    h.script.send(Ok(BrokerEvent::Connected)).unwrap();
    wait_until("fallback deactivation", || !h.status.is_fallback_active()).await;
    assert_eq!(h.subscribed.lock().len(), 5, "two collar filters plus environment, gate and feed");

    h.script
        .send(message(
            "farm/gate",
            r#"{"rfidTag": "E3882528", "weight": 452.5, "direction": "in", "timestamp": "2026-01-05T10:00:00Z"}"#,
        ))
        .unwrap();
    wait_until("live gate record", || h.engine.cattle("E3882528").is_some()).await;
    assert_eq!(h.status.state(), ConnectorState::Receiving);

    // Synthetic updates already queued may arrive first; the live one must follow
    let live = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let update = sub.recv().await.unwrap();
            if let UpdatePayload::GateUpdate { event, record } = &update.payload {
                if event.rfid_tag == "E3882528" {
                    return (update.is_synthetic(), record.total_entries);
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(live, (false, 1));

    let synthetic_after_reconnect = h.engine.metrics().synthetic_total();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        h.engine.metrics().synthetic_total() <= synthetic_after_reconnect + 4,
        "at most one in-flight batch after deactivation"
    );

    h.shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), h.connector).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_fallback_disabled_stays_silent() {
    let h = start(config(false, ""));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!h.status.is_fallback_active());
    assert!(h.status.reconnect_attempts() >= 1);
    assert_eq!(h.engine.metrics().records_total(), 0);

    h.shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), h.connector).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_never_draining_subscriber_does_not_block_ingest() {
    let h = start(config(true, "[fanout]\nsubscriber_queue = 8"));
    let mut stalled = h.engine.subscribe();

    h.script.send(Ok(BrokerEvent::Connected)).unwrap();
    for i in 0..500u64 {
        let payload = format!(
            r#"{{"timestamp": {}, "acc_x": 120, "acc_y": 15, "acc_z": 20, "gyro_x": 1.5, "gyro_y": 1.2, "gyro_z": 0.8, "temperature": 38.5}}"#,
            T0 + i
        );
        h.script.send(message("farm/sensors/COW001", &payload)).unwrap();
    }

    wait_until("all readings ingested", || h.engine.metrics().records_total() >= 500).await;
    assert_eq!(h.engine.metrics().ingest_dropped(), 0);
    assert_eq!(h.engine.recent_sensor(1, None)[0].reading.timestamp, T0 + 499);

    let mut seen = Vec::new();
    while let Some(update) = stalled.try_recv() {
        if let UpdatePayload::SensorUpdate { reading, .. } = update.payload {
            seen.push(reading.timestamp);
        }
    }
    assert_eq!(seen, (492..500).map(|i| T0 + i).collect::<Vec<_>>());
    assert_eq!(stalled.dropped(), 492);

    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_malformed_and_unrouted_messages_skipped() {
    let h = start(config(true, ""));

    h.script.send(Ok(BrokerEvent::Connected)).unwrap();
    h.script.send(message("farm/gate", "{not json")).unwrap();
    h.script.send(message("farm/gate", r#"{"weight": 400, "timestamp": 1767607200}"#)).unwrap();
    h.script.send(message("barn/unknown", r#"{"timestamp": 1767607200}"#)).unwrap();
    h.script
        .send(message(
            "farm/environment",
            r#"{"ldrValue": 720, "dht11_temp": 24.5, "dht11_humidity": 61, "cattlePresence": "Cattle detected", "timestamp": "2026-01-05 10:00:00"}"#,
        ))
        .unwrap();

    wait_until("environment record", || h.engine.metrics().records_total() >= 1).await;
    let metrics = h.engine.metrics();
    assert_eq!(metrics.messages_received(), 4);
    assert_eq!(metrics.malformed_total(), 3);

    let env = h.engine.latest_environment().unwrap();
    assert!(env.is_day);
    assert!(env.cattle_presence);
    assert_eq!(env.timestamp, T0, "naive timestamps are read as UTC");

    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_mid_stream_disconnect_reconnects() {
    let h = start(config(true, ""));

    h.script.send(Ok(BrokerEvent::Connected)).unwrap();
    h.script
        .send(message("farm/feed_monitor", r#"{"cattleID": "COW002", "feedBefore": 9.0, "feedAfter": 6.5, "timestamp": 1767607200000}"#))
        .unwrap();
    wait_until("feed record", || h.engine.recent_feed(10).len() == 1).await;

    h.script.send(Err(IngestError::BrokerUnavailable("connection reset".to_string()))).unwrap();
    wait_until("backoff", || h.status.reconnect_attempts() >= 1).await;

    h.script.send(Ok(BrokerEvent::Connected)).unwrap();
    wait_until("resubscribe", || h.subscribed.lock().len() == 10).await;
    assert!(!h.status.is_fallback_active());

    h.shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), h.connector).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_wrong_typed_identifying_fields_rejected() {
    let h = start(config(false, ""));

    h.script.send(Ok(BrokerEvent::Connected)).unwrap();
    h.script.send(message("farm/sensors/COW001", r#"{"timestamp": "abc", "acc_x": 120, "temperature": 38.5}"#)).unwrap();
    h.script.send(message("farm/environment", r#"{"timestamp": {"epoch": 1767607200}, "ldrValue": 720}"#)).unwrap();
    h.script.send(message("farm/gate", r#"{"rfidTag": true, "weight": 452.5, "timestamp": 1767607200}"#)).unwrap();
    // Wrong-typed measurements are not identifying: they read as 0
    h.script
        .send(message("farm/sensors/COW001", r#"{"timestamp": 1767607200, "acc_x": "abc", "acc_y": 15, "temperature": [38.5]}"#))
        .unwrap();

    wait_until("sensor record", || h.engine.metrics().records_total() >= 1).await;
    let metrics = h.engine.metrics();
    assert_eq!(metrics.messages_received(), 4);
    assert_eq!(metrics.malformed_total(), 3);
    assert_eq!(metrics.records_total(), 1);
    assert!(h.engine.latest_environment().is_none());
    assert_eq!(h.engine.registered_cattle(), 0);

    let readings = h.engine.recent_sensor(10, None);
    assert_eq!(readings.len(), 1);
    let reading = &readings[0].reading;
    assert_eq!(reading.cattle_id, "COW001");
    assert_eq!((reading.accelerometer.x, reading.accelerometer.y), (0.0, 15.0));
    assert_eq!(reading.temperature, 0.0);

    h.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_schedule_inference_from_gate_timestamps() {
    let h = start(config(false, "[gate]\ndirection_inference = \"schedule\""));

    h.script.send(Ok(BrokerEvent::Connected)).unwrap();
    // 10:00 UTC falls in the default 05:00-16:00 "in" window, 20:00 does not
    h.script.send(message("farm/gate", r#"{"rfidTag": "E3882528", "weight": 452.5, "timestamp": "2026-01-05T10:00:00Z"}"#)).unwrap();
    h.script.send(message("farm/gate", r#"{"rfidTag": "E3882528", "weight": 450.0, "timestamp": "2026-01-05T20:00:00Z"}"#)).unwrap();

    wait_until("both gate events", || h.engine.metrics().records_total() >= 2).await;
    let record = h.engine.cattle("E3882528").unwrap();
    assert_eq!((record.total_entries, record.total_exits), (1, 1));
    assert_eq!(record.last_seen, T0 + 10 * 3_600_000);

    h.shutdown.send(true).unwrap();
}
