//! Farm simulator - publishes synthetic telemetry to an MQTT broker
//!
//! Emits one sensor, environment, gate and feed payload per interval on the
//! topics from the gateway config, for manual end-to-end testing.
//!
//! Usage:
//!   cargo run --bin farm-sim -- --config config/dev.toml
//!   cargo run --bin farm-sim -- --legacy --count 20 --seed 7

use cattlenet::domain::types::{epoch_ms, GateDirection, Record};
use cattlenet::infra::Config;
use cattlenet::services::FallbackGenerator;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "farm-sim")]
#[command(about = "Publish synthetic farm telemetry for local testing")]
struct Args {
    /// Config file path (topics and broker address)
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Override MQTT broker host
    #[arg(long)]
    mqtt_host: Option<String>,

    /// Override MQTT broker port
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Milliseconds between batches
    #[arg(long, default_value = "2000")]
    interval_ms: u64,

    /// Stop after this many batches (default: run until Ctrl+C)
    #[arg(long)]
    count: Option<u64>,

    /// Probability of an agitated sensor reading
    #[arg(long, default_value = "0.2")]
    anomaly_rate: f64,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Publish older firmware payload shapes (camelCase fields, text timestamps)
    #[arg(long)]
    legacy: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_timer(UtcTime::rfc_3339()).with_target(false).init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    let host = args.mqtt_host.clone().unwrap_or_else(|| config.mqtt_host().to_string());
    let port = args.mqtt_port.unwrap_or_else(|| config.mqtt_port());
    let suffix = Uuid::now_v7().simple().to_string();
    let mut options = MqttOptions::new(format!("farm-sim-{}", &suffix[suffix.len() - 8..]), host.clone(), port);
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("farm_sim_connected"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "farm_sim_mqtt_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let roster = config.fallback_roster().to_vec();
    let interval = Duration::from_millis(args.interval_ms.max(10));
    let mut generator = match args.seed {
        Some(seed) => FallbackGenerator::with_seed(roster, interval, args.anomaly_rate, seed),
        None => FallbackGenerator::new(roster, interval, args.anomaly_rate),
    };

    info!(host = %host, port = %port, interval_ms = args.interval_ms, legacy = args.legacy, "farm_sim_started");

    let mut ticker = tokio::time::interval(generator.interval());
    let mut batches = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        for record in generator.next_batch(epoch_ms()) {
            let topic = topic_for(&config, &record);
            let payload = if args.legacy { legacy_payload(&record) } else { record.to_payload()? };
            if let Err(e) = client.publish(topic.clone(), QoS::AtLeastOnce, false, payload.to_string()).await {
                warn!(error = %e, topic = %topic, "farm_sim_publish_failed");
            }
        }

        batches += 1;
        if args.count.is_some_and(|count| batches >= count) {
            break;
        }
    }

    // Give the event loop a moment to flush queued publishes
    tokio::time::sleep(Duration::from_millis(200)).await;
    let _ = client.disconnect().await;
    info!(batches, "farm_sim_finished");
    Ok(())
}

/// Topic a record is published on; wildcard sensor filters get the animal id
fn topic_for(config: &Config, record: &Record) -> String {
    match record {
        Record::Sensor(reading) => {
            let filters = config.sensor_topics();
            filters
                .iter()
                .find(|f| f.contains('+'))
                .map(|f| f.replacen('+', &reading.cattle_id, 1))
                .or_else(|| filters.first().cloned())
                .unwrap_or_else(|| "farm/sensor1".to_string())
        }
        Record::Environment(_) => config.environment_topic().to_string(),
        Record::Gate(_) => config.gate_topic().to_string(),
        Record::Feed(_) => config.feed_topic().to_string(),
    }
}

/// Render a record the way earlier collar, gate and station firmware did
fn legacy_payload(record: &Record) -> Value {
    match record {
        Record::Sensor(r) => json!({
            "cattleId": r.cattle_id,
            "timestamp": naive_timestamp(r.timestamp),
            "ax": r.accelerometer.x,
            "ay": r.accelerometer.y,
            "az": r.accelerometer.z,
            "gx": r.gyroscope.x,
            "gy": r.gyroscope.y,
            "gz": r.gyroscope.z,
            "temp": r.temperature,
        }),
        Record::Environment(r) => json!({
            "timestamp": naive_timestamp(r.timestamp),
            "ldrValue": r.light_level,
            "dht11_temp": r.ambient_temperature,
            "dht11_humidity": r.humidity,
            "cattlePresence": if r.cattle_presence { "Cattle detected" } else { "No cattle" },
        }),
        Record::Gate(e) => json!({
            "timestamp": naive_timestamp(e.timestamp),
            "rfidTag": e.rfid_tag,
            "loadCell": e.weight,
            "event": match e.direction {
                GateDirection::In => "entry",
                GateDirection::Out => "exit",
                GateDirection::Unknown => "unknown",
            },
            "gateStatus": e.gate_status,
        }),
        Record::Feed(f) => json!({
            "timestamp": naive_timestamp(f.timestamp),
            "cattleID": f.cattle_id.as_deref().unwrap_or("no_cattle_detected"),
            "feedBefore": f.feed_before,
            "feedAfter": f.feed_after,
            "waterBefore": f.water_before,
            "waterAfter": f.water_after,
            "waterStatus": f.water_present,
        }),
    }
}

/// `YYYY-MM-DD HH:MM:SS` in UTC, falling back to epoch ms
fn naive_timestamp(ms: u64) -> Value {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|dt| dt.format(&format).ok())
        .map_or_else(|| json!(ms), Value::String)
}
