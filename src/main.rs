//! CattleNet gateway - livestock telemetry ingestion and aggregation
//!
//! Subscribes to the farm's sensor, environment, gate and feed streams,
//! keeps bounded per-stream history and derived state, and pushes every
//! update to live subscribers.
//!
//! Module structure:
//! - `domain/` - Records, history buffer, error taxonomy
//! - `io/` - External interfaces (MQTT connector, payloads, fan-out, metrics endpoint)
//! - `services/` - Engine, classifier, registry, feed aggregation, fallback generator
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use cattlenet::infra::{Config, Metrics};
use cattlenet::io::connector::{Connector, ConnectorStatus, MqttSession};
use cattlenet::io::MqttPublisher;
use cattlenet::services::{Engine, FallbackGenerator};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// CattleNet gateway - livestock telemetry engine
#[derive(Parser, Debug)]
#[command(name = "cattlenet-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-record visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git = env!("GIT_HASH"), "cattlenet-gateway starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    // Embedded broker first, so the connector finds it on its first attempt
    cattlenet::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        sensor_topics = ?config.sensor_topics(),
        environment_topic = %config.environment_topic(),
        gate_topic = %config.gate_topic(),
        feed_topic = %config.feed_topic(),
        direction_inference = ?config.direction_inference(),
        fallback_enabled = %config.fallback_enabled(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let status = Arc::new(ConnectorStatus::new());
    let engine = Arc::new(Engine::new(&config, status.clone(), metrics.clone()));

    // Ingest channel (bounded; producers use try_send)
    let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_channel_capacity());
    let (fallback_tx, fallback_rx) = watch::channel(false);

    // Start fallback generator (idle until the connector activates it)
    if config.fallback_enabled() {
        let generator = FallbackGenerator::from_config(&config);
        let tx = ingest_tx.clone();
        let fallback_shutdown = shutdown_rx.clone();
        let fallback_metrics = metrics.clone();
        tokio::spawn(async move {
            generator.run(tx, fallback_rx, fallback_shutdown, fallback_metrics).await;
        });
    }

    // Start stream connector
    let session = MqttSession::new(&config);
    let connector = Connector::new(session, &config, status, metrics.clone(), ingest_tx, fallback_tx);
    let connector_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        connector.run(connector_shutdown).await;
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_engine = engine.clone();
        let prom_shutdown = shutdown_rx.clone();
        let site_id = config.site_id().to_string();
        tokio::spawn(async move {
            if let Err(e) = cattlenet::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_engine,
                site_id,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let report_engine = engine.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            let summary = report_engine
                .metrics()
                .report(report_engine.registered_cattle(), report_engine.fanout().subscriber_count());
            summary.log();
        }
    });

    // Start MQTT update egress (if enabled)
    if config.mqtt_egress_enabled() {
        let publisher = MqttPublisher::new(&config, engine.subscribe());
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });
    }

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run engine - consumes records until shutdown or all producers stop
    engine.run(ingest_rx, shutdown_rx).await;

    info!("cattlenet-gateway shutdown complete");
    Ok(())
}
