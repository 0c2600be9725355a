//! Ingestion and aggregation engine
//!
//! The Engine is the single writer of all telemetry state:
//! - Per-stream bounded history (sensor readings keep their classification)
//! - Cattle registry and gate history
//! - Feed/water aggregation window
//! - Fan-out of one `Update` per accepted record
//!
//! The connector and the fallback generator only send `Inbound` records into
//! the engine's channel. Each piece of state sits behind its own mutex so
//! queries copy out without waiting on the other streams.

mod ingest;
mod query;

pub use query::{GateActivity, LatestReadings, Overview};

use crate::domain::types::{ClassifiedReading, EnvironmentReading, Inbound};
use crate::domain::HistoryBuffer;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::connector::ConnectorStatus;
use crate::io::fanout::{Fanout, Subscription};
use crate::services::classifier::HealthClassifier;
use crate::services::feed::FeedAggregator;
use crate::services::registry::CattleRegistry;
use crate::services::stats::EnvironmentThresholds;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

pub struct Engine {
    /// Sensor history with the classification computed at ingest
    pub(crate) sensors: Mutex<HistoryBuffer<ClassifiedReading>>,
    pub(crate) environment: Mutex<HistoryBuffer<EnvironmentReading>>,
    /// Registry owns the gate history
    pub(crate) registry: Mutex<CattleRegistry>,
    /// Aggregator owns the feed window
    pub(crate) feed: Mutex<FeedAggregator>,
    pub(crate) classifier: HealthClassifier,
    pub(crate) env_thresholds: EnvironmentThresholds,
    pub(crate) fanout: Fanout,
    pub(crate) status: Arc<ConnectorStatus>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Engine {
    pub fn new(config: &Config, status: Arc<ConnectorStatus>, metrics: Arc<Metrics>) -> Self {
        Self {
            sensors: Mutex::new(HistoryBuffer::new(config.sensor_history())),
            environment: Mutex::new(HistoryBuffer::new(config.environment_history())),
            registry: Mutex::new(CattleRegistry::from_config(config)),
            feed: Mutex::new(FeedAggregator::from_config(config)),
            classifier: HealthClassifier::from_config(config),
            env_thresholds: EnvironmentThresholds::from_config(config),
            fanout: Fanout::new(config.subscriber_queue(), metrics.clone()),
            status,
            metrics,
        }
    }

    /// Register a live subscriber; it sees every update published from now on
    pub fn subscribe(&self) -> Subscription {
        self.fanout.subscribe()
    }

    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Consume the ingest channel until it closes or shutdown is signalled
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Inbound>, mut shutdown: watch::Receiver<bool>) {
        info!("engine_started");
        loop {
            tokio::select! {
                biased;
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                inbound = rx.recv() => {
                    match inbound {
                        Some(inbound) => {
                            self.metrics.set_ingest_queue_depth(rx.len() as u64);
                            self.ingest(inbound);
                        }
                        None => break, // All senders gone
                    }
                }
            }
        }
        info!(records = self.metrics.records_total(), "engine_stopped");
    }
}
