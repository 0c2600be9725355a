//! Synthetic telemetry while the broker is unreachable
//!
//! The connector flips a `watch` flag when the link has been down past the
//! grace period. While the flag is set this generator emits one record per
//! stream every interval, tagged `Provenance::Synthetic` on the ingest
//! channel. The records themselves are shaped exactly like live data.

use crate::domain::types::{
    epoch_ms, Axes3, EnvironmentReading, FeedStationReading, GateDirection, GateEvent, Inbound, Record,
    SensorReading,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const DEFAULT_ROSTER: [&str; 5] = ["COW001", "COW002", "COW003", "COW004", "COW005"];

pub struct FallbackGenerator {
    roster: Vec<String>,
    interval: Duration,
    /// Probability a sensor reading shows agitated motion
    anomaly_rate: f64,
    rng: StdRng,
}

impl FallbackGenerator {
    pub fn new(roster: Vec<String>, interval: Duration, anomaly_rate: f64) -> Self {
        Self::with_rng(roster, interval, anomaly_rate, StdRng::from_entropy())
    }

    /// Deterministic generator for tests and reproducible demos
    pub fn with_seed(roster: Vec<String>, interval: Duration, anomaly_rate: f64, seed: u64) -> Self {
        Self::with_rng(roster, interval, anomaly_rate, StdRng::seed_from_u64(seed))
    }

    pub fn from_config(config: &Config) -> Self {
        let roster = config.fallback_roster().to_vec();
        let interval = Duration::from_millis(config.fallback_interval_ms());
        match config.fallback_seed() {
            Some(seed) => Self::with_seed(roster, interval, config.fallback_anomaly_rate(), seed),
            None => Self::new(roster, interval, config.fallback_anomaly_rate()),
        }
    }

    fn with_rng(roster: Vec<String>, interval: Duration, anomaly_rate: f64, rng: StdRng) -> Self {
        let roster = if roster.is_empty() {
            DEFAULT_ROSTER.iter().map(|s| s.to_string()).collect()
        } else {
            roster
        };
        Self {
            roster,
            interval: interval.max(Duration::from_millis(10)),
            anomaly_rate: anomaly_rate.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One record per stream: sensor, environment, gate, feed
    pub fn next_batch(&mut self, now_ms: u64) -> Vec<Record> {
        vec![
            Record::Sensor(self.sensor_reading(now_ms)),
            Record::Environment(self.environment_reading(now_ms)),
            Record::Gate(self.gate_event(now_ms)),
            Record::Feed(self.feed_reading(now_ms)),
        ]
    }

    /// Emit batches while the fallback flag is set, until shutdown
    pub async fn run(
        mut self,
        ingest_tx: mpsc::Sender<Inbound>,
        mut active: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) {
        loop {
            // Idle until the connector activates us
            loop {
                let is_active = *active.borrow_and_update();
                if is_active {
                    break;
                }
                tokio::select! {
                    res = active.changed() => {
                        if res.is_err() {
                            return;
                        }
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }

            info!(interval_ms = self.interval.as_millis() as u64, roster = self.roster.len(), "fallback_generator_started");
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut batches = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !self.emit(&ingest_tx, &metrics) {
                            return;
                        }
                        batches += 1;
                    }
                    res = active.changed() => {
                        if res.is_err() {
                            return;
                        }
                        let is_active = *active.borrow_and_update();
                        if !is_active {
                            break;
                        }
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
            info!(batches, "fallback_generator_stopped");
        }
    }

    /// Send one batch. Returns false once the engine is gone.
    fn emit(&mut self, ingest_tx: &mpsc::Sender<Inbound>, metrics: &Metrics) -> bool {
        let now_ms = epoch_ms();
        for record in self.next_batch(now_ms) {
            match ingest_tx.try_send(Inbound::synthetic(record)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    metrics.record_ingest_dropped();
                    debug!("fallback_record_dropped: channel full");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("ingest channel closed");
                    return false;
                }
            }
        }
        true
    }

    fn pick_animal(&mut self) -> String {
        self.roster.choose(&mut self.rng).cloned().unwrap_or_else(|| DEFAULT_ROSTER[0].to_string())
    }

    fn sensor_reading(&mut self, now_ms: u64) -> SensorReading {
        let cattle_id = self.pick_animal();
        let agitated = self.rng.gen_bool(self.anomaly_rate);
        let rng = &mut self.rng;

        let (accelerometer, gyroscope) = if agitated {
            (
                Axes3::new(rng.gen_range(300.0..400.0), rng.gen_range(60.0..100.0), rng.gen_range(50.0..90.0)),
                Axes3::new(rng.gen_range(6.5..8.0), rng.gen_range(6.0..7.5), rng.gen_range(5.0..6.5)),
            )
        } else {
            (
                Axes3::new(rng.gen_range(80.0..150.0), rng.gen_range(10.0..30.0), rng.gen_range(15.0..35.0)),
                Axes3::new(rng.gen_range(0.5..2.5), rng.gen_range(0.8..2.0), rng.gen_range(0.3..1.5)),
            )
        };

        SensorReading {
            cattle_id,
            timestamp: now_ms,
            accelerometer: round_axes(accelerometer),
            gyroscope: round_axes(gyroscope),
            temperature: round1(rng.gen_range(37.5..39.3)),
        }
    }

    fn environment_reading(&mut self, now_ms: u64) -> EnvironmentReading {
        let hour = (now_ms / 3_600_000) % 24;
        let rng = &mut self.rng;
        let light_level = if (6..18).contains(&hour) {
            rng.gen_range(600.0..950.0_f64).round()
        } else {
            rng.gen_range(40.0..300.0_f64).round()
        };

        EnvironmentReading {
            timestamp: now_ms,
            light_level,
            is_day: light_level > 500.0,
            ambient_temperature: round1(rng.gen_range(18.0..32.0)),
            humidity: round1(rng.gen_range(45.0..80.0)),
            cattle_presence: rng.gen_bool(0.5),
        }
    }

    fn gate_event(&mut self, now_ms: u64) -> GateEvent {
        let rfid_tag = self.pick_animal();
        let rng = &mut self.rng;
        GateEvent {
            rfid_tag,
            timestamp: now_ms,
            weight: round1(rng.gen_range(350.0..700.0)),
            direction: if rng.gen_bool(0.5) { GateDirection::In } else { GateDirection::Out },
            gate_status: "active".to_string(),
            position: None,
        }
    }

    fn feed_reading(&mut self, now_ms: u64) -> FeedStationReading {
        let cattle_id = self.pick_animal();
        let rng = &mut self.rng;
        let feed_before = round2(rng.gen_range(8.0..12.0));
        let water_before = round2(rng.gen_range(15.0..20.0));

        FeedStationReading {
            cattle_id: Some(cattle_id),
            timestamp: now_ms,
            feed_before,
            feed_after: round2(feed_before - rng.gen_range(0.5..5.0)),
            water_before,
            water_after: round2(water_before - rng.gen_range(0.0..3.0)),
            water_present: rng.gen_bool(0.9),
        }
    }
}

fn round_axes(axes: Axes3) -> Axes3 {
    Axes3::new(round2(axes.x), round2(axes.y), round2(axes.z))
}

#[inline]
fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[inline]
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
