//! Read-only snapshot queries
//!
//! Every method copies what it needs under the owning stream's lock and
//! computes on the copy, so readers never hold a lock across computation.

use super::Engine;
use crate::domain::types::{
    CattleRecord, ClassifiedReading, EnvironmentReading, FeedActivity, GateEvent, StreamKind,
};
use crate::io::connector::ConnectorSnapshot;
use crate::services::feed::FeedAverages;
use crate::services::registry::GateStats;
use crate::services::stats::{self, EnvironmentStats, HealthStats};
use serde::Serialize;
use std::collections::BTreeMap;

/// Most recent record of every stream
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatestReadings {
    pub sensor: Option<ClassifiedReading>,
    pub environment: Option<EnvironmentReading>,
    pub gate: Option<GateEvent>,
    pub feed: Option<FeedActivity>,
}

/// Registry record plus recent gate passes for one tag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateActivity {
    pub record: CattleRecord,
    pub recent_events: Vec<GateEvent>,
}

/// Latest sensor and environment readings side by side
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Overview {
    pub sensor: Option<ClassifiedReading>,
    pub environment: Option<EnvironmentReading>,
    /// Body minus ambient temperature, when both were reported
    pub temperature_difference: Option<f64>,
}

impl Engine {
    pub fn latest(&self) -> LatestReadings {
        LatestReadings {
            sensor: self.latest_sensor(),
            environment: self.latest_environment(),
            gate: self.latest_gate_event(),
            feed: self.latest_feed_activity(),
        }
    }

    pub fn latest_sensor(&self) -> Option<ClassifiedReading> {
        self.sensors.lock().latest()
    }

    pub fn latest_environment(&self) -> Option<EnvironmentReading> {
        self.environment.lock().latest()
    }

    pub fn latest_gate_event(&self) -> Option<GateEvent> {
        self.registry.lock().latest_event()
    }

    pub fn latest_feed_activity(&self) -> Option<FeedActivity> {
        self.feed.lock().latest()
    }

    /// Up to `n` sensor readings, most recent first, optionally for one animal
    pub fn recent_sensor(&self, n: usize, cattle_id: Option<&str>) -> Vec<ClassifiedReading> {
        let sensors = self.sensors.lock();
        match cattle_id {
            None => sensors.recent(n),
            Some(id) => {
                sensors.iter().rev().filter(|r| r.reading.cattle_id == id).take(n).cloned().collect()
            }
        }
    }

    pub fn recent_environment(&self, n: usize) -> Vec<EnvironmentReading> {
        self.environment.lock().recent(n)
    }

    pub fn recent_gate_events(&self, n: usize, rfid_tag: Option<&str>) -> Vec<GateEvent> {
        self.registry.lock().recent_events(n, rfid_tag)
    }

    pub fn recent_feed(&self, n: usize) -> Vec<FeedActivity> {
        self.feed.lock().recent(n)
    }

    /// Buffered record count for a stream
    pub fn history_len(&self, stream: StreamKind) -> usize {
        match stream {
            StreamKind::Sensor => self.sensors.lock().len(),
            StreamKind::Environment => self.environment.lock().len(),
            StreamKind::Gate => self.registry.lock().event_count(),
            StreamKind::Feed => self.feed.lock().len(),
        }
    }

    /// Registry snapshot, optionally restricted to one tag
    pub fn registry(&self, rfid_tag: Option<&str>) -> BTreeMap<String, CattleRecord> {
        self.registry.lock().snapshot(rfid_tag)
    }

    pub fn cattle(&self, rfid_tag: &str) -> Option<CattleRecord> {
        self.registry.lock().get(rfid_tag)
    }

    pub fn registered_cattle(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn gate_activity(&self, rfid_tag: &str, n: usize) -> Option<GateActivity> {
        let registry = self.registry.lock();
        let record = registry.get(rfid_tag)?;
        Some(GateActivity { record, recent_events: registry.recent_events(n, Some(rfid_tag)) })
    }

    pub fn health_stats(&self) -> HealthStats {
        let history = self.sensors.lock().snapshot();
        let mut others: Vec<String> = self.registry.lock().tags().map(str::to_string).collect();
        others.extend(self.feed.lock().animals().map(str::to_string));
        stats::health_stats(&history, others.iter().map(String::as_str))
    }

    pub fn environment_stats(&self) -> EnvironmentStats {
        let history = self.environment.lock().snapshot();
        stats::environment_stats(&history, &self.env_thresholds)
    }

    pub fn gate_stats(&self) -> GateStats {
        self.registry.lock().stats()
    }

    pub fn feed_averages(&self) -> FeedAverages {
        self.feed.lock().averages()
    }

    pub fn connector_status(&self) -> ConnectorSnapshot {
        self.status.snapshot()
    }

    pub fn overview(&self) -> Overview {
        let sensor = self.latest_sensor();
        let environment = self.latest_environment();
        let temperature_difference = match (&sensor, &environment) {
            (Some(s), Some(e)) if s.reading.has_temperature() && e.ambient_temperature > 0.0 => {
                Some(((s.reading.temperature - e.ambient_temperature) * 100.0).round() / 100.0)
            }
            _ => None,
        };
        Overview { sensor, environment, temperature_difference }
    }
}
