//! RFID cattle registry
//!
//! Keyed by RFID tag. Each gate event creates or updates the tag's record:
//! weight history, entry/exit counters and first/last-seen times. Records
//! are never removed during the process lifetime.
//!
//! Gate direction is resolved in order: payload, reader position map,
//! configured inference strategy. An unresolved direction is stored as
//! `unknown` and leaves both counters untouched.

use crate::domain::error::IngestError;
use crate::domain::types::{CattleRecord, GateDirection, GateEvent, WeightSample};
use crate::domain::HistoryBuffer;
use crate::infra::config::{Config, DirectionInferenceMode};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Fallback strategy when neither payload nor reader position give a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionInference {
    None,
    /// Opposite of the tag's last resolved direction; first sighting is `in`
    Alternate,
    /// `in` for hours in [in_from_hour, in_until_hour) at the farm's UTC offset
    Schedule { in_from_hour: u8, in_until_hour: u8, utc_offset_minutes: i32 },
}

impl DirectionInference {
    pub fn from_config(config: &Config) -> Self {
        match config.direction_inference() {
            DirectionInferenceMode::None => DirectionInference::None,
            DirectionInferenceMode::Alternate => DirectionInference::Alternate,
            DirectionInferenceMode::Schedule => DirectionInference::Schedule {
                in_from_hour: config.gate_in_from_hour(),
                in_until_hour: config.gate_in_until_hour(),
                utc_offset_minutes: config.gate_utc_offset_minutes(),
            },
        }
    }

    fn infer(&self, timestamp: u64, previous: Option<GateDirection>) -> GateDirection {
        match *self {
            DirectionInference::None => GateDirection::Unknown,
            DirectionInference::Alternate => match previous {
                Some(dir) if dir.is_known() => dir.opposite(),
                _ => GateDirection::In,
            },
            DirectionInference::Schedule { in_from_hour, in_until_hour, utc_offset_minutes } => {
                let local_ms = timestamp as i64 + i64::from(utc_offset_minutes) * 60_000;
                let hour = (local_ms.rem_euclid(MS_PER_DAY) / MS_PER_HOUR) as u8;
                let inside = if in_from_hour <= in_until_hour {
                    hour >= in_from_hour && hour < in_until_hour
                } else {
                    hour >= in_from_hour || hour < in_until_hour
                };
                if inside {
                    GateDirection::In
                } else {
                    GateDirection::Out
                }
            }
        }
    }
}

/// Direction resolution rules
#[derive(Debug, Clone)]
pub struct DirectionRules {
    positions: FxHashMap<String, GateDirection>,
    inference: DirectionInference,
}

impl DirectionRules {
    pub fn new(positions: FxHashMap<String, GateDirection>, inference: DirectionInference) -> Self {
        Self { positions, inference }
    }

    pub fn from_config(config: &Config) -> Self {
        let positions =
            config.gate_positions().iter().map(|(k, v)| (k.to_ascii_lowercase(), *v)).collect();
        Self::new(positions, DirectionInference::from_config(config))
    }

    pub fn resolve(&self, event: &GateEvent, previous: Option<GateDirection>) -> GateDirection {
        if event.direction.is_known() {
            return event.direction;
        }
        if let Some(dir) = event
            .position
            .as_deref()
            .and_then(|p| self.positions.get(&p.to_ascii_lowercase()))
            .filter(|d| d.is_known())
        {
            return *dir;
        }
        self.inference.infer(event.timestamp, previous)
    }
}

impl Default for DirectionRules {
    fn default() -> Self {
        Self::new(FxHashMap::default(), DirectionInference::None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightSummary {
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateAlert {
    HeavyCattle { rfid_tag: String, weight: f64 },
    LightCattle { rfid_tag: String, weight: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateStats {
    pub total_entries: u64,
    pub total_exits: u64,
    pub unique_tags: usize,
    pub gate_readings: usize,
    pub weight: Option<WeightSummary>,
    pub alerts: Vec<GateAlert>,
}

pub struct CattleRegistry {
    records: FxHashMap<String, CattleRecord>,
    /// Gate events as stored, with resolved direction
    events: HistoryBuffer<GateEvent>,
    rules: DirectionRules,
    weight_history_len: usize,
    heavy_weight_kg: f64,
    light_weight_kg: f64,
}

impl CattleRegistry {
    pub fn new(rules: DirectionRules, gate_history: usize, weight_history_len: usize) -> Self {
        Self {
            records: FxHashMap::default(),
            events: HistoryBuffer::new(gate_history),
            rules,
            weight_history_len: weight_history_len.max(1),
            heavy_weight_kg: 800.0,
            light_weight_kg: 200.0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(DirectionRules::from_config(config), config.gate_history(), config.weight_history())
            .with_weight_alerts(config.heavy_weight_kg(), config.light_weight_kg())
    }

    pub fn with_weight_alerts(mut self, heavy_kg: f64, light_kg: f64) -> Self {
        self.heavy_weight_kg = heavy_kg;
        self.light_weight_kg = light_kg;
        self
    }

    /// Apply a gate event and return a copy of the updated record
    pub fn record_gate_event(&mut self, mut event: GateEvent) -> CattleRecord {
        let record = self
            .records
            .entry(event.rfid_tag.clone())
            .or_insert_with(|| CattleRecord::new(&event.rfid_tag, event.timestamp));

        let previous = record.last_direction.is_known().then_some(record.last_direction);
        let direction = self.rules.resolve(&event, previous);

        if event.weight > 0.0 {
            record.latest_weight = event.weight;
            record.weight_history.push(WeightSample { weight: event.weight, timestamp: event.timestamp });
            if record.weight_history.len() > self.weight_history_len {
                let excess = record.weight_history.len() - self.weight_history_len;
                record.weight_history.drain(..excess);
            }
        }

        match direction {
            GateDirection::In => record.total_entries += 1,
            GateDirection::Out => record.total_exits += 1,
            GateDirection::Unknown => {
                let err = IngestError::InvalidGateEvent { rfid_tag: event.rfid_tag.clone() };
                debug!(error = %err, "gate_direction_unknown");
            }
        }
        if direction.is_known() {
            record.last_direction = direction;
        }
        record.first_seen = record.first_seen.min(event.timestamp);
        record.last_seen = record.last_seen.max(event.timestamp);

        let updated = record.clone();
        event.direction = direction;
        self.events.append(event);
        updated
    }

    pub fn get(&self, rfid_tag: &str) -> Option<CattleRecord> {
        self.records.get(rfid_tag).cloned()
    }

    /// Registry copy, optionally restricted to one tag
    pub fn snapshot(&self, rfid_tag: Option<&str>) -> BTreeMap<String, CattleRecord> {
        match rfid_tag {
            Some(tag) => self.records.get(tag).map(|r| (tag.to_string(), r.clone())).into_iter().collect(),
            None => self.records.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Up to `n` most recent gate events (most recent first), optionally for one tag
    pub fn recent_events(&self, n: usize, rfid_tag: Option<&str>) -> Vec<GateEvent> {
        self.events
            .iter()
            .rev()
            .filter(|e| rfid_tag.map_or(true, |tag| e.rfid_tag == tag))
            .take(n)
            .cloned()
            .collect()
    }

    pub fn latest_event(&self) -> Option<GateEvent> {
        self.events.latest()
    }

    /// Buffered gate events
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tags seen at the gate
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn stats(&self) -> GateStats {
        let total_entries = self.records.values().map(|r| r.total_entries).sum();
        let total_exits = self.records.values().map(|r| r.total_exits).sum();

        let weights: Vec<f64> = self.events.iter().map(|e| e.weight).filter(|w| *w > 0.0).collect();
        let weight = (!weights.is_empty()).then(|| WeightSummary {
            average: round2(weights.iter().sum::<f64>() / weights.len() as f64),
            minimum: round2(weights.iter().copied().fold(f64::INFINITY, f64::min)),
            maximum: round2(weights.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            count: weights.len(),
        });

        let mut alerts = Vec::new();
        if let Some(latest) = self.events.latest().filter(|e| e.weight > 0.0) {
            if latest.weight > self.heavy_weight_kg {
                alerts.push(GateAlert::HeavyCattle { rfid_tag: latest.rfid_tag, weight: latest.weight });
            } else if latest.weight < self.light_weight_kg {
                alerts.push(GateAlert::LightCattle { rfid_tag: latest.rfid_tag, weight: latest.weight });
            }
        }

        GateStats {
            total_entries,
            total_exits,
            unique_tags: self.records.len(),
            gate_readings: self.events.len(),
            weight,
            alerts,
        }
    }
}

#[inline]
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_767_607_200_000; // 2026-01-05T10:00:00Z

    fn event(tag: &str, ts: u64, weight: f64, direction: GateDirection) -> GateEvent {
        GateEvent {
            rfid_tag: tag.to_string(),
            timestamp: ts,
            weight,
            direction,
            gate_status: "open".to_string(),
            position: None,
        }
    }

    fn registry() -> CattleRegistry {
        CattleRegistry::new(DirectionRules::default(), 200, 10)
    }

    #[test]
    fn test_in_out_counting() {
        let mut reg = registry();
        reg.record_gate_event(event("T1", T0, 450.0, GateDirection::In));
        let rec = reg.record_gate_event(event("T1", T0 + 1000, 452.0, GateDirection::Out));

        assert_eq!(rec.total_entries, 1);
        assert_eq!(rec.total_exits, 1);
        assert_eq!(rec.latest_weight, 452.0);
        assert_eq!(rec.weight_history.len(), 2);
        assert_eq!(rec.first_seen, T0);
        assert_eq!(rec.last_seen, T0 + 1000);
        assert_eq!(rec.last_direction, GateDirection::Out);
    }

    #[test]
    fn test_unknown_direction_leaves_counters() {
        let mut reg = registry();
        reg.record_gate_event(event("T1", T0, 450.0, GateDirection::In));
        let rec = reg.record_gate_event(event("T1", T0 + 1000, 455.0, GateDirection::Unknown));

        assert_eq!(rec.total_entries, 1);
        assert_eq!(rec.total_exits, 0);
        assert_eq!(rec.last_direction, GateDirection::In);
        assert_eq!(rec.last_seen, T0 + 1000);
        assert_eq!(reg.latest_event().unwrap().direction, GateDirection::Unknown);
    }

    #[test]
    fn test_weight_history_capped() {
        let mut reg = registry();
        for i in 0..15u64 {
            reg.record_gate_event(event("T1", T0 + i, 400.0 + i as f64, GateDirection::In));
        }
        let rec = reg.get("T1").unwrap();
        assert_eq!(rec.weight_history.len(), 10);
        assert_eq!(rec.weight_history[0].weight, 405.0);
        assert_eq!(rec.latest_weight, 414.0);
    }

    #[test]
    fn test_zero_weight_not_recorded() {
        let mut reg = registry();
        reg.record_gate_event(event("T1", T0, 450.0, GateDirection::In));
        let rec = reg.record_gate_event(event("T1", T0 + 1, 0.0, GateDirection::Out));
        assert_eq!(rec.latest_weight, 450.0);
        assert_eq!(rec.weight_history.len(), 1);
    }

    #[test]
    fn test_position_map_resolves_direction() {
        let mut positions = FxHashMap::default();
        positions.insert("outer".to_string(), GateDirection::In);
        let mut reg = CattleRegistry::new(DirectionRules::new(positions, DirectionInference::None), 200, 10);

        let mut e = event("T1", T0, 450.0, GateDirection::Unknown);
        e.position = Some("Outer".to_string());
        let rec = reg.record_gate_event(e);
        assert_eq!(rec.total_entries, 1);

        // Payload direction wins over position
        let mut e = event("T1", T0 + 1, 450.0, GateDirection::Out);
        e.position = Some("outer".to_string());
        let rec = reg.record_gate_event(e);
        assert_eq!(rec.total_exits, 1);
    }

    #[test]
    fn test_alternate_inference() {
        let mut reg =
            CattleRegistry::new(DirectionRules::new(FxHashMap::default(), DirectionInference::Alternate), 200, 10);
        let first = reg.record_gate_event(event("T1", T0, 450.0, GateDirection::Unknown));
        assert_eq!(first.last_direction, GateDirection::In);
        let second = reg.record_gate_event(event("T1", T0 + 1, 450.0, GateDirection::Unknown));
        assert_eq!(second.last_direction, GateDirection::Out);
        assert_eq!((second.total_entries, second.total_exits), (1, 1));
    }

    #[test]
    fn test_schedule_inference() {
        let schedule = DirectionInference::Schedule {
            in_from_hour: 5,
            in_until_hour: 16,
            utc_offset_minutes: 330,
        };
        // 10:00Z is 15:30 at +05:30 -> in
        assert_eq!(schedule.infer(T0, None), GateDirection::In);
        // 11:00Z is 16:30 at +05:30 -> out
        assert_eq!(schedule.infer(T0 + 3_600_000, None), GateDirection::Out);
        // 23:00Z is 04:30 next day -> out
        assert_eq!(schedule.infer(T0 + 13 * 3_600_000, None), GateDirection::Out);
        // 00:00Z is 05:30 -> in
        assert_eq!(schedule.infer(T0 + 14 * 3_600_000, None), GateDirection::In);
    }

    #[test]
    fn test_recent_events_filtered() {
        let mut reg = registry();
        reg.record_gate_event(event("T1", T0, 450.0, GateDirection::In));
        reg.record_gate_event(event("T2", T0 + 1, 300.0, GateDirection::In));
        reg.record_gate_event(event("T1", T0 + 2, 451.0, GateDirection::Out));

        let t1 = reg.recent_events(10, Some("T1"));
        assert_eq!(t1.len(), 2);
        assert_eq!(t1[0].timestamp, T0 + 2);
        assert_eq!(reg.recent_events(1, None)[0].rfid_tag, "T1");
        assert!(reg.recent_events(10, Some("T9")).is_empty());
    }

    #[test]
    fn test_snapshot_filter() {
        let mut reg = registry();
        reg.record_gate_event(event("T1", T0, 450.0, GateDirection::In));
        reg.record_gate_event(event("T2", T0, 300.0, GateDirection::In));
        assert_eq!(reg.snapshot(None).len(), 2);
        assert_eq!(reg.snapshot(Some("T2")).len(), 1);
        assert!(reg.snapshot(Some("nope")).is_empty());
    }

    #[test]
    fn test_stats_and_alerts() {
        let mut reg = registry();
        reg.record_gate_event(event("T1", T0, 400.0, GateDirection::In));
        reg.record_gate_event(event("T2", T0 + 1, 600.0, GateDirection::Out));
        reg.record_gate_event(event("T3", T0 + 2, 850.0, GateDirection::In));

        let stats = reg.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_exits, 1);
        assert_eq!(stats.unique_tags, 3);
        assert_eq!(stats.gate_readings, 3);
        let weight = stats.weight.unwrap();
        assert_eq!(weight.count, 3);
        assert_eq!(weight.minimum, 400.0);
        assert_eq!(weight.maximum, 850.0);
        assert_eq!(weight.average, 616.67);
        assert_eq!(
            stats.alerts,
            vec![GateAlert::HeavyCattle { rfid_tag: "T3".to_string(), weight: 850.0 }]
        );

        reg.record_gate_event(event("T4", T0 + 3, 150.0, GateDirection::In));
        assert!(matches!(reg.stats().alerts[0], GateAlert::LightCattle { .. }));
    }

    #[test]
    fn test_weight_summary_rounded() {
        let mut reg = registry();
        reg.record_gate_event(event("T1", T0, 412.456, GateDirection::In));
        reg.record_gate_event(event("T2", T0 + 1, 598.124, GateDirection::In));

        let weight = reg.stats().weight.unwrap();
        assert_eq!(weight.minimum, 412.46);
        assert_eq!(weight.maximum, 598.12);
        assert_eq!(weight.average, 505.29);
    }

    #[test]
    fn test_empty_stats() {
        let stats = registry().stats();
        assert_eq!(stats.unique_tags, 0);
        assert!(stats.weight.is_none());
        assert!(stats.alerts.is_empty());
    }
}
