//! Canonical record types shared by every farm stream

use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Telemetry stream a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Sensor,
    Environment,
    Gate,
    Feed,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] =
        [StreamKind::Sensor, StreamKind::Environment, StreamKind::Gate, StreamKind::Feed];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Sensor => "sensor",
            StreamKind::Environment => "environment",
            StreamKind::Gate => "gate",
            StreamKind::Feed => "feed",
        }
    }

    /// Dense index for per-stream counter arrays
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            StreamKind::Sensor => 0,
            StreamKind::Environment => 1,
            StreamKind::Gate => 2,
            StreamKind::Feed => 3,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a record. Never serialized: synthetic data looks exactly like live data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provenance {
    #[default]
    Live,
    Synthetic,
}

/// Three-axis vector (accelerometer or gyroscope)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Axes3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Axes3 {
    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm
    #[inline]
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Motion/temperature reading from a collar sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub cattle_id: String,
    /// Epoch milliseconds
    pub timestamp: u64,
    pub accelerometer: Axes3,
    pub gyroscope: Axes3,
    /// Body temperature in °C, 0 when the collar did not report one
    pub temperature: f64,
}

impl SensorReading {
    #[inline]
    pub fn has_temperature(&self) -> bool {
        self.temperature > 0.0
    }
}

/// Barn environment reading (LDR, DHT11, presence sensor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReading {
    pub timestamp: u64,
    pub light_level: f64,
    pub is_day: bool,
    pub ambient_temperature: f64,
    pub humidity: f64,
    pub cattle_presence: bool,
}

/// Direction an animal passed the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDirection {
    In,
    Out,
    #[default]
    Unknown,
}

impl GateDirection {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            GateDirection::In => "in",
            GateDirection::Out => "out",
            GateDirection::Unknown => "unknown",
        }
    }

    /// Parse the direction vocabularies used by gate firmware revisions
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "in" | "entry" | "enter" | "entered" => Some(GateDirection::In),
            "out" | "exit" | "leave" | "exited" => Some(GateDirection::Out),
            "unknown" => Some(GateDirection::Unknown),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            GateDirection::In => GateDirection::Out,
            GateDirection::Out => GateDirection::In,
            GateDirection::Unknown => GateDirection::Unknown,
        }
    }

    #[inline]
    pub fn is_known(&self) -> bool {
        !matches!(self, GateDirection::Unknown)
    }
}

/// RFID + load cell reading at the pasture gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvent {
    pub rfid_tag: String,
    pub timestamp: u64,
    /// Load cell weight in kg, 0 when the cell did not settle
    pub weight: f64,
    pub direction: GateDirection,
    pub gate_status: String,
    /// Reader position reported by multi-reader gates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightSample {
    pub weight: f64,
    pub timestamp: u64,
}

/// Registry entry for one RFID tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CattleRecord {
    pub rfid_tag: String,
    pub latest_weight: f64,
    pub weight_history: Vec<WeightSample>,
    pub total_entries: u64,
    pub total_exits: u64,
    pub first_seen: u64,
    pub last_seen: u64,
    pub last_direction: GateDirection,
}

impl CattleRecord {
    pub fn new(rfid_tag: &str, first_seen: u64) -> Self {
        Self {
            rfid_tag: rfid_tag.to_string(),
            latest_weight: 0.0,
            weight_history: Vec::new(),
            total_entries: 0,
            total_exits: 0,
            first_seen,
            last_seen: first_seen,
            last_direction: GateDirection::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthLabel {
    Normal,
    Anomaly,
}

impl HealthLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLabel::Normal => "Normal",
            HealthLabel::Anomaly => "Anomaly",
        }
    }
}

/// Output of the rule-based health classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: HealthLabel,
    /// 0-100
    pub confidence: f64,
    /// Contributing factors, largest deviation first
    pub factors: Vec<String>,
    pub motion_magnitude: f64,
    pub rotation_magnitude: f64,
}

impl ClassificationResult {
    #[inline]
    pub fn is_anomaly(&self) -> bool {
        self.label == HealthLabel::Anomaly
    }
}

/// Sensor reading paired with the classification computed at ingest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedReading {
    pub reading: SensorReading,
    pub health: ClassificationResult,
}

/// Feed station visit as reported by the station (before/after scale readings)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStationReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cattle_id: Option<String>,
    pub timestamp: u64,
    pub feed_before: f64,
    pub feed_after: f64,
    pub water_before: f64,
    pub water_after: f64,
    pub water_present: bool,
}

/// Validated consumption derived from a feed station visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedActivity {
    pub cattle_id: String,
    pub feed_consumed: f64,
    pub water_consumed: f64,
    pub water_present: bool,
    pub timestamp: u64,
}

/// Normalized record from any stream
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Sensor(SensorReading),
    Environment(EnvironmentReading),
    Gate(GateEvent),
    Feed(FeedStationReading),
}

impl Record {
    pub fn kind(&self) -> StreamKind {
        match self {
            Record::Sensor(_) => StreamKind::Sensor,
            Record::Environment(_) => StreamKind::Environment,
            Record::Gate(_) => StreamKind::Gate,
            Record::Feed(_) => StreamKind::Feed,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Record::Sensor(r) => r.timestamp,
            Record::Environment(r) => r.timestamp,
            Record::Gate(r) => r.timestamp,
            Record::Feed(r) => r.timestamp,
        }
    }

    /// Render the record as a wire payload the normalizer accepts
    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Record::Sensor(r) => serde_json::to_value(r),
            Record::Environment(r) => serde_json::to_value(r),
            Record::Gate(r) => serde_json::to_value(r),
            Record::Feed(r) => serde_json::to_value(r),
        }
    }
}

/// Record on its way to the ingest loop
#[derive(Debug, Clone)]
pub struct Inbound {
    pub record: Record,
    pub provenance: Provenance,
    pub received_at: Instant,
}

impl Inbound {
    pub fn live(record: Record) -> Self {
        Self { record, provenance: Provenance::Live, received_at: Instant::now() }
    }

    pub fn synthetic(record: Record) -> Self {
        Self { record, provenance: Provenance::Synthetic, received_at: Instant::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_direction_parse() {
        assert_eq!(GateDirection::parse("IN"), Some(GateDirection::In));
        assert_eq!(GateDirection::parse("entry"), Some(GateDirection::In));
        assert_eq!(GateDirection::parse(" exit "), Some(GateDirection::Out));
        assert_eq!(GateDirection::parse("unknown"), Some(GateDirection::Unknown));
        assert_eq!(GateDirection::parse("sideways"), None);
    }

    #[test]
    fn test_axes_magnitude() {
        assert!((Axes3::new(3.0, 4.0, 0.0).magnitude() - 5.0).abs() < 1e-9);
        assert_eq!(Axes3::default().magnitude(), 0.0);
    }

    #[test]
    fn test_gate_event_serializes_lowercase_direction() {
        let event = GateEvent {
            rfid_tag: "E3882528".to_string(),
            timestamp: 1_767_617_600_000,
            weight: 452.5,
            direction: GateDirection::Out,
            gate_status: "open".to_string(),
            position: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["direction"], "out");
        assert!(json.get("position").is_none());
    }
}
