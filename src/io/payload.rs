//! Payload normalization for the four farm streams
//!
//! Collar, environment, gate and feed firmware revisions disagree on field
//! names, so every logical field has an ordered alias list (first usable value
//! wins; nulls and wrong-typed values fall through to the next alias).
//! Missing, non-numeric or non-finite numbers become 0; numeric strings are
//! parsed. Identifying
//! fields are required: timestamp everywhere, animal id for collars and the
//! RFID tag for the gate.

use crate::domain::error::{IngestError, Result};
use crate::domain::types::{
    Axes3, EnvironmentReading, FeedStationReading, GateDirection, GateEvent, Record,
    SensorReading, StreamKind,
};
use crate::infra::config::Config;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::parsing::Parsable;
use time::{OffsetDateTime, PrimitiveDateTime};

type Object = Map<String, Value>;

const TIMESTAMP: &[&str] = &["timestamp", "ts", "time"];

const SENSOR_ID: &[&str] = &["cattle_id", "cattleId", "cattleID", "id"];
const ACC_X: &[&str] = &["acc_x", "ax", "accX"];
const ACC_Y: &[&str] = &["acc_y", "ay", "accY"];
const ACC_Z: &[&str] = &["acc_z", "az", "accZ"];
const ACC_NESTED: &[&str] = &["accelerometer", "acc"];
const GYRO_X: &[&str] = &["gyro_x", "gx", "gyroX"];
const GYRO_Y: &[&str] = &["gyro_y", "gy", "gyroY"];
const GYRO_Z: &[&str] = &["gyro_z", "gz", "gyroZ"];
const GYRO_NESTED: &[&str] = &["gyroscope", "gyro"];
const BODY_TEMP: &[&str] = &["temperature", "body_temperature", "temp", "t"];

const LIGHT: &[&str] = &["ldrValue", "ldr_value", "ldr", "light_level", "light"];
const DAY_FLAG: &[&str] = &["isDay", "is_day", "dayNight", "day_night"];
const AMBIENT_TEMP: &[&str] = &["temperature", "ambient_temperature", "dht11_temp", "env_temp"];
const HUMIDITY: &[&str] = &["humidity", "dht11_humidity"];
const PRESENCE: &[&str] = &["cattlePresence", "cattle_presence", "presence", "motion"];

const RFID: &[&str] = &["rfidTag", "rfid_tag", "rfid"];
const WEIGHT: &[&str] = &["weight", "loadCell", "load_cell"];
const DIRECTION: &[&str] = &["direction", "event"];
const GATE_STATUS: &[&str] = &["gateStatus", "gate_status", "status"];
const POSITION: &[&str] = &["position", "reader", "gate_id"];

const FEED_ID: &[&str] = &["cattleID", "cattle_id", "cattleName", "rfid_tag", "rfid"];
const FEED_BEFORE: &[&str] = &["feed_before", "feedBefore"];
const FEED_AFTER: &[&str] = &["feed_after", "feedAfter"];
const FEED_CONSUMED: &[&str] = &["feedConsumed", "feed_consumed"];
const WATER_BEFORE: &[&str] = &["water_before", "waterBefore"];
const WATER_AFTER: &[&str] = &["water_after", "waterAfter"];
const WATER_CONSUMED: &[&str] = &["waterConsumed", "water_consumed"];
const WATER_PRESENT: &[&str] = &["waterStatus", "water_present", "waterPresent"];

/// Feed station status meaning nobody is at the trough
const NO_CATTLE_STATUS: &str = "no_cattle_detected";

/// Epoch values below this are seconds, above are milliseconds
const EPOCH_MS_CUTOFF: f64 = 1e11;

/// Decodes raw stream payloads into canonical records
#[derive(Debug, Clone)]
pub struct Normalizer {
    day_light_threshold: f64,
    /// Collar sensor id -> RFID tag
    sensor_rfid: FxHashMap<String, String>,
}

impl Normalizer {
    pub fn new(day_light_threshold: f64, sensor_rfid: FxHashMap<String, String>) -> Self {
        Self { day_light_threshold, sensor_rfid }
    }

    pub fn from_config(config: &Config) -> Self {
        let sensor_rfid =
            config.sensor_rfid().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Self::new(config.day_light_threshold(), sensor_rfid)
    }

    /// Decode a raw MQTT payload
    pub fn decode(&self, kind: StreamKind, topic: &str, payload: &[u8]) -> Result<Record> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| IngestError::malformed(topic, format!("invalid JSON: {}", e)))?;
        self.normalize(kind, topic, &value)
    }

    /// Normalize an already-parsed JSON body
    pub fn normalize(&self, kind: StreamKind, topic: &str, value: &Value) -> Result<Record> {
        let obj = value
            .as_object()
            .ok_or_else(|| IngestError::malformed(topic, "payload is not a JSON object"))?;

        let timestamp = timestamp(obj)
            .ok_or_else(|| IngestError::malformed(topic, "missing or unparseable timestamp"))?;

        match kind {
            StreamKind::Sensor => self.sensor(topic, obj, timestamp).map(Record::Sensor),
            StreamKind::Environment => Ok(Record::Environment(self.environment(obj, timestamp))),
            StreamKind::Gate => gate(topic, obj, timestamp).map(Record::Gate),
            StreamKind::Feed => Ok(Record::Feed(feed(obj, timestamp))),
        }
    }

    fn sensor(&self, topic: &str, obj: &Object, timestamp: u64) -> Result<SensorReading> {
        let raw_id = text(obj, SENSOR_ID)
            .or_else(|| topic.rsplit('/').next().filter(|s| !s.is_empty()).map(str::to_string))
            .ok_or_else(|| IngestError::malformed(topic, "missing cattle id"))?;
        let cattle_id = self.sensor_rfid.get(&raw_id).cloned().unwrap_or(raw_id);

        Ok(SensorReading {
            cattle_id,
            timestamp,
            accelerometer: axes(obj, [ACC_X, ACC_Y, ACC_Z], ACC_NESTED),
            gyroscope: axes(obj, [GYRO_X, GYRO_Y, GYRO_Z], GYRO_NESTED),
            temperature: number(obj, BODY_TEMP),
        })
    }

    fn environment(&self, obj: &Object, timestamp: u64) -> EnvironmentReading {
        let light_level = number(obj, LIGHT);
        let is_day = flag(obj, DAY_FLAG).unwrap_or(light_level > self.day_light_threshold);

        EnvironmentReading {
            timestamp,
            light_level,
            is_day,
            ambient_temperature: number(obj, AMBIENT_TEMP),
            humidity: number(obj, HUMIDITY),
            cattle_presence: flag(obj, PRESENCE).unwrap_or(false),
        }
    }
}

fn gate(topic: &str, obj: &Object, timestamp: u64) -> Result<GateEvent> {
    let rfid_tag = text(obj, RFID).ok_or_else(|| IngestError::malformed(topic, "missing RFID tag"))?;
    let direction = text(obj, DIRECTION)
        .and_then(|d| GateDirection::parse(&d))
        .unwrap_or(GateDirection::Unknown);

    Ok(GateEvent {
        rfid_tag,
        timestamp,
        weight: number(obj, WEIGHT),
        direction,
        gate_status: text(obj, GATE_STATUS).unwrap_or_else(|| "unknown".to_string()),
        position: text(obj, POSITION),
    })
}

fn feed(obj: &Object, timestamp: u64) -> FeedStationReading {
    let no_cattle = obj
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.trim().eq_ignore_ascii_case(NO_CATTLE_STATUS));
    let cattle_id = if no_cattle { None } else { text(obj, FEED_ID) };

    let (feed_before, feed_after) = before_after(obj, FEED_BEFORE, FEED_AFTER, FEED_CONSUMED);
    let (water_before, water_after) =
        before_after(obj, WATER_BEFORE, WATER_AFTER, WATER_CONSUMED);
    let water_present = flag(obj, WATER_PRESENT).unwrap_or(water_before - water_after > 0.0);

    FeedStationReading {
        cattle_id,
        timestamp,
        feed_before,
        feed_after,
        water_before,
        water_after,
        water_present,
    }
}

/// Scale readings, or a bare consumed value mapped to (consumed, 0)
fn before_after(obj: &Object, before: &[&str], after: &[&str], consumed: &[&str]) -> (f64, f64) {
    if find(obj, before).is_some() || find(obj, after).is_some() {
        (number(obj, before), number(obj, after))
    } else {
        (number(obj, consumed), 0.0)
    }
}

/// First non-null value whose key matches an alias
#[inline]
fn find<'a>(obj: &'a Object, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().filter_map(|key| obj.get(*key)).find(|v| !v.is_null())
}

/// First alias whose value `read` accepts; unusable values fall through to the next alias
#[inline]
fn pick<'a, T>(obj: &'a Object, aliases: &[&str], read: impl Fn(&'a Value) -> Option<T>) -> Option<T> {
    aliases.iter().filter_map(|key| obj.get(*key)).find_map(read)
}

/// Numeric field; missing, non-numeric or non-finite decodes to 0
fn number(obj: &Object, aliases: &[&str]) -> f64 {
    pick(obj, aliases, to_number).unwrap_or(0.0)
}

fn to_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|v| v.is_finite())
}

/// Three-axis vector from flat aliases, falling back to a nested {x,y,z} object
fn axes(obj: &Object, flat: [&[&str]; 3], nested: &[&str]) -> Axes3 {
    if flat.iter().any(|aliases| find(obj, aliases).is_some()) {
        return Axes3::new(number(obj, flat[0]), number(obj, flat[1]), number(obj, flat[2]));
    }
    match pick(obj, nested, Value::as_object) {
        Some(inner) => Axes3::new(number(inner, &["x"]), number(inner, &["y"]), number(inner, &["z"])),
        None => Axes3::default(),
    }
}

/// Non-empty string (numbers are stringified, tags are sometimes numeric)
fn text(obj: &Object, aliases: &[&str]) -> Option<String> {
    pick(obj, aliases, |value| match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Boolean-ish field: bools, numbers, and the vocabularies the devices send
fn flag(obj: &Object, aliases: &[&str]) -> Option<bool> {
    pick(obj, aliases, |value| match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "day" | "on" | "cattle detected" | "detected" | "present"
            | "available" | "ok" => Some(true),
            "false" | "no" | "0" | "night" | "off" | "no cattle" | "not detected" | "absent"
            | "empty" | "missing" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn timestamp(obj: &Object) -> Option<u64> {
    pick(obj, TIMESTAMP, |value| match value {
        Value::Number(n) => epoch_to_ms(n.as_f64()?),
        Value::String(s) => parse_timestamp(s),
        _ => None,
    })
}

fn epoch_to_ms(value: f64) -> Option<u64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value < EPOCH_MS_CUTOFF {
        Some((value * 1000.0).round() as u64)
    } else {
        Some(value.round() as u64)
    }
}

/// Parse an epoch number, RFC 3339, or naive ISO timestamp (naive = UTC)
pub fn parse_timestamp(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(n) = value.parse::<f64>() {
        return epoch_to_ms(n);
    }

    let parsed = OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .or_else(|| naive(value, format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]")))
        .or_else(|| naive(value, format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]")))
        .or_else(|| naive(value, format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]")))
        .or_else(|| naive(value, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]")))?;

    let ms = parsed.unix_timestamp_nanos() / 1_000_000;
    u64::try_from(ms).ok()
}

fn naive(value: &str, format: &(impl Parsable + ?Sized)) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value, format).ok().map(PrimitiveDateTime::assume_utc)
}
