//! Derived statistics over buffered history
//!
//! Pure functions; the engine calls them with the state it copied under lock.

use crate::domain::types::{ClassifiedReading, EnvironmentReading, HealthLabel};
use crate::infra::config::Config;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

/// Day/night is decided on the mean of this many most recent light readings
const DAY_NIGHT_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionSummary {
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStats {
    pub total_samples: usize,
    pub normal_count: usize,
    pub anomaly_count: usize,
    pub anomaly_percentage: f64,
    /// Distinct animals seen on any stream
    pub unique_animals: usize,
    /// Animals whose latest classification is Normal
    pub healthy_animals: usize,
    pub healthy_percentage: f64,
    /// Mean over readings that reported a body temperature
    pub average_temperature: Option<f64>,
    pub motion: Option<MotionSummary>,
}

/// Compute health statistics over the sensor history.
///
/// `other_ids` are animal ids seen on the gate and feed streams.
pub fn health_stats<'a>(
    history: &'a [ClassifiedReading],
    other_ids: impl IntoIterator<Item = &'a str>,
) -> HealthStats {
    let total = history.len();
    let anomaly_count = history.iter().filter(|r| r.health.is_anomaly()).count();
    let normal_count = total - anomaly_count;

    // Oldest first, so the last write wins
    let mut latest: FxHashMap<&str, HealthLabel> = FxHashMap::default();
    for r in history {
        latest.insert(r.reading.cattle_id.as_str(), r.health.label);
    }
    let healthy_animals = latest.values().filter(|l| **l == HealthLabel::Normal).count();

    let mut animals: FxHashSet<&str> = latest.keys().copied().collect();
    animals.extend(other_ids);
    animals.remove("");

    let temps: Vec<f64> =
        history.iter().filter(|r| r.reading.has_temperature()).map(|r| r.reading.temperature).collect();
    let average_temperature = mean(&temps).map(round2);

    let motions: Vec<f64> = history.iter().map(|r| r.health.motion_magnitude).collect();
    let motion = mean(&motions).map(|avg| MotionSummary {
        average: round2(avg),
        minimum: round2(motions.iter().copied().fold(f64::INFINITY, f64::min)),
        maximum: round2(motions.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
    });

    HealthStats {
        total_samples: total,
        normal_count,
        anomaly_count,
        anomaly_percentage: percentage(anomaly_count, total),
        unique_animals: animals.len(),
        healthy_animals,
        healthy_percentage: percentage(healthy_animals, latest.len()),
        average_temperature,
        motion,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentThresholds {
    pub day_light: f64,
    pub high_temperature: f64,
    pub low_temperature: f64,
    pub high_humidity: f64,
    pub low_humidity: f64,
}

impl EnvironmentThresholds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            day_light: config.day_light_threshold(),
            high_temperature: config.env_high_temperature(),
            low_temperature: config.env_low_temperature(),
            high_humidity: config.env_high_humidity(),
            low_humidity: config.env_low_humidity(),
        }
    }
}

impl Default for EnvironmentThresholds {
    fn default() -> Self {
        Self {
            day_light: 500.0,
            high_temperature: 35.0,
            low_temperature: 10.0,
            high_humidity: 80.0,
            low_humidity: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentAlert {
    HighTemperature,
    LowTemperature,
    HighHumidity,
    LowHumidity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentStats {
    pub current: Option<EnvironmentReading>,
    /// From the mean of the most recent light readings
    pub is_day: bool,
    pub average_light: Option<f64>,
    /// Means over readings that reported a value (> 0)
    pub average_temperature: Option<f64>,
    pub average_humidity: Option<f64>,
    pub readings: usize,
    /// Raised on the current reading
    pub alerts: Vec<EnvironmentAlert>,
}

/// Compute environment statistics over the history (oldest first)
pub fn environment_stats(history: &[EnvironmentReading], thresholds: &EnvironmentThresholds) -> EnvironmentStats {
    let current = history.last().cloned();

    let recent_light: Vec<f64> =
        history.iter().rev().take(DAY_NIGHT_WINDOW).map(|r| r.light_level).collect();
    let is_day = mean(&recent_light).map_or(false, |light| light > thresholds.day_light);

    let lights: Vec<f64> = history.iter().map(|r| r.light_level).collect();
    let temps: Vec<f64> =
        history.iter().map(|r| r.ambient_temperature).filter(|t| *t > 0.0).collect();
    let humidities: Vec<f64> = history.iter().map(|r| r.humidity).filter(|h| *h > 0.0).collect();

    let mut alerts = Vec::new();
    if let Some(now) = &current {
        let t = now.ambient_temperature;
        if t > 0.0 && t > thresholds.high_temperature {
            alerts.push(EnvironmentAlert::HighTemperature);
        }
        if t > 0.0 && t < thresholds.low_temperature {
            alerts.push(EnvironmentAlert::LowTemperature);
        }
        let h = now.humidity;
        if h > 0.0 && h > thresholds.high_humidity {
            alerts.push(EnvironmentAlert::HighHumidity);
        }
        if h > 0.0 && h < thresholds.low_humidity {
            alerts.push(EnvironmentAlert::LowHumidity);
        }
    }

    EnvironmentStats {
        current,
        is_day,
        average_light: mean(&lights).map(round2),
        average_temperature: mean(&temps).map(round2),
        average_humidity: mean(&humidities).map(round2),
        readings: history.len(),
        alerts,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(part as f64 * 100.0 / total as f64)
    }
}

#[inline]
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
