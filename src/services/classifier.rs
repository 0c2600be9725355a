//! Rule-based health classifier
//!
//! Pure and deterministic: the same reading always yields the same result.
//! A reading is anomalous when motion or rotation magnitude exceeds its
//! threshold or a reported body temperature leaves the healthy band.
//! Confidence grows with the relative distance `d` from the deciding
//! threshold: `50 + 50 * (1 - e^(-3d))`.

use crate::domain::types::{ClassificationResult, HealthLabel, SensorReading};
use crate::infra::config::Config;

const CONFIDENCE_STEEPNESS: f64 = 3.0;

const FACTOR_HIGH_MOTION: &str = "high motion activity";
const FACTOR_HIGH_ROTATION: &str = "high rotational activity";
const FACTOR_HIGH_TEMP: &str = "elevated body temperature";
const FACTOR_LOW_TEMP: &str = "low body temperature";
const FACTOR_MONITOR_TEMP: &str = "body temperature in monitoring range";
const FACTOR_MOTION: &str = "motion activity";
const FACTOR_ROTATION: &str = "rotational activity";
const FACTOR_TEMP: &str = "body temperature";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub motion: f64,
    pub rotation: f64,
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub temperature_monitor_from: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            motion: 250.0,
            rotation: 6.0,
            temperature_min: 37.0,
            temperature_max: 40.5,
            temperature_monitor_from: 39.5,
        }
    }
}

/// One metric's relative position against its threshold
struct Deviation {
    factor: &'static str,
    /// Exceedance (anomalous) or load toward the threshold (normal)
    magnitude: f64,
}

#[derive(Debug, Clone)]
pub struct HealthClassifier {
    thresholds: Thresholds,
}

impl HealthClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Thresholds {
            motion: config.motion_threshold(),
            rotation: config.rotation_threshold(),
            temperature_min: config.temperature_min(),
            temperature_max: config.temperature_max(),
            temperature_monitor_from: config.temperature_monitor_from(),
        })
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn classify(&self, reading: &SensorReading) -> ClassificationResult {
        let t = &self.thresholds;
        let motion = reading.accelerometer.magnitude();
        let rotation = reading.gyroscope.magnitude();
        let band_half = (t.temperature_max - t.temperature_min) / 2.0;

        let mut anomalies: Vec<Deviation> = Vec::new();
        let mut loads: Vec<Deviation> = Vec::new();
        // Smallest relative headroom left before any threshold
        let mut headroom = f64::INFINITY;
        let mut monitoring = false;

        let motion_rel = (motion - t.motion) / t.motion;
        if motion > t.motion {
            anomalies.push(Deviation { factor: FACTOR_HIGH_MOTION, magnitude: motion_rel });
        } else {
            headroom = headroom.min(-motion_rel);
            loads.push(Deviation { factor: FACTOR_MOTION, magnitude: motion / t.motion });
        }

        let rotation_rel = (rotation - t.rotation) / t.rotation;
        if rotation > t.rotation {
            anomalies.push(Deviation { factor: FACTOR_HIGH_ROTATION, magnitude: rotation_rel });
        } else {
            headroom = headroom.min(-rotation_rel);
            loads.push(Deviation { factor: FACTOR_ROTATION, magnitude: rotation / t.rotation });
        }

        if reading.has_temperature() {
            let temp = reading.temperature;
            if temp > t.temperature_max {
                anomalies.push(Deviation {
                    factor: FACTOR_HIGH_TEMP,
                    magnitude: (temp - t.temperature_max) / band_half,
                });
            } else if temp < t.temperature_min {
                anomalies.push(Deviation {
                    factor: FACTOR_LOW_TEMP,
                    magnitude: (t.temperature_min - temp) / band_half,
                });
            } else {
                let temp_headroom = (temp - t.temperature_min).min(t.temperature_max - temp) / band_half;
                headroom = headroom.min(temp_headroom);
                monitoring = temp >= t.temperature_monitor_from;
                loads.push(Deviation { factor: FACTOR_TEMP, magnitude: 1.0 - temp_headroom });
            }
        }

        if !anomalies.is_empty() {
            sort_by_magnitude(&mut anomalies);
            let d = anomalies[0].magnitude;
            return ClassificationResult {
                label: HealthLabel::Anomaly,
                confidence: confidence(d),
                factors: anomalies.into_iter().map(|a| a.factor.to_string()).collect(),
                motion_magnitude: round2(motion),
                rotation_magnitude: round2(rotation),
            };
        }

        sort_by_magnitude(&mut loads);
        let mut factors = Vec::with_capacity(loads.len() + 1);
        if monitoring {
            factors.push(FACTOR_MONITOR_TEMP.to_string());
        }
        factors.extend(loads.into_iter().map(|l| l.factor.to_string()));

        ClassificationResult {
            label: HealthLabel::Normal,
            confidence: confidence(headroom),
            factors,
            motion_magnitude: round2(motion),
            rotation_magnitude: round2(rotation),
        }
    }
}

impl Default for HealthClassifier {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

fn sort_by_magnitude(deviations: &mut [Deviation]) {
    deviations.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
}

/// Saturating confidence in [50, 100]
fn confidence(d: f64) -> f64 {
    let d = if d.is_finite() { d.max(0.0) } else { 0.0 };
    round2(50.0 + 50.0 * (1.0 - (-CONFIDENCE_STEEPNESS * d).exp()))
}

#[inline]
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
