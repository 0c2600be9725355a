//! Integration tests for configuration loading

use cattlenet::domain::types::GateDirection;
use cattlenet::infra::{Config, DirectionInferenceMode};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "north_paddock"

[mqtt]
host = "barn-gw.local"
port = 1884
username = "gateway"
password = "hay"
sensor_topics = ["barn/collar/+"]
gate_topic = "barn/gate"

[connector]
backoff_initial_ms = 250
fallback_grace_ms = 4000

[fallback]
roster = ["BESSIE", "DAISY"]
seed = 11

[history]
sensor = 20
weight = 5

[gate]
direction_inference = "schedule"
utc_offset_minutes = 120

[gate.positions]
outer = "in"
inner = "out"

[sensors.rfid]
sensor1 = "E3882528"

[metrics]
interval_secs = 15
prometheus_port = 9091

[egress]
enabled = true
topic_prefix = "dash/live"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "north_paddock");
    assert_eq!(config.mqtt_host(), "barn-gw.local");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_username(), Some("gateway"));
    assert_eq!(config.sensor_topics(), &["barn/collar/+".to_string()]);
    assert_eq!(config.gate_topic(), "barn/gate");
    // Unset keys keep their defaults
    assert_eq!(config.environment_topic(), "farm/environment");
    assert_eq!(config.backoff_initial_ms(), 250);
    assert_eq!(config.backoff_max_ms(), 30_000);
    assert_eq!(config.fallback_grace_ms(), 4000);
    assert_eq!(config.fallback_roster(), &["BESSIE".to_string(), "DAISY".to_string()]);
    assert_eq!(config.fallback_seed(), Some(11));
    assert_eq!(config.sensor_history(), 20);
    assert_eq!(config.environment_history(), 50);
    assert_eq!(config.weight_history(), 5);
    assert_eq!(config.direction_inference(), DirectionInferenceMode::Schedule);
    assert_eq!(config.gate_utc_offset_minutes(), 120);
    assert_eq!(config.gate_positions().get("outer"), Some(&GateDirection::In));
    assert_eq!(config.sensor_rfid().get("sensor1").map(String::as_str), Some("E3882528"));
    assert_eq!(config.prometheus_port(), 9091);
    assert!(config.mqtt_egress_enabled());
    assert_eq!(config.mqtt_egress_topic_prefix(), "dash/live");
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.direction_inference(), DirectionInferenceMode::None);
}

#[test]
fn test_invalid_values_fall_back_to_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[classifier]\ntemperature_min = 41.0\ntemperature_max = 39.0\n")
        .unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());

    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.temperature_min(), 37.0);
    assert_eq!(config.temperature_max(), 40.5);
}

#[test]
fn test_malformed_toml_rejected() {
    let err = Config::from_toml_str("[mqtt\nhost = ", "inline").unwrap_err();
    assert!(format!("{:#}", err).contains("inline"));
}
