//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and key is optional; missing values take the defaults below.

use crate::domain::types::GateDirection;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// How gate direction is inferred when neither payload nor reader position supply one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionInferenceMode {
    /// Leave the direction unknown
    #[default]
    None,
    /// Opposite of the tag's previous direction, first sighting is "in"
    Alternate,
    /// Time-of-day rule: "in" during the configured hours, "out" otherwise
    Schedule,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Farm identifier, used as a metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "farm".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Collar sensor topic filters (MQTT wildcards allowed)
    #[serde(default = "default_sensor_topics")]
    pub sensor_topics: Vec<String>,
    #[serde(default = "default_environment_topic")]
    pub environment_topic: String,
    #[serde(default = "default_gate_topic")]
    pub gate_topic: String,
    #[serde(default = "default_feed_topic")]
    pub feed_topic: String,
    /// Capacity of the connector -> ingest loop channel
    #[serde(default = "default_ingest_channel_capacity")]
    pub ingest_channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
            sensor_topics: default_sensor_topics(),
            environment_topic: default_environment_topic(),
            gate_topic: default_gate_topic(),
            feed_topic: default_feed_topic(),
            ingest_channel_capacity: default_ingest_channel_capacity(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "cattlenet".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_sensor_topics() -> Vec<String> {
    vec!["farm/sensor1".to_string(), "farm/sensors/+".to_string()]
}

fn default_environment_topic() -> String {
    "farm/environment".to_string()
}

fn default_gate_topic() -> String {
    "farm/gate".to_string()
}

fn default_feed_topic() -> String {
    "farm/feed_monitor".to_string()
}

fn default_ingest_channel_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Upper bound on a single connect attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// How long the broker may stay unreachable before synthetic data starts
    #[serde(default = "default_fallback_grace_ms")]
    pub fallback_grace_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            fallback_grace_ms: default_fallback_grace_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_fallback_grace_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_enabled")]
    pub enabled: bool,
    #[serde(default = "default_fallback_interval_ms")]
    pub interval_ms: u64,
    /// Animal ids the generator draws from
    #[serde(default = "default_roster")]
    pub roster: Vec<String>,
    /// Probability that a synthetic collar reading is anomalous
    #[serde(default = "default_anomaly_rate")]
    pub anomaly_rate: f64,
    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: default_fallback_enabled(),
            interval_ms: default_fallback_interval_ms(),
            roster: default_roster(),
            anomaly_rate: default_anomaly_rate(),
            seed: None,
        }
    }
}

fn default_fallback_enabled() -> bool {
    true
}

fn default_fallback_interval_ms() -> u64 {
    2000
}

fn default_roster() -> Vec<String> {
    (1..=5).map(|i| format!("COW{:03}", i)).collect()
}

fn default_anomaly_rate() -> f64 {
    0.2
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_sensor_history")]
    pub sensor: usize,
    #[serde(default = "default_environment_history")]
    pub environment: usize,
    #[serde(default = "default_gate_history")]
    pub gate: usize,
    #[serde(default = "default_feed_history")]
    pub feed: usize,
    /// Weight samples retained per animal
    #[serde(default = "default_weight_history")]
    pub weight: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            sensor: default_sensor_history(),
            environment: default_environment_history(),
            gate: default_gate_history(),
            feed: default_feed_history(),
            weight: default_weight_history(),
        }
    }
}

fn default_sensor_history() -> usize {
    100
}

fn default_environment_history() -> usize {
    50
}

fn default_gate_history() -> usize {
    200
}

fn default_feed_history() -> usize {
    100
}

fn default_weight_history() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Accelerometer magnitude above which motion is anomalous
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: f64,
    /// Gyroscope magnitude above which rotation is anomalous
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold: f64,
    #[serde(default = "default_temperature_min")]
    pub temperature_min: f64,
    #[serde(default = "default_temperature_max")]
    pub temperature_max: f64,
    /// Start of the in-band "monitoring" range
    #[serde(default = "default_temperature_monitor_from")]
    pub temperature_monitor_from: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            motion_threshold: default_motion_threshold(),
            rotation_threshold: default_rotation_threshold(),
            temperature_min: default_temperature_min(),
            temperature_max: default_temperature_max(),
            temperature_monitor_from: default_temperature_monitor_from(),
        }
    }
}

fn default_motion_threshold() -> f64 {
    250.0
}

fn default_rotation_threshold() -> f64 {
    6.0
}

fn default_temperature_min() -> f64 {
    37.0
}

fn default_temperature_max() -> f64 {
    40.5
}

fn default_temperature_monitor_from() -> f64 {
    39.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub direction_inference: DirectionInferenceMode,
    /// First hour (inclusive) of the "in" window for schedule inference
    #[serde(default = "default_in_from_hour")]
    pub in_from_hour: u8,
    /// Last hour (exclusive) of the "in" window for schedule inference
    #[serde(default = "default_in_until_hour")]
    pub in_until_hour: u8,
    /// Farm-local offset applied to event timestamps for schedule inference
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Reader position -> direction (e.g. "outer" = "in")
    #[serde(default)]
    pub positions: HashMap<String, GateDirection>,
    #[serde(default = "default_heavy_weight_kg")]
    pub heavy_weight_kg: f64,
    #[serde(default = "default_light_weight_kg")]
    pub light_weight_kg: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            direction_inference: DirectionInferenceMode::default(),
            in_from_hour: default_in_from_hour(),
            in_until_hour: default_in_until_hour(),
            utc_offset_minutes: default_utc_offset_minutes(),
            positions: HashMap::new(),
            heavy_weight_kg: default_heavy_weight_kg(),
            light_weight_kg: default_light_weight_kg(),
        }
    }
}

fn default_in_from_hour() -> u8 {
    5
}

fn default_in_until_hour() -> u8 {
    16
}

fn default_utc_offset_minutes() -> i32 {
    0
}

fn default_heavy_weight_kg() -> f64 {
    800.0
}

fn default_light_weight_kg() -> f64 {
    200.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Animal ids meaning "nobody at the station" (case-insensitive)
    #[serde(default = "default_sentinel_ids")]
    pub sentinel_ids: Vec<String>,
    /// (animal, timestamp) keys remembered for duplicate suppression
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { sentinel_ids: default_sentinel_ids(), dedup_window: default_dedup_window() }
    }
}

fn default_sentinel_ids() -> Vec<String> {
    ["", "none", "no cattle", "unknown", "no_cattle_detected"].iter().map(|s| s.to_string()).collect()
}

fn default_dedup_window() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    /// Light level above which it is day, when the payload has no flag
    #[serde(default = "default_day_light_threshold")]
    pub day_light_threshold: f64,
    #[serde(default = "default_high_temperature")]
    pub high_temperature: f64,
    #[serde(default = "default_low_temperature")]
    pub low_temperature: f64,
    #[serde(default = "default_high_humidity")]
    pub high_humidity: f64,
    #[serde(default = "default_low_humidity")]
    pub low_humidity: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            day_light_threshold: default_day_light_threshold(),
            high_temperature: default_high_temperature(),
            low_temperature: default_low_temperature(),
            high_humidity: default_high_humidity(),
            low_humidity: default_low_humidity(),
        }
    }
}

fn default_day_light_threshold() -> f64 {
    500.0
}

fn default_high_temperature() -> f64 {
    35.0
}

fn default_low_temperature() -> f64 {
    10.0
}

fn default_high_humidity() -> f64 {
    80.0
}

fn default_low_humidity() -> f64 {
    30.0
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SensorsConfig {
    /// Collar sensor id -> RFID tag of the animal wearing it
    #[serde(default)]
    pub rfid: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FanoutConfig {
    /// Updates buffered per live subscriber before the oldest are dropped
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { subscriber_queue: default_subscriber_queue() }
    }
}

fn default_subscriber_queue() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9100
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Run an embedded MQTT broker in-process
    #[serde(default)]
    pub embedded: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            embedded: false,
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Republish every update to `<topic_prefix>/<stream>`
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_egress_topic_prefix")]
    pub topic_prefix: String,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self { enabled: false, topic_prefix: default_egress_topic_prefix() }
    }
}

fn default_egress_topic_prefix() -> String {
    "cattlenet/updates".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default, alias = "egress")]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_keep_alive_secs: u64,
    sensor_topics: Vec<String>,
    environment_topic: String,
    gate_topic: String,
    feed_topic: String,
    ingest_channel_capacity: usize,
    connect_timeout_ms: u64,
    backoff_initial_ms: u64,
    backoff_max_ms: u64,
    fallback_grace_ms: u64,
    fallback_enabled: bool,
    fallback_interval_ms: u64,
    fallback_roster: Vec<String>,
    fallback_anomaly_rate: f64,
    fallback_seed: Option<u64>,
    sensor_history: usize,
    environment_history: usize,
    gate_history: usize,
    feed_history: usize,
    weight_history: usize,
    motion_threshold: f64,
    rotation_threshold: f64,
    temperature_min: f64,
    temperature_max: f64,
    temperature_monitor_from: f64,
    direction_inference: DirectionInferenceMode,
    gate_in_from_hour: u8,
    gate_in_until_hour: u8,
    gate_utc_offset_minutes: i32,
    gate_positions: HashMap<String, GateDirection>,
    heavy_weight_kg: f64,
    light_weight_kg: f64,
    feed_sentinel_ids: Vec<String>,
    feed_dedup_window: usize,
    day_light_threshold: f64,
    env_high_temperature: f64,
    env_low_temperature: f64,
    env_high_humidity: f64,
    env_low_humidity: f64,
    sensor_rfid: HashMap<String, String>,
    subscriber_queue: usize,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
    broker_embedded: bool,
    broker_bind_address: String,
    broker_port: u16,
    mqtt_egress_enabled: bool,
    mqtt_egress_topic_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Parse configuration from TOML text; `origin` is reported by `config_file()`
    pub fn from_toml_str(content: &str, origin: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {}", origin))?;

        let config = Self::from_toml(toml_config, origin.to_string());
        config.validate().with_context(|| format!("Invalid config file {}", origin))?;
        Ok(config)
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    fn from_toml(t: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: t.site.id,
            mqtt_host: t.mqtt.host,
            mqtt_port: t.mqtt.port,
            mqtt_client_id: t.mqtt.client_id,
            mqtt_username: t.mqtt.username,
            mqtt_password: t.mqtt.password,
            mqtt_keep_alive_secs: t.mqtt.keep_alive_secs,
            sensor_topics: t.mqtt.sensor_topics,
            environment_topic: t.mqtt.environment_topic,
            gate_topic: t.mqtt.gate_topic,
            feed_topic: t.mqtt.feed_topic,
            ingest_channel_capacity: t.mqtt.ingest_channel_capacity,
            connect_timeout_ms: t.connector.connect_timeout_ms,
            backoff_initial_ms: t.connector.backoff_initial_ms,
            backoff_max_ms: t.connector.backoff_max_ms,
            fallback_grace_ms: t.connector.fallback_grace_ms,
            fallback_enabled: t.fallback.enabled,
            fallback_interval_ms: t.fallback.interval_ms,
            fallback_roster: t.fallback.roster,
            fallback_anomaly_rate: t.fallback.anomaly_rate,
            fallback_seed: t.fallback.seed,
            sensor_history: t.history.sensor,
            environment_history: t.history.environment,
            gate_history: t.history.gate,
            feed_history: t.history.feed,
            weight_history: t.history.weight,
            motion_threshold: t.classifier.motion_threshold,
            rotation_threshold: t.classifier.rotation_threshold,
            temperature_min: t.classifier.temperature_min,
            temperature_max: t.classifier.temperature_max,
            temperature_monitor_from: t.classifier.temperature_monitor_from,
            direction_inference: t.gate.direction_inference,
            gate_in_from_hour: t.gate.in_from_hour,
            gate_in_until_hour: t.gate.in_until_hour,
            gate_utc_offset_minutes: t.gate.utc_offset_minutes,
            gate_positions: t.gate.positions,
            heavy_weight_kg: t.gate.heavy_weight_kg,
            light_weight_kg: t.gate.light_weight_kg,
            feed_sentinel_ids: t.feed.sentinel_ids,
            feed_dedup_window: t.feed.dedup_window,
            day_light_threshold: t.environment.day_light_threshold,
            env_high_temperature: t.environment.high_temperature,
            env_low_temperature: t.environment.low_temperature,
            env_high_humidity: t.environment.high_humidity,
            env_low_humidity: t.environment.low_humidity,
            sensor_rfid: t.sensors.rfid,
            subscriber_queue: t.fanout.subscriber_queue,
            metrics_interval_secs: t.metrics.interval_secs,
            prometheus_port: t.metrics.prometheus_port,
            config_file,
            broker_embedded: t.broker.embedded,
            broker_bind_address: t.broker.bind_address,
            broker_port: t.broker.port,
            mqtt_egress_enabled: t.mqtt_egress.enabled,
            mqtt_egress_topic_prefix: t.mqtt_egress.topic_prefix,
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.temperature_min < self.temperature_max,
            "classifier.temperature_min must be below temperature_max"
        );
        anyhow::ensure!(
            self.motion_threshold > 0.0 && self.rotation_threshold > 0.0,
            "classifier thresholds must be positive"
        );
        anyhow::ensure!(
            self.gate_in_from_hour < 24 && self.gate_in_until_hour <= 24,
            "gate schedule hours must be within 0-24"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.fallback_anomaly_rate),
            "fallback.anomaly_rate must be between 0 and 1"
        );
        anyhow::ensure!(!self.fallback_roster.is_empty(), "fallback.roster must not be empty");
        Ok(())
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_keep_alive_secs(&self) -> u64 {
        self.mqtt_keep_alive_secs
    }

    pub fn sensor_topics(&self) -> &[String] {
        &self.sensor_topics
    }

    pub fn environment_topic(&self) -> &str {
        &self.environment_topic
    }

    pub fn gate_topic(&self) -> &str {
        &self.gate_topic
    }

    pub fn feed_topic(&self) -> &str {
        &self.feed_topic
    }

    pub fn ingest_channel_capacity(&self) -> usize {
        self.ingest_channel_capacity.max(1)
    }

    pub fn connect_timeout_ms(&self) -> u64 {
        self.connect_timeout_ms
    }

    pub fn backoff_initial_ms(&self) -> u64 {
        self.backoff_initial_ms
    }

    pub fn backoff_max_ms(&self) -> u64 {
        self.backoff_max_ms
    }

    pub fn fallback_grace_ms(&self) -> u64 {
        self.fallback_grace_ms
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback_enabled
    }

    pub fn fallback_interval_ms(&self) -> u64 {
        self.fallback_interval_ms
    }

    pub fn fallback_roster(&self) -> &[String] {
        &self.fallback_roster
    }

    pub fn fallback_anomaly_rate(&self) -> f64 {
        self.fallback_anomaly_rate
    }

    pub fn fallback_seed(&self) -> Option<u64> {
        self.fallback_seed
    }

    pub fn sensor_history(&self) -> usize {
        self.sensor_history
    }

    pub fn environment_history(&self) -> usize {
        self.environment_history
    }

    pub fn gate_history(&self) -> usize {
        self.gate_history
    }

    pub fn feed_history(&self) -> usize {
        self.feed_history
    }

    pub fn weight_history(&self) -> usize {
        self.weight_history
    }

    pub fn motion_threshold(&self) -> f64 {
        self.motion_threshold
    }

    pub fn rotation_threshold(&self) -> f64 {
        self.rotation_threshold
    }

    pub fn temperature_min(&self) -> f64 {
        self.temperature_min
    }

    pub fn temperature_max(&self) -> f64 {
        self.temperature_max
    }

    pub fn temperature_monitor_from(&self) -> f64 {
        self.temperature_monitor_from
    }

    pub fn direction_inference(&self) -> DirectionInferenceMode {
        self.direction_inference
    }

    pub fn gate_in_from_hour(&self) -> u8 {
        self.gate_in_from_hour
    }

    pub fn gate_in_until_hour(&self) -> u8 {
        self.gate_in_until_hour
    }

    pub fn gate_utc_offset_minutes(&self) -> i32 {
        self.gate_utc_offset_minutes
    }

    pub fn gate_positions(&self) -> &HashMap<String, GateDirection> {
        &self.gate_positions
    }

    pub fn heavy_weight_kg(&self) -> f64 {
        self.heavy_weight_kg
    }

    pub fn light_weight_kg(&self) -> f64 {
        self.light_weight_kg
    }

    pub fn feed_sentinel_ids(&self) -> &[String] {
        &self.feed_sentinel_ids
    }

    pub fn feed_dedup_window(&self) -> usize {
        self.feed_dedup_window
    }

    pub fn day_light_threshold(&self) -> f64 {
        self.day_light_threshold
    }

    pub fn env_high_temperature(&self) -> f64 {
        self.env_high_temperature
    }

    pub fn env_low_temperature(&self) -> f64 {
        self.env_low_temperature
    }

    pub fn env_high_humidity(&self) -> f64 {
        self.env_high_humidity
    }

    pub fn env_low_humidity(&self) -> f64 {
        self.env_low_humidity
    }

    pub fn sensor_rfid(&self) -> &HashMap<String, String> {
        &self.sensor_rfid
    }

    pub fn subscriber_queue(&self) -> usize {
        self.subscriber_queue.max(1)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn broker_embedded(&self) -> bool {
        self.broker_embedded
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_topic_prefix(&self) -> &str {
        &self.mqtt_egress_topic_prefix
    }

    /// Builder method for tests to shorten connector timings
    #[cfg(test)]
    pub fn with_connector_timing(
        mut self,
        connect_timeout_ms: u64,
        backoff_initial_ms: u64,
        backoff_max_ms: u64,
        fallback_grace_ms: u64,
    ) -> Self {
        self.connect_timeout_ms = connect_timeout_ms;
        self.backoff_initial_ms = backoff_initial_ms;
        self.backoff_max_ms = backoff_max_ms;
        self.fallback_grace_ms = fallback_grace_ms;
        self
    }

    /// Builder method for tests to set the direction inference strategy
    #[cfg(test)]
    pub fn with_direction_inference(mut self, mode: DirectionInferenceMode) -> Self {
        self.direction_inference = mode;
        self
    }

    /// Builder method for tests to set collar -> RFID mappings
    #[cfg(test)]
    pub fn with_sensor_rfid(mut self, rfid: HashMap<String, String>) -> Self {
        self.sensor_rfid = rfid;
        self
    }

    /// Builder method for tests to set the subscriber queue length
    #[cfg(test)]
    pub fn with_subscriber_queue(mut self, len: usize) -> Self {
        self.subscriber_queue = len;
        self
    }
}
