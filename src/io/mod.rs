//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `connector` - MQTT stream connector with reconnect backoff and fallback switch
//! - `payload` - Normalizer for every historical payload shape
//! - `topics` - Topic filter matching and stream routing
//! - `fanout` - Live update broadcast to subscribers
//! - `mqtt_egress` - MQTT republisher for live updates
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod connector;
pub mod fanout;
pub mod mqtt_egress;
pub mod payload;
pub mod prometheus;
pub mod topics;

// Re-export commonly used types
pub use connector::{BrokerEvent, BrokerSession, Connector, ConnectorState, ConnectorStatus, MqttSession};
pub use fanout::{Fanout, Subscription, Update, UpdatePayload};
pub use mqtt_egress::MqttPublisher;
pub use payload::Normalizer;
pub use topics::TopicRouter;
