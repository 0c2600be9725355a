//! MQTT publisher for live updates
//!
//! A fan-out subscriber that republishes every update as JSON on
//! `<topic_prefix>/<stream>` (QoS 0) for dashboards on the farm network:
//! - cattlenet/updates/sensor
//! - cattlenet/updates/environment
//! - cattlenet/updates/gate
//! - cattlenet/updates/feed

use crate::domain::types::StreamKind;
use crate::infra::config::Config;
use crate::io::fanout::{Subscription, Update};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// MQTT publisher actor
///
/// Reads the update fan-out and publishes to per-stream topics.
pub struct MqttPublisher {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    updates: Subscription,
    topic_prefix: String,
    published: u64,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, updates: Subscription) -> Self {
        let suffix = Uuid::now_v7().simple().to_string();
        let client_id = format!("{}-egress-{}", config.mqtt_client_id(), &suffix[suffix.len() - 8..]);
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs().max(5)));
        mqttoptions.set_clean_session(true);

        // Set credentials if configured
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 256);

        Self {
            client,
            eventloop: Some(eventloop),
            updates,
            topic_prefix: config.mqtt_egress_topic_prefix().trim_end_matches('/').to_string(),
            published: 0,
        }
    }

    /// Run the publisher loop until shutdown or the fan-out closes
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(prefix = %self.topic_prefix, "mqtt_egress_started");

        let driver = self.eventloop.take().map(|eventloop| tokio::spawn(drive_eventloop(eventloop, shutdown.clone())));

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                update = self.updates.recv() => {
                    match update {
                        Some(update) => self.publish_update(&update),
                        None => break,
                    }
                }
            }
        }

        self.updates.unsubscribe();
        // The fan-out can close before shutdown is signalled
        if let Some(driver) = driver {
            driver.abort();
            let _ = driver.await;
        }
        info!(published = self.published, dropped = self.updates.dropped(), "mqtt_egress_shutdown");
    }

    fn publish_update(&mut self, update: &Update) {
        let topic = topic_for(&self.topic_prefix, update.stream);
        let json = match serde_json::to_vec(update) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, stream = update.stream.as_str(), "mqtt_egress_serialize_failed");
                return;
            }
        };
        // try_publish: a stalled broker must not back-pressure the fan-out
        match self.client.try_publish(topic, QoS::AtMostOnce, false, json) {
            Ok(()) => self.published += 1,
            Err(e) => debug!(error = %e, "mqtt_egress_publish_failed"),
        }
    }
}

/// Poll the egress connection until shutdown
async fn drive_eventloop(mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt_egress_connected"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt_egress_error");
                    let woke = tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => Ok(()),
                        res = shutdown.changed() => res,
                    };
                    if woke.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            },
        }
    }
    debug!("mqtt_egress_eventloop_stopped");
}

/// Topic an update of `stream` is republished on
pub fn topic_for(prefix: &str, stream: StreamKind) -> String {
    format!("{}/{}", prefix, stream.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Metrics;
    use crate::io::fanout::Fanout;
    use std::sync::Arc;

    /// Nothing listens on port 1, so the eventloop keeps failing to connect
    fn unreachable_broker() -> Config {
        Config::from_toml_str("[mqtt]\nhost = \"127.0.0.1\"\nport = 1\n", "test").unwrap()
    }

    #[tokio::test]
    async fn test_eventloop_stops_on_shutdown_during_retry_wait() {
        let (_client, eventloop) = AsyncClient::new(MqttOptions::new("egress-test", "127.0.0.1", 1), 8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = tokio::spawn(drive_eventloop(eventloop, shutdown_rx));

        // Let the first connect fail so the driver sits in its retry sleep
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(500), driver).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_publisher_stops_on_shutdown() {
        let fanout = Fanout::new(8, Arc::new(Metrics::new()));
        let publisher = MqttPublisher::new(&unreachable_broker(), fanout.subscribe());
        assert_eq!(fanout.subscriber_count(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(publisher.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[test]
    fn test_topic_per_stream() {
        assert_eq!(topic_for("cattlenet/updates", StreamKind::Sensor), "cattlenet/updates/sensor");
        assert_eq!(topic_for("barn", StreamKind::Feed), "barn/feed");
    }
}
