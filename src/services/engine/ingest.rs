//! Per-stream ingest handlers
//!
//! Each handler commits one record to its stream state and composes the
//! update pushed to subscribers. Errors never leave this module: rejected
//! records are counted and skipped.

use super::Engine;
use crate::domain::types::{
    ClassifiedReading, EnvironmentReading, FeedStationReading, GateEvent, Inbound, Provenance,
    Record, SensorReading,
};
use crate::io::fanout::{Update, UpdatePayload};
use tracing::debug;

impl Engine {
    /// Commit one record and publish the resulting update.
    ///
    /// Returns the published update, or `None` when the record was discarded.
    pub fn ingest(&self, inbound: Inbound) -> Option<Update> {
        let Inbound { record, provenance, received_at } = inbound;
        let kind = record.kind();

        let payload = match record {
            Record::Sensor(reading) => self.handle_sensor(reading),
            Record::Environment(reading) => self.handle_environment(reading),
            Record::Gate(event) => self.handle_gate(event)?,
            Record::Feed(reading) => self.handle_feed(reading)?,
        };

        self.metrics.record_ingested(kind, received_at.elapsed().as_micros() as u64);
        if provenance == Provenance::Synthetic {
            self.metrics.record_synthetic();
        }

        let update = Update::new(payload, provenance);
        self.fanout.publish(update.clone());
        Some(update)
    }

    fn handle_sensor(&self, reading: SensorReading) -> UpdatePayload {
        let classification = self.classifier.classify(&reading);
        if classification.is_anomaly() {
            self.metrics.record_anomaly();
            debug!(
                cattle_id = %reading.cattle_id,
                confidence = classification.confidence,
                factors = ?classification.factors,
                "health_anomaly"
            );
        }

        self.sensors
            .lock()
            .append(ClassifiedReading { reading: reading.clone(), health: classification.clone() });
        UpdatePayload::SensorUpdate { reading, classification }
    }

    fn handle_environment(&self, reading: EnvironmentReading) -> UpdatePayload {
        self.environment.lock().append(reading.clone());
        UpdatePayload::EnvironmentUpdate { reading }
    }

    fn handle_gate(&self, event: GateEvent) -> Option<UpdatePayload> {
        let mut registry = self.registry.lock();
        let record = registry.record_gate_event(event);
        // Stored copy carries the resolved direction
        let event = registry.latest_event()?;
        drop(registry);

        debug!(
            rfid_tag = %event.rfid_tag,
            direction = event.direction.as_str(),
            weight = event.weight,
            entries = record.total_entries,
            exits = record.total_exits,
            "gate_event_recorded"
        );
        Some(UpdatePayload::GateUpdate { event, record })
    }

    fn handle_feed(&self, reading: FeedStationReading) -> Option<UpdatePayload> {
        let accepted = self.feed.lock().record_activity(reading);
        match accepted {
            Some((activity, averages)) => Some(UpdatePayload::FeedUpdate { activity, averages }),
            None => {
                self.metrics.record_feed_discarded();
                None
            }
        }
    }
}
