//! Live update fan-out
//!
//! Every ingested record is published once as an `Update` and delivered to
//! all current subscribers in publish order. Publishing never blocks: each
//! subscriber reads from a bounded broadcast ring, and one that falls behind
//! loses its oldest queued updates and resumes from the oldest retained one.

use crate::domain::error::IngestError;
use crate::domain::types::{
    epoch_ms, CattleRecord, ClassificationResult, EnvironmentReading, FeedActivity, GateEvent,
    Provenance, SensorReading, StreamKind,
};
use crate::infra::metrics::Metrics;
use crate::services::feed::FeedAverages;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

/// Push envelope: `{"stream": ..., "server_ts": ..., "type": ..., ...payload}`
#[derive(Debug, Clone, Serialize)]
pub struct Update {
    pub stream: StreamKind,
    pub server_ts: u64,
    #[serde(flatten)]
    pub payload: UpdatePayload,
    /// Internal only, subscribers cannot tell synthetic data from live
    #[serde(skip)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdatePayload {
    SensorUpdate { reading: SensorReading, classification: ClassificationResult },
    EnvironmentUpdate { reading: EnvironmentReading },
    GateUpdate { event: GateEvent, record: CattleRecord },
    FeedUpdate { activity: FeedActivity, averages: FeedAverages },
}

impl Update {
    pub fn new(payload: UpdatePayload, provenance: Provenance) -> Self {
        let stream = match &payload {
            UpdatePayload::SensorUpdate { .. } => StreamKind::Sensor,
            UpdatePayload::EnvironmentUpdate { .. } => StreamKind::Environment,
            UpdatePayload::GateUpdate { .. } => StreamKind::Gate,
            UpdatePayload::FeedUpdate { .. } => StreamKind::Feed,
        };
        Self { stream, server_ts: epoch_ms(), payload, provenance }
    }

    pub fn is_synthetic(&self) -> bool {
        self.provenance == Provenance::Synthetic
    }
}

/// Publishing half, cheap to clone
#[derive(Clone)]
pub struct Fanout {
    tx: broadcast::Sender<Update>,
    metrics: Arc<Metrics>,
}

impl Fanout {
    /// `queue_len` is the per-subscriber backlog before the oldest updates drop
    pub fn new(queue_len: usize, metrics: Arc<Metrics>) -> Self {
        let (tx, _) = broadcast::channel(queue_len.max(1));
        Self { tx, metrics }
    }

    /// Deliver to every current subscriber; returns how many there were
    pub fn publish(&self, update: Update) -> usize {
        // Err only means nobody is listening
        self.tx.send(update).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: Some(self.tx.subscribe()),
            metrics: self.metrics.clone(),
            dropped: 0,
            last_overflow_warn: Instant::now().checked_sub(Duration::from_secs(2)).unwrap_or_else(Instant::now),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving half for one consumer. Dropping it unsubscribes.
pub struct Subscription {
    rx: Option<broadcast::Receiver<Update>>,
    metrics: Arc<Metrics>,
    dropped: u64,
    last_overflow_warn: Instant,
}

impl Subscription {
    /// Next update, or `None` once unsubscribed or the engine is gone
    pub async fn recv(&mut self) -> Option<Update> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(update) => return Some(update),
                Err(RecvError::Lagged(n)) => self.note_overflow(n),
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of `recv`
    pub fn try_recv(&mut self) -> Option<Update> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(update) => return Some(update),
                Err(TryRecvError::Lagged(n)) => self.note_overflow(n),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Stop receiving; safe to call more than once
    pub fn unsubscribe(&mut self) {
        self.rx = None;
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    /// Updates this subscriber lost to overflow
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn note_overflow(&mut self, n: u64) {
        self.dropped += n;
        self.metrics.record_subscriber_dropped(n);
        // Rate-limit overflow warnings to 1 per second
        if self.last_overflow_warn.elapsed() > Duration::from_secs(1) {
            let err = IngestError::SubscriberOverflow { dropped: n };
            warn!(error = %err, total_dropped = self.dropped, "subscriber_overflow");
            self.last_overflow_warn = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::GateDirection;

    fn gate_update(tag: &str, ts: u64) -> Update {
        let event = GateEvent {
            rfid_tag: tag.to_string(),
            timestamp: ts,
            weight: 450.0,
            direction: GateDirection::In,
            gate_status: "open".to_string(),
            position: None,
        };
        let record = CattleRecord::new(tag, ts);
        Update::new(UpdatePayload::GateUpdate { event, record }, Provenance::Live)
    }

    fn timestamp_of(update: &Update) -> u64 {
        match &update.payload {
            UpdatePayload::GateUpdate { event, .. } => event.timestamp,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delivery_in_publish_order() {
        let fanout = Fanout::new(16, Arc::new(Metrics::new()));
        let mut a = fanout.subscribe();
        let mut b = fanout.subscribe();

        for ts in 1..=3 {
            assert_eq!(fanout.publish(gate_update("T1", ts)), 2);
        }

        for sub in [&mut a, &mut b] {
            let got: Vec<u64> = [sub.recv().await, sub.recv().await, sub.recv().await]
                .iter()
                .map(|u| timestamp_of(u.as_ref().unwrap()))
                .collect();
            assert_eq!(got, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let fanout = Fanout::new(4, Arc::new(Metrics::new()));
        assert_eq!(fanout.publish(gate_update("T1", 1)), 0);
    }

    #[test]
    fn test_subscriber_misses_updates_before_subscribe() {
        let fanout = Fanout::new(4, Arc::new(Metrics::new()));
        fanout.publish(gate_update("T1", 1));
        let mut sub = fanout.subscribe();
        assert!(sub.try_recv().is_none());
        fanout.publish(gate_update("T1", 2));
        assert_eq!(timestamp_of(&sub.try_recv().unwrap()), 2);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let metrics = Arc::new(Metrics::new());
        let fanout = Fanout::new(8, metrics.clone());
        let mut slow = fanout.subscribe();

        for ts in 0..100 {
            fanout.publish(gate_update("T1", ts));
        }

        let mut received = Vec::new();
        while let Some(update) = slow.try_recv() {
            received.push(timestamp_of(&update));
        }
        assert_eq!(received.len(), 8);
        assert_eq!(received.last(), Some(&99));
        assert_eq!(received.first(), Some(&92));
        assert_eq!(slow.dropped(), 92);
        assert_eq!(metrics.subscriber_dropped(), 92);
    }

    #[test]
    fn test_unsubscribe_idempotent() {
        let fanout = Fanout::new(4, Arc::new(Metrics::new()));
        let mut sub = fanout.subscribe();
        assert_eq!(fanout.subscriber_count(), 1);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(fanout.subscriber_count(), 0);
        fanout.publish(gate_update("T1", 1));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let fanout = Fanout::new(4, Arc::new(Metrics::new()));
        {
            let _sub = fanout.subscribe();
            assert_eq!(fanout.subscriber_count(), 1);
        }
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[test]
    fn test_update_serialization_hides_provenance() {
        let mut update = gate_update("E3882528", 1_767_607_200_000);
        update.provenance = Provenance::Synthetic;
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["stream"], "gate");
        assert_eq!(json["type"], "gate_update");
        assert_eq!(json["event"]["rfid_tag"], "E3882528");
        assert!(json.get("provenance").is_none());
    }
}
