//! Feed/water consumption aggregation
//!
//! Converts feed station visits into consumption (`max(0, before - after)`)
//! and keeps a rolling window of valid activity. Visits without an animal,
//! with nothing consumed, or repeating a recently seen (animal, timestamp)
//! pair are discarded.

use crate::domain::types::{FeedActivity, FeedStationReading};
use crate::domain::HistoryBuffer;
use crate::infra::config::Config;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedDiscard {
    NoAnimal,
    NothingConsumed,
    Duplicate,
}

impl FeedDiscard {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedDiscard::NoAnimal => "no_animal",
            FeedDiscard::NothingConsumed => "nothing_consumed",
            FeedDiscard::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnimalIntake {
    pub feed: f64,
    pub water: f64,
    pub visits: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedAverages {
    pub window_len: usize,
    pub distinct_animals: usize,
    pub total_feed: f64,
    pub total_water: f64,
    pub avg_feed_per_animal: f64,
    pub avg_water_per_animal: f64,
    pub per_animal: BTreeMap<String, AnimalIntake>,
}

pub struct FeedAggregator {
    window: HistoryBuffer<FeedActivity>,
    /// Lowercased sentinel ids meaning "nobody at the station"
    sentinels: FxHashSet<String>,
    seen_order: VecDeque<(String, u64)>,
    seen: FxHashSet<(String, u64)>,
    dedup_capacity: usize,
    averages: FeedAverages,
}

impl FeedAggregator {
    pub fn new(window: usize, sentinels: &[String], dedup_capacity: usize) -> Self {
        Self {
            window: HistoryBuffer::new(window),
            sentinels: sentinels.iter().map(|s| s.trim().to_ascii_lowercase()).collect(),
            seen_order: VecDeque::with_capacity(dedup_capacity),
            seen: FxHashSet::default(),
            dedup_capacity,
            averages: FeedAverages::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.feed_history(), config.feed_sentinel_ids(), config.feed_dedup_window())
    }

    /// Accept a visit, returning the activity and refreshed averages
    pub fn record_activity(&mut self, reading: FeedStationReading) -> Option<(FeedActivity, FeedAverages)> {
        match self.accept(reading) {
            Ok(activity) => Some((activity, self.averages.clone())),
            Err(reason) => {
                debug!(reason = reason.as_str(), "feed_reading_discarded");
                None
            }
        }
    }

    /// Same as `record_activity` but reports why a visit was rejected
    pub fn accept(&mut self, reading: FeedStationReading) -> Result<FeedActivity, FeedDiscard> {
        let cattle_id = reading
            .cattle_id
            .map(|id| id.trim().to_string())
            .filter(|id| !self.sentinels.contains(&id.to_ascii_lowercase()))
            .ok_or(FeedDiscard::NoAnimal)?;

        let feed_consumed = consumed(reading.feed_before, reading.feed_after);
        let water_consumed = consumed(reading.water_before, reading.water_after);
        if feed_consumed == 0.0 && water_consumed == 0.0 {
            return Err(FeedDiscard::NothingConsumed);
        }

        let key = (cattle_id.clone(), reading.timestamp);
        if self.seen.contains(&key) {
            return Err(FeedDiscard::Duplicate);
        }
        self.remember(key);

        let activity = FeedActivity {
            cattle_id,
            feed_consumed,
            water_consumed,
            water_present: reading.water_present,
            timestamp: reading.timestamp,
        };
        self.window.append(activity.clone());
        self.averages = self.compute_averages();
        Ok(activity)
    }

    pub fn averages(&self) -> FeedAverages {
        self.averages.clone()
    }

    pub fn recent(&self, n: usize) -> Vec<FeedActivity> {
        self.window.recent(n)
    }

    pub fn latest(&self) -> Option<FeedActivity> {
        self.window.latest()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Animals with activity in the window
    pub fn animals(&self) -> impl Iterator<Item = &str> {
        self.averages.per_animal.keys().map(String::as_str)
    }

    fn remember(&mut self, key: (String, u64)) {
        if self.dedup_capacity == 0 {
            return;
        }
        if self.seen_order.len() == self.dedup_capacity {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.seen.insert(key.clone());
        self.seen_order.push_back(key);
    }

    fn compute_averages(&self) -> FeedAverages {
        let mut per_animal: BTreeMap<String, AnimalIntake> = BTreeMap::new();
        for activity in self.window.iter() {
            let intake = per_animal.entry(activity.cattle_id.clone()).or_default();
            intake.feed += activity.feed_consumed;
            intake.water += activity.water_consumed;
            intake.visits += 1;
        }
        for intake in per_animal.values_mut() {
            intake.feed = round3(intake.feed);
            intake.water = round3(intake.water);
        }

        let total_feed = round3(self.window.iter().map(|a| a.feed_consumed).sum());
        let total_water = round3(self.window.iter().map(|a| a.water_consumed).sum());
        let distinct = per_animal.len();
        let (avg_feed, avg_water) = if distinct > 0 {
            (round3(total_feed / distinct as f64), round3(total_water / distinct as f64))
        } else {
            (0.0, 0.0)
        };

        FeedAverages {
            window_len: self.window.len(),
            distinct_animals: distinct,
            total_feed,
            total_water,
            avg_feed_per_animal: avg_feed,
            avg_water_per_animal: avg_water,
            per_animal,
        }
    }
}

/// Clamped consumption; a refill between readings must not go negative
#[inline]
fn consumed(before: f64, after: f64) -> f64 {
    round3((before - after).max(0.0))
}

#[inline]
fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
