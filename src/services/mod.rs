//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Single-writer ingest loop and snapshot queries
//! - `classifier` - Rule-based health classification
//! - `registry` - RFID-indexed cattle registry and gate statistics
//! - `feed` - Feed/water consumption aggregation
//! - `stats` - Health and environment statistics
//! - `fallback` - Synthetic telemetry while the broker is down

pub mod classifier;
pub mod engine;
pub mod fallback;
pub mod feed;
pub mod registry;
pub mod stats;

// Re-export commonly used types
pub use classifier::HealthClassifier;
pub use engine::Engine;
pub use fallback::FallbackGenerator;
pub use feed::FeedAggregator;
pub use registry::CattleRegistry;
