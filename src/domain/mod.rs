//! Domain models - canonical records and containers
//!
//! This module contains the data types used throughout the gateway:
//! - `types` - sensor, environment, gate and feed records, registry entries
//! - `history` - bounded per-stream history buffer
//! - `error` - ingest error taxonomy

pub mod error;
pub mod history;
pub mod types;

pub use error::IngestError;
pub use history::HistoryBuffer;
