//! Ingest error taxonomy
//!
//! None of these are fatal: each is recovered where it occurs (skip, drop,
//! fallback) or surfaced through the connector status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Payload could not be decoded or lacks an identifying field
    #[error("malformed payload on {origin}: {reason}")]
    MalformedPayload { origin: String, reason: String },

    /// Broker connection or reconnect failed
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A live subscriber fell behind and lost its oldest queued updates
    #[error("subscriber overflow: {dropped} updates dropped")]
    SubscriberOverflow { dropped: u64 },

    /// Gate event whose direction could not be resolved
    #[error("gate event for {rfid_tag} has no resolvable direction")]
    InvalidGateEvent { rfid_tag: String },
}

impl IngestError {
    pub fn malformed(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::MalformedPayload { origin: origin.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
