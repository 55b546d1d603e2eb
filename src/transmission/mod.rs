//! Interval transmission to the remote collector.
//!
//! This module contains:
//! - The transmission log acting as dedup guard
//! - The payload model posted to the collector
//! - The blocking transport abstraction and its reqwest implementation
//! - The transmitter tying them together

pub mod log;
pub mod payload;
pub mod transmitter;
pub mod transport;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransmissionLog,
    TransmissionLog, TransmissionLogEntry, MAX_LOG_ENTRIES,
};
pub use payload::{build_payload, AppData, NetworkData, PayloadMetadata, TransmissionPayload};
pub use transmitter::{audit_path, DelayFn, SendOutcome, TransmitError, Transmitter};
pub use transport::{user_agent, Endpoint, Transport, TransportError};

#[cfg(feature = "http")]
pub use transport::HttpTransport;
