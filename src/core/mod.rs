//! Core aggregation for the usage agent.
//!
//! This module contains:
//! - The connection aggregator merging socket and DNS observations
//! - The app usage aggregator tracking foreground and focus time
//! - The daily store owning today's aggregate
//! - The interval extractor feeding the transmitter

pub mod apps;
pub mod connections;
pub mod daily;
pub mod interval;

// Re-export commonly used types
pub use apps::{AppTickStats, AppUsageAggregator, AppUsageRecord};
pub use connections::{
    connection_key, ConnectionAggregator, ConnectionRecord, ConnectionTickStats,
    SharedConnectionAggregator, UNKNOWN_APP,
};
pub use daily::{
    cleanup_cutoff, cleanup_old_files, document_path, load_document, AppTotals, Calendar, DailyAggregate,
    DailyStore, LoadError, NetworkTotals, StoreError,
};
pub use interval::{filter, Interval};
