//! Transmission log and dedup guard.
//!
//! One entry per interval send (never per attempt). The log is the only
//! idempotence mechanism: an interval whose `(start, end)` pair has a
//! successful entry is never sent again.

use crate::core::Interval;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Number of entries kept; older ones are dropped on append.
pub const MAX_LOG_ENTRIES: usize = 100;

/// Final outcome of one interval send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionLogEntry {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// When the outcome was recorded
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failed attempts consumed before the final outcome
    pub retry_count: u32,
    /// App entries plus network entries in the payload
    pub payload_size: usize,
}

impl TransmissionLogEntry {
    pub fn interval(&self) -> Interval {
        Interval::new(self.start_time, self.end_time)
    }

    fn matches(&self, interval: &Interval) -> bool {
        self.start_time == interval.start && self.end_time == interval.end
    }
}

/// Append-only, capped ledger of interval sends.
///
/// With persistence enabled, every read and append goes through the file so
/// separate processes (the agent and a manual `send`) share one ledger.
#[derive(Debug, Default)]
pub struct TransmissionLog {
    entries: Mutex<Vec<TransmissionLogEntry>>,
    persist_path: Option<PathBuf>,
}

impl TransmissionLog {
    /// Create an in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log backed by a JSON file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let log = Self {
            entries: Mutex::new(Vec::new()),
            persist_path: Some(path),
        };

        // Try to load existing entries
        {
            let mut entries = log.entries.lock();
            if let Err(e) = log.load_into(&mut entries) {
                tracing::warn!(error = %e, "could not load transmission log");
            }
        }

        log
    }

    /// Whether `interval` already has a successful entry.
    pub fn was_transmitted(&self, interval: &Interval) -> bool {
        let mut entries = self.entries.lock();
        self.refresh(&mut entries);
        entries.iter().any(|e| e.success && e.matches(interval))
    }

    /// Append an outcome and persist.
    pub fn record(
        &self,
        interval: &Interval,
        success: bool,
        error: Option<String>,
        retry_count: u32,
        payload_size: usize,
    ) -> TransmissionLogEntry {
        let entry = TransmissionLogEntry {
            start_time: interval.start,
            end_time: interval.end,
            timestamp: Utc::now(),
            success,
            error,
            retry_count,
            payload_size,
        };

        let mut entries = self.entries.lock();
        self.refresh(&mut entries);
        entries.push(entry.clone());
        if entries.len() > MAX_LOG_ENTRIES {
            let excess = entries.len() - MAX_LOG_ENTRIES;
            entries.drain(..excess);
        }

        if let Err(e) = self.save_entries(&entries) {
            tracing::error!(error = %e, "failed to save transmission log");
        }
        entry
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<TransmissionLogEntry> {
        let mut entries = self.entries.lock();
        self.refresh(&mut entries);
        entries.clone()
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<TransmissionLogEntry> {
        self.entries().into_iter().rev().take(limit).collect()
    }

    pub fn last(&self) -> Option<TransmissionLogEntry> {
        self.entries().pop()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let entries = self.entries();
        let successes = entries.iter().filter(|e| e.success).count();
        let failures = entries.len() - successes;
        let last = entries
            .last()
            .map(|e| {
                format!(
                    "{} at {} ({})",
                    if e.success { "success" } else { "failure" },
                    e.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                    e.interval()
                )
            })
            .unwrap_or_else(|| "never".to_string());

        format!(
            "Transmission Log:\n\
             - Entries: {}\n\
             - Successful: {}\n\
             - Failed: {}\n\
             - Last transmission: {}",
            entries.len(),
            successes,
            failures,
            last
        )
    }

    /// Re-read the file so entries appended by other processes are visible.
    fn refresh(&self, entries: &mut Vec<TransmissionLogEntry>) {
        if let Err(e) = self.load_into(entries) {
            tracing::warn!(error = %e, "could not reload transmission log");
        }
    }

    fn load_into(&self, entries: &mut Vec<TransmissionLogEntry>) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                *entries = serde_json::from_str(&content).map_err(std::io::Error::other)?;
            }
        }
        Ok(())
    }

    fn save_entries(&self, entries: &[TransmissionLogEntry]) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let json = serde_json::to_string_pretty(entries).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }
}

/// Thread-safe shared transmission log.
pub type SharedTransmissionLog = Arc<TransmissionLog>;

/// Create a new shared in-memory transmission log.
pub fn create_shared_log() -> SharedTransmissionLog {
    Arc::new(TransmissionLog::new())
}

/// Create a new shared transmission log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransmissionLog {
    Arc::new(TransmissionLog::with_persistence(path))
}
