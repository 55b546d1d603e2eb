//! Per-day aggregate documents and their persistence.
//!
//! The live process only ever owns today's aggregate. Documents for earlier
//! dates stay on disk for readers (the transmitter, `status`, external
//! tooling) but are never loaded back into the live aggregators.

use crate::core::apps::AppUsageRecord;
use crate::core::connections::ConnectionRecord;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Running totals over a day's app records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTotals {
    pub foreground_time: u64,
    pub focus_time: u64,
}

/// Running totals over a day's connection records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTotals {
    pub total_duration: u64,
    pub unique_connections: u64,
    pub unique_domains: u64,
}

/// Everything aggregated for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    /// App usage keyed by app name
    #[serde(default)]
    pub apps: BTreeMap<String, AppUsageRecord>,
    /// Connection records keyed by `domain:port`
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionRecord>,
    #[serde(default)]
    pub app_totals: AppTotals,
    #[serde(default)]
    pub network_totals: NetworkTotals,
    pub last_updated: Option<DateTime<Utc>>,
}

impl DailyAggregate {
    /// An empty aggregate for the given date.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            apps: BTreeMap::new(),
            connections: BTreeMap::new(),
            app_totals: AppTotals::default(),
            network_totals: NetworkTotals::default(),
            last_updated: None,
        }
    }

    /// Distinct domains across the connection records.
    pub fn distinct_domains(&self) -> usize {
        self.connections
            .values()
            .map(|r| r.domain.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// The app with the most focus time, if any.
    pub fn top_focus_app(&self) -> Option<&AppUsageRecord> {
        self.apps.values().max_by(|a, b| {
            a.focus_time
                .cmp(&b.focus_time)
                .then_with(|| b.name.cmp(&a.name))
        })
    }

    /// Human-readable summary for `status`.
    pub fn summary(&self) -> String {
        let top_app = self
            .top_focus_app()
            .map(|a| format!("{} ({})", a.name, format_secs(a.focus_time)))
            .unwrap_or_else(|| "none".to_string());
        let active_connections = self.connections.values().filter(|r| r.is_active).count();

        format!(
            "Usage for {}:\n\
             - Apps seen: {}\n\
             - Foreground time: {}\n\
             - Focus time: {}\n\
             - Most focused app: {}\n\
             - Connections: {} ({} active)\n\
             - Unique domains: {}\n\
             - Network time: {}",
            self.date,
            self.apps.len(),
            format_secs(self.app_totals.foreground_time),
            format_secs(self.app_totals.focus_time),
            top_app,
            self.connections.len(),
            active_connections,
            self.network_totals.unique_domains,
            format_secs(self.network_totals.total_duration),
        )
    }
}

fn format_secs(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m {}s", secs % 60)
    }
}

/// Decides which calendar date a timestamp belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Calendar {
    /// The host's local timezone
    #[default]
    Local,
    /// A fixed IANA timezone
    Zone(chrono_tz::Tz),
}

impl Calendar {
    pub fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        match self {
            Calendar::Local => at.with_timezone(&Local).date_naive(),
            Calendar::Zone(tz) => at.with_timezone(tz).date_naive(),
        }
    }
}

/// Failure to read a day document.
///
/// Local and non-retryable: the interval that needed it is skipped.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no usage document at {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt usage document {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure to persist the live aggregate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Path of the document for a date.
pub fn document_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("usage_{}.json", date.format("%Y-%m-%d")))
}

/// Read a persisted day document.
pub fn load_document(dir: &Path, date: NaiveDate) -> Result<DailyAggregate, LoadError> {
    let path = document_path(dir, date);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LoadError::Missing(path));
        }
        Err(source) => return Err(LoadError::Io { path, source }),
    };
    serde_json::from_str(&content).map_err(|source| LoadError::Corrupt { path, source })
}

/// Owner of today's live aggregate.
pub struct DailyStore {
    dir: PathBuf,
    calendar: Calendar,
    current: DailyAggregate,
}

impl DailyStore {
    /// Start a fresh aggregate for the date of `now`.
    ///
    /// An existing document for today is not loaded; it is overwritten by
    /// the first save.
    pub fn open(dir: impl Into<PathBuf>, calendar: Calendar, now: DateTime<Utc>) -> Self {
        Self {
            dir: dir.into(),
            current: DailyAggregate::new(calendar.date_of(now)),
            calendar,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current.date
    }

    pub fn aggregate(&self) -> &DailyAggregate {
        &self.current
    }

    pub fn aggregate_mut(&mut self) -> &mut DailyAggregate {
        &mut self.current
    }

    /// Flush and replace the aggregate when `now` falls on a new date.
    ///
    /// Returns the outgoing date when a rollover happened. A failed flush is
    /// logged and the rollover still proceeds.
    pub fn roll_over_if_needed(&mut self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let today = self.calendar.date_of(now);
        if today == self.current.date {
            return None;
        }

        let previous = self.current.date;
        if let Err(e) = self.save() {
            tracing::error!(date = %previous, error = %e, "failed to flush outgoing day");
        }
        self.current = DailyAggregate::new(today);
        tracing::info!(from = %previous, to = %today, "day rollover");
        Some(previous)
    }

    /// Overwrite today's document with the live aggregate.
    pub fn save(&mut self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        self.current.last_updated = Some(Utc::now());

        let path = document_path(&self.dir, self.current.date);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.current)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read the persisted document for any date.
    pub fn load(&self, date: NaiveDate) -> Result<DailyAggregate, LoadError> {
        load_document(&self.dir, date)
    }
}

/// Modification time before which files are `days` old at `now`.
///
/// Saturates at the epoch for ages that do not fit.
pub fn cleanup_cutoff(now: SystemTime, days: u64) -> SystemTime {
    days.checked_mul(24 * 60 * 60)
        .and_then(|secs| now.checked_sub(std::time::Duration::from_secs(secs)))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Delete `.json` files last modified before `cutoff` in each directory.
///
/// Returns the number of removed files. Missing directories are skipped.
pub fn cleanup_old_files(dirs: &[&Path], cutoff: SystemTime) -> std::io::Result<usize> {
    let mut removed = 0;
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if modified < cutoff {
                std::fs::remove_file(&path)?;
                tracing::debug!(path = %path.display(), "removed old file");
                removed += 1;
            }
        }
    }
    Ok(removed)
}
