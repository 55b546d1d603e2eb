//! App usage aggregation: foreground and focus accounting per app name.

use crate::capture::AppSnapshot;
use crate::config::RetentionPolicy;
use crate::core::daily::DailyAggregate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Cumulative usage of one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUsageRecord {
    pub name: String,
    /// Seconds the app was running
    pub foreground_time: u64,
    /// Seconds the app was frontmost
    pub focus_time: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    pub is_focused: bool,
}

impl AppUsageRecord {
    fn new(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            foreground_time: 0,
            focus_time: 0,
            first_seen: now,
            last_seen: now,
            is_active: true,
            is_focused: false,
        }
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppTickStats {
    pub running: usize,
    pub new_apps: usize,
    pub focused: Option<String>,
    pub pruned: usize,
}

/// Live app table. Only the tick loop touches it.
pub struct AppUsageAggregator {
    policy: RetentionPolicy,
    live: HashMap<String, AppUsageRecord>,
}

impl AppUsageAggregator {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            live: HashMap::new(),
        }
    }

    /// Merge one app snapshot, writing changes through to `day`.
    ///
    /// Every running app gains one tick of foreground time and the frontmost
    /// app also gains one tick of focus time. The frontmost app counts as
    /// running even if the source left it out of the running list.
    pub fn ingest(
        &mut self,
        snapshot: &AppSnapshot,
        now: DateTime<Utc>,
        day: &mut DailyAggregate,
    ) -> AppTickStats {
        let tick_secs = self.policy.tick_secs;
        let mut running: BTreeSet<&str> = snapshot.running.iter().map(String::as_str).collect();
        if let Some(front) = snapshot.frontmost.as_deref() {
            running.insert(front);
        }

        let mut stats = AppTickStats {
            running: running.len(),
            focused: snapshot.frontmost.clone(),
            ..Default::default()
        };

        for name in &running {
            let focused = snapshot.is_frontmost(name);
            let record = self.live.entry(name.to_string()).or_insert_with(|| {
                match day.apps.get(*name) {
                    Some(previous) => previous.clone(),
                    None => {
                        stats.new_apps += 1;
                        tracing::debug!(app = %name, "new app");
                        AppUsageRecord::new(name, now)
                    }
                }
            });

            if now > record.last_seen {
                record.last_seen = now;
            }
            record.is_active = true;
            record.is_focused = focused;
            record.foreground_time += tick_secs;
            day.app_totals.foreground_time += tick_secs;
            if focused {
                record.focus_time += tick_secs;
                day.app_totals.focus_time += tick_secs;
            }
            day.apps.insert(name.to_string(), record.clone());
        }

        let policy = self.policy;
        self.live.retain(|name, record| {
            if running.contains(name.as_str()) {
                return true;
            }
            let age = (now - record.last_seen).num_seconds();
            let was = (record.is_active, record.is_focused);
            record.is_focused = false;
            if policy.is_inactive(age) {
                record.is_active = false;
            }
            if was != (record.is_active, record.is_focused) {
                day.apps.insert(name.clone(), record.clone());
            }
            if policy.is_retained(age) {
                true
            } else {
                stats.pruned += 1;
                false
            }
        });

        stats
    }

    pub fn live_record(&self, name: &str) -> Option<&AppUsageRecord> {
        self.live.get(name)
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    /// Name of the app currently marked focused, if any.
    pub fn focused(&self) -> Option<&str> {
        self.live
            .values()
            .find(|r| r.is_focused)
            .map(|r| r.name.as_str())
    }

    /// Drop the live table (day rollover).
    pub fn reset(&mut self) {
        self.live.clear();
    }
}
