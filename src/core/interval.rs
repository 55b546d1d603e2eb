//! Transmission intervals and the extractor that narrows a day to one.

use crate::core::daily::{AppTotals, DailyAggregate, NetworkTotals};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A transmission window `(start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The most recent interval of length `len` that ended at or before `now`.
    ///
    /// Boundaries are multiples of `len` since the Unix epoch, so every run
    /// of the agent computes the same windows.
    pub fn aligned_ending_at(now: DateTime<Utc>, len: Duration) -> Self {
        let len_secs = len.num_seconds().max(1);
        let ts = now.timestamp();
        let end_ts = ts - ts.rem_euclid(len_secs);
        let end = DateTime::from_timestamp(end_ts, 0).unwrap_or(now);
        Self {
            start: end - Duration::seconds(len_secs),
            end,
        }
    }

    /// Strict containment: both boundaries are excluded.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at > self.start && at < self.end
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%H:%M:%S")
        )
    }
}

/// Keep only records last seen strictly inside the interval.
///
/// Totals are recomputed over the retained records.
pub fn filter(aggregate: &DailyAggregate, interval: &Interval) -> DailyAggregate {
    let mut filtered = DailyAggregate::new(aggregate.date);
    filtered.last_updated = aggregate.last_updated;

    filtered.apps = aggregate
        .apps
        .iter()
        .filter(|(_, record)| interval.contains(record.last_seen))
        .map(|(name, record)| (name.clone(), record.clone()))
        .collect();

    filtered.connections = aggregate
        .connections
        .iter()
        .filter(|(_, record)| interval.contains(record.last_seen))
        .map(|(key, record)| (key.clone(), record.clone()))
        .collect();

    filtered.app_totals = AppTotals {
        foreground_time: filtered.apps.values().map(|a| a.foreground_time).sum(),
        focus_time: filtered.apps.values().map(|a| a.focus_time).sum(),
    };
    filtered.network_totals = NetworkTotals {
        total_duration: filtered.connections.values().map(|c| c.duration).sum(),
        unique_connections: filtered.connections.len() as u64,
        unique_domains: filtered.distinct_domains() as u64,
    };

    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ConnectionState;
    use crate::core::apps::AppUsageRecord;
    use crate::core::connections::ConnectionRecord;
    use chrono::{NaiveDate, TimeZone};

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn connection(domain: &str, last_seen: DateTime<Utc>) -> ConnectionRecord {
        ConnectionRecord {
            domain: domain.to_string(),
            port: 443,
            protocol: "HTTPS".to_string(),
            first_seen: last_seen,
            last_seen,
            duration: 15,
            is_active: true,
            connection_state: ConnectionState::Established,
            app_name: "Chrome".to_string(),
        }
    }

    fn app(name: &str, last_seen: DateTime<Utc>) -> AppUsageRecord {
        AppUsageRecord {
            name: name.to_string(),
            foreground_time: 45,
            focus_time: 30,
            first_seen: last_seen,
            last_seen,
            is_active: true,
            is_focused: true,
        }
    }

    #[test]
    fn test_filter_keeps_only_strictly_inside() {
        let mut day = DailyAggregate::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        for (domain, at) in [
            ("inside.com", t() + Duration::seconds(10)),
            ("before.com", t() - Duration::seconds(1)),
            ("boundary.com", t()),
        ] {
            let record = connection(domain, at);
            day.connections.insert(record.key(), record);
        }
        day.apps.insert("Chrome".into(), app("Chrome", t() + Duration::seconds(5)));
        day.apps.insert("Mail".into(), app("Mail", t() + Duration::seconds(15)));

        let interval = Interval::new(t(), t() + Duration::seconds(15));
        let filtered = filter(&day, &interval);

        assert_eq!(
            filtered.connections.keys().collect::<Vec<_>>(),
            vec!["inside.com:443"]
        );
        assert_eq!(filtered.apps.keys().collect::<Vec<_>>(), vec!["Chrome"]);
        assert_eq!(filtered.network_totals.total_duration, 15);
        assert_eq!(filtered.network_totals.unique_domains, 1);
        assert_eq!(filtered.app_totals.focus_time, 30);
    }

    #[test]
    fn test_aligned_interval() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 7, 42).unwrap();
        let interval = Interval::aligned_ending_at(now, Duration::minutes(10));
        assert_eq!(interval.end, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(interval.start, Utc.with_ymd_and_hms(2024, 3, 1, 11, 50, 0).unwrap());
        assert_eq!(interval.minutes(), 10);

        // exactly on a boundary: that boundary is the end
        let on_boundary = Interval::aligned_ending_at(interval.end, Duration::minutes(10));
        assert_eq!(on_boundary, interval);
    }
}
