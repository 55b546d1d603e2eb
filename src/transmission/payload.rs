//! The JSON document posted to the collector for one interval.

use crate::core::{DailyAggregate, Interval};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// App summary for an interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppData {
    /// App with the most focus time
    pub active_app: String,
    /// App that held focus at its last observation
    pub focused_app: String,
    pub focus_time_seconds: u64,
    pub timestamp: String,
}

/// One `domain:port` destination seen in an interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkData {
    pub fqdn: String,
    pub port: u16,
    pub access_count: u32,
    pub protocol: String,
    /// Last observation of the destination
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    pub os_version: String,
    pub agent_version: String,
    pub total_apps: usize,
    pub total_domains: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionPayload {
    pub device_id: String,
    /// When the payload was built
    pub timestamp: String,
    pub interval_minutes: i64,
    pub start_time: String,
    pub end_time: String,
    pub apps: Vec<AppData>,
    pub networks: Vec<NetworkData>,
    pub metadata: PayloadMetadata,
}

impl TransmissionPayload {
    /// Entry count used as the log's payload-size metric.
    pub fn size(&self) -> usize {
        self.apps.len() + self.networks.len()
    }
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Build the payload from an already filtered aggregate.
pub fn build_payload(
    device_id: &str,
    interval: &Interval,
    filtered: &DailyAggregate,
    now: DateTime<Utc>,
) -> TransmissionPayload {
    let timestamp = iso(now);

    let mut apps = Vec::new();
    if let Some(top) = filtered.top_focus_app() {
        let focused_app = filtered
            .apps
            .values()
            .filter(|a| a.is_focused)
            .max_by_key(|a| a.last_seen)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| top.name.clone());
        apps.push(AppData {
            active_app: top.name.clone(),
            focused_app,
            focus_time_seconds: top.focus_time,
            timestamp: timestamp.clone(),
        });
    }

    // records are already unique per domain:port
    let networks: Vec<NetworkData> = filtered
        .connections
        .values()
        .map(|record| NetworkData {
            fqdn: record.domain.clone(),
            port: record.port,
            access_count: 1,
            protocol: record.protocol.clone(),
            timestamp: iso(record.last_seen),
        })
        .collect();

    TransmissionPayload {
        device_id: device_id.to_string(),
        timestamp,
        interval_minutes: interval.minutes(),
        start_time: iso(interval.start),
        end_time: iso(interval.end),
        metadata: PayloadMetadata {
            os_version: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            agent_version: crate::VERSION.to_string(),
            total_apps: filtered.apps.len(),
            total_domains: filtered.distinct_domains(),
        },
        apps,
        networks,
    }
}

/// A payload with one sample entry, for connection tests.
pub fn sample_payload(device_id: &str, now: DateTime<Utc>) -> TransmissionPayload {
    let interval = Interval::new(now - chrono::Duration::minutes(1), now);
    let mut payload = build_payload(device_id, &interval, &DailyAggregate::new(now.date_naive()), now);
    payload.apps.push(AppData {
        active_app: "usage-agent".to_string(),
        focused_app: "usage-agent".to_string(),
        focus_time_seconds: 0,
        timestamp: payload.timestamp.clone(),
    });
    payload.metadata.total_apps = 1;
    payload
}
