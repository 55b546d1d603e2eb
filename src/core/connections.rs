//! Connection aggregation: raw socket tuples and DNS query lines merged into
//! cumulative per-destination records.
//!
//! Records are keyed by `domain:port`. Each tick, every key observed (on the
//! socket table or through a DNS query staged since the previous tick) gains
//! exactly one tick of duration. Keys that go unobserved keep their duration,
//! become inactive after the inactivity threshold and leave the live table
//! after the retention window. The day document keeps their final state.

use crate::capture::{ConnectionState, RawConnection};
use crate::config::RetentionPolicy;
use crate::core::daily::DailyAggregate;
use crate::network::{extract_query, protocol_for_port, FqdnCache, INTERESTING_PORTS};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

/// App name recorded for destinations only seen through DNS.
pub const UNKNOWN_APP: &str = "Unknown";

/// Key of a connection record.
pub fn connection_key(domain: &str, port: u16) -> String {
    format!("{domain}:{port}")
}

/// Cumulative usage of one `domain:port` destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Resolved FQDN, or the raw IP when resolution failed
    pub domain: String,
    pub port: u16,
    /// `HTTPS` or `HTTP`, derived from the port
    pub protocol: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Cumulative observed seconds
    pub duration: u64,
    pub is_active: bool,
    pub connection_state: ConnectionState,
    /// Last app observed on the destination
    pub app_name: String,
}

impl ConnectionRecord {
    fn new(observation: &Observation, now: DateTime<Utc>, tick_secs: u64) -> Self {
        Self {
            domain: observation.domain.clone(),
            port: observation.port,
            protocol: protocol_for_port(observation.port).to_string(),
            first_seen: now,
            last_seen: now,
            duration: tick_secs,
            is_active: true,
            connection_state: observation.state,
            app_name: observation.app_name.clone(),
        }
    }

    pub fn key(&self) -> String {
        connection_key(&self.domain, self.port)
    }

    fn observe(&mut self, observation: &Observation, now: DateTime<Utc>, tick_secs: u64) {
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.duration += tick_secs;
        self.is_active = true;
        self.connection_state = observation.state;
        // a DNS query says nothing about which app owns an existing socket
        if observation.app_name != UNKNOWN_APP || self.app_name.is_empty() {
            self.app_name = observation.app_name.clone();
        }
    }
}

/// A destination seen during one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observation {
    domain: String,
    port: u16,
    app_name: String,
    state: ConnectionState,
}

/// What one tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionTickStats {
    /// Distinct keys observed this tick
    pub observed: usize,
    /// Keys seen for the first time today
    pub new_records: usize,
    /// Records marked inactive this tick
    pub deactivated: usize,
    /// Records dropped from the live table this tick
    pub pruned: usize,
}

/// Live connection table plus the FQDN cache and the DNS staging area.
pub struct ConnectionAggregator {
    policy: RetentionPolicy,
    cache: FqdnCache,
    live: HashMap<String, ConnectionRecord>,
    staged: HashMap<String, Observation>,
}

/// Connection aggregator shared between the tick loop and the DNS worker.
pub type SharedConnectionAggregator = Arc<RwLock<ConnectionAggregator>>;

impl ConnectionAggregator {
    pub fn new(policy: RetentionPolicy, cache: FqdnCache) -> Self {
        Self {
            policy,
            cache,
            live: HashMap::new(),
            staged: HashMap::new(),
        }
    }

    /// Wrap into a handle shareable with the DNS worker.
    pub fn into_shared(self) -> SharedConnectionAggregator {
        Arc::new(RwLock::new(self))
    }

    /// Stage a raw DNS capture line for the next tick.
    ///
    /// Returns the staged key when the line carried an accepted query.
    pub fn record_dns_line(&mut self, line: &str) -> Option<String> {
        let query = extract_query(line)?;
        let key = connection_key(&query.domain, query.port);
        tracing::debug!(domain = %query.domain, port = query.port, "staged DNS query");
        self.staged.entry(key.clone()).or_insert(Observation {
            domain: query.domain,
            port: query.port,
            app_name: UNKNOWN_APP.to_string(),
            state: ConnectionState::DnsQuery,
        });
        Some(key)
    }

    /// Number of DNS observations waiting for the next tick.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Merge one tick's socket snapshot and the staged DNS queries.
    ///
    /// Live changes are written through to `day`.
    pub fn tick(
        &mut self,
        connections: &[RawConnection],
        now: DateTime<Utc>,
        day: &mut DailyAggregate,
    ) -> ConnectionTickStats {
        let mut observations: HashMap<String, Observation> = std::mem::take(&mut self.staged);
        for raw in connections {
            if let Some(observation) = self.observe_socket(raw) {
                // socket observations carry the owning app and real state
                observations.insert(
                    connection_key(&observation.domain, observation.port),
                    observation,
                );
            }
        }

        let mut stats = ConnectionTickStats {
            observed: observations.len(),
            ..Default::default()
        };
        let tick_secs = self.policy.tick_secs;

        for (key, observation) in &observations {
            let record = if let Some(record) = self.live.get_mut(key) {
                record.observe(observation, now, tick_secs);
                record.clone()
            } else {
                let record = match day.connections.get(key) {
                    Some(previous) => {
                        let mut record = previous.clone();
                        record.observe(observation, now, tick_secs);
                        record
                    }
                    None => {
                        stats.new_records += 1;
                        day.network_totals.unique_connections += 1;
                        tracing::debug!(key = %key, app = %observation.app_name, "new connection");
                        ConnectionRecord::new(observation, now, tick_secs)
                    }
                };
                self.live.insert(key.clone(), record.clone());
                record
            };
            day.network_totals.total_duration += tick_secs;
            day.connections.insert(key.clone(), record);
        }

        let policy = self.policy;
        self.live.retain(|key, record| {
            if observations.contains_key(key) {
                return true;
            }
            let age = (now - record.last_seen).num_seconds();
            if record.is_active && policy.is_inactive(age) {
                record.is_active = false;
                stats.deactivated += 1;
                day.connections.insert(key.clone(), record.clone());
            }
            if policy.is_retained(age) {
                true
            } else {
                stats.pruned += 1;
                false
            }
        });

        day.network_totals.unique_domains = self.unique_domains() as u64;
        stats
    }

    /// Resolve a socket tuple into an observation, if it is worth tracking.
    fn observe_socket(&mut self, raw: &RawConnection) -> Option<Observation> {
        if !INTERESTING_PORTS.contains(&raw.port) {
            return None;
        }

        let domain = match Remote::of(raw)? {
            Remote::Ip(ip) => self.cache.resolve(ip).unwrap_or_else(|| ip.to_string()),
            Remote::Host(host) => host,
        };

        let app_name = match raw.app_name.trim() {
            "" => UNKNOWN_APP.to_string(),
            name => name.to_string(),
        };

        Some(Observation {
            domain,
            port: raw.port,
            app_name,
            state: raw.state,
        })
    }

    /// Socket addresses in `connections` the FQDN cache has not seen yet.
    pub fn unresolved(&self, connections: &[RawConnection]) -> Vec<IpAddr> {
        let mut pending: Vec<IpAddr> = connections
            .iter()
            .filter(|raw| INTERESTING_PORTS.contains(&raw.port))
            .filter_map(|raw| match Remote::of(raw) {
                Some(Remote::Ip(ip)) if !self.cache.contains(ip) => Some(ip),
                _ => None,
            })
            .collect();
        pending.sort();
        pending.dedup();
        pending
    }

    /// Distinct domains across retained records, active or not.
    pub fn unique_domains(&self) -> usize {
        self.live
            .values()
            .map(|r| r.domain.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn live_record(&self, key: &str) -> Option<&ConnectionRecord> {
        self.live.get(key)
    }

    /// Snapshot of the live table, sorted by key.
    pub fn live_records(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<_> = self.live.values().cloned().collect();
        records.sort_by(|a, b| a.domain.cmp(&b.domain).then(a.port.cmp(&b.port)));
        records
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn cache(&self) -> &FqdnCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut FqdnCache {
        &mut self.cache
    }

    /// Drop live state, staged queries and the FQDN cache (day rollover).
    pub fn reset(&mut self) {
        self.live.clear();
        self.staged.clear();
        self.cache.clear();
    }
}

/// Remote end of a socket tuple worth tracking.
enum Remote {
    Ip(IpAddr),
    Host(String),
}

impl Remote {
    /// `None` for loopback, unspecified and empty remotes.
    fn of(raw: &RawConnection) -> Option<Self> {
        let remote = raw.remote.trim().trim_matches(|c| c == '[' || c == ']');
        match remote.parse::<IpAddr>() {
            Ok(ip) if ip.is_loopback() || ip.is_unspecified() => None,
            Ok(ip) => Some(Remote::Ip(ip)),
            Err(_) => {
                let host = remote.trim_end_matches('.').to_ascii_lowercase();
                if host.is_empty() || host == "localhost" {
                    None
                } else {
                    Some(Remote::Host(host))
                }
            }
        }
    }
}
