//! Raw snapshot types handed over by capture sources.
//!
//! These are deliberately close to what the operating system reports: app
//! names as shown by the window server, remote endpoints as seen on the
//! socket table. All normalisation happens in the aggregators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One sampling of the running applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSnapshot {
    /// Names of user-facing applications currently running
    pub running: BTreeSet<String>,
    /// The frontmost application, if the window server reported one
    pub frontmost: Option<String>,
}

impl AppSnapshot {
    /// Build a snapshot from a list of running apps and the frontmost name.
    pub fn new<I, S>(running: I, frontmost: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            running: running
                .into_iter()
                .map(Into::into)
                .map(|name: String| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            frontmost: frontmost
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }

    /// Whether the named app is the frontmost one.
    pub fn is_frontmost(&self, name: &str) -> bool {
        self.frontmost.as_deref() == Some(name)
    }
}

/// Socket or query state attached to a connection observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Inferred from an outgoing DNS query; no socket seen yet
    DnsQuery,
    Established,
    SynSent,
    CloseWait,
    TimeWait,
    FinWait,
    Closed,
    Unknown,
}

impl ConnectionState {
    /// Parse a TCP state as printed by `lsof`/`netstat`.
    pub fn from_tcp_state(state: &str) -> Self {
        match state.trim().trim_matches(|c| c == '(' || c == ')') {
            "ESTABLISHED" => Self::Established,
            "SYN_SENT" => Self::SynSent,
            "CLOSE_WAIT" => Self::CloseWait,
            "TIME_WAIT" => Self::TimeWait,
            "FIN_WAIT_1" | "FIN_WAIT_2" | "FIN_WAIT1" | "FIN_WAIT2" => Self::FinWait,
            "CLOSED" => Self::Closed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::DnsQuery => "DNS_QUERY",
            Self::Established => "ESTABLISHED",
            Self::SynSent => "SYN_SENT",
            Self::CloseWait => "CLOSE_WAIT",
            Self::TimeWait => "TIME_WAIT",
            Self::FinWait => "FIN_WAIT",
            Self::Closed => "CLOSED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// A remote endpoint observed on the socket table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConnection {
    /// Remote address: an IP literal, or a host name if the source resolved it
    pub remote: String,
    /// Remote port
    pub port: u16,
    /// Owning application as reported by the source
    pub app_name: String,
    pub state: ConnectionState,
}

impl RawConnection {
    pub fn new(
        remote: impl Into<String>,
        port: u16,
        app_name: impl Into<String>,
        state: ConnectionState,
    ) -> Self {
        Self {
            remote: remote.into(),
            port,
            app_name: app_name.into(),
            state,
        }
    }
}
