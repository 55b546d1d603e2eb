//! Deterministic capture source fed with literal fixtures.

use crate::capture::dns::DnsCapture;
use crate::capture::types::{AppSnapshot, RawConnection};
use crate::capture::{CaptureError, CaptureSource};
use std::io::Cursor;

/// A capture source that returns whatever it was last given.
///
/// Failures can be injected per source; an injected failure is consumed by
/// the next snapshot call.
#[derive(Debug, Clone, Default)]
pub struct FixtureCapture {
    pub apps: AppSnapshot,
    pub connections: Vec<RawConnection>,
    pub dns_lines: Vec<String>,
    fail_apps: Option<String>,
    fail_connections: Option<String>,
}

impl FixtureCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the app fixture.
    pub fn set_apps<I, S>(&mut self, running: I, frontmost: Option<&str>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apps = AppSnapshot::new(running, frontmost);
    }

    /// Replace the connection fixture.
    pub fn set_connections(&mut self, connections: Vec<RawConnection>) {
        self.connections = connections;
    }

    /// Make the next app snapshot fail.
    pub fn fail_next_apps(&mut self, message: impl Into<String>) {
        self.fail_apps = Some(message.into());
    }

    /// Make the next connection snapshot fail.
    pub fn fail_next_connections(&mut self, message: impl Into<String>) {
        self.fail_connections = Some(message.into());
    }
}

impl CaptureSource for FixtureCapture {
    fn snapshot_apps(&mut self) -> Result<AppSnapshot, CaptureError> {
        match self.fail_apps.take() {
            Some(message) => Err(CaptureError::Unavailable(message)),
            None => Ok(self.apps.clone()),
        }
    }

    fn snapshot_connections(&mut self) -> Result<Vec<RawConnection>, CaptureError> {
        match self.fail_connections.take() {
            Some(message) => Err(CaptureError::Unavailable(message)),
            None => Ok(self.connections.clone()),
        }
    }

    fn dns_query_stream(&mut self) -> Result<Option<DnsCapture>, CaptureError> {
        if self.dns_lines.is_empty() {
            return Ok(None);
        }
        let mut text = self.dns_lines.join("\n");
        text.push('\n');
        Ok(Some(DnsCapture::from_reader(Cursor::new(text))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ConnectionState;

    #[test]
    fn test_injected_failure_is_consumed() {
        let mut capture = FixtureCapture::new();
        capture.set_apps(vec!["Safari"], Some("Safari"));
        capture.fail_next_apps("window server unavailable");

        assert!(capture.snapshot_apps().is_err());
        let snapshot = capture.snapshot_apps().unwrap();
        assert!(snapshot.is_frontmost("Safari"));
    }

    #[test]
    fn test_connections_fixture() {
        let mut capture = FixtureCapture::new();
        capture.set_connections(vec![RawConnection::new(
            "140.82.112.4",
            443,
            "Chrome",
            ConnectionState::Established,
        )]);
        assert_eq!(capture.snapshot_connections().unwrap().len(), 1);
        assert!(capture.dns_query_stream().unwrap().is_none());
    }
}
