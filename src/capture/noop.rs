//! Non-macOS (noop) capture source.
//!
//! This exists so the crate (and binary) can compile and run on targets
//! without a capture adapter. Snapshots are always empty.

use crate::capture::dns::DnsCapture;
use crate::capture::types::{AppSnapshot, RawConnection};
use crate::capture::{CaptureError, CaptureSource};

/// A capture source that never observes anything.
#[derive(Debug, Clone, Default)]
pub struct NoopCapture;

impl NoopCapture {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureSource for NoopCapture {
    fn snapshot_apps(&mut self) -> Result<AppSnapshot, CaptureError> {
        Ok(AppSnapshot::default())
    }

    fn snapshot_connections(&mut self) -> Result<Vec<RawConnection>, CaptureError> {
        Ok(Vec::new())
    }

    fn dns_query_stream(&mut self) -> Result<Option<DnsCapture>, CaptureError> {
        Ok(None)
    }
}

/// On non-macOS platforms there is no permission gate.
pub fn check_permission() -> bool {
    true
}
