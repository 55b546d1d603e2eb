//! Raw signal acquisition for the usage agent.
//!
//! Capture sources are external collaborators: they enumerate running apps,
//! list established sockets and stream DNS query lines. The agent only sees
//! them through [`CaptureSource`], so tests drive it with [`FixtureCapture`].

pub mod dns;
pub mod fixture;
pub mod parse;
pub mod types;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(not(target_os = "macos"))]
pub mod noop;

use thiserror::Error;

// Re-export commonly used types
pub use dns::{DnsCapture, DNS_QUEUE_CAPACITY};
pub use fixture::FixtureCapture;
pub use types::{AppSnapshot, ConnectionState, RawConnection};

#[cfg(target_os = "macos")]
pub use macos::{check_permission, MacOSCapture};

/// Platform-specific capture source
#[cfg(target_os = "macos")]
pub type PlatformCapture = MacOSCapture;

#[cfg(not(target_os = "macos"))]
pub use noop::{check_permission, NoopCapture};

/// Platform-specific capture source
#[cfg(not(target_os = "macos"))]
pub type PlatformCapture = NoopCapture;

/// Errors raised while acquiring a raw snapshot.
///
/// A capture error never aborts the tick loop: the affected source is skipped
/// for that tick and no record is mutated.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to run `{command}`: {message}")]
    CommandFailed { command: String, message: String },

    #[error("unexpected output from `{command}`: {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("DNS capture is already running")]
    AlreadyRunning,

    #[error("capture source unavailable: {0}")]
    Unavailable(String),
}

/// Polymorphic contract for raw signal acquisition.
pub trait CaptureSource: Send {
    /// Enumerate running applications and the frontmost one.
    fn snapshot_apps(&mut self) -> Result<AppSnapshot, CaptureError>;

    /// List remote endpoints of established sockets.
    fn snapshot_connections(&mut self) -> Result<Vec<RawConnection>, CaptureError>;

    /// Start a background DNS query stream.
    ///
    /// Returns `Ok(None)` when the source has no DNS capability.
    fn dns_query_stream(&mut self) -> Result<Option<DnsCapture>, CaptureError>;
}
