//! Usage Agent - host-resident app and network usage telemetry.
//!
//! This library samples which applications are running and focused and which
//! network domains the host talks to, aggregates the samples into per-day
//! usage documents and ships windowed summaries to a remote collector.
//!
//! # Guarantees
//!
//! - **Filtered destinations**: infrastructure, tracking and CDN hostnames are
//!   rejected before they reach a record
//! - **Durable days**: the live aggregate is persisted after every tick
//! - **At most once**: an interval with a successful transmission log entry is
//!   never sent again
//! - **Auditable**: every built payload is kept locally, sent or not
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Usage Agent                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐           │
//! │  │   Capture   │──▶│     Apps     │──▶│              │           │
//! │  │  (osascript │   └──────────────┘   │  Daily Store │           │
//! │  │ lsof, dns)  │   ┌──────────────┐   │ (usage_*.json│           │
//! │  │             │──▶│ Connections  │──▶│              │           │
//! │  └─────────────┘   │ classifier + │   └──────┬───────┘           │
//! │                    │  FQDN cache  │          │                   │
//! │                    └──────────────┘          ▼                   │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐           │
//! │  │Transmission │◀──│ Transmitter  │◀──│   Interval   │           │
//! │  │    Log      │   │ (retry, POST)│   │  Extractor   │           │
//! │  └─────────────┘   └──────────────┘   └──────────────┘           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use usage_agent::{agent::Agent, capture::PlatformCapture, config::Config, network::SystemResolver};
//!
//! let config = Config::load().unwrap_or_default();
//! let mut agent = Agent::new(PlatformCapture::new(), &config, Box::new(SystemResolver))
//!     .expect("valid configuration");
//!
//! // One sampling tick; `Agent::run` repeats this until stopped
//! let report = agent.tick(chrono::Utc::now());
//! println!("saved: {}", report.saved);
//! ```

pub mod agent;
pub mod capture;
pub mod config;
pub mod core;
pub mod network;
pub mod transmission;

// Re-export key types at crate root for convenience
pub use agent::{Agent, TickReport};
pub use capture::{AppSnapshot, CaptureError, CaptureSource, FixtureCapture, RawConnection};
pub use config::{Config, ConfigError, RetentionPolicy, TransmissionConfig};
pub use core::{DailyAggregate, DailyStore, Interval, LoadError};
pub use network::{classify, Classification, FqdnCache};
pub use transmission::{SendOutcome, TransmissionLog, TransmitError, Transmitter};

#[cfg(feature = "http")]
pub use transmission::HttpTransport;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Declaration of what the agent collects, shown by `usage-agent declaration`.
pub const COLLECTION_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              USAGE AGENT - DATA COLLECTION DECLARATION           ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent records how this computer is used, per day.          ║
║                                                                  ║
║  ✓ WHAT WE COLLECT:                                              ║
║    • Names of running applications and which one is in front     ║
║    • How long each application ran and held focus                ║
║    • Domain names and ports of user-facing sites contacted       ║
║    • How long each of those destinations was in use              ║
║                                                                  ║
║  ✗ WHAT WE NEVER COLLECT:                                        ║
║    • Page contents, URLs paths or request bodies                 ║
║    • Keystrokes, screen contents or window titles                ║
║    • Tracking, analytics, ad-network or CDN hostnames            ║
║                                                                  ║
║  Daily summaries stay on this machine. When transmission is      ║
║  enabled, interval summaries are sent to the configured          ║
║  collector and a copy of every payload is kept locally.          ║
║                                                                  ║
║  You can review transmissions anytime with:                      ║
║    usage-agent logs                                              ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_declaration_contents() {
        assert!(COLLECTION_DECLARATION.contains("DATA COLLECTION"));
        assert!(COLLECTION_DECLARATION.contains("NEVER COLLECT"));
        assert!(COLLECTION_DECLARATION.contains("usage-agent logs"));
    }
}
