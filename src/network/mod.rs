//! Network destination handling.
//!
//! This module contains:
//! - The domain classifier separating user-facing sites from infrastructure
//! - The FQDN cache memoizing reverse lookups
//! - DNS capture line parsing and port inference

pub mod classifier;
pub mod dns;
pub mod resolver;

// Re-export commonly used types
pub use classifier::{classify, is_accepted, Classification, RejectReason};
pub use dns::{extract_query, infer_port, parse_query_line, DnsQuery, QueryType};
pub use resolver::{FqdnCache, ReverseResolver, StaticResolver, SystemResolver};

/// Ports worth tracking on established sockets.
pub const INTERESTING_PORTS: &[u16] = &[80, 443, 8080, 3000, 5000, 8000, 9000];

/// Application protocol implied by a destination port.
pub fn protocol_for_port(port: u16) -> &'static str {
    match port {
        443 | 8443 => "HTTPS",
        _ => "HTTP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_for_port() {
        assert_eq!(protocol_for_port(443), "HTTPS");
        assert_eq!(protocol_for_port(80), "HTTP");
        assert_eq!(protocol_for_port(3000), "HTTP");
    }
}
