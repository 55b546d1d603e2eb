//! Best-effort extraction of queried names from DNS capture lines.
//!
//! Lines look like tcpdump output:
//!
//! ```text
//! IP 192.168.0.14.49457 > 192.168.0.1.53: 52389+ A? www.example.com. (33)
//! ```

use crate::network::classifier::classify;
use regex::Regex;
use std::sync::OnceLock;

/// Port assumed for names without any HTTP or development marker.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Port assumed for plain HTTP and development names.
pub const DEFAULT_HTTP_PORT: u16 = 80;

const HTTP_MARKERS: &[&str] = &["http.", "insecure."];
const HTTP_PREFIXES: &[&str] = &["demo.", "example."];
const DEV_MARKERS: &[&str] = &["localhost", "local", "dev.", "staging.", "test."];
const DEV_PORTS: &[u16] = &[3000, 8080, 5000, 8000];

/// Record type of an address query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    A,
    Aaaa,
}

/// An accepted DNS query with its inferred destination port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    pub domain: String,
    pub port: u16,
    pub query_type: QueryType,
}

fn query_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\s(A|AAAA)\?\s+([A-Za-z0-9.-]+)\.").expect("static DNS query pattern")
    })
}

/// Extract the raw queried name from an `A?`/`AAAA?` line.
///
/// `CNAME?` and every other query type are ignored.
pub fn parse_query_line(line: &str) -> Option<(String, QueryType)> {
    if !line.contains('?') || line.contains("CNAME?") {
        return None;
    }

    let captures = query_pattern().captures(line)?;
    let query_type = match captures.get(1)?.as_str() {
        "A" => QueryType::A,
        _ => QueryType::Aaaa,
    };
    Some((captures.get(2)?.as_str().to_string(), query_type))
}

/// Parse a line and keep it only if the classifier accepts the name.
pub fn extract_query(line: &str) -> Option<DnsQuery> {
    let (candidate, query_type) = parse_query_line(line)?;
    let domain = classify(&candidate).domain()?;
    let port = infer_port(&domain);
    Some(DnsQuery {
        domain,
        port,
        query_type,
    })
}

/// Guess the destination port of a queried name.
///
/// DNS carries no port, so this relies on naming conventions only.
pub fn infer_port(fqdn: &str) -> u16 {
    let name = fqdn.to_ascii_lowercase();

    if HTTP_MARKERS.iter().any(|m| name.contains(m))
        || HTTP_PREFIXES.iter().any(|p| name.starts_with(p))
    {
        return DEFAULT_HTTP_PORT;
    }

    if DEV_MARKERS.iter().any(|m| name.contains(m)) {
        return DEV_PORTS
            .iter()
            .copied()
            .find(|port| name.contains(&port.to_string()))
            .unwrap_or(DEFAULT_HTTP_PORT);
    }

    DEFAULT_HTTPS_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_a_and_aaaa_queries() {
        let a = "IP 192.168.0.14.49457 > 192.168.0.1.53: 52389+ A? github.com. (28)";
        let aaaa = "IP 192.168.0.14.62960 > 192.168.0.1.53: 53501+ AAAA? www.example.org. (33)";

        assert_eq!(
            parse_query_line(a),
            Some(("github.com".to_string(), QueryType::A))
        );
        assert_eq!(
            parse_query_line(aaaa),
            Some(("www.example.org".to_string(), QueryType::Aaaa))
        );
    }

    #[test]
    fn test_cname_and_responses_are_ignored() {
        let cname = "IP 10.0.0.2.5353 > 10.0.0.1.53: 1+ CNAME? github.com. (28)";
        let response = "IP 10.0.0.1.53 > 10.0.0.2.5353: 1 1/0/0 A 140.82.112.4 (44)";
        assert!(parse_query_line(cname).is_none());
        assert!(parse_query_line(response).is_none());
    }

    #[test]
    fn test_extract_query_applies_classifier() {
        let accepted = "IP 10.0.0.2.5353 > 10.0.0.1.53: 7+ A? github.com. (28)";
        let rejected = "IP 10.0.0.2.5353 > 10.0.0.1.53: 8+ A? stats.g.doubleclick.net. (40)";

        let query = extract_query(accepted).unwrap();
        assert_eq!(query.domain, "github.com");
        assert_eq!(query.port, 443);
        assert!(extract_query(rejected).is_none());
    }

    #[test]
    fn test_infer_port() {
        assert_eq!(infer_port("github.com"), 443);
        assert_eq!(infer_port("http.example.net"), 80);
        assert_eq!(infer_port("demo.site.io"), 80);
        assert_eq!(infer_port("app3000.dev.example.com"), 3000);
        assert_eq!(infer_port("staging.shop.io"), 80);
    }
}
