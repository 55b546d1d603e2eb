//! Domain classifier: decides whether a host name is user-facing activity.
//!
//! Pure and deterministic. The same candidate always yields the same
//! verdict, independent of call order or any prior input.

use serde::{Deserialize, Serialize};

/// Minimum accepted candidate length.
pub const MIN_DOMAIN_LEN: usize = 4;

/// Maximum accepted candidate length (RFC 1035 limit).
pub const MAX_DOMAIN_LEN: usize = 253;

/// Maximum number of dot-separated labels.
pub const MAX_LABELS: usize = 3;

/// Subdomain labels that mark a main, user-facing site.
pub const MAIN_SITE_LABELS: &[&str] = &["www", "mail", "login", "news", "search", "docs"];

/// Host vendor telemetry and platform domains, rejected unconditionally.
const FIRST_PARTY_DOMAINS: &[&str] = &[
    "apple.com",
    "icloud.com",
    "mzstatic.com",
    "itunes.com",
    "apple-dns.net",
    "cdn-apple.com",
    "icloud-content.com",
];

/// Names that never leave the local network.
const LOCAL_MARKERS: &[&str] = &[
    "localhost",
    ".local",
    ".lan",
    ".home",
    ".corp",
    ".internal",
    "_tcp",
    "_udp",
    "_tls",
    "_service",
    "_dns",
    "in-addr.arpa",
    "ip6.arpa",
];

/// Tracking, analytics, ad-network and CDN edge markers, matched anywhere.
const DENY_SUBSTRINGS: &[&str] = &[
    // Advertising and tracking
    "doubleclick.",
    "google-analytics.",
    "googletagmanager.",
    "googlesyndication.",
    "googleadservices.",
    "googletag.",
    "scorecardresearch.",
    "quantserve.",
    "omtrdc.net",
    "demdex.net",
    "adsystem.",
    "adnxs.com",
    "criteo.com",
    "adtrafficquality.google",
    "bat.bing.com",
    "connect.facebook.net",
    "mixpanel.",
    "hotjar.",
    "amazonaws.com",
    // CDN and edge hostnames
    "cloudfront.net",
    "fastly.",
    "akamai.",
    "akamaiedge.net",
    "edgekey.net",
    "edgesuite.net",
    "edgecast.",
    "maxcdn.",
    "azureedge.net",
    "trafficmanager.net",
    "dualstack.",
    "edge-",
    "prod-",
    "cache-",
    // Application backends
    "grammarly.com",
    "walkme.com",
    "wbx2.com",
    "code42.com",
    "apheleia-",
    "cloud-ec-asn.",
    "mira-ssc.",
    "tmc-g2.",
    "spclient.",
    "api2direct.",
];

/// Generic infrastructure subdomain labels, matched as whole labels.
const DENY_LABELS: &[&str] = &[
    "metrics", "analytics", "tracking", "telemetry", "beacons", "stats", "collect", "pixel",
    "insights", "segment", "cdn", "static", "assets", "media", "widgets", "embed", "ocsp", "crl",
    "certificates", "api", "api2", "ajax", "fonts", "ssl", "secure", "www2", "www3", "m",
    "mobile", "admin", "staging", "dev", "test", "clients", "client", "config", "settings",
    "images", "img", "thumbs", "avatar", "content", "uploads", "downloads", "v1", "v2", "beta",
    "alpha", "preview", "temp", "tmp", "cache", "extension", "advertising", "adsense",
];

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Length outside `[MIN_DOMAIN_LEN, MAX_DOMAIN_LEN]`
    Length,
    /// No dot, so not a fully qualified name
    NoDot,
    /// Starts or ends with `.` or `-`
    BadEdge,
    /// Local-network or service-discovery name
    Local,
    /// Host vendor platform domain
    FirstParty,
    /// Matches the infrastructure/tracking deny-list
    DenyListed,
    /// More than `MAX_LABELS` labels
    TooManyLabels,
    /// Top-level label is not 2 to 6 characters
    BadTld,
    /// Subdomain is not a main-site label
    SubdomainNotAllowed,
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Accepted, normalised to lower case
    Accepted(String),
    Rejected(RejectReason),
}

impl Classification {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Classification::Accepted(_))
    }

    /// The accepted domain, if any.
    pub fn domain(self) -> Option<String> {
        match self {
            Classification::Accepted(domain) => Some(domain),
            Classification::Rejected(_) => None,
        }
    }
}

/// Classify a raw candidate host name.
pub fn classify(candidate: &str) -> Classification {
    match check(candidate) {
        Ok(()) => Classification::Accepted(candidate.to_ascii_lowercase()),
        Err(reason) => Classification::Rejected(reason),
    }
}

/// Shorthand for `classify(candidate).is_accepted()`.
pub fn is_accepted(candidate: &str) -> bool {
    check(candidate).is_ok()
}

fn check(candidate: &str) -> Result<(), RejectReason> {
    if candidate.len() < MIN_DOMAIN_LEN || candidate.len() > MAX_DOMAIN_LEN {
        return Err(RejectReason::Length);
    }
    if !candidate.contains('.') {
        return Err(RejectReason::NoDot);
    }
    if candidate.starts_with(['.', '-']) || candidate.ends_with(['.', '-']) {
        return Err(RejectReason::BadEdge);
    }

    let domain = candidate.to_ascii_lowercase();

    if LOCAL_MARKERS.iter().any(|m| domain.contains(m)) {
        return Err(RejectReason::Local);
    }
    if FIRST_PARTY_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
    {
        return Err(RejectReason::FirstParty);
    }
    if DENY_SUBSTRINGS.iter().any(|m| domain.contains(m)) {
        return Err(RejectReason::DenyListed);
    }

    let labels: Vec<&str> = domain.split('.').collect();
    let (tld, hosts) = labels.split_last().ok_or(RejectReason::NoDot)?;
    if hosts.iter().any(|label| DENY_LABELS.contains(label)) {
        return Err(RejectReason::DenyListed);
    }
    if labels.len() > MAX_LABELS {
        return Err(RejectReason::TooManyLabels);
    }
    if tld.len() < 2 || tld.len() > 6 {
        return Err(RejectReason::BadTld);
    }

    // [subdomain.]domain.tld: a subdomain must be a main-site label or very short
    if labels.len() > 2 {
        let first = labels[0];
        if first.len() > 2 && !MAIN_SITE_LABELS.contains(&first) {
            return Err(RejectReason::SubdomainNotAllowed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_main_sites() {
        for domain in ["github.com", "chatgpt.com", "claude.ai", "www.example.org", "w.deepl.com"] {
            assert!(is_accepted(domain), "{domain} should be accepted");
        }
    }

    #[test]
    fn test_accepted_domain_is_lowercased() {
        assert_eq!(
            classify("GitHub.com"),
            Classification::Accepted("github.com".to_string())
        );
    }

    #[test]
    fn test_structural_rejections() {
        assert_eq!(classify("a.b"), Classification::Rejected(RejectReason::Length));
        assert_eq!(classify("localhost"), Classification::Rejected(RejectReason::NoDot));
        assert_eq!(classify(".github.com"), Classification::Rejected(RejectReason::BadEdge));
        assert_eq!(classify("github.com-"), Classification::Rejected(RejectReason::BadEdge));
        assert_eq!(classify("example.abcdefg"), Classification::Rejected(RejectReason::BadTld));
    }

    #[test]
    fn test_label_count_rejection() {
        assert_eq!(
            classify("www.yahoo.co.jp"),
            Classification::Rejected(RejectReason::TooManyLabels)
        );
    }

    #[test]
    fn test_subdomain_allow_list() {
        assert!(is_accepted("mail.example.com"));
        assert!(is_accepted("docs.rust-lang.org"));
        assert_eq!(
            classify("gateway.example.com"),
            Classification::Rejected(RejectReason::SubdomainNotAllowed)
        );
    }

    #[test]
    fn test_deny_list_rejections() {
        assert_eq!(
            classify("ad.doubleclick.net"),
            Classification::Rejected(RejectReason::DenyListed)
        );
        assert_eq!(
            classify("cdn.example.com"),
            Classification::Rejected(RejectReason::DenyListed)
        );
        assert_eq!(
            classify("d1234.cloudfront.net"),
            Classification::Rejected(RejectReason::DenyListed)
        );
    }

    #[test]
    fn test_generic_labels_do_not_match_inside_words() {
        // "m." must not catch zoom.us, "api." must not catch therapi.com
        assert!(is_accepted("zoom.us"));
        assert!(is_accepted("therapi.com"));
    }

    #[test]
    fn test_first_party_and_local_rejections() {
        assert_eq!(
            classify("gateway.icloud.com"),
            Classification::Rejected(RejectReason::FirstParty)
        );
        assert_eq!(classify("apple.com"), Classification::Rejected(RejectReason::FirstParty));
        assert_eq!(classify("printer.local"), Classification::Rejected(RejectReason::Local));
    }
}
