//! IP to FQDN resolution with process-lifetime memoization.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Reverse lookup collaborator.
pub trait ReverseResolver: Send + Sync {
    /// Look up the primary name for an address. `None` when there is none.
    fn reverse_lookup(&self, ip: IpAddr) -> Option<String>;
}

/// Reverse lookups through the system resolver (`getnameinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl ReverseResolver for SystemResolver {
    fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        match dns_lookup::lookup_addr(&ip) {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::debug!(%ip, error = %e, "reverse lookup failed");
                None
            }
        }
    }
}

/// Memoizes reverse lookups, including failures.
///
/// Entries never expire on their own. The owner clears the cache explicitly
/// at day rollover.
pub struct FqdnCache {
    resolver: Arc<dyn ReverseResolver>,
    entries: HashMap<IpAddr, Option<String>>,
}

impl FqdnCache {
    pub fn new(resolver: Box<dyn ReverseResolver>) -> Self {
        Self {
            resolver: Arc::from(resolver),
            entries: HashMap::new(),
        }
    }

    /// Handle to the resolver, for lookups made outside the cache's owner.
    pub fn resolver(&self) -> Arc<dyn ReverseResolver> {
        self.resolver.clone()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.entries.contains_key(&ip)
    }

    /// Resolve an address, hitting the resolver at most once per address.
    pub fn resolve(&mut self, ip: IpAddr) -> Option<String> {
        if let Some(cached) = self.entries.get(&ip) {
            return cached.clone();
        }

        let answer = self.resolver.reverse_lookup(ip);
        self.insert(ip, answer)
    }

    /// Cache a raw resolver answer for `ip` and return the normalized name.
    pub fn insert(&mut self, ip: IpAddr, answer: Option<String>) -> Option<String> {
        let name = answer.and_then(|name| normalize_name(&name, ip));

        match &name {
            Some(fqdn) => tracing::debug!(%ip, fqdn = %fqdn, "resolved address"),
            None => tracing::debug!(%ip, "caching failed resolution"),
        }

        self.entries.insert(ip, name.clone());
        name
    }

    /// Number of cached addresses (positive and negative).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cached failures.
    pub fn negative_entries(&self) -> usize {
        self.entries.values().filter(|v| v.is_none()).count()
    }

    /// Drop every cached entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Strip the root-label dot; treat empty or numeric answers as no name.
fn normalize_name(name: &str, ip: IpAddr) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name.parse::<IpAddr>().is_ok() || name == ip.to_string() {
        return None;
    }
    Some(name.to_ascii_lowercase())
}

/// Resolver backed by a fixed table, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    names: HashMap<IpAddr, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping.
    pub fn with(mut self, ip: IpAddr, name: impl Into<String>) -> Self {
        self.names.insert(ip, name.into());
        self
    }
}

impl ReverseResolver for StaticResolver {
    fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        self.names.get(&ip).cloned()
    }
}
