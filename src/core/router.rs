//! The virtual-host route table.
//!
//! Compiles every virtual host's patterns plus its composed pipeline into
//! one request multiplexer, and derives the hostname set that certificate
//! issuance is restricted to. Built fresh each reload cycle and immutable
//! afterwards, so request tasks read it without locking.
use crate::ports::handler::BoxHandler;

/// One virtual host reduced to a single handler, paired with its patterns.
pub struct Route {
    pub patterns: Vec<String>,
    pub handler: BoxHandler,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("pattern must be either {{hostname}}/path or /path: {0:?}")]
    InvalidPattern(String),
}

struct Entry {
    /// Lowercased hostname; `None` matches any host.
    host: Option<String>,
    /// Path prefix including the leading slash.
    prefix: String,
    handler: BoxHandler,
}

/// Compiled pattern table. Matching picks, in order of preference: a
/// host-specific entry over an any-host entry, then the longest path
/// prefix, then the earliest registered pattern.
pub struct RouteTable {
    entries: Vec<Entry>,
    hostnames: Vec<String>,
}

impl RouteTable {
    pub fn compile(routes: Vec<Route>) -> Result<Self, RouterError> {
        let mut entries = Vec::new();
        let mut hostnames = Vec::new();

        for route in routes {
            for pattern in &route.patterns {
                let slash = pattern
                    .find('/')
                    .ok_or_else(|| RouterError::InvalidPattern(pattern.clone()))?;
                let (host, prefix) = pattern.split_at(slash);
                let host = if host.is_empty() {
                    None
                } else {
                    hostnames.push(host.to_ascii_lowercase());
                    Some(host.to_ascii_lowercase())
                };
                entries.push(Entry {
                    host,
                    prefix: prefix.to_string(),
                    handler: route.handler.clone(),
                });
            }
        }

        hostnames.sort();
        hostnames.dedup();
        Ok(Self {
            entries,
            hostnames,
        })
    }

    /// The sorted, deduplicated set of hostnames certificates may be issued
    /// for.
    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    /// Find the handler for a request, given its host (if any) and path.
    pub fn lookup(&self, host: Option<&str>, path: &str) -> Option<&BoxHandler> {
        let host = host.map(normalize_host);

        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| match (&entry.host, &host) {
                (None, _) => true,
                (Some(want), Some(got)) => want == got,
                (Some(_), None) => false,
            })
            .filter(|(_, entry)| prefix_matches(&entry.prefix, path))
            // max_by_key keeps the last maximum, so order ascending and
            // negate the registration index for first-registered-wins ties.
            .max_by_key(|(index, entry)| {
                (
                    entry.host.is_some(),
                    entry.prefix.len(),
                    usize::MAX - index,
                )
            })
            .map(|(_, entry)| &entry.handler)
    }
}

/// Segment-aware prefix matching: `/api` matches `/api` and `/api/x` but
/// not `/apifoo`; a prefix ending in `/` matches its whole subtree.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if let Some(stripped) = prefix.strip_suffix('/') {
        path.starts_with(prefix) || path == stripped
    } else {
        path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Lowercase and strip any port, handling bracketed IPv6 literals.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let bare = if let Some(end) = host.strip_prefix('[').and_then(|h| h.find(']')) {
        &host[1..=end]
    } else {
        host.split(':').next().unwrap_or(host)
    };
    bare.trim_matches(|c| c == '[' || c == ']').to_ascii_lowercase()
}
