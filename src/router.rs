//! Upstream selection by domain policy.
//!
//! Maps a query name to the upstream server that should answer it. Names
//! match on whole-label suffixes, so an entry for `example.com` also covers
//! `www.example.com`, and the most specific entry wins.

use rustc_hash::FxHashMap;
use std::net::SocketAddr;

use crate::dns::normalize_name;

/// Domain to upstream table with a default server.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct DomainPolicy {
    routes: FxHashMap<String, SocketAddr>,
    default_server: SocketAddr,
}

impl DomainPolicy {
    /// Create a policy that sends everything to `default_server`.
    pub fn new(default_server: SocketAddr) -> Self {
        Self {
            routes: FxHashMap::default(),
            default_server,
        }
    }

    /// Add a route, replacing any previous server for the domain.
    pub fn insert(&mut self, domain: &str, server: SocketAddr) {
        self.routes.insert(normalize_name(domain), server);
    }

    pub fn with_route(mut self, domain: &str, server: SocketAddr) -> Self {
        self.insert(domain, server);
        self
    }

    /// Pick the upstream for a query name.
    ///
    /// Tries the full name, then each parent domain. Falls back to the
    /// default server when nothing matches.
    pub fn route(&self, name: &str) -> SocketAddr {
        let name = normalize_name(name);
        let mut current = name.as_str();

        while !current.is_empty() {
            if let Some(server) = self.routes.get(current) {
                return *server;
            }
            match current.find('.') {
                Some(pos) => current = &current[pos + 1..],
                None => break,
            }
        }

        self.default_server
    }

    pub fn default_server(&self) -> SocketAddr {
        self.default_server
    }

    /// Returns the number of configured domain routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
