//! Configuration loading and validation.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::router::DomainPolicy;

/// Port assumed for server addresses given without one.
pub const DNS_PORT: u16 = 53;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Forwarder configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the UDP and TCP listeners bind to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Bind to the IP of the outbound interface instead of `listen`'s IP.
    /// The port still comes from `listen`.
    #[serde(default)]
    pub use_outbound: bool,

    /// Server used when no domain entry matches: a `[servers]` name or an address.
    pub default_server: String,

    /// Lifetime of every cache entry, in seconds.
    #[serde(default = "default_cache_expiration")]
    pub cache_expiration_secs: u64,

    /// Bounded wait for one upstream exchange, in milliseconds.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Named upstream servers.
    #[serde(default)]
    pub servers: BTreeMap<String, String>,

    /// Domain to server routing; values are `[servers]` names or addresses.
    #[serde(default)]
    pub domains: BTreeMap<String, String>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DNS_PORT))
}

const fn default_cache_expiration() -> u64 {
    300
}

const fn default_upstream_timeout() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_expiration_secs == 0 {
            return Err(ConfigError::ZeroCacheExpiration);
        }

        if self.upstream_timeout_ms == 0 {
            return Err(ConfigError::ZeroUpstreamTimeout);
        }

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel {
                level: self.log_level.clone(),
            });
        }

        self.domain_policy().map(|_| ())
    }

    /// Build the routing table, resolving server names to addresses.
    pub fn domain_policy(&self) -> Result<DomainPolicy, ConfigError> {
        let default_server = self.resolve_server("default_server", &self.default_server)?;
        let mut policy = DomainPolicy::new(default_server);

        for (domain, server) in &self.domains {
            if domain.trim().trim_end_matches('.').is_empty() {
                return Err(ConfigError::EmptyDomain);
            }
            policy.insert(domain, self.resolve_server(domain, server)?);
        }

        Ok(policy)
    }

    /// Address the listeners should bind to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        if !self.use_outbound {
            return Ok(self.listen);
        }
        let ip = outbound_ip().map_err(ConfigError::OutboundDetection)?;
        Ok(SocketAddr::new(ip, self.listen.port()))
    }

    pub fn cache_expiration(&self) -> Duration {
        Duration::from_secs(self.cache_expiration_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    fn resolve_server(&self, domain: &str, server: &str) -> Result<SocketAddr, ConfigError> {
        if let Some(addr) = self.servers.get(server) {
            return parse_server_addr(addr);
        }
        parse_server_addr(server).map_err(|_| ConfigError::UnknownServer {
            domain: domain.to_string(),
            server: server.to_string(),
        })
    }
}

/// Parse `ip:port` or a bare IP, which defaults to port 53.
pub fn parse_server_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    let value = value.trim();
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    value
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| ConfigError::InvalidServerAddress {
            value: value.to_string(),
        })
}

/// IP of the interface that routes to the internet.
///
/// Connecting a UDP socket sends no packets; it only selects a route.
pub fn outbound_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}
