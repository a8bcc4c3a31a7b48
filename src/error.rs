//! Error types for the forwarder.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::error::ProtoError;
use thiserror::Error;

use crate::transport::Protocol;

/// Top-level error returned by [`crate::proxy::run`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{protocol} listener stopped: {reason}")]
    ListenerStopped { protocol: Protocol, reason: String },
}

/// Startup configuration errors. Never raised while serving queries.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("invalid server address: {value:?}")]
    InvalidServerAddress { value: String },

    #[error("domain {domain:?} refers to unknown server {server:?}")]
    UnknownServer { domain: String, server: String },

    #[error("domain policy entries cannot be empty")]
    EmptyDomain,

    #[error("cache_expiration_secs must be greater than 0")]
    ZeroCacheExpiration,

    #[error("upstream_timeout_ms must be greater than 0")]
    ZeroUpstreamTimeout,

    #[error("invalid log level: {level:?}")]
    InvalidLogLevel { level: String },

    #[error("failed to detect outbound address: {0}")]
    OutboundDetection(#[source] io::Error),
}

/// Failure to obtain an answer from an upstream server.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("failed to encode query: {0}")]
    Encode(#[source] ProtoError),

    #[error("malformed response: {0}")]
    Decode(#[source] ProtoError),
}

/// Why a query ended with an error reply.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("query carries no question")]
    EmptyQuestion,

    #[error("upstream {server} failed: {source}")]
    Upstream {
        server: SocketAddr,
        #[source]
        source: UpstreamError,
    },
}

/// A question that cannot be used as a cache key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheKeyError {
    #[error("query name is empty")]
    EmptyName,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
