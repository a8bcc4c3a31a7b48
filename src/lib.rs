//! Switchyard - a caching, policy-routing DNS forwarder.
//!
//! Queries arrive over UDP or TCP, are answered from a time-expiring cache
//! when possible, and are otherwise forwarded to the upstream server that
//! the domain policy selects for the query name.

pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod proxy;
pub mod resolver;
pub mod router;
pub mod transport;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
