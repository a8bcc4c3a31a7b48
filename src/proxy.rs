//! DNS proxy orchestration.
//!
//! Binds transports, runs the cache sweeper and supervises both
//! listeners: the proxy serves while both run and stops both together.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, Either};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::cache::DnsCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::Resolver;
use crate::router::DomainPolicy;
use crate::transport::Protocol;
use crate::transport::{tcp::TcpTransport, udp::UdpTransport};
use crate::upstream::UdpUpstream;

/// Shortest interval between cache sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the DNS proxy.
pub struct ProxyConfig {
    /// Local address for both listeners (e.g., 127.0.0.1:53)
    pub bind_addr: SocketAddr,
    /// Domain routing table and default upstream
    pub policy: DomainPolicy,
    /// Lifetime of every cache entry
    pub cache_expiration: Duration,
    /// Bounded wait for one upstream exchange
    pub upstream_timeout: Duration,
}

impl ProxyConfig {
    /// Derive the runtime settings from a validated [`Config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            bind_addr: config.listen_addr()?,
            policy: config.domain_policy()?,
            cache_expiration: config.cache_expiration(),
            upstream_timeout: config.upstream_timeout(),
        })
    }
}

/// Run the DNS proxy with the given configuration.
///
/// Starts UDP and TCP transports on the bind address. Returns `Ok(())`
/// after Ctrl-C, or an error as soon as either listener stops.
pub async fn run(config: ProxyConfig) -> Result<()> {
    let cache = Arc::new(DnsCache::new(config.cache_expiration));
    let routes = config.policy.len();
    let default_server = config.policy.default_server();
    let resolver = Arc::new(Resolver::new(
        Arc::clone(&cache),
        config.policy,
        UdpUpstream::new(config.upstream_timeout),
    ));

    let udp = UdpTransport::bind(config.bind_addr).await?;
    let tcp = TcpTransport::bind(config.bind_addr).await?;

    info!(addr = %config.bind_addr, "starting at {}/udp", config.bind_addr);
    info!(addr = %config.bind_addr, "starting at {}/tcp", config.bind_addr);
    info!(
        routes,
        %default_server,
        expiration = ?config.cache_expiration,
        "forwarding with domain policy"
    );

    let sweeper = spawn_sweeper(cache);
    let mut udp = udp.start(Arc::clone(&resolver));
    let mut tcp = tcp.start(resolver);

    let stopped = tokio::select! {
        signal = tokio::signal::ctrl_c() => signal.map(|()| None),
        stopped = first_stopped(&mut udp, &mut tcp) => Ok(Some(stopped)),
    };

    udp.abort();
    tcp.abort();
    sweeper.abort();

    match stopped? {
        None => {
            info!("shutting down");
            Ok(())
        }
        Some((protocol, outcome)) => Err(Error::ListenerStopped {
            protocol,
            reason: describe_exit(outcome),
        }),
    }
}

type ListenerExit = std::result::Result<io::Result<()>, JoinError>;

/// Wait until either listener task ends.
async fn first_stopped(
    udp: &mut JoinHandle<io::Result<()>>,
    tcp: &mut JoinHandle<io::Result<()>>,
) -> (Protocol, ListenerExit) {
    match future::select(udp, tcp).await {
        Either::Left((outcome, _)) => (Protocol::Udp, outcome),
        Either::Right((outcome, _)) => (Protocol::Tcp, outcome),
    }
}

fn describe_exit(outcome: ListenerExit) -> String {
    match outcome {
        Ok(Ok(())) => "listener exited".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(e) => e.to_string(),
    }
}

/// Periodically drop expired cache entries.
fn spawn_sweeper(cache: Arc<DnsCache>) -> JoinHandle<()> {
    let period = cache.expiration().max(MIN_SWEEP_INTERVAL);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let removed = cache.purge_expired();
            debug!(removed, remaining = cache.len(), "cache sweep");
        }
    })
}
