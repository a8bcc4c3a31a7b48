//! Forwarding queries to upstream resolvers.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use crate::error::UpstreamError;
use crate::transport::MAX_DNS_PACKET_SIZE;
use crate::transport::tcp::{read_dns_message, write_dns_message};

/// Outbound DNS client used by the resolver.
pub trait Upstream: Send + Sync + 'static {
    /// Send `query` to `server` and return its reply.
    fn forward(
        &self,
        query: &Message,
        server: SocketAddr,
    ) -> impl Future<Output = Result<Message, UpstreamError>> + Send;
}

/// Upstream client speaking plain DNS over UDP.
///
/// Opens a fresh ephemeral socket per query, so transaction ids never
/// collide between concurrent forwards. A truncated reply is retried once
/// over TCP within the same timeout.
#[derive(Debug, Clone)]
pub struct UdpUpstream {
    timeout: Duration,
}

impl UdpUpstream {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Upstream for UdpUpstream {
    async fn forward(&self, query: &Message, server: SocketAddr) -> Result<Message, UpstreamError> {
        let bytes = query.to_bytes().map_err(UpstreamError::Encode)?;
        let recv_size = usize::from(query.max_payload()).max(MAX_DNS_PACKET_SIZE);

        tokio::time::timeout(self.timeout, exchange(&bytes, query.id(), server, recv_size))
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))?
    }
}

async fn exchange(
    query: &[u8],
    id: u16,
    server: SocketAddr,
    recv_size: usize,
) -> Result<Message, UpstreamError> {
    let response = exchange_udp(query, id, server, recv_size).await?;
    if !response.truncated() {
        return Ok(response);
    }
    debug!(%server, id, "truncated upstream reply, retrying over TCP");
    exchange_tcp(query, id, server).await
}

async fn exchange_udp(
    query: &[u8],
    id: u16,
    server: SocketAddr,
    recv_size: usize,
) -> Result<Message, UpstreamError> {
    let local: SocketAddr = match server {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(server).await?;
    socket.send(query).await?;

    let mut buf = vec![0u8; recv_size];
    loop {
        let len = socket.recv(&mut buf).await?;
        let response = Message::from_bytes(&buf[..len]).map_err(UpstreamError::Decode)?;
        if response.id() == id {
            return Ok(response);
        }
        debug!(%server, expected = id, got = response.id(), "discarding mismatched upstream reply");
    }
}

async fn exchange_tcp(query: &[u8], id: u16, server: SocketAddr) -> Result<Message, UpstreamError> {
    let mut stream = TcpStream::connect(server).await?;
    write_dns_message(&mut stream, query).await?;

    loop {
        let Some(bytes) = read_dns_message(&mut stream).await? else {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        };
        let response = Message::from_bytes(&bytes).map_err(UpstreamError::Decode)?;
        if response.id() == id {
            return Ok(response);
        }
        debug!(%server, expected = id, got = response.id(), "discarding mismatched upstream reply");
    }
}
