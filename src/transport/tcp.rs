//! TCP transport for DNS queries.
//!
//! Each client connection is handled independently. Queries on a
//! connection are answered in order until the client closes it or stays
//! idle too long. TCP DNS messages are prefixed with a 2-byte length.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::resolver::Resolver;
use crate::upstream::Upstream;

use super::{Protocol, answer, encode};

/// How long a connection may sit without sending a query.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP listener for the forwarder.
///
/// Binds to a local address and accepts connections from clients.
/// Each connection is handled in a separate task.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a TCP listener for the transport.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept loop on the runtime.
    pub fn start<U: Upstream>(self, resolver: Arc<Resolver<U>>) -> JoinHandle<io::Result<()>> {
        tokio::spawn(run_accept_loop(self.listener, resolver))
    }
}

/// Accept loop - spawns a handler task for each incoming connection.
async fn run_accept_loop<U: Upstream>(
    listener: TcpListener,
    resolver: Arc<Resolver<U>>,
) -> io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                tokio::spawn(handle_connection(client, peer, Arc::clone(&resolver)));
            }
            Err(e) => {
                warn!(error = %e, "TCP accept error");
            }
        }
    }
}

/// Serve queries on one connection until EOF, error or idle timeout.
async fn handle_connection<U: Upstream>(
    mut client: TcpStream,
    peer: SocketAddr,
    resolver: Arc<Resolver<U>>,
) {
    loop {
        let query = match tokio::time::timeout(IDLE_TIMEOUT, read_dns_message(&mut client)).await {
            Ok(Ok(Some(query))) => query,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                debug!(client = %peer, error = %e, "TCP read error");
                return;
            }
            Err(_) => {
                debug!(client = %peer, "closing idle TCP connection");
                return;
            }
        };

        let Some(reply) = answer(&resolver, &query, Protocol::Tcp).await else {
            continue;
        };
        let Some(bytes) = encode(&reply.message, Protocol::Tcp) else {
            continue;
        };
        if let Err(e) = write_dns_message(&mut client, &bytes).await {
            warn!(client = %peer, error = %e, "TCP response error");
            return;
        }
    }
}

/// Read one length-prefixed DNS message.
///
/// Returns `Ok(None)` on a clean EOF before the length prefix.
pub async fn read_dns_message<S>(stream: &mut S) -> io::Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let len = match stream.read_u16().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;

    Ok(Some(buf))
}

/// Write one DNS message with its 2-byte length prefix.
pub async fn write_dns_message<S>(stream: &mut S, message: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u16::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS message too large"))?;

    let mut framed = Vec::with_capacity(message.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);
    stream.write_all(&framed).await?;
    stream.flush().await
}
