//! UDP transport for DNS queries.
//!
//! One receive loop; every datagram is resolved in its own task so a slow
//! upstream never stalls other clients.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::Message;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::dns;
use crate::resolver::Resolver;
use crate::upstream::Upstream;

use super::{MAX_DNS_PACKET_SIZE, Protocol, answer, encode};

/// UDP listener for the forwarder.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the receive loop on the runtime.
    pub fn start<U: Upstream>(self, resolver: Arc<Resolver<U>>) -> JoinHandle<io::Result<()>> {
        tokio::spawn(run(self.socket, resolver))
    }
}

async fn run<U: Upstream>(socket: Arc<UdpSocket>, resolver: Arc<Resolver<U>>) -> io::Result<()> {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "UDP recv error");
                continue;
            }
        };

        let packet = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let resolver = Arc::clone(&resolver);

        tokio::spawn(async move {
            let Some(reply) = answer(&resolver, &packet, Protocol::Udp).await else {
                return;
            };
            let Some(bytes) = fit_payload(&reply.message, reply.max_payload) else {
                return;
            };
            if let Err(e) = socket.send_to(&bytes, src).await {
                warn!(client = %src, error = %e, "UDP response error");
            }
        });
    }
}

/// Encode `response`, falling back to a truncated reply when it is too
/// large for the client.
fn fit_payload(response: &Message, limit: usize) -> Option<Vec<u8>> {
    let bytes = encode(response, Protocol::Udp)?;
    if bytes.len() <= limit {
        return Some(bytes);
    }
    encode(&dns::truncated_reply(response), Protocol::Udp)
}
