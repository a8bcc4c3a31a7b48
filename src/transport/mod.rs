//! Transport layer implementations for the forwarder.
//!
//! Provides UDP and TCP listeners that decode client queries, hand them
//! to the shared [`Resolver`] and write the replies back.

pub mod tcp;
pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

use std::fmt;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tracing::{debug, warn};

use crate::dns::{self, HEADER_LEN};
use crate::resolver::Resolver;
use crate::upstream::Upstream;

/// Transport protocol identifier for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default UDP payload limit for clients without EDNS.
pub const DEFAULT_UDP_PAYLOAD: usize = 512;

/// Reply to a client packet and the payload size the client accepts.
pub(crate) struct Reply {
    pub message: Message,
    pub max_payload: usize,
}

/// Decode a client packet and produce the reply.
///
/// Returns `None` when nothing should be sent back. Opcodes the resolver
/// ignores get NOTIMP here.
pub(crate) async fn answer<U: Upstream>(
    resolver: &Resolver<U>,
    packet: &[u8],
    protocol: Protocol,
) -> Option<Reply> {
    if packet.len() < HEADER_LEN {
        debug!(%protocol, len = packet.len(), "dropping short packet");
        return None;
    }

    let query = match Message::from_bytes(packet) {
        Ok(query) => query,
        Err(e) => {
            warn!(%protocol, error = %e, "failed to parse DNS message");
            return dns::format_error(packet).map(|message| Reply {
                message,
                max_payload: DEFAULT_UDP_PAYLOAD,
            });
        }
    };

    let message = match resolver.process_query(&query).await {
        Some(resolution) => resolution.into_response(),
        None => dns::error_reply(&query, ResponseCode::NotImp),
    };

    Some(Reply {
        message,
        max_payload: usize::from(query.max_payload()),
    })
}

pub(crate) fn encode(response: &Message, protocol: Protocol) -> Option<Vec<u8>> {
    match response.to_bytes() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(%protocol, id = response.id(), error = %e, "failed to encode reply");
            None
        }
    }
}
