//! DNS reply construction on top of `hickory-proto` messages.

use std::net::Ipv4Addr;

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{RData, Record};

/// Length of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Lowercase a domain name and strip surrounding whitespace and trailing dots.
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Turn an upstream or cached answer into the reply for `query`.
///
/// The transaction id, opcode, RD flag and question section come from the
/// client's query. Everything else comes from the answer.
pub fn reply_from(query: &Message, mut answer: Message) -> Message {
    answer
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired());
    answer.take_queries();
    answer.add_queries(query.queries().to_vec());
    answer
}

/// Reply to `query` with `code` and no records.
pub fn error_reply(query: &Message, code: ResponseCode) -> Message {
    let mut reply = Message::error_msg(query.id(), query.op_code(), code);
    reply
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true);
    reply.add_queries(query.queries().to_vec());
    reply
}

/// FORMERR for a packet that could not be decoded.
///
/// Returns `None` when the packet is too short to carry a transaction id.
pub fn format_error(packet: &[u8]) -> Option<Message> {
    if packet.len() < 2 {
        return None;
    }
    let id = u16::from_be_bytes([packet[0], packet[1]]);
    Some(Message::error_msg(id, OpCode::Query, ResponseCode::FormErr))
}

/// Copy of `response` with the TC bit set and every record section dropped.
pub fn truncated_reply(response: &Message) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(response.id())
        .set_message_type(MessageType::Response)
        .set_op_code(response.op_code())
        .set_response_code(response.response_code())
        .set_recursion_desired(response.recursion_desired())
        .set_recursion_available(response.recursion_available())
        .set_truncated(true);
    reply.add_queries(response.queries().to_vec());
    reply
}

/// What gets logged for a resolved answer.
#[derive(Debug, PartialEq, Eq)]
pub enum AnswerSummary {
    Ipv4(Ipv4Addr),
    Record(String),
}

pub fn summarize(record: &Record) -> AnswerSummary {
    match record.data() {
        Some(RData::A(a)) => AnswerSummary::Ipv4(a.0),
        _ => AnswerSummary::Record(record.to_string()),
    }
}
