//! DNS message inspection helpers.
//!
//! Wire encoding is delegated to `hickory-proto`; this module only extracts
//! what the dispatcher needs: the normalized query identity, address records,
//! the minimum answer TTL and the response code.

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::RData;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Normalized identity of a query: lower-cased fully-qualified name, type and class.
///
/// Two requests with the same key are interchangeable for caching and routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsQuery {
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuery {
    /// Extract the key from a request carrying exactly one question.
    pub fn parse(request: &Message) -> Result<Self> {
        let question = match request.queries() {
            [q] => q,
            [] => return Err(Error::InvalidQuery("no question".into())),
            qs => {
                return Err(Error::InvalidQuery(format!(
                    "{} questions in one message",
                    qs.len()
                )));
            }
        };

        let mut name = question.name().to_lowercase();
        name.set_fqdn(true);

        Ok(Self {
            domain: name.to_ascii(),
            qtype: question.query_type().into(),
            qclass: question.query_class().into(),
        })
    }

    /// Name without the trailing root dot, as fed to the domain matchers.
    pub fn name(&self) -> &str {
        let trimmed = self.domain.trim_end_matches('.');
        if trimmed.is_empty() { "." } else { trimmed }
    }
}

/// Addresses carried by A/AAAA records in the answer section.
pub fn answer_addresses(response: &Message) -> impl Iterator<Item = IpAddr> + '_ {
    response
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
            Some(RData::AAAA(aaaa)) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
}

/// Minimum TTL across the answer section, `None` when it is empty.
pub fn min_ttl(response: &Message) -> Option<u32> {
    response.answers().iter().map(|r| r.ttl()).min()
}

/// How long a response may be cached, or `None` if it must not be.
///
/// Only complete NOERROR responses with a positive minimum answer TTL
/// qualify; a truncated (TC) reply is never stored.
pub fn cache_ttl(response: &Message) -> Option<Duration> {
    if response.response_code() != ResponseCode::NoError || response.truncated() {
        return None;
    }
    match min_ttl(response) {
        Some(ttl) if ttl > 0 => Some(Duration::from_secs(u64::from(ttl))),
        _ => None,
    }
}

/// Copy a cached response, rewriting the transaction ID for the new request.
pub fn response_from_cache(request_id: u16, cached: &Message) -> Message {
    let mut response = cached.clone();
    response.set_id(request_id);
    response
}

/// Build an answerless reply carrying `code` for a request we could not serve.
pub fn error_response(request: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(code);
    response.add_queries(request.queries().iter().cloned());
    response
}
