use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record};
use splitdns::upstream::Upstream;
use splitdns::{Error, Result};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What a [`MockUpstream`] answers with.
#[derive(Debug, Clone)]
pub enum MockReply {
    Address(IpAddr),
    NxDomain,
    Fail,
}

/// Upstream that sleeps for a fixed latency, then replies.
///
/// `calls` counts exchanges started, `completed` those that ran to the end;
/// a cancelled exchange is counted in the first but not the second.
pub struct MockUpstream {
    name: String,
    latency: Duration,
    reply: MockReply,
    ttl: u32,
    truncated: bool,
    calls: AtomicUsize,
    completed: AtomicUsize,
}

impl MockUpstream {
    pub fn new(name: &str, latency_ms: u64, reply: MockReply) -> Self {
        Self {
            name: name.to_string(),
            latency: Duration::from_millis(latency_ms),
            reply,
            ttl: 60,
            truncated: false,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn answering(name: &str, latency_ms: u64, ip: &str) -> Self {
        Self::new(name, latency_ms, MockReply::Address(ip.parse().unwrap()))
    }

    pub fn failing(name: &str, latency_ms: u64) -> Self {
        Self::new(name, latency_ms, MockReply::Fail)
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Reply with the TC bit set.
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.completed.fetch_add(1, Ordering::SeqCst);

        let mut response = query.clone();
        response.set_message_type(MessageType::Response);
        response.set_truncated(self.truncated);
        match &self.reply {
            MockReply::Fail => {
                return Err(Error::Timeout {
                    upstream: self.name.clone(),
                });
            }
            MockReply::NxDomain => {
                response.set_response_code(ResponseCode::NXDomain);
            }
            MockReply::Address(ip) => {
                let name = query.queries()[0].name().clone();
                let rdata = match ip {
                    IpAddr::V4(v4) => RData::A(A(*v4)),
                    IpAddr::V6(v6) => RData::AAAA(AAAA(*v6)),
                };
                response.add_answer(Record::from_rdata(name, self.ttl, rdata));
            }
        }
        Ok(response)
    }

    fn address(&self) -> &str {
        &self.name
    }
}
