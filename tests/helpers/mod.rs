#![allow(dead_code)]

mod mock_upstream;

pub use mock_upstream::{MockReply, MockUpstream};

use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};
use splitdns::cache::AnswerCache;
use splitdns::dispatch::{Dispatcher, DispatcherConfig};
use splitdns::dns::answer_addresses;
use splitdns::group::{GroupRole, UpstreamGroup};
use splitdns::matcher::{DomainMatcher, DomainSet, NetList};
use splitdns::stats::Stats;
use splitdns::upstream::UpstreamHandle;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Builder for a dispatcher wired to mock upstreams.
pub struct Fixture {
    local: Vec<UpstreamHandle>,
    remote: Vec<UpstreamHandle>,
    local_domains: Option<String>,
    remote_domains: Option<String>,
    trusted_ranges: String,
    grace: Duration,
    cache_capacity: usize,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            local: Vec::new(),
            remote: Vec::new(),
            local_domains: None,
            remote_domains: None,
            trusted_ranges: "10.0.0.0/8\n".to_string(),
            grace: Duration::from_millis(50),
            cache_capacity: 0,
        }
    }

    pub fn local(mut self, upstream: &Arc<MockUpstream>, trusted: bool) -> Self {
        self.local.push(UpstreamHandle::new(upstream.clone(), trusted));
        self
    }

    pub fn remote(mut self, upstream: &Arc<MockUpstream>, trusted: bool) -> Self {
        self.remote.push(UpstreamHandle::new(upstream.clone(), trusted));
        self
    }

    pub fn local_domains(mut self, rules: &str) -> Self {
        self.local_domains = Some(rules.to_string());
        self
    }

    pub fn remote_domains(mut self, rules: &str) -> Self {
        self.remote_domains = Some(rules.to_string());
        self
    }

    pub fn trusted_ranges(mut self, ranges: &str) -> Self {
        self.trusted_ranges = ranges.to_string();
        self
    }

    pub fn grace_ms(mut self, ms: u64) -> Self {
        self.grace = Duration::from_millis(ms);
        self
    }

    pub fn cache(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut trusted = NetList::new();
        trusted.load_str(&self.trusted_ranges).unwrap();
        trusted.sort();

        Dispatcher::new(DispatcherConfig {
            local: UpstreamGroup::new(GroupRole::Local, self.local),
            remote: UpstreamGroup::new(GroupRole::Remote, self.remote),
            local_domains: self.local_domains.as_deref().map(domain_set),
            remote_domains: self.remote_domains.as_deref().map(domain_set),
            trusted_ips: Arc::new(trusted),
            grace: self.grace,
            cache: Arc::new(AnswerCache::with_capacity(self.cache_capacity)),
            stats: Arc::new(Stats::new()),
        })
    }
}

fn domain_set(rules: &str) -> Arc<dyn DomainMatcher> {
    let mut set = DomainSet::new();
    set.load_str(rules).unwrap();
    Arc::new(set)
}

pub fn mock(upstream: MockUpstream) -> Arc<MockUpstream> {
    Arc::new(upstream)
}

pub fn query(id: u16, name: &str) -> Message {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_recursion_desired(true);
    msg.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
    msg
}

/// First address in the answer section.
pub fn first_ip(response: &Message) -> IpAddr {
    answer_addresses(response)
        .next()
        .expect("response carries no address")
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}
