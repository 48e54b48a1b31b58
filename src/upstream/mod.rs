//! Upstream resolver endpoints.
//!
//! An [`Upstream`] performs one wire exchange per call. Dropping the returned
//! future abandons the exchange and closes its socket, which is how a race
//! cancels the losers.

mod socks5;
mod tcp;
mod udp;

pub use tcp::TcpUpstream;
pub use udp::UdpUpstream;

use async_trait::async_trait;
use hickory_proto::op::Message;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Per-exchange I/O budget for the built-in transports.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_DNS_PORT: u16 = 53;

/// One resolver endpoint.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send `query` and wait for the matching response.
    async fn exchange(&self, query: &Message) -> Result<Message>;

    /// Human readable address, used in logs.
    fn address(&self) -> &str;
}

/// An upstream plus its trust flag.
///
/// Answers from a trusted handle in the local group skip range validation.
#[derive(Clone)]
pub struct UpstreamHandle {
    upstream: Arc<dyn Upstream>,
    trusted: bool,
}

impl UpstreamHandle {
    pub fn new(upstream: Arc<dyn Upstream>, trusted: bool) -> Self {
        Self { upstream, trusted }
    }

    pub fn trusted(&self) -> bool {
        self.trusted
    }

    pub fn address(&self) -> &str {
        self.upstream.address()
    }

    pub async fn exchange(&self, query: &Message) -> Result<Message> {
        self.upstream.exchange(query).await
    }
}

impl fmt::Debug for UpstreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamHandle")
            .field("address", &self.address())
            .field("trusted", &self.trusted)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

/// Parsed upstream address: `[udp|tcp]://HOST[:PORT][?socks5=ADDR&netaddr=ADDR]`.
///
/// `netaddr` is the socket address actually dialed, which lets `HOST` be a
/// name. Without it `HOST` must be an IP literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSpec {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub socks5: Option<SocketAddr>,
    pub dial_addr: SocketAddr,
}

impl UpstreamSpec {
    /// Build the transport this address describes.
    pub fn connect(&self) -> Arc<dyn Upstream> {
        match (self.protocol, self.socks5) {
            (Protocol::Udp, _) => Arc::new(UdpUpstream::new(self.to_string(), self.dial_addr)),
            (Protocol::Tcp, None) => Arc::new(TcpUpstream::new(self.to_string(), self.dial_addr)),
            (Protocol::Tcp, Some(proxy)) => Arc::new(TcpUpstream::with_socks5(
                self.to_string(),
                self.dial_addr,
                proxy,
            )),
        }
    }
}

impl FromStr for UpstreamSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| Error::Config(format!("invalid upstream '{}': {}", s, why));

        let (protocol, rest) = match s.split_once("://") {
            Some(("udp", rest)) => (Protocol::Udp, rest),
            Some(("tcp", rest)) => (Protocol::Tcp, rest),
            Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme '{}'", scheme))),
            None => (Protocol::Udp, s),
        };

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let authority = authority.trim_end_matches('/');
        let (host, port) = split_host_port(authority).ok_or_else(|| invalid("bad host:port"))?;

        let mut socks5 = None;
        let mut dial_addr = None;
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(&format!("bad option '{}'", pair)))?;
            let addr: SocketAddr = value
                .parse()
                .map_err(|_| invalid(&format!("bad {} address '{}'", key, value)))?;
            match key {
                "socks5" => socks5 = Some(addr),
                "netaddr" => dial_addr = Some(addr),
                other => return Err(invalid(&format!("unknown option '{}'", other))),
            }
        }

        if socks5.is_some() && protocol == Protocol::Udp {
            return Err(invalid("socks5 is only supported for tcp upstreams"));
        }

        let dial_addr = match dial_addr {
            Some(addr) => addr,
            None => {
                let ip: IpAddr = host
                    .parse()
                    .map_err(|_| invalid("host is not an IP address and no netaddr given"))?;
                SocketAddr::new(ip, port)
            }
        };

        Ok(Self {
            protocol,
            host: host.to_string(),
            port,
            socks5,
            dial_addr,
        })
    }
}

impl fmt::Display for UpstreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.protocol.as_str(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.protocol.as_str(), self.host, self.port)
        }
    }
}

fn split_host_port(s: &str) -> Option<(&str, u16)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if after.is_empty() => DEFAULT_DNS_PORT,
            None => return None,
        };
        return Some((host, port));
    }
    match s.rsplit_once(':') {
        // A bare IPv6 literal without brackets has several colons.
        Some((host, _)) if host.contains(':') => Some((s, DEFAULT_DNS_PORT)),
        Some((host, port)) => Some((host, port.parse().ok()?)),
        None if !s.is_empty() => Some((s, DEFAULT_DNS_PORT)),
        None => None,
    }
}
