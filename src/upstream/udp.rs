//! DNS over UDP upstream (RFC 1035 §4.2.1).
//!
//! Each exchange binds a fresh ephemeral socket connected to the server, so
//! the kernel filters datagrams from other sources and abandoning the
//! exchange releases the port immediately.

use async_trait::async_trait;
use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use super::{UPSTREAM_TIMEOUT, Upstream};
use crate::error::{Error, Result};

/// Largest UDP payload; replies are never cut short by the receive buffer.
const MAX_UDP_DATAGRAM: usize = 65_535;

pub struct UdpUpstream {
    name: String,
    server_addr: SocketAddr,
    timeout: Duration,
}

impl UdpUpstream {
    pub fn new(name: impl Into<String>, server_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            server_addr,
            timeout: UPSTREAM_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        let deadline = Instant::now() + self.timeout;
        let query_bytes = query.to_vec()?;

        let bind_addr: SocketAddr = if self.server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::io(&self.name, e))?;
        socket
            .connect(self.server_addr)
            .await
            .map_err(|e| Error::io(&self.name, e))?;

        timeout_at(deadline, socket.send(&query_bytes))
            .await
            .map_err(|_| Error::timeout(&self.name))?
            .map_err(|e| Error::io(&self.name, e))?;

        let mut buf = vec![0u8; MAX_UDP_DATAGRAM];
        loop {
            let len = timeout_at(deadline, socket.recv(&mut buf))
                .await
                .map_err(|_| Error::timeout(&self.name))?
                .map_err(|e| Error::io(&self.name, e))?;

            let response = match Message::from_vec(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(upstream = %self.name, error = %e, "Dropping undecodable UDP datagram");
                    continue;
                }
            };
            // A late answer to an earlier query on a reused port; keep waiting.
            if response.id() != query.id() {
                debug!(
                    upstream = %self.name,
                    expected = query.id(),
                    got = response.id(),
                    "Dropping UDP response with foreign id"
                );
                continue;
            }
            if response.truncated() {
                debug!(upstream = %self.name, "UDP response truncated");
            }
            return Ok(response);
        }
    }

    fn address(&self) -> &str {
        &self.name
    }
}
