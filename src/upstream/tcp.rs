//! DNS over TCP upstream, optionally tunnelled through a SOCKS5 proxy.

use async_trait::async_trait;
use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};

use super::{UPSTREAM_TIMEOUT, Upstream, socks5};
use crate::error::{Error, Result};
use crate::transport::tcp::{read_frame, write_frame};

pub struct TcpUpstream {
    name: String,
    server_addr: SocketAddr,
    socks5: Option<SocketAddr>,
    timeout: Duration,
}

impl TcpUpstream {
    pub fn new(name: impl Into<String>, server_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            server_addr,
            socks5: None,
            timeout: UPSTREAM_TIMEOUT,
        }
    }

    /// Reach `server_addr` through the SOCKS5 proxy at `proxy`.
    pub fn with_socks5(name: impl Into<String>, server_addr: SocketAddr, proxy: SocketAddr) -> Self {
        Self {
            socks5: Some(proxy),
            ..Self::new(name, server_addr)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream = match self.socks5 {
            Some(proxy) => socks5::connect(proxy, self.server_addr).await?,
            None => TcpStream::connect(self.server_addr)
                .await
                .map_err(|e| Error::io(&self.name, e))?,
        };
        stream
            .set_nodelay(true)
            .map_err(|e| Error::io(&self.name, e))?;
        Ok(stream)
    }

    async fn exchange_on(&self, query: &Message) -> Result<Message> {
        let query_bytes = query.to_vec()?;
        let mut stream = self.connect().await?;

        write_frame(&mut stream, &query_bytes)
            .await
            .map_err(|e| Error::io(&self.name, e))?;
        let frame = read_frame(&mut stream)
            .await
            .map_err(|e| Error::io(&self.name, e))?
            .ok_or_else(|| {
                Error::io(
                    &self.name,
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed before response",
                    ),
                )
            })?;

        let response = Message::from_vec(&frame)?;
        if response.id() != query.id() {
            return Err(Error::MismatchedResponse {
                upstream: self.name.clone(),
                expected: query.id(),
                got: response.id(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Upstream for TcpUpstream {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        let deadline = Instant::now() + self.timeout;
        timeout_at(deadline, self.exchange_on(query))
            .await
            .map_err(|_| Error::timeout(&self.name))?
    }

    fn address(&self) -> &str {
        &self.name
    }
}
