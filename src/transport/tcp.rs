//! TCP transport for DNS queries.
//!
//! Each client connection is handled independently. A connection may carry
//! several queries in sequence; each one is prefixed with a 2-byte
//! big-endian length (RFC 1035 §4.2.2). The framing helpers are shared with
//! the TCP upstream.

use hickory_proto::op::Message;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{Protocol, QueryHandler, answer};

/// How long an idle client connection is kept open between queries.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP transport for DNS proxy.
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

    /// Start the TCP transport.
    ///
    /// Spawns an accept loop that handles each connection in a separate task.
    pub fn start<H>(self, handler: Arc<H>) -> tokio::task::JoinHandle<()>
    where
        H: QueryHandler + 'static,
    {
        tokio::spawn(run_accept_loop(self.listener, handler))
    }
}

async fn run_accept_loop<H>(listener: TcpListener, handler: Arc<H>)
where
    H: QueryHandler + 'static,
{
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                tokio::spawn(handle_connection(client, peer, handler.clone()));
            }
            Err(e) => {
                warn!(error = %e, "TCP accept error");
            }
        }
    }
}

/// Serve queries on one connection until the client closes it or goes idle.
async fn handle_connection<H>(mut client: TcpStream, peer: SocketAddr, handler: Arc<H>)
where
    H: QueryHandler + 'static,
{
    loop {
        let frame = match timeout(IDLE_TIMEOUT, read_frame(&mut client)).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                debug!(client = %peer, error = %e, "TCP read error");
                return;
            }
            Err(_) => {
                debug!(client = %peer, "Closing idle TCP connection");
                return;
            }
        };

        let request = match Message::from_vec(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(client = %peer, error = %e, "Dropping undecodable TCP query");
                return;
            }
        };

        let response = answer(handler.as_ref(), &request, Protocol::Tcp).await;
        let bytes = match response.to_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(client = %peer, error = %e, "Failed to encode TCP response");
                return;
            }
        };
        if let Err(e) = write_frame(&mut client, &bytes).await {
            debug!(client = %peer, error = %e, "TCP write error");
            return;
        }
    }
}

/// Read one length-prefixed DNS message.
///
/// Returns `Ok(None)` on a clean end of stream before the length prefix.
pub(crate) async fn read_frame<S>(stream: &mut S) -> io::Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let msg_len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; msg_len];
    stream.read_exact(&mut buf).await?;

    Ok(Some(buf))
}

/// Write `message` with its 2-byte length prefix in a single write.
pub(crate) async fn write_frame<S>(stream: &mut S, message: &[u8]) -> io::Result<()>
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
