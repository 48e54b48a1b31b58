//! Listener side of the proxy.
//!
//! Provides UDP and TCP transports that receive DNS queries from clients,
//! hand them to a [`QueryHandler`] and write the answer back.

pub mod tcp;
pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::dns::error_response;
use crate::error::{Error, Result};

/// Upper bound on a single `handle` call as seen by a client.
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves one inbound request into the response sent back to the client.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle(&self, request: &Message) -> Result<Message>;
}

/// Transport protocol identifier for logging.
#[derive(Debug, Clone, Copy)]
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

/// Run `handler` on a decoded request and turn failures into DNS error replies.
///
/// Shared by both transports so that UDP and TCP clients see the same
/// response codes.
async fn answer<H: QueryHandler + ?Sized>(
    handler: &H,
    request: &Message,
    protocol: Protocol,
) -> Message {
    match handle_with_deadline(handler, request).await {
        Ok(response) => response,
        Err(e) => {
            let code = match e {
                Error::InvalidQuery(_) => ResponseCode::FormErr,
                _ => ResponseCode::ServFail,
            };
            debug!(
                protocol = protocol.as_str(),
                id = request.id(),
                error = %e,
                rcode = %code,
                "Answering with error response"
            );
            error_response(request, code)
        }
    }
}

async fn handle_with_deadline<H: QueryHandler + ?Sized>(
    handler: &H,
    request: &Message,
) -> Result<Message> {
    timeout(SERVER_TIMEOUT, handler.handle(request))
        .await
        .unwrap_or(Err(Error::Deadline(SERVER_TIMEOUT)))
}
