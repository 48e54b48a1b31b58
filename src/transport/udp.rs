//! UDP transport for DNS queries.
//!
//! One receive loop on the listening socket; every datagram is handled in its
//! own task so a slow race never blocks other clients.

use hickory_proto::error::ProtoError;
use hickory_proto::op::Message;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::{MAX_DNS_PACKET_SIZE, Protocol, QueryHandler, answer};

/// DNS header length; anything shorter is not worth decoding.
const DNS_HEADER_LEN: usize = 12;

/// Payload every client accepts over UDP without EDNS (RFC 1035 §4.2.1).
const MIN_UDP_PAYLOAD: usize = 512;

/// UDP transport for DNS proxy.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the UDP transport on the current runtime.
    pub fn start<H>(self, handler: Arc<H>) -> tokio::task::JoinHandle<()>
    where
        H: QueryHandler + 'static,
    {
        tokio::spawn(run(self.socket, handler))
    }
}

async fn run<H>(socket: Arc<UdpSocket>, handler: Arc<H>)
where
    H: QueryHandler + 'static,
{
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "UDP recv error");
                continue;
            }
        };

        if len < DNS_HEADER_LEN {
            continue;
        }

        let request = match Message::from_vec(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(client = %src, error = %e, "Dropping undecodable UDP query");
                continue;
            }
        };

        let socket = socket.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let response = answer(handler.as_ref(), &request, Protocol::Udp).await;
            let bytes = match encode_reply(&request, response) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(client = %src, error = %e, "Failed to encode UDP response");
                    return;
                }
            };
            if let Err(e) = socket.send_to(&bytes, src).await {
                warn!(client = %src, error = %e, "UDP response error");
            }
        });
    }
}

/// Encode `response` within the payload size the client advertised.
///
/// An oversized reply loses its authority and additional sections, then
/// trailing answer records until it fits, and is flagged TC so the client
/// can retry over TCP.
fn encode_reply(request: &Message, mut response: Message) -> Result<Vec<u8>, ProtoError> {
    let limit = request
        .extensions()
        .as_ref()
        .map_or(MIN_UDP_PAYLOAD, |edns| usize::from(edns.max_payload()))
        .clamp(MIN_UDP_PAYLOAD, MAX_DNS_PACKET_SIZE);

    let bytes = response.to_vec()?;
    if bytes.len() <= limit {
        return Ok(bytes);
    }

    response.name_servers_mut().clear();
    response.additionals_mut().clear();
    response.set_truncated(true);

    let total = response.answers().len();
    loop {
        let bytes = response.to_vec()?;
        let kept = response.answers().len();
        if bytes.len() <= limit || kept == 0 {
            debug!(
                id = request.id(),
                limit,
                kept,
                dropped = total - kept,
                "Truncated UDP response"
            );
            return Ok(bytes);
        }
        response.answers_mut().truncate(kept - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{BIG_ANSWER_RECORDS, FixedHandler, query};
    use super::*;
    use hickory_proto::op::{Edns, ResponseCode};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn start() -> SocketAddr {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        transport.start(Arc::new(FixedHandler));
        addr
    }

    async fn roundtrip(server: SocketAddr, request: &Message) -> Message {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&request.to_vec().unwrap(), server)
            .await
            .unwrap();
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
        let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        Message::from_vec(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn answers_queries() {
        let server = start().await;

        let response = roundtrip(server, &query(0x0101, "www.test.")).await;

        assert_eq!(response.id(), 0x0101);
        assert_eq!(response.answers().len(), 1);
    }

    #[tokio::test]
    async fn failures_become_servfail() {
        let server = start().await;

        let response = roundtrip(server, &query(0x0202, "fail.test.")).await;

        assert_eq!(response.id(), 0x0202);
        assert_eq!(response.response_code(), ResponseCode::ServFail);
    }

    async fn handled(request: &Message) -> Message {
        FixedHandler.handle(request).await.unwrap()
    }

    #[tokio::test]
    async fn small_replies_are_sent_whole() {
        let request = query(1, "www.test.");
        let response = handled(&request).await;

        let bytes = encode_reply(&request, response.clone()).unwrap();

        assert_eq!(bytes, response.to_vec().unwrap());
    }

    #[tokio::test]
    async fn oversized_reply_is_truncated_for_clients_without_edns() {
        let request = query(2, "big.test.");
        let response = handled(&request).await;
        assert!(response.to_vec().unwrap().len() > MIN_UDP_PAYLOAD);

        let bytes = encode_reply(&request, response).unwrap();
        let reply = Message::from_vec(&bytes).unwrap();

        assert!(bytes.len() <= MIN_UDP_PAYLOAD);
        assert!(reply.truncated());
        assert!(!reply.answers().is_empty());
        assert!(reply.answers().len() < BIG_ANSWER_RECORDS);
        assert_eq!(reply.id(), 2);
    }

    #[tokio::test]
    async fn edns_payload_size_raises_the_limit() {
        let mut request = query(3, "big.test.");
        let mut edns = Edns::new();
        edns.set_max_payload(4096);
        request.set_edns(edns);
        let response = handled(&request).await;

        let bytes = encode_reply(&request, response).unwrap();
        let reply = Message::from_vec(&bytes).unwrap();

        assert!(bytes.len() > MIN_UDP_PAYLOAD);
        assert!(!reply.truncated());
        assert_eq!(reply.answers().len(), BIG_ANSWER_RECORDS);
    }

    #[tokio::test]
    async fn oversized_answers_arrive_truncated() {
        let server = start().await;

        let response = roundtrip(server, &query(0x0303, "big.test.")).await;

        assert!(response.truncated());
        assert!(response.answers().len() < BIG_ANSWER_RECORDS);
    }

    #[tokio::test]
    async fn short_datagrams_are_ignored() {
        let server = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[0u8; 4], server).await.unwrap();

        // The listener is still alive afterwards.
        let response = roundtrip(server, &query(3, "after.test.")).await;

        assert_eq!(response.id(), 3);
    }
}
