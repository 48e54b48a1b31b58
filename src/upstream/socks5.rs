//! Minimal SOCKS5 client (RFC 1928): no-auth CONNECT only.

use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Open a TCP tunnel to `target` through the proxy at `proxy`.
pub async fn connect(proxy: SocketAddr, target: SocketAddr) -> Result<TcpStream> {
    let proxy_name = proxy.to_string();
    let io_err = |e| Error::io(&proxy_name, e);

    let mut stream = TcpStream::connect(proxy).await.map_err(io_err)?;

    stream
        .write_all(&[VERSION, 1, METHOD_NO_AUTH])
        .await
        .map_err(io_err)?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(io_err)?;
    if choice != [VERSION, METHOD_NO_AUTH] {
        return Err(Error::Socks5(format!(
            "proxy {} refused no-auth method (reply {:02x?})",
            proxy, choice
        )));
    }

    stream
        .write_all(&connect_request(target))
        .await
        .map_err(io_err)?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.map_err(io_err)?;
    if head[0] != VERSION {
        return Err(Error::Socks5(format!("bad reply version {:#04x}", head[0])));
    }
    if head[1] != 0x00 {
        return Err(Error::Socks5(format!(
            "proxy {} failed to connect to {}: {}",
            proxy,
            target,
            reply_message(head[1])
        )));
    }

    // The bound address is of no use to us, but it must be drained.
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(io_err)?;
            usize::from(len[0])
        }
        other => return Err(Error::Socks5(format!("unknown address type {:#04x}", other))),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await.map_err(io_err)?;

    Ok(stream)
}

fn connect_request(target: SocketAddr) -> Vec<u8> {
    let mut req = Vec::with_capacity(22);
    req.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00]);
    match target.ip() {
        IpAddr::V4(v4) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&v6.octets());
        }
    }
    req.extend_from_slice(&target.port().to_be_bytes());
    req
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn connect_request_encodes_ipv4_target() {
        let req = connect_request("8.8.8.8:53".parse().unwrap());

        assert_eq!(req, vec![5, 1, 0, 1, 8, 8, 8, 8, 0, 53]);
    }

    #[test]
    fn connect_request_encodes_ipv6_target() {
        let req = connect_request("[2001:db8::1]:853".parse().unwrap());

        assert_eq!(req.len(), 4 + 16 + 2);
        assert_eq!(req[3], ATYP_IPV6);
        assert_eq!(&req[20..], &853u16.to_be_bytes());
    }

    /// Fake proxy that accepts the handshake and replies with `rep`.
    async fn spawn_proxy(rep: u8) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            conn.read_exact(&mut greeting).await.unwrap();
            conn.write_all(&[5, 0]).await.unwrap();
            let mut request = [0u8; 10];
            conn.read_exact(&mut request).await.unwrap();
            conn.write_all(&[5, rep, 0, 1, 127, 0, 0, 1, 0x1f, 0x90])
                .await
                .unwrap();
            let mut echo = [0u8; 4];
            if conn.read_exact(&mut echo).await.is_ok() {
                let _ = conn.write_all(&echo).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn connect_tunnels_after_successful_handshake() {
        let proxy = spawn_proxy(0).await;

        let mut stream = connect(proxy, "192.0.2.1:53".parse().unwrap())
            .await
            .unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut echo = [0u8; 4];
        stream.read_exact(&mut echo).await.unwrap();

        assert_eq!(&echo, b"ping");
    }

    #[tokio::test]
    async fn connect_reports_proxy_failure() {
        let proxy = spawn_proxy(0x05).await;

        let result = connect(proxy, "192.0.2.1:53".parse().unwrap()).await;

        match result {
            Err(Error::Socks5(msg)) => assert!(msg.contains("connection refused"), "{}", msg),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
