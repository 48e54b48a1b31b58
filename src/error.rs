//! Error types for the dispatcher and its transports.

use hickory_proto::error::ProtoError;
use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving a query.
#[derive(Debug, Error)]
pub enum Error {
    /// Upstream did not answer within the exchange timeout.
    #[error("upstream {upstream} timed out")]
    Timeout { upstream: String },

    /// Socket-level failure talking to an upstream.
    #[error("upstream {upstream}: {source}")]
    Io {
        upstream: String,
        #[source]
        source: std::io::Error,
    },

    /// Message could not be decoded or encoded.
    #[error("malformed DNS message: {0}")]
    Proto(#[from] ProtoError),

    /// Upstream replied with a message that does not belong to our query.
    #[error("upstream {upstream} answered with mismatched id {got}, expected {expected}")]
    MismatchedResponse {
        upstream: String,
        expected: u16,
        got: u16,
    },

    #[error("SOCKS5 proxy error: {0}")]
    Socks5(String),

    /// Inbound request is not a single-question query.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Every contacted upstream failed.
    #[error("all upstreams failed to answer")]
    Exhausted,

    /// The listener gave up on a request before the handler answered.
    #[error("no answer within {0:?}")]
    Deadline(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),

    /// A listener could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(upstream: &str, source: std::io::Error) -> Self {
        Error::Io {
            upstream: upstream.to_string(),
            source,
        }
    }

    pub(crate) fn timeout(upstream: &str) -> Self {
        Error::Timeout {
            upstream: upstream.to_string(),
        }
    }
}
