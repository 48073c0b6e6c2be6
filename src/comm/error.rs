use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while starting the transport
#[derive(Debug, Error)]
pub enum CommInitError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Per-datagram transport errors; none of these stop the server except `Recv`
#[derive(Debug, Error)]
pub enum CommError {
    #[error("socket receive failed: {0}")]
    Recv(#[source] std::io::Error),

    #[error("socket send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("malformed datagram: {0}")]
    Decode(String),

    #[error("cannot encode datagram: {0}")]
    Encode(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("dispatcher is no longer accepting tool calls")]
    DispatcherClosed,
}

pub type Result<T> = std::result::Result<T, CommError>;
