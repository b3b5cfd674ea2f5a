use thiserror::Error;

use super::packet::PacketName;
use crate::blockchain::{BlockError, ChainError};

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Malformed or unexpected packets.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packet content is not valid base64: {0}")]
    Content(#[from] base64::DecodeError),

    #[error("malformed block: {0}")]
    Block(#[from] BlockError),

    #[error("invalid packet index {0:?}")]
    InvalidIndex(String),

    #[error("block range [{start}, {end}] cannot be downloaded")]
    InvalidRange { start: u64, end: u64 },

    #[error("expected block #{expected} in download, got #{found}")]
    OutOfOrderBlock { expected: u64, found: u64 },

    #[error("invalid FOUNDBLOCK content {0:?}")]
    InvalidBlockIndex(String),

    #[error("broadcast packet {0} carries no dedup index")]
    MissingIndex(PacketName),

    #[error("unexpected {found} packet, expected {expected}")]
    UnexpectedPacket {
        expected: PacketName,
        found: PacketName,
    },
}

/// Failures talking to a peer or serving a connection.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} with {address} timed out")]
    Timeout {
        operation: &'static str,
        address: String,
    },

    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("peer {0} sent an empty response")]
    EmptyResponse(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}
