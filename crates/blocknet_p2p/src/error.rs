//! Network error types.

use std::net::SocketAddr;
use std::time::Duration;

/// Result alias used throughout blocknet_p2p.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors that can occur in the blocknet_p2p crate.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The listening socket could not be bound. Fatal at startup.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred on a peer socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation timed out.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The connection has already been closed locally.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A peer could not be reached.
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// A single envelope could not be decoded.
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// JSON serialization of a payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A peer address string could not be parsed.
    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    /// The configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server is not running.
    #[error("Server not running")]
    NotRunning,
}

impl NetworkError {
    /// Whether the error is a per-peer failure that is recovered by dropping
    /// that peer rather than surfaced to the owning node.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::ConnectionClosed | Self::Unreachable(_)
        )
    }
}

/// Errors decoding a single envelope body. These never close a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("empty envelope")]
    Empty,

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown envelope kind {0}")]
    UnknownKind(u8),

    #[error("invalid registration address: {0}")]
    InvalidAddress(String),
}
