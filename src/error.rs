//! Error types for the sync layer.

use thiserror::Error;

/// Errors that can occur in the synchronization layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a peer message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the
    /// dispatcher is not connected.
    #[error("not connected to peer")]
    NotConnected,

    /// Sent a ball or goal message without holding ball authority.
    #[error("local peer does not hold ball authority")]
    NotAuthority,

    /// The two peers cannot be told apart, so authority assignment is
    /// unresolvable. This is a fatal desync: the match must be abandoned
    /// and a fresh room created.
    #[error("connection mismatch: both peers share connection id {0:?}")]
    IdentityConflict(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for sync-layer operations.
pub type Result<T> = std::result::Result<T, SyncError>;
