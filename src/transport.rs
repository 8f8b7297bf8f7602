//! Transport abstraction for the peer-to-peer match channel.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the two game clients. The match protocol is JSON text, so every
//! transport implementation handles framing internally (WebSocket frames,
//! length-prefixed TCP, WebRTC data channels, ...).
//!
//! # Connection Setup
//!
//! Connection setup is intentionally NOT part of this trait — transports
//! have fundamentally different connection parameters (URLs for WebSocket,
//! SDP offers for WebRTC, host:port for TCP). Construct a connected
//! transport externally, then pass it to `SyncDispatcher::start` (or
//! `reattach` after a drop).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use goalline_sync::error::SyncError;
//! use goalline_sync::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SyncError> {
//!         // Send the JSON text message over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SyncError>> {
//!         // Receive the next JSON text message
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SyncError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SyncError;

/// A bidirectional text message transport between the two peers.
///
/// Implementors shuttle serialized JSON strings in both directions. Each
/// call to [`send`](Transport::send) transmits one complete message; each
/// call to [`recv`](Transport::recv) returns one complete message.
/// Delivery order per direction must be preserved (the sync layer relies
/// on same-kind messages applying in arrival order).
///
/// # Object Safety
///
/// This trait is object-safe, so `Box<dyn Transport>` works for dynamic
/// dispatch. `SyncDispatcher::start` accepts `impl Transport`
/// (monomorphized) for the common case.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it
/// is used inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data. Channel-based
/// implementations (e.g., wrapping `mpsc::Receiver`) are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the message could not be
    /// sent (e.g., connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), SyncError>;

    /// Receive the next JSON text message from the peer.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred (e.g., [`SyncError::TransportReceive`])
    /// - `None` — the connection was closed cleanly by the peer
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to [`send`](Transport::send)
    /// and [`recv`](Transport::recv) may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), SyncError>;
}
