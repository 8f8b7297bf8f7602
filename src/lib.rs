//! # goalline-sync
//!
//! Two-peer synchronization layer for a physics-based arcade soccer game.
//!
//! Keeps a head-to-head match coherent across two game clients exchanging
//! JSON messages over a relay: one peer simulates ball physics and
//! broadcasts authoritative state, the other renders a smoothed mirror of
//! it, and both run the scoreboard and match clock from the same
//! authoritative messages.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any backend
//! - **WebSocket built-in** — default `transport-websocket` feature provides [`WebSocketTransport`]
//! - **Event-driven** — receive typed [`SyncEvent`]s via a channel
//! - **Tick-aligned** — state changes only inside [`SyncDispatcher::pump`], never mid-tick
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use goalline_sync::{SyncConfig, SyncDispatcher, SyncEvent, WebSocketTransport};
//!
//! let transport = WebSocketTransport::connect("wss://relay.example/match/42").await?;
//! let config = SyncConfig::new(my_conn_id, peer_conn_id);
//! let (mut sync, mut events) = SyncDispatcher::start(transport, config)?;
//!
//! sync.mark_ready()?;
//! loop {
//!     sync.pump(clock.now_ms());
//!     while let Ok(event) = events.try_recv() {
//!         match event {
//!             SyncEvent::MatchStarted { .. } => game.begin(),
//!             SyncEvent::Disconnected { .. } => game.pause(),
//!             _ => {}
//!         }
//!     }
//!     // simulate, then render the remote from sync.remote_player(...) / sync.ball(...)
//! }
//! ```

pub mod authority;
#[cfg(feature = "tokio-runtime")]
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handshake;
pub mod match_state;
pub mod protocol;
pub mod reconnect;
pub mod remote;
pub mod throttle;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use authority::{AuthorityAssignment, AuthorityCoordinator};
#[cfg(feature = "tokio-runtime")]
pub use dispatcher::{SyncConfig, SyncDispatcher};
pub use error::SyncError;
pub use event::SyncEvent;
pub use protocol::{
    BallSnapshot, EntityState, GameSnapshot, InputKind, PeerMessage, PlayerSide, Score,
};
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::websocket::WebSocketTransport;
