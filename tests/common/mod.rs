#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for goalline-sync integration tests.
//!
//! Provides a channel-based [`MockTransport`] and helper functions for
//! constructing common peer message JSON strings.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use goalline_sync::protocol::{
    BallSnapshot, EntityState, Facing, GameSnapshot, PeerMessage, PlayerSide, PlayersSnapshot,
    Score, TimestampMs,
};
use goalline_sync::{SyncError, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based mock transport for integration testing.
///
/// Scripted peer messages are consumed in order by `recv()`. All messages
/// sent by the dispatcher are recorded in `sent`.
pub struct MockTransport {
    /// Scripted incoming frames (consumed in order by `recv`).
    incoming: VecDeque<Option<Result<String, SyncError>>>,
    /// Recorded outgoing messages from the dispatcher.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a new mock transport with the given scripted incoming frames.
    ///
    /// Returns the transport plus shared handles for inspecting sent
    /// messages and whether close was called.
    pub fn new(
        incoming: Vec<Option<Result<String, SyncError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted messages — hang forever so the transport loop
            // stays alive until shutdown is called.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── JSON helper functions ───────────────────────────────────────────

/// A plausible player entity state at the given coordinates and timestamp.
pub fn entity(x: f32, y: f32, timestamp: TimestampMs) -> EntityState {
    EntityState {
        x,
        y,
        velocity_x: 0.0,
        velocity_y: 0.0,
        rotation: None,
        direction: Facing::Idle,
        is_on_ground: true,
        timestamp,
    }
}

/// A plausible ball snapshot at the given coordinates and timestamp.
pub fn ball(x: f32, y: f32, timestamp: TimestampMs) -> BallSnapshot {
    BallSnapshot {
        x,
        y,
        velocity_x: 0.0,
        velocity_y: 0.0,
        timestamp,
    }
}

/// Returns the JSON string for a `player-ready` message from `side`.
pub fn player_ready_json(side: PlayerSide) -> String {
    serde_json::to_string(&PeerMessage::PlayerReady {
        player_position: side,
    })
    .expect("player_ready_json serialization")
}

/// Returns the JSON string for an `all-players-ready` message.
pub fn all_ready_json() -> String {
    serde_json::to_string(&PeerMessage::AllPlayersReady {
        ready_players: vec![PlayerSide::PlayerOne, PlayerSide::PlayerTwo],
    })
    .expect("all_ready_json serialization")
}

/// Returns the JSON string for a `game-started` message.
pub fn game_started_json(match_duration: u32) -> String {
    serde_json::to_string(&PeerMessage::GameStarted { match_duration })
        .expect("game_started_json serialization")
}

/// Returns the JSON string for a `player-position` message for `side`.
pub fn position_json(side: PlayerSide, x: f32, y: f32, timestamp: TimestampMs) -> String {
    serde_json::to_string(&PeerMessage::PlayerPosition {
        position: side,
        player: entity(x, y, timestamp),
    })
    .expect("position_json serialization")
}

/// Returns the JSON string for a `ball-state` message.
pub fn ball_state_json(x: f32, y: f32, timestamp: TimestampMs) -> String {
    serde_json::to_string(&PeerMessage::BallState {
        ball: ball(x, y, timestamp),
    })
    .expect("ball_state_json serialization")
}

/// Returns the JSON string for a `goal-scored` message.
pub fn goal_json(scorer: PlayerSide) -> String {
    serde_json::to_string(&PeerMessage::GoalScored { scorer })
        .expect("goal_json serialization")
}

/// A full `game-state` backup snapshot as JSON.
pub fn snapshot_json(
    ball_state: BallSnapshot,
    score: Score,
    time_remaining: u32,
    game_ended: bool,
) -> String {
    let ts = ball_state.timestamp;
    serde_json::to_string(&PeerMessage::GameState(Box::new(GameSnapshot {
        ball: ball_state,
        players: PlayersSnapshot {
            player1: entity(100.0, 500.0, ts),
            player2: entity(1100.0, 500.0, ts),
        },
        score,
        time_remaining,
        game_ended,
    })))
    .expect("snapshot_json serialization")
}
