//! Events delivered from the sync layer to the game loop.

use crate::protocol::{InputKind, PlayerSide, Score};

/// Typed events emitted by the [`SyncDispatcher`](crate::dispatcher::SyncDispatcher).
///
/// Drained by the game loop each tick from the bounded channel returned by
/// [`SyncDispatcher::start`](crate::dispatcher::SyncDispatcher::start).
/// Continuous position/ball updates do **not** appear here — the render
/// step reads those through the dispatcher's interpolation accessors.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The transport loop is up and messages can flow.
    Connected,
    /// The transport closed or failed. Always the last event before either
    /// reconnection or termination; never dropped under backpressure.
    Disconnected {
        reason: Option<String>,
    },
    /// The remote peer pressed or released an edge-triggered input.
    RemoteInput {
        kind: InputKind,
        pressed: bool,
    },
    /// The remote peer signalled readiness.
    RemoteReady {
        side: PlayerSide,
    },
    /// Both peers are confirmed ready; the countdown may begin.
    AllReady,
    /// The match is live. Tear down any pre-match overlay.
    MatchStarted {
        duration_secs: u32,
    },
    /// A goal was applied. `score` is the post-increment tally.
    GoalScored {
        scorer: PlayerSide,
        score: Score,
    },
    /// The goal cooldown elapsed: re-seat ball and players at kick-off.
    ResetPositions,
    /// Authoritative end of match.
    MatchEnded {
        final_score: Score,
        winner: Option<PlayerSide>,
        reason: String,
    },
    /// The remote peer asked for a rematch.
    RematchRequested,
    /// Both peers agreed to a rematch; handshake and match state were reset.
    RematchConfirmed,
    RematchDeclined,
    /// A reconnection attempt is due. The embedder should establish a new
    /// transport and call
    /// [`reattach`](crate::dispatcher::SyncDispatcher::reattach).
    ReconnectDue {
        /// Zero-based attempt index.
        attempt: u32,
    },
    /// All reconnection attempts are exhausted; the match cannot continue.
    ReconnectFailed,
}
