//! Wire types for the two-peer match protocol.
//!
//! Every message kind serializes as an internally tagged JSON object
//! (`{"type":"ball-state","data":{...}}`) with kebab-case tags and
//! camelCase payload fields, matching the wire format both game clients
//! already speak.

use serde::{Deserialize, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Milliseconds since an epoch shared by both peers (sender clock).
pub type TimestampMs = u64;

// ── Enums ───────────────────────────────────────────────────────────

/// Stable per-match identity of a peer.
///
/// Assigned once when the match is formed and immutable for its duration.
/// [`PlayerOne`](PlayerSide::PlayerOne) always holds ball authority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PlayerSide {
    #[serde(rename = "player1")]
    PlayerOne,
    #[serde(rename = "player2")]
    PlayerTwo,
}

impl PlayerSide {
    /// The side occupied by the other peer.
    pub fn other(self) -> Self {
        match self {
            Self::PlayerOne => Self::PlayerTwo,
            Self::PlayerTwo => Self::PlayerOne,
        }
    }
}

impl std::fmt::Display for PlayerSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlayerOne => write!(f, "player1"),
            Self::PlayerTwo => write!(f, "player2"),
        }
    }
}

/// Whether an entity is simulated by this process or mirrored from the peer.
///
/// Exactly one slot resolves to `Local` per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerSlot {
    Local,
    Remote,
}

/// Facing of an entity, derived from the sign of its velocity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Left,
    #[default]
    Idle,
    Right,
}

/// Which edge-triggered input changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    MoveLeft,
    MoveRight,
    Jump,
    Kick,
}

// ── Entity state ────────────────────────────────────────────────────

/// A timestamped kinematic sample for one entity (player or ball).
///
/// Produced by the owning peer's simulation; read-only on the mirroring
/// side, where samples feed a
/// [`RemoteStateBuffer`](crate::remote::RemoteStateBuffer).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    /// Sprite rotation in radians. Players never rotate; only the ball
    /// carries a meaningful value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f32>,
    #[serde(default)]
    pub direction: Facing,
    pub is_on_ground: bool,
    /// Sender-clock capture time in milliseconds.
    pub timestamp: TimestampMs,
}

impl EntityState {
    /// Euclidean distance between this sample's position and another's.
    pub fn distance_to(&self, other: &EntityState) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Ball kinematics as carried by `ball-state` messages and snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BallSnapshot {
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    /// Sender-clock capture time in milliseconds.
    pub timestamp: TimestampMs,
}

impl From<BallSnapshot> for EntityState {
    fn from(ball: BallSnapshot) -> Self {
        Self {
            x: ball.x,
            y: ball.y,
            velocity_x: ball.velocity_x,
            velocity_y: ball.velocity_y,
            rotation: None,
            direction: Facing::Idle,
            is_on_ground: false,
            timestamp: ball.timestamp,
        }
    }
}

// ── Match bookkeeping ───────────────────────────────────────────────

/// Current score, keyed by side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Score {
    pub player1: u32,
    pub player2: u32,
}

impl Score {
    /// The score of the given side.
    pub fn of(&self, side: PlayerSide) -> u32 {
        match side {
            PlayerSide::PlayerOne => self.player1,
            PlayerSide::PlayerTwo => self.player2,
        }
    }

    /// Increment the given side's score by one.
    pub fn increment(&mut self, side: PlayerSide) {
        match side {
            PlayerSide::PlayerOne => self.player1 += 1,
            PlayerSide::PlayerTwo => self.player2 += 1,
        }
    }
}

/// Both players' states as carried by the periodic full snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlayersSnapshot {
    pub player1: EntityState,
    pub player2: EntityState,
}

/// Payload for the periodic `game-state` backup snapshot.
///
/// Boxed in [`PeerMessage`] to keep the enum small; the fine-grained
/// `ball-state` / `player-position` messages remain the primary channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub ball: BallSnapshot,
    pub players: PlayersSnapshot,
    pub score: Score,
    pub time_remaining: u32,
    pub game_ended: bool,
}

/// Payload for the authoritative `game-ended` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedPayload {
    pub final_score: Score,
    /// `None` on a draw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<PlayerSide>,
    pub reason: String,
    /// Elapsed match time in seconds.
    pub duration: u32,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message kinds exchanged between the two peers.
///
/// Constructed by the sender, serialized, dispatched on arrival, and then
/// discarded — payloads are folded into the sync state machines, never
/// retained as messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PeerMessage {
    /// This peer is ready to start. Idempotent on receipt.
    PlayerReady {
        #[serde(rename = "playerPosition")]
        player_position: PlayerSide,
    },
    /// Authoritative confirmation that every player is ready.
    AllPlayersReady {
        #[serde(rename = "readyPlayers")]
        ready_players: Vec<PlayerSide>,
    },
    /// Authoritative match start. May arrive at any time, including before
    /// the local handshake completes; receivers apply it idempotently.
    GameStarted {
        #[serde(rename = "matchDuration")]
        match_duration: u32,
    },
    /// Owning peer's player state. Throttled to ~30 Hz.
    PlayerPosition {
        position: PlayerSide,
        player: EntityState,
    },
    /// Ball state from the authority. Throttled to ~30 Hz.
    BallState { ball: BallSnapshot },
    /// Edge-triggered movement input: never dropped, only coalesced.
    MoveLeft { pressed: bool },
    MoveRight { pressed: bool },
    Jump { pressed: bool },
    Kick { pressed: bool },
    /// Goal detected by the ball authority. Cooldown-guarded on receipt.
    GoalScored { scorer: PlayerSide },
    /// Periodic low-rate full snapshot from the authority.
    GameState(Box<GameSnapshot>),
    /// Authoritative final result; payload values override local counters.
    GameEnded(GameEndedPayload),
    /// Post-match rematch negotiation.
    RematchRequest,
    RematchConfirmed,
    RematchDeclined,
}

impl PeerMessage {
    /// The throttling class this message belongs to.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::PlayerPosition { .. } => MessageKind::PlayerPosition,
            Self::BallState { .. } => MessageKind::BallState,
            Self::GameState(_) => MessageKind::Snapshot,
            Self::MoveLeft { .. }
            | Self::MoveRight { .. }
            | Self::Jump { .. }
            | Self::Kick { .. } => MessageKind::InputEdge,
            _ => MessageKind::Control,
        }
    }

    /// Build the edge-input message for the given input kind.
    pub fn input_edge(kind: InputKind, pressed: bool) -> Self {
        match kind {
            InputKind::MoveLeft => Self::MoveLeft { pressed },
            InputKind::MoveRight => Self::MoveRight { pressed },
            InputKind::Jump => Self::Jump { pressed },
            InputKind::Kick => Self::Kick { pressed },
        }
    }
}

/// Throttling class of a [`PeerMessage`].
///
/// Each class carries its own minimum send interval in the
/// [`ThrottleGate`](crate::throttle::ThrottleGate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `player-position` — continuous, droppable, ~30 Hz.
    PlayerPosition,
    /// `ball-state` — continuous, droppable, ~30 Hz.
    BallState,
    /// `game-state` — periodic backup snapshot, ~1 Hz.
    Snapshot,
    /// Movement edges — coalesced, never dropped.
    InputEdge,
    /// Handshake/goal/end/rematch — sent immediately, unthrottled.
    Control,
}
