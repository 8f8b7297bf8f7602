//! Top-level orchestrator wiring transport, protocol, and sync state.
//!
//! [`SyncDispatcher`] is a handle owned by the game loop. A background
//! transport loop task (spawned by [`SyncDispatcher::start`]) performs all
//! network I/O and JSON codec work, but **never** touches sync state: it
//! queues decoded [`PeerMessage`]s on an unbounded channel. The game loop
//! calls [`pump`](SyncDispatcher::pump) once per simulation tick, which is
//! the only place inbound messages are applied — so a tick's view of match
//! state is stable and no locking is needed.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect(url).await?;
//! let config = SyncConfig::new("conn-local", "conn-remote");
//! let (mut sync, mut events) = SyncDispatcher::start(transport, config)?;
//!
//! // Each simulation tick:
//! sync.pump(now_ms);
//! while let Ok(event) = events.try_recv() {
//!     match event {
//!         SyncEvent::GoalScored { scorer, score } => hud.update_score(score),
//!         SyncEvent::MatchEnded { .. } => break,
//!         _ => {}
//!     }
//! }
//! // Each render frame:
//! if let Some(pose) = sync.remote_player(now_ms) {
//!     remote_sprite.set_position(pose.x, pose.y);
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::authority::{AuthorityAssignment, AuthorityCoordinator};
use crate::error::{Result, SyncError};
use crate::event::SyncEvent;
use crate::handshake::{HandshakePhase, ReadyHandshake};
use crate::match_state::{MatchPhase, MatchStateMachine};
use crate::protocol::{
    BallSnapshot, EntityState, GameEndedPayload, GameSnapshot, InputKind, MessageKind, PeerMessage,
    PlayerSide, Score, TimestampMs,
};
use crate::reconnect::{ReconnectionPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};
use crate::remote::{
    RemoteStateBuffer, RenderedState, BALL_SNAP_THRESHOLD, DEFAULT_RENDER_DELAY_MS,
    PLAYER_SNAP_THRESHOLD,
};
use crate::throttle::{
    ThrottleGate, DEFAULT_INPUT_INTERVAL_MS, DEFAULT_SNAPSHOT_INTERVAL_MS,
    DEFAULT_STATE_INTERVAL_MS,
};
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default match length in seconds.
const DEFAULT_MATCH_DURATION_SECS: u32 = 120;

/// Default goal cooldown in simulation ticks (~2 s at 60 Hz).
const DEFAULT_GOAL_COOLDOWN_TICKS: u32 = 120;

/// Default delay between a goal and the kick-off reset (~1 s at 60 Hz).
const DEFAULT_RESET_DELAY_TICKS: u32 = 60;

/// Default staleness bound past which a snapshot may correct the ball.
const DEFAULT_SNAPSHOT_STALE_AFTER_MS: u64 = 250;

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SyncDispatcher`].
///
/// The required fields are the two connection ids (used for the
/// deterministic authority fallback); everything else has defaults tuned
/// for a 60 Hz simulation.
///
/// # Example
///
/// ```
/// use goalline_sync::dispatcher::SyncConfig;
/// use goalline_sync::protocol::PlayerSide;
///
/// let config = SyncConfig::new("conn-abc", "conn-def")
///     .with_assigned_side(PlayerSide::PlayerTwo)
///     .with_match_duration_secs(90);
/// assert_eq!(config.match_duration_secs, 90);
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Connection id of this process.
    pub local_conn_id: String,
    /// Connection id of the peer.
    pub remote_conn_id: String,
    /// Side assigned by the room server. `None` triggers the deterministic
    /// fallback derivation from the connection ids.
    pub assigned_side: Option<PlayerSide>,
    /// Match length in seconds. Defaults to **120**.
    pub match_duration_secs: u32,
    /// Goal cooldown in simulation ticks. Defaults to **120**.
    pub goal_cooldown_ticks: u32,
    /// Ticks between a goal and the kick-off reset. Defaults to **60**.
    pub reset_delay_ticks: u32,
    /// How far in the past remote entities render. Defaults to **100 ms**.
    pub render_delay_ms: u64,
    /// Snap threshold for the ball buffer. Defaults to **150.0** units.
    pub ball_snap_threshold: f32,
    /// Snap threshold for the remote player buffer. Defaults to **60.0**.
    pub player_snap_threshold: f32,
    /// Minimum interval between position/ball sends. Defaults to **33 ms**.
    pub state_interval_ms: u64,
    /// Minimum interval between full snapshots. Defaults to **1000 ms**.
    pub snapshot_interval_ms: u64,
    /// Edge-input coalescing interval. Defaults to **16 ms**.
    pub input_interval_ms: u64,
    /// Ball-buffer age past which a snapshot may correct it.
    /// Defaults to **250 ms**.
    pub snapshot_stale_after_ms: u64,
    /// First reconnect delay. Defaults to **1000 ms**.
    pub reconnect_base_delay_ms: u64,
    /// Reconnect attempt cap. Defaults to **5**.
    pub reconnect_max_attempts: u32,
    /// Capacity of the bounded event channel.
    ///
    /// When the game loop cannot keep up, non-critical events are dropped
    /// with a warning; `Disconnected` is always delivered. Defaults to
    /// **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl SyncConfig {
    /// Create a configuration with the two connection ids and defaults.
    pub fn new(local_conn_id: impl Into<String>, remote_conn_id: impl Into<String>) -> Self {
        Self {
            local_conn_id: local_conn_id.into(),
            remote_conn_id: remote_conn_id.into(),
            assigned_side: None,
            match_duration_secs: DEFAULT_MATCH_DURATION_SECS,
            goal_cooldown_ticks: DEFAULT_GOAL_COOLDOWN_TICKS,
            reset_delay_ticks: DEFAULT_RESET_DELAY_TICKS,
            render_delay_ms: DEFAULT_RENDER_DELAY_MS,
            ball_snap_threshold: BALL_SNAP_THRESHOLD,
            player_snap_threshold: PLAYER_SNAP_THRESHOLD,
            state_interval_ms: DEFAULT_STATE_INTERVAL_MS,
            snapshot_interval_ms: DEFAULT_SNAPSHOT_INTERVAL_MS,
            input_interval_ms: DEFAULT_INPUT_INTERVAL_MS,
            snapshot_stale_after_ms: DEFAULT_SNAPSHOT_STALE_AFTER_MS,
            reconnect_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            reconnect_max_attempts: DEFAULT_MAX_ATTEMPTS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the server-assigned side instead of the fallback derivation.
    #[must_use]
    pub fn with_assigned_side(mut self, side: PlayerSide) -> Self {
        self.assigned_side = Some(side);
        self
    }

    /// Set the match length in seconds.
    #[must_use]
    pub fn with_match_duration_secs(mut self, secs: u32) -> Self {
        self.match_duration_secs = secs;
        self
    }

    /// Set the goal cooldown in simulation ticks.
    #[must_use]
    pub fn with_goal_cooldown_ticks(mut self, ticks: u32) -> Self {
        self.goal_cooldown_ticks = ticks;
        self
    }

    /// Set the reconnection backoff parameters.
    #[must_use]
    pub fn with_reconnect_policy(mut self, base_delay_ms: u64, max_attempts: u32) -> Self {
        self.reconnect_base_delay_ms = base_delay_ms;
        self.reconnect_max_attempts = max_attempts;
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Link state and loop plumbing ────────────────────────────────────

/// Shared flag between the handle and the transport loop.
struct LinkState {
    connected: AtomicBool,
}

/// Items queued by the transport loop for the next `pump`.
#[derive(Debug)]
enum Inbound {
    /// The loop is up; messages can flow.
    Up,
    /// A decoded peer message.
    Message(PeerMessage),
    /// The loop exited.
    Down { reason: Option<String> },
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Orchestrator handle owned by the game loop.
///
/// Created via [`SyncDispatcher::start`]. All sync state (authority,
/// handshake, match state, interpolation buffers) lives inside this handle
/// and changes only during [`pump`](Self::pump).
pub struct SyncDispatcher {
    config: SyncConfig,
    assignment: AuthorityAssignment,

    handshake: ReadyHandshake,
    match_state: MatchStateMachine,
    ball_buffer: RemoteStateBuffer,
    remote_player_buffer: RemoteStateBuffer,
    throttle: ThrottleGate,
    reconnect: ReconnectionPolicy,

    /// Sender half of the command channel to the transport loop.
    cmd_tx: mpsc::UnboundedSender<PeerMessage>,
    /// Inbound queue filled by the transport loop, drained by `pump`.
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    /// Event channel to the game loop.
    event_tx: mpsc::Sender<SyncEvent>,
    /// A `Disconnected` event that could not be queued yet; retried every
    /// pump because it must never be silently dropped.
    pending_disconnect: Option<SyncEvent>,

    link: Arc<LinkState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,

    /// Wall-clock anchor for the once-per-second timer tick.
    last_second_ms: Option<TimestampMs>,
    /// Whether `MatchEnded` was already emitted for the current match.
    ended_emitted: bool,
    /// Whether `ReconnectFailed` was already emitted.
    reconnect_failed_emitted: bool,
}

impl SyncDispatcher {
    /// Start the dispatcher and its background transport loop.
    ///
    /// Computes the authority assignment up front and returns the handle
    /// together with the event receiver.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IdentityConflict`] when no side was assigned
    /// and the two connection ids are identical — the fatal-desync case of
    /// the fallback derivation.
    #[must_use = "the event receiver must be drained each tick"]
    pub fn start(
        transport: impl Transport,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<SyncEvent>)> {
        let assignment = AuthorityCoordinator::assign(
            config.assigned_side,
            &config.local_conn_id,
            &config.remote_conn_id,
        )?;

        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(capacity);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<PeerMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let link = Arc::new(LinkState {
            connected: AtomicBool::new(true),
        });
        let loop_link = Arc::clone(&link);

        let task = tokio::spawn(transport_loop(
            transport,
            cmd_rx,
            inbound_tx,
            loop_link,
            shutdown_rx,
        ));

        let dispatcher = Self {
            handshake: ReadyHandshake::new(assignment.local_side),
            match_state: MatchStateMachine::new(
                config.match_duration_secs,
                config.reset_delay_ticks,
            ),
            ball_buffer: RemoteStateBuffer::new(
                config.ball_snap_threshold,
                config.render_delay_ms,
            ),
            remote_player_buffer: RemoteStateBuffer::new(
                config.player_snap_threshold,
                config.render_delay_ms,
            ),
            throttle: ThrottleGate::new(
                config.state_interval_ms,
                config.snapshot_interval_ms,
                config.input_interval_ms,
            ),
            reconnect: ReconnectionPolicy::new(
                config.reconnect_base_delay_ms,
                config.reconnect_max_attempts,
            ),
            assignment,
            config,
            cmd_tx,
            inbound_rx,
            event_tx,
            pending_disconnect: None,
            link,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            last_second_ms: None,
            ended_emitted: false,
            reconnect_failed_emitted: false,
        };

        Ok((dispatcher, event_rx))
    }

    // ── The tick boundary ───────────────────────────────────────────

    /// Process one simulation tick's worth of sync work.
    ///
    /// Drains the inbound queue (applying each message to the owning state
    /// machine), advances cooldown/reset counters and the one-second
    /// timer, drives the reconnection backoff, and flushes coalesced edge
    /// inputs. This is the **only** method that mutates sync state, which
    /// is what keeps reads stable for the rest of the tick.
    pub fn pump(&mut self, now_ms: TimestampMs) {
        // A Disconnected event owed from a previous pump gets first claim
        // on channel capacity.
        if let Some(event) = self.pending_disconnect.take() {
            self.emit_guaranteed(event);
        }

        while let Ok(item) = self.inbound_rx.try_recv() {
            match item {
                Inbound::Up => {
                    debug!("transport loop up");
                    self.emit(SyncEvent::Connected);
                }
                Inbound::Message(msg) => self.handle_message(msg, now_ms),
                Inbound::Down { reason } => {
                    debug!(?reason, "transport loop down, pausing match");
                    self.match_state.pause();
                    self.last_second_ms = None;
                    self.reconnect.on_disconnected(now_ms);
                    self.emit_guaranteed(SyncEvent::Disconnected { reason });
                }
            }
        }

        self.drive_reconnect(now_ms);

        if self.match_state.phase() == MatchPhase::Active {
            if self.match_state.step_frame() {
                self.emit(SyncEvent::ResetPositions);
            }
            self.drive_timer(now_ms);
        }

        for msg in self.throttle.flush_edges(now_ms) {
            self.send_raw(msg);
        }
    }

    fn drive_timer(&mut self, now_ms: TimestampMs) {
        let last = *self.last_second_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(last) < 1000 {
            return;
        }
        self.last_second_ms = Some(last + 1000);
        if self.match_state.tick_second() {
            // Clock hit zero. The authority announces the result; the
            // mirror freezes and waits for the authoritative payload.
            if self.assignment.is_ball_authority {
                let payload = GameEndedPayload {
                    final_score: self.match_state.score(),
                    winner: winner_from(self.match_state.score()),
                    reason: "time".into(),
                    duration: self.config.match_duration_secs,
                };
                self.send_raw(PeerMessage::GameEnded(payload.clone()));
                self.emit_match_ended(payload.final_score, payload.winner, payload.reason);
            }
        }
    }

    fn drive_reconnect(&mut self, now_ms: TimestampMs) {
        if self.reconnect.exhausted() && !self.reconnect_failed_emitted {
            self.reconnect_failed_emitted = true;
            self.emit(SyncEvent::ReconnectFailed);
            return;
        }
        if let Some(due) = self.reconnect.next_attempt(now_ms) {
            self.emit(SyncEvent::ReconnectDue {
                attempt: due.attempt,
            });
        }
    }

    // ── Inbound routing ─────────────────────────────────────────────

    fn handle_message(&mut self, msg: PeerMessage, now_ms: TimestampMs) {
        match msg {
            PeerMessage::PlayerReady { player_position } => {
                if self.handshake.on_remote_ready(player_position) {
                    self.match_state.begin_waiting();
                    self.emit(SyncEvent::RemoteReady {
                        side: player_position,
                    });
                }
            }
            PeerMessage::AllPlayersReady { ready_players } => {
                self.handshake.on_all_ready(&ready_players);
                self.match_state.begin_starting();
                self.emit(SyncEvent::AllReady);
            }
            PeerMessage::GameStarted { match_duration } => {
                let first = self.handshake.on_game_started();
                let applied = self.match_state.apply_game_started(match_duration);
                if first || applied {
                    self.last_second_ms = None;
                    self.ended_emitted = false;
                    self.emit(SyncEvent::MatchStarted {
                        duration_secs: match_duration,
                    });
                }
            }
            PeerMessage::PlayerPosition { position, player } => {
                if position == self.assignment.local_side {
                    warn!(%position, "player-position for the local seat, dropped");
                    return;
                }
                self.remote_player_buffer.push(player);
            }
            PeerMessage::BallState { ball } => {
                if self.assignment.is_ball_authority {
                    warn!("ball-state received while holding ball authority, dropped");
                    return;
                }
                self.ball_buffer.push(ball.into());
            }
            PeerMessage::MoveLeft { pressed } => self.emit(SyncEvent::RemoteInput {
                kind: InputKind::MoveLeft,
                pressed,
            }),
            PeerMessage::MoveRight { pressed } => self.emit(SyncEvent::RemoteInput {
                kind: InputKind::MoveRight,
                pressed,
            }),
            PeerMessage::Jump { pressed } => self.emit(SyncEvent::RemoteInput {
                kind: InputKind::Jump,
                pressed,
            }),
            PeerMessage::Kick { pressed } => self.emit(SyncEvent::RemoteInput {
                kind: InputKind::Kick,
                pressed,
            }),
            PeerMessage::GoalScored { scorer } => {
                if self
                    .match_state
                    .apply_goal(scorer, self.config.goal_cooldown_ticks)
                {
                    self.emit(SyncEvent::GoalScored {
                        scorer,
                        score: self.match_state.score(),
                    });
                }
            }
            PeerMessage::GameState(snapshot) => self.apply_snapshot(*snapshot, now_ms),
            PeerMessage::GameEnded(payload) => {
                self.match_state.apply_game_ended(payload.final_score);
                self.emit_match_ended(payload.final_score, payload.winner, payload.reason);
            }
            PeerMessage::RematchRequest => self.emit(SyncEvent::RematchRequested),
            PeerMessage::RematchConfirmed => {
                self.reset_for_rematch();
                self.emit(SyncEvent::RematchConfirmed);
            }
            PeerMessage::RematchDeclined => self.emit(SyncEvent::RematchDeclined),
        }
    }

    /// Fold a periodic backup snapshot into local state.
    ///
    /// The fine-grained `ball-state`/`player-position` channel has
    /// precedence: snapshot entity data only corrects a buffer that is
    /// empty or stale, so a low-rate snapshot never stomps on fresher
    /// samples. Score/timer/ended bookkeeping always applies.
    fn apply_snapshot(&mut self, snapshot: GameSnapshot, now_ms: TimestampMs) {
        if self.assignment.is_ball_authority {
            warn!("game-state snapshot received while authority, dropped");
            return;
        }

        let stale_after = self.config.snapshot_stale_after_ms;
        if self.ball_buffer.is_stale(now_ms, stale_after) {
            debug!("ball buffer stale, correcting from snapshot");
            self.ball_buffer.push(snapshot.ball.into());
        }
        if self.remote_player_buffer.is_stale(now_ms, stale_after) {
            let remote_side = self.assignment.local_side.other();
            let remote_state = match remote_side {
                PlayerSide::PlayerOne => snapshot.players.player1,
                PlayerSide::PlayerTwo => snapshot.players.player2,
            };
            self.remote_player_buffer.push(remote_state);
        }

        let was_ended = self.match_state.phase() == MatchPhase::Ended;
        self.match_state.apply_snapshot_fields(
            snapshot.score,
            snapshot.time_remaining,
            snapshot.game_ended,
        );
        if !was_ended && self.match_state.phase() == MatchPhase::Ended {
            // The game-ended message was evidently lost; the snapshot is
            // the best remaining source for the result.
            let score = self.match_state.score();
            self.emit_match_ended(score, winner_from(score), "time".into());
        }
    }

    // ── Outbound API ────────────────────────────────────────────────

    /// Signal local readiness.
    ///
    /// Idempotent: the `player-ready` message goes out at most once per
    /// match no matter how often this is called.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the transport has closed.
    pub fn mark_ready(&mut self) -> Result<()> {
        if !self.link.connected.load(Ordering::Acquire) {
            return Err(SyncError::NotConnected);
        }
        if !self.handshake.mark_local_ready() {
            return Ok(());
        }
        self.match_state.begin_waiting();
        self.send(PeerMessage::PlayerReady {
            player_position: self.assignment.local_side,
        })
    }

    /// Withdraw local readiness before the start confirmation.
    ///
    /// Purely local: the remote's flag is independent truth and there is
    /// no retraction message in the protocol.
    pub fn cancel_ready(&mut self) -> bool {
        self.handshake.cancel_ready()
    }

    /// Announce that both peers are ready (ball authority only).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthority`] on the mirroring peer, and
    /// [`SyncError::NotConnected`] if the transport has closed.
    pub fn announce_all_ready(&mut self) -> Result<()> {
        self.require_authority()?;
        let ready = vec![PlayerSide::PlayerOne, PlayerSide::PlayerTwo];
        self.handshake.on_all_ready(&ready);
        self.match_state.begin_starting();
        self.send(PeerMessage::AllPlayersReady {
            ready_players: ready,
        })?;
        self.emit(SyncEvent::AllReady);
        Ok(())
    }

    /// Start the match (ball authority only). Applies locally and
    /// announces to the peer; safe to call twice.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthority`] on the mirroring peer, and
    /// [`SyncError::NotConnected`] if the transport has closed.
    pub fn start_match(&mut self) -> Result<()> {
        self.require_authority()?;
        let duration = self.config.match_duration_secs;
        self.send(PeerMessage::GameStarted {
            match_duration: duration,
        })?;
        let first = self.handshake.on_game_started();
        let applied = self.match_state.apply_game_started(duration);
        if first || applied {
            self.last_second_ms = None;
            self.ended_emitted = false;
            self.emit(SyncEvent::MatchStarted {
                duration_secs: duration,
            });
        }
        Ok(())
    }

    /// Send the local player's state, subject to the ~30 Hz cap.
    ///
    /// Returns whether the message actually went out.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the transport has closed.
    pub fn send_local_position(
        &mut self,
        player: EntityState,
        now_ms: TimestampMs,
    ) -> Result<bool> {
        if !self.throttle.try_send(MessageKind::PlayerPosition, now_ms) {
            return Ok(false);
        }
        self.send(PeerMessage::PlayerPosition {
            position: self.assignment.local_side,
            player,
        })?;
        Ok(true)
    }

    /// Send the simulated ball state (ball authority only), ~30 Hz cap.
    ///
    /// Returns whether the message actually went out.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthority`] on the mirroring peer, and
    /// [`SyncError::NotConnected`] if the transport has closed.
    pub fn send_ball_state(&mut self, ball: BallSnapshot, now_ms: TimestampMs) -> Result<bool> {
        self.require_authority()?;
        if !self.throttle.try_send(MessageKind::BallState, now_ms) {
            return Ok(false);
        }
        self.send(PeerMessage::BallState { ball })?;
        Ok(true)
    }

    /// Queue an edge-triggered input for the next coalesced flush.
    ///
    /// Edges are never dropped; they leave on the next allowed pump.
    pub fn send_input_edge(&mut self, kind: InputKind, pressed: bool) {
        self.throttle.queue_edge(PeerMessage::input_edge(kind, pressed));
    }

    /// Report a goal detected by local collision (ball authority only).
    ///
    /// Applies the goal locally, emits [`SyncEvent::GoalScored`], and
    /// notifies the peer. Returns `false` when the cooldown absorbed a
    /// duplicate detection, in which case nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthority`] on the mirroring peer, and
    /// [`SyncError::NotConnected`] if the transport has closed.
    pub fn report_goal(&mut self, scorer: PlayerSide) -> Result<bool> {
        self.require_authority()?;
        if !self
            .match_state
            .apply_goal(scorer, self.config.goal_cooldown_ticks)
        {
            return Ok(false);
        }
        self.send(PeerMessage::GoalScored { scorer })?;
        self.emit(SyncEvent::GoalScored {
            scorer,
            score: self.match_state.score(),
        });
        Ok(true)
    }

    /// Send the periodic full backup snapshot (ball authority only),
    /// ~1 Hz cap. Call every tick; the gate provides the cadence.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthority`] on the mirroring peer, and
    /// [`SyncError::NotConnected`] if the transport has closed.
    pub fn send_snapshot(&mut self, snapshot: GameSnapshot, now_ms: TimestampMs) -> Result<bool> {
        self.require_authority()?;
        if !self.throttle.try_send(MessageKind::Snapshot, now_ms) {
            return Ok(false);
        }
        self.send(PeerMessage::GameState(Box::new(snapshot)))?;
        Ok(true)
    }

    /// End the match for a non-timer reason, e.g. forfeit (ball authority
    /// only). The payload carries the authoritative final values.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthority`] on the mirroring peer, and
    /// [`SyncError::NotConnected`] if the transport has closed.
    pub fn end_match(&mut self, reason: impl Into<String>) -> Result<()> {
        self.require_authority()?;
        let reason = reason.into();
        let score = self.match_state.score();
        let payload = GameEndedPayload {
            final_score: score,
            winner: winner_from(score),
            reason: reason.clone(),
            duration: self
                .config
                .match_duration_secs
                .saturating_sub(self.match_state.time_remaining()),
        };
        self.send(PeerMessage::GameEnded(payload))?;
        self.match_state.apply_game_ended(score);
        self.emit_match_ended(score, winner_from(score), reason);
        Ok(())
    }

    /// Ask the peer for a rematch (post-match only).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the transport has closed.
    pub fn request_rematch(&mut self) -> Result<()> {
        self.send(PeerMessage::RematchRequest)
    }

    /// Accept the peer's rematch request and reset for a fresh match.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the transport has closed.
    pub fn confirm_rematch(&mut self) -> Result<()> {
        self.send(PeerMessage::RematchConfirmed)?;
        self.reset_for_rematch();
        self.emit(SyncEvent::RematchConfirmed);
        Ok(())
    }

    /// Decline the peer's rematch request.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the transport has closed.
    pub fn decline_rematch(&mut self) -> Result<()> {
        self.send(PeerMessage::RematchDeclined)
    }

    // ── Reconnection ────────────────────────────────────────────────

    /// Report that a reconnection attempt could not establish a transport.
    ///
    /// Schedules the next (doubled) backoff deadline, or exhausts the
    /// policy — in which case the next [`pump`](Self::pump) emits
    /// [`SyncEvent::ReconnectFailed`].
    pub fn reconnect_attempt_failed(&mut self, now_ms: TimestampMs) {
        self.reconnect.on_attempt_failed(now_ms);
    }

    /// Attach a freshly established transport after a disconnection.
    ///
    /// Shuts the old loop down if it is somehow still running, spawns a
    /// new one, cancels the backoff, resumes the match, and discards
    /// interpolation history — the gap length is unknown, so buffered
    /// samples are no longer trustworthy and the next snapshot or
    /// fine-grained message re-seeds them. The throttle is rebuilt too, so
    /// an authority's next `send_snapshot` passes immediately.
    pub fn reattach(&mut self, transport: impl Transport) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let _ = self.shutdown_tx.take();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<PeerMessage>();
        let (inbound_tx, new_inbound_rx) = mpsc::unbounded_channel::<Inbound>();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        self.link.connected.store(true, Ordering::Release);
        let loop_link = Arc::clone(&self.link);
        self.task = Some(tokio::spawn(transport_loop(
            transport,
            cmd_rx,
            inbound_tx,
            loop_link,
            shutdown_rx,
        )));
        self.cmd_tx = cmd_tx;
        self.inbound_rx = new_inbound_rx;
        self.shutdown_tx = Some(shutdown_tx);

        self.reconnect.on_reconnected();
        self.reconnect_failed_emitted = false;
        self.ball_buffer.clear();
        self.remote_player_buffer.clear();
        self.throttle = ThrottleGate::new(
            self.config.state_interval_ms,
            self.config.snapshot_interval_ms,
            self.config.input_interval_ms,
        );
        self.match_state.resume();
        self.last_second_ms = None;

        debug!("transport reattached, match resumed");
    }

    // ── Read API ────────────────────────────────────────────────────

    /// Interpolated pose of the remote player for the render step.
    pub fn remote_player(&mut self, now_ms: TimestampMs) -> Option<RenderedState> {
        self.remote_player_buffer.render(now_ms)
    }

    /// Interpolated pose of the ball for the render step.
    ///
    /// Only meaningful on the mirroring peer; the authority renders its
    /// own simulation and gets `None` here.
    pub fn ball(&mut self, now_ms: TimestampMs) -> Option<RenderedState> {
        if self.assignment.is_ball_authority {
            return None;
        }
        self.ball_buffer.render(now_ms)
    }

    /// The immutable authority assignment for this match.
    pub fn assignment(&self) -> AuthorityAssignment {
        self.assignment
    }

    /// Whether this process simulates ball physics.
    pub fn is_ball_authority(&self) -> bool {
        self.assignment.is_ball_authority
    }

    /// Current handshake phase.
    pub fn handshake_phase(&self) -> HandshakePhase {
        self.handshake.phase()
    }

    /// Current match phase.
    pub fn match_phase(&self) -> MatchPhase {
        self.match_state.phase()
    }

    /// Current score.
    pub fn score(&self) -> Score {
        self.match_state.score()
    }

    /// Seconds left on the clock.
    pub fn time_remaining(&self) -> u32 {
        self.match_state.time_remaining()
    }

    /// Whether the transport loop is believed to be up.
    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire)
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Shut down the dispatcher, closing the transport and stopping the
    /// background task. After this, `pump` drains whatever is left and
    /// the event receiver eventually yields `None`.
    pub async fn shutdown(&mut self) {
        debug!("SyncDispatcher: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the transport loop with a timeout. If it doesn't exit in
        // time, abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        self.link.connected.store(false, Ordering::Release);
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn require_authority(&self) -> Result<()> {
        if self.assignment.is_ball_authority {
            Ok(())
        } else {
            Err(SyncError::NotAuthority)
        }
    }

    /// Queue a message to the transport loop, surfacing a closed link.
    fn send(&self, msg: PeerMessage) -> Result<()> {
        if !self.link.connected.load(Ordering::Acquire) {
            return Err(SyncError::NotConnected);
        }
        self.cmd_tx.send(msg).map_err(|_| SyncError::NotConnected)
    }

    /// Best-effort send used on paths that already handle disconnection
    /// through the inbound queue.
    fn send_raw(&self, msg: PeerMessage) {
        if self.send(msg).is_err() {
            debug!("dropping outbound message, transport closed");
        }
    }

    fn reset_for_rematch(&mut self) {
        self.handshake.reset();
        self.match_state.reset();
        self.ball_buffer.clear();
        self.remote_player_buffer.clear();
        self.last_second_ms = None;
        self.ended_emitted = false;
    }

    fn emit_match_ended(&mut self, final_score: Score, winner: Option<PlayerSide>, reason: String) {
        if self.ended_emitted {
            debug!("match-ended already emitted, suppressing duplicate");
            return;
        }
        self.ended_emitted = true;
        self.emit(SyncEvent::MatchEnded {
            final_score,
            winner,
            reason,
        });
    }

    /// Emit an event; under backpressure non-critical events are dropped
    /// with a warning rather than blocking the tick.
    fn emit(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }

    /// Emit an event that must not be lost; on a full channel it is parked
    /// and retried at the next pump.
    fn emit_guaranteed(&mut self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(parked)) => {
                warn!("event channel full, parking critical event for next pump");
                self.pending_disconnect = Some(parked);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

impl std::fmt::Debug for SyncDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDispatcher")
            .field("side", &self.assignment.local_side)
            .field("authority", &self.assignment.is_ball_authority)
            .field("connected", &self.is_connected())
            .field("match_phase", &self.match_state.phase())
            .finish()
    }
}

impl Drop for SyncDispatcher {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful shutdown.
        // The only safe action is to abort the spawned task, which causes
        // the transport loop future to be dropped immediately. The
        // `shutdown_tx` oneshot is intentionally *not* sent here: sending
        // it would trigger a graceful path that calls async
        // `transport.close()`, but there is no executor context to drive
        // it inside `Drop`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The winner implied by a score, `None` on a draw.
fn winner_from(score: Score) -> Option<PlayerSide> {
    match score.player1.cmp(&score.player2) {
        std::cmp::Ordering::Greater => Some(PlayerSide::PlayerOne),
        std::cmp::Ordering::Less => Some(PlayerSide::PlayerTwo),
        std::cmp::Ordering::Equal => None,
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Background transport loop that multiplexes send/receive via
/// `tokio::select!`.
///
/// Decodes inbound frames and queues them for the next `pump`; it never
/// touches sync state itself. Exits when:
/// - The command channel closes (dispatcher dropped or reattached)
/// - The transport returns `None` (peer closed the connection)
/// - A transport error occurs
async fn transport_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<PeerMessage>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    link: Arc<LinkState>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    debug!("transport loop started");

    let _ = inbound_tx.send(Inbound::Up);

    loop {
        tokio::select! {
            // Branch 1: outgoing message from the dispatcher
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(msg) => {
                        match serde_json::to_string(&msg) {
                            Ok(json) => {
                                if let Err(e) = transport.send(json).await {
                                    error!("transport send error: {e}");
                                    down(&inbound_tx, &link, Some(format!("transport send error: {e}")));
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("failed to serialize PeerMessage: {e}");
                                // Serialization errors are programming bugs; don't kill the loop.
                            }
                        }
                    }
                    // Command channel closed — dispatcher dropped or reattached.
                    None => {
                        debug!("command channel closed, shutting down transport loop");
                        let _ = transport.close().await;
                        down(&inbound_tx, &link, Some("sync layer shut down".into()));
                        break;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                down(&inbound_tx, &link, Some("sync layer shut down".into()));
                break;
            }

            // Branch 3: incoming message from the peer
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match serde_json::from_str::<PeerMessage>(&text) {
                            Ok(msg) => {
                                let _ = inbound_tx.send(Inbound::Message(msg));
                            }
                            Err(e) => {
                                // Malformed payloads are ignored, never fatal.
                                warn!("failed to deserialize peer message: {e} — raw: {text}");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        down(&inbound_tx, &link, Some(format!("transport receive error: {e}")));
                        break;
                    }
                    // Transport closed cleanly.
                    None => {
                        debug!("transport closed by peer");
                        down(&inbound_tx, &link, None);
                        break;
                    }
                }
            }
        }
    }

    debug!("transport loop exited");
}

/// Mark the link down and queue the terminal inbound item.
fn down(inbound_tx: &mpsc::UnboundedSender<Inbound>, link: &LinkState, reason: Option<String>) {
    link.connected.store(false, Ordering::Release);
    let _ = inbound_tx.send(Inbound::Down { reason });
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_the_sixty_hz_tuning() {
        let config = SyncConfig::new("a", "b");
        assert_eq!(config.match_duration_secs, 120);
        assert_eq!(config.state_interval_ms, 33);
        assert_eq!(config.snapshot_interval_ms, 1_000);
        assert_eq!(config.render_delay_ms, 100);
        assert!(config.assigned_side.is_none());
    }

    #[test]
    fn event_capacity_is_clamped_to_at_least_one() {
        let config = SyncConfig::new("a", "b").with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn winner_follows_the_higher_score() {
        let lead = Score {
            player1: 3,
            player2: 1,
        };
        assert_eq!(winner_from(lead), Some(PlayerSide::PlayerOne));
        let draw = Score {
            player1: 2,
            player2: 2,
        };
        assert_eq!(winner_from(draw), None);
    }
}
