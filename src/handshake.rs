//! Pre-match ready handshake.
//!
//! Collapses the readiness checks that would otherwise be scattered across
//! UI and network code into one state machine with explicit transitions.
//! Readiness is monotonic per match: once a flag goes up it stays up until
//! an explicit cancel or a rematch reset.

use tracing::{debug, warn};

use crate::protocol::PlayerSide;

/// Phase of the pre-match handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Neither peer has signalled readiness.
    NotReady,
    /// Only the local peer is ready.
    LocalReady,
    /// Only the remote peer is ready.
    RemoteReady,
    /// Both flags are up; waiting for the authoritative confirmation.
    BothReady,
    /// Confirmed by the authority; the countdown may run.
    Starting,
    /// The match start signal arrived; the handshake is over.
    Started,
}

/// State machine for the ready/start handshake of one match.
#[derive(Debug)]
pub struct ReadyHandshake {
    local_side: PlayerSide,
    local_ready: bool,
    remote_ready: bool,
    phase: HandshakePhase,
}

impl ReadyHandshake {
    /// A fresh handshake for a match where this process plays `local_side`.
    pub fn new(local_side: PlayerSide) -> Self {
        Self {
            local_side,
            local_ready: false,
            remote_ready: false,
            phase: HandshakePhase::NotReady,
        }
    }

    /// Record local readiness.
    ///
    /// Returns `true` exactly once per match: callers send the
    /// `player-ready` wire message only on a `true` return, so repeat
    /// invocations (button mashing, UI re-entry) never double-send.
    pub fn mark_local_ready(&mut self) -> bool {
        if self.local_ready || self.phase >= HandshakePhase::Starting {
            debug!("mark_local_ready: already ready, no-op");
            return false;
        }
        self.local_ready = true;
        self.recompute_phase();
        true
    }

    /// Record the remote peer's readiness.
    ///
    /// A message claiming the local seat is mis-attributed (a relay echo or
    /// a seating race) and is dropped with a warning rather than guessed at.
    pub fn on_remote_ready(&mut self, side: PlayerSide) -> bool {
        if side == self.local_side {
            warn!(%side, "dropping player-ready claiming the local seat");
            return false;
        }
        if self.remote_ready {
            debug!(%side, "duplicate remote ready, no-op");
            return false;
        }
        self.remote_ready = true;
        self.recompute_phase();
        true
    }

    /// Apply the authoritative all-players-ready confirmation.
    ///
    /// The payload wins over local flags: if the confirmation lists a peer
    /// this machine had not yet marked ready, the flag is reconciled rather
    /// than rejected. Transitions to [`Starting`](HandshakePhase::Starting).
    pub fn on_all_ready(&mut self, ready_players: &[PlayerSide]) {
        let payload_local = ready_players.contains(&self.local_side);
        let payload_remote = ready_players.contains(&self.local_side.other());
        if payload_local != self.local_ready || payload_remote != self.remote_ready {
            debug!(
                payload_local,
                payload_remote,
                local = self.local_ready,
                remote = self.remote_ready,
                "reconciling ready flags from all-players-ready payload"
            );
        }
        self.local_ready = payload_local;
        self.remote_ready = payload_remote;
        if self.phase < HandshakePhase::Starting {
            self.phase = HandshakePhase::Starting;
        }
    }

    /// Apply the authoritative match-start signal.
    ///
    /// This can fire at any time — before local readiness, mid-countdown,
    /// even twice. Returns `true` the first time so the caller can tear
    /// down pre-match UI; the repeat is a no-op.
    pub fn on_game_started(&mut self) -> bool {
        if self.phase == HandshakePhase::Started {
            debug!("game-started repeat, no-op");
            return false;
        }
        self.local_ready = true;
        self.remote_ready = true;
        self.phase = HandshakePhase::Started;
        true
    }

    /// Withdraw local readiness.
    ///
    /// Only valid before [`Starting`](HandshakePhase::Starting). Leaves the
    /// remote flag untouched — the remote's readiness is its own truth, not
    /// something local cancellation can erase.
    pub fn cancel_ready(&mut self) -> bool {
        if self.phase >= HandshakePhase::Starting {
            warn!(phase = ?self.phase, "cancel_ready after start confirmation, ignored");
            return false;
        }
        if !self.local_ready {
            return false;
        }
        self.local_ready = false;
        self.recompute_phase();
        true
    }

    /// Reset for a rematch.
    pub fn reset(&mut self) {
        self.local_ready = false;
        self.remote_ready = false;
        self.phase = HandshakePhase::NotReady;
    }

    /// Current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Whether the local flag is up.
    pub fn local_ready(&self) -> bool {
        self.local_ready
    }

    /// Whether the remote flag is up.
    pub fn remote_ready(&self) -> bool {
        self.remote_ready
    }

    fn recompute_phase(&mut self) {
        if self.phase >= HandshakePhase::Starting {
            return;
        }
        self.phase = match (self.local_ready, self.remote_ready) {
            (false, false) => HandshakePhase::NotReady,
            (true, false) => HandshakePhase::LocalReady,
            (false, true) => HandshakePhase::RemoteReady,
            (true, true) => HandshakePhase::BothReady,
        };
    }
}

impl PartialOrd for HandshakePhase {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}

impl HandshakePhase {
    fn rank(self) -> u8 {
        match self {
            Self::NotReady => 0,
            Self::LocalReady | Self::RemoteReady => 1,
            Self::BothReady => 2,
            Self::Starting => 3,
            Self::Started => 4,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn handshake() -> ReadyHandshake {
        ReadyHandshake::new(PlayerSide::PlayerOne)
    }

    #[test]
    fn local_ready_is_idempotent() {
        let mut hs = handshake();
        assert!(hs.mark_local_ready());
        assert!(!hs.mark_local_ready());
        assert!(!hs.mark_local_ready());
        assert_eq!(hs.phase(), HandshakePhase::LocalReady);
    }

    #[test]
    fn both_flags_reach_both_ready_in_either_order() {
        let mut hs = handshake();
        assert!(hs.mark_local_ready());
        assert!(hs.on_remote_ready(PlayerSide::PlayerTwo));
        assert_eq!(hs.phase(), HandshakePhase::BothReady);

        let mut hs = handshake();
        assert!(hs.on_remote_ready(PlayerSide::PlayerTwo));
        assert_eq!(hs.phase(), HandshakePhase::RemoteReady);
        assert!(hs.mark_local_ready());
        assert_eq!(hs.phase(), HandshakePhase::BothReady);
    }

    #[test]
    fn ready_claiming_local_seat_is_dropped() {
        let mut hs = handshake();
        assert!(!hs.on_remote_ready(PlayerSide::PlayerOne));
        assert!(!hs.remote_ready());
        assert_eq!(hs.phase(), HandshakePhase::NotReady);
    }

    #[test]
    fn all_ready_payload_wins_over_local_flags() {
        // The confirmation lists both players even though this machine
        // never saw the remote's player-ready (it raced the confirmation).
        let mut hs = handshake();
        hs.mark_local_ready();
        hs.on_all_ready(&[PlayerSide::PlayerOne, PlayerSide::PlayerTwo]);

        assert!(hs.local_ready());
        assert!(hs.remote_ready());
        assert_eq!(hs.phase(), HandshakePhase::Starting);
    }

    #[test]
    fn game_started_fires_from_any_phase() {
        for setup in [
            |_: &mut ReadyHandshake| {},
            |hs: &mut ReadyHandshake| {
                hs.mark_local_ready();
            },
            |hs: &mut ReadyHandshake| {
                hs.mark_local_ready();
                hs.on_remote_ready(PlayerSide::PlayerTwo);
                hs.on_all_ready(&[PlayerSide::PlayerOne, PlayerSide::PlayerTwo]);
            },
        ] {
            let mut hs = handshake();
            setup(&mut hs);
            assert!(hs.on_game_started());
            assert_eq!(hs.phase(), HandshakePhase::Started);
        }
    }

    #[test]
    fn game_started_twice_is_a_no_op_second_time() {
        let mut hs = handshake();
        assert!(hs.on_game_started());
        assert!(!hs.on_game_started());
        assert_eq!(hs.phase(), HandshakePhase::Started);
    }

    #[test]
    fn cancel_resets_local_flag_only() {
        let mut hs = handshake();
        hs.mark_local_ready();
        hs.on_remote_ready(PlayerSide::PlayerTwo);
        assert!(hs.cancel_ready());

        assert!(!hs.local_ready());
        assert!(hs.remote_ready());
        assert_eq!(hs.phase(), HandshakePhase::RemoteReady);
    }

    #[test]
    fn cancel_after_starting_is_rejected() {
        let mut hs = handshake();
        hs.mark_local_ready();
        hs.on_all_ready(&[PlayerSide::PlayerOne, PlayerSide::PlayerTwo]);
        assert!(!hs.cancel_ready());
        assert!(hs.local_ready());
    }

    #[test]
    fn ready_after_start_does_not_resend() {
        let mut hs = handshake();
        hs.on_game_started();
        assert!(!hs.mark_local_ready());
    }

    #[test]
    fn reset_prepares_a_fresh_match() {
        let mut hs = handshake();
        hs.mark_local_ready();
        hs.on_game_started();
        hs.reset();

        assert_eq!(hs.phase(), HandshakePhase::NotReady);
        assert!(hs.mark_local_ready());
    }
}
