//! Score, timer, and phase state for one match.
//!
//! Both peers hold a [`MatchStateMachine`], but its fields only ever change
//! in response to protocol messages (or the local tick), never from
//! gameplay code directly. The authority *detects* a goal through its
//! collision callbacks and emits `goal-scored`; both peers then apply the
//! identical transition from the payload. Neither side re-derives match
//! state from its own physics, so scores cannot diverge even when the two
//! simulations have micro-diverged.

use tracing::{debug, warn};

use crate::protocol::{PlayerSide, Score};

/// Lifecycle phase of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// No match formed yet.
    Idle,
    /// Peers connected, handshake in progress.
    Waiting,
    /// Both ready, countdown running.
    Starting,
    /// Simulation live, timer ticking.
    Active,
    /// Frozen (disconnection); nothing is reset.
    Paused,
    /// Final. Only a rematch reset leaves this phase.
    Ended,
}

/// Authoritative score/timer/cooldown state machine.
#[derive(Debug)]
pub struct MatchStateMachine {
    phase: MatchPhase,
    score: Score,
    /// Seconds left on the clock.
    time_remaining: u32,
    /// Configured match length in seconds.
    match_duration: u32,
    /// Ticks during which further goal events are ignored.
    goal_cooldown: u32,
    /// Ticks until the post-goal position reset fires.
    reset_countdown: Option<u32>,
    /// Delay between a goal and the kick-off reset, in ticks.
    reset_delay_ticks: u32,
}

impl MatchStateMachine {
    /// A fresh match of `match_duration` seconds.
    pub fn new(match_duration: u32, reset_delay_ticks: u32) -> Self {
        Self {
            phase: MatchPhase::Idle,
            score: Score::default(),
            time_remaining: match_duration,
            match_duration,
            goal_cooldown: 0,
            reset_countdown: None,
            reset_delay_ticks,
        }
    }

    // ── Phase transitions ───────────────────────────────────────────

    /// The handshake began: `Idle → Waiting`.
    pub fn begin_waiting(&mut self) {
        if self.phase == MatchPhase::Idle {
            self.phase = MatchPhase::Waiting;
        }
    }

    /// Both peers confirmed ready: pre-start countdown runs.
    pub fn begin_starting(&mut self) {
        if matches!(self.phase, MatchPhase::Idle | MatchPhase::Waiting) {
            self.phase = MatchPhase::Starting;
        }
    }

    /// Apply the authoritative `game-started` signal.
    ///
    /// Valid from **any** phase, including `Idle` — this is the escape
    /// hatch for a peer whose handshake lags behind the start signal. The
    /// second application is a no-op (`false`): the timer is not reset
    /// twice.
    pub fn apply_game_started(&mut self, match_duration: u32) -> bool {
        if self.phase == MatchPhase::Active {
            debug!("game-started while already active, no-op");
            return false;
        }
        self.phase = MatchPhase::Active;
        self.match_duration = match_duration;
        self.time_remaining = match_duration;
        self.score = Score::default();
        self.goal_cooldown = 0;
        self.reset_countdown = None;
        true
    }

    /// Freeze timer and physics stepping. Nothing is reset.
    pub fn pause(&mut self) {
        if self.phase == MatchPhase::Active {
            self.phase = MatchPhase::Paused;
        }
    }

    /// Undo [`pause`](Self::pause).
    pub fn resume(&mut self) {
        if self.phase == MatchPhase::Paused {
            self.phase = MatchPhase::Active;
        }
    }

    // ── Goals ───────────────────────────────────────────────────────

    /// Apply a goal for `scorer`.
    ///
    /// Returns `false` — and changes nothing — while a previous goal's
    /// cooldown is still running, absorbing duplicate collision events and
    /// message replays. On acceptance the score increments, the cooldown
    /// opens, and the kick-off reset countdown is scheduled.
    pub fn apply_goal(&mut self, scorer: PlayerSide, cooldown_ticks: u32) -> bool {
        if self.phase != MatchPhase::Active {
            debug!(phase = ?self.phase, %scorer, "goal outside active phase, ignored");
            return false;
        }
        if self.goal_cooldown > 0 {
            debug!(%scorer, remaining = self.goal_cooldown, "goal during cooldown, ignored");
            return false;
        }
        self.score.increment(scorer);
        self.goal_cooldown = cooldown_ticks;
        self.reset_countdown = Some(self.reset_delay_ticks);
        debug!(%scorer, score = ?self.score, "goal applied");
        true
    }

    /// Advance per-tick counters (cooldown, reset delay).
    ///
    /// Called once per simulation tick while the match is live; the
    /// dispatcher skips it when paused, which is what freezes the
    /// sequence. Returns `true` on the tick the kick-off reset fires:
    /// ball and both players go back to their starting positions.
    pub fn step_frame(&mut self) -> bool {
        if self.goal_cooldown > 0 {
            self.goal_cooldown -= 1;
        }
        match self.reset_countdown {
            Some(0) | None => {
                self.reset_countdown = None;
                false
            }
            Some(1) => {
                self.reset_countdown = None;
                true
            }
            Some(n) => {
                self.reset_countdown = Some(n - 1);
                false
            }
        }
    }

    // ── Timer ───────────────────────────────────────────────────────

    /// Decrement the clock by one second while active.
    ///
    /// Returns `true` when the clock reaches zero and the match ends.
    pub fn tick_second(&mut self) -> bool {
        if self.phase != MatchPhase::Active {
            return false;
        }
        self.time_remaining = self.time_remaining.saturating_sub(1);
        if self.time_remaining == 0 {
            self.phase = MatchPhase::Ended;
            return true;
        }
        false
    }

    /// Nudge the local clock toward a periodic authoritative value.
    ///
    /// Local ticking drifts under frame-rate variance or tab backgrounding;
    /// a snapshot value more than a second away wins outright.
    pub fn nudge_time(&mut self, authoritative_secs: u32) {
        let drift = self.time_remaining.abs_diff(authoritative_secs);
        if drift > 1 {
            debug!(
                local = self.time_remaining,
                authoritative = authoritative_secs,
                "clock drift beyond tolerance, snapping"
            );
            self.time_remaining = authoritative_secs;
        }
    }

    // ── End of match ────────────────────────────────────────────────

    /// Apply the authoritative `game-ended` payload.
    ///
    /// Final scores come **from the payload**, not the local counters, so
    /// any residual divergence between the peers is resolved here.
    pub fn apply_game_ended(&mut self, final_score: Score) {
        if self.score != final_score {
            warn!(
                local = ?self.score,
                authoritative = ?final_score,
                "local score disagreed with final payload, adopting payload"
            );
        }
        self.score = final_score;
        self.time_remaining = 0;
        self.phase = MatchPhase::Ended;
    }

    /// Adopt backup-snapshot bookkeeping fields.
    ///
    /// The periodic `game-state` snapshot is a low-rate safety net: the
    /// clock is nudged, a diverged score is corrected, and an ended flag
    /// finishes the match if the `game-ended` message was lost.
    pub fn apply_snapshot_fields(&mut self, score: Score, time_remaining: u32, game_ended: bool) {
        if self.score != score {
            warn!(local = ?self.score, snapshot = ?score, "score corrected from snapshot");
            self.score = score;
        }
        self.nudge_time(time_remaining);
        if game_ended && self.phase != MatchPhase::Ended {
            debug!("snapshot carries game-ended flag, ending match");
            self.phase = MatchPhase::Ended;
        }
    }

    /// Reset for a rematch, keeping the configured duration.
    pub fn reset(&mut self) {
        self.phase = MatchPhase::Waiting;
        self.score = Score::default();
        self.time_remaining = self.match_duration;
        self.goal_cooldown = 0;
        self.reset_countdown = None;
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    /// Whether a goal cooldown window is currently open.
    pub fn in_goal_cooldown(&self) -> bool {
        self.goal_cooldown > 0
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

    fn active_match() -> MatchStateMachine {
        let mut m = MatchStateMachine::new(120, 60);
        m.apply_game_started(120);
        m
    }

    #[test]
    fn goal_increments_named_side_once() {
        let mut m = active_match();
        assert!(m.apply_goal(PlayerSide::PlayerOne, 120));
        assert_eq!(m.score().player1, 1);
        assert_eq!(m.score().player2, 0);
    }

    #[test]
    fn duplicate_goal_inside_cooldown_is_absorbed() {
        let mut m = active_match();
        assert!(m.apply_goal(PlayerSide::PlayerOne, 120));
        // Replay or duplicate collision event well inside the window.
        assert!(!m.apply_goal(PlayerSide::PlayerOne, 120));
        assert!(!m.apply_goal(PlayerSide::PlayerTwo, 120));
        assert_eq!(m.score().player1, 1);
        assert_eq!(m.score().player2, 0);
    }

    #[test]
    fn goal_accepted_again_after_cooldown_elapses() {
        let mut m = active_match();
        assert!(m.apply_goal(PlayerSide::PlayerOne, 3));
        for _ in 0..3 {
            m.step_frame();
        }
        assert!(!m.in_goal_cooldown());
        assert!(m.apply_goal(PlayerSide::PlayerOne, 3));
        assert_eq!(m.score().player1, 2);
    }

    #[test]
    fn reset_countdown_fires_once_after_delay() {
        let mut m = MatchStateMachine::new(120, 4);
        m.apply_game_started(120);
        m.apply_goal(PlayerSide::PlayerTwo, 120);

        let mut fired = 0;
        for _ in 0..10 {
            if m.step_frame() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn goal_outside_active_phase_is_ignored() {
        let mut m = MatchStateMachine::new(120, 60);
        assert!(!m.apply_goal(PlayerSide::PlayerOne, 120));
        m.apply_game_started(120);
        m.pause();
        assert!(!m.apply_goal(PlayerSide::PlayerOne, 120));
        assert_eq!(m.score(), Score::default());
    }

    #[test]
    fn clock_runs_down_to_ended() {
        let mut m = MatchStateMachine::new(3, 60);
        m.apply_game_started(3);
        assert!(!m.tick_second());
        assert!(!m.tick_second());
        assert!(m.tick_second());
        assert_eq!(m.phase(), MatchPhase::Ended);
        assert_eq!(m.time_remaining(), 0);
    }

    #[test]
    fn pause_freezes_clock_without_reset() {
        let mut m = active_match();
        m.apply_goal(PlayerSide::PlayerOne, 120);
        m.tick_second();
        let before = m.time_remaining();

        m.pause();
        assert!(!m.tick_second());
        assert_eq!(m.time_remaining(), before);
        assert_eq!(m.score().player1, 1);

        m.resume();
        assert!(!m.tick_second());
        assert_eq!(m.time_remaining(), before - 1);
    }

    #[test]
    fn game_started_is_idempotent() {
        let mut m = MatchStateMachine::new(120, 60);
        assert!(m.apply_game_started(120));
        m.apply_goal(PlayerSide::PlayerOne, 120);
        m.tick_second();
        // The duplicate must not reset the clock or the score.
        assert!(!m.apply_game_started(120));
        assert_eq!(m.time_remaining(), 119);
        assert_eq!(m.score().player1, 1);
    }

    #[test]
    fn game_started_fires_from_idle() {
        let mut m = MatchStateMachine::new(120, 60);
        assert_eq!(m.phase(), MatchPhase::Idle);
        assert!(m.apply_game_started(90));
        assert_eq!(m.phase(), MatchPhase::Active);
        assert_eq!(m.time_remaining(), 90);
    }

    #[test]
    fn game_ended_payload_overrides_local_counters() {
        let mut m = active_match();
        // Local counters diverged (say a goal-scored message was lost).
        m.apply_goal(PlayerSide::PlayerOne, 0);

        m.apply_game_ended(Score {
            player1: 3,
            player2: 2,
        });
        assert_eq!(m.score().player1, 3);
        assert_eq!(m.score().player2, 2);
        assert_eq!(m.phase(), MatchPhase::Ended);
    }

    #[test]
    fn nudge_tolerates_one_second_of_drift() {
        let mut m = active_match();
        let local = m.time_remaining();
        m.nudge_time(local - 1);
        assert_eq!(m.time_remaining(), local);
        m.nudge_time(local - 5);
        assert_eq!(m.time_remaining(), local - 5);
    }

    #[test]
    fn snapshot_fields_correct_divergence() {
        let mut m = active_match();
        m.apply_snapshot_fields(
            Score {
                player1: 2,
                player2: 1,
            },
            60,
            false,
        );
        assert_eq!(m.score().player1, 2);
        assert_eq!(m.time_remaining(), 60);
        assert_eq!(m.phase(), MatchPhase::Active);

        m.apply_snapshot_fields(m.score(), 60, true);
        assert_eq!(m.phase(), MatchPhase::Ended);
    }

    #[test]
    fn reset_prepares_rematch() {
        let mut m = active_match();
        m.apply_goal(PlayerSide::PlayerTwo, 120);
        m.apply_game_ended(m.score());

        m.reset();
        assert_eq!(m.phase(), MatchPhase::Waiting);
        assert_eq!(m.score(), Score::default());
        assert_eq!(m.time_remaining(), 120);
    }
}
