//! Exponential-backoff reconnection driver.
//!
//! Pure deadline arithmetic over the tick clock — no timers of its own.
//! The dispatcher polls it every tick; when a deadline passes it reports
//! the due attempt, the embedder tries to establish a fresh transport, and
//! either `on_attempt_failed` schedules the next (doubled) delay or
//! `on_reconnected` cancels the whole sequence. After `max_attempts`
//! failures the policy is exhausted and the match must be abandoned.

use tracing::{debug, warn};

use crate::protocol::TimestampMs;

/// Default first-retry delay.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default attempt cap.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectState {
    /// Transport up, nothing scheduled.
    Connected,
    /// Waiting out the backoff before the given attempt.
    Waiting { attempt: u32, deadline: TimestampMs },
    /// An attempt was handed to the embedder and has not resolved yet.
    InFlight { attempt: u32 },
    /// All attempts used up.
    Exhausted,
}

/// A due reconnection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectAttempt {
    /// Zero-based attempt index.
    pub attempt: u32,
}

/// Backoff state machine for one connection.
#[derive(Debug)]
pub struct ReconnectionPolicy {
    base_delay_ms: u64,
    max_attempts: u32,
    state: ReconnectState,
}

impl ReconnectionPolicy {
    pub fn new(base_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_attempts,
            state: ReconnectState::Connected,
        }
    }

    /// The delay before the given zero-based attempt: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> u64 {
        self.base_delay_ms.saturating_mul(1u64 << attempt.min(63))
    }

    /// The transport dropped: arm the first backoff deadline.
    ///
    /// No-op if a reconnection sequence is already running.
    pub fn on_disconnected(&mut self, now_ms: TimestampMs) {
        if self.state != ReconnectState::Connected {
            return;
        }
        if self.max_attempts == 0 {
            warn!("reconnection disabled (max_attempts = 0)");
            self.state = ReconnectState::Exhausted;
            return;
        }
        let deadline = now_ms + self.delay_for(0);
        debug!(deadline, "disconnected, first reconnect attempt armed");
        self.state = ReconnectState::Waiting {
            attempt: 0,
            deadline,
        };
    }

    /// Poll the backoff deadline.
    ///
    /// Returns the due attempt at most once; it stays in flight until the
    /// embedder reports the outcome.
    pub fn next_attempt(&mut self, now_ms: TimestampMs) -> Option<ReconnectAttempt> {
        match self.state {
            ReconnectState::Waiting { attempt, deadline } if now_ms >= deadline => {
                debug!(attempt, "reconnect attempt due");
                self.state = ReconnectState::InFlight { attempt };
                Some(ReconnectAttempt { attempt })
            }
            _ => None,
        }
    }

    /// The in-flight attempt failed: double the delay or give up.
    pub fn on_attempt_failed(&mut self, now_ms: TimestampMs) {
        let ReconnectState::InFlight { attempt } = self.state else {
            return;
        };
        let next = attempt + 1;
        if next >= self.max_attempts {
            warn!(attempts = self.max_attempts, "reconnection attempts exhausted");
            self.state = ReconnectState::Exhausted;
            return;
        }
        let deadline = now_ms + self.delay_for(next);
        debug!(attempt = next, deadline, "reconnect attempt failed, backing off");
        self.state = ReconnectState::Waiting {
            attempt: next,
            deadline,
        };
    }

    /// Reconnection succeeded (possibly out-of-band): cancel any pending
    /// backoff deadline and reset the attempt index.
    pub fn on_reconnected(&mut self) {
        debug!("reconnected, backoff cancelled");
        self.state = ReconnectState::Connected;
    }

    /// Whether every attempt has been used without success.
    pub fn exhausted(&self) -> bool {
        self.state == ReconnectState::Exhausted
    }

    /// Whether a reconnection sequence is running.
    pub fn reconnecting(&self) -> bool {
        matches!(
            self.state,
            ReconnectState::Waiting { .. } | ReconnectState::InFlight { .. }
        )
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS)
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

    #[test]
    fn backoff_delays_double_and_then_stop() {
        let mut policy = ReconnectionPolicy::new(1000, 5);
        let mut now = 0u64;
        let mut delays = Vec::new();

        policy.on_disconnected(now);
        loop {
            // Walk time forward until the attempt fires.
            let before = now;
            while policy.next_attempt(now).is_none() {
                if policy.exhausted() {
                    break;
                }
                now += 100;
            }
            if policy.exhausted() {
                break;
            }
            delays.push(now - before);
            policy.on_attempt_failed(now);
        }

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert!(policy.exhausted());
    }

    #[test]
    fn attempt_fires_only_once_per_deadline() {
        let mut policy = ReconnectionPolicy::new(1000, 5);
        policy.on_disconnected(0);

        assert!(policy.next_attempt(999).is_none());
        assert_eq!(
            policy.next_attempt(1000),
            Some(ReconnectAttempt { attempt: 0 })
        );
        // In flight now: polling again must not re-fire.
        assert!(policy.next_attempt(2000).is_none());
    }

    #[test]
    fn success_resets_the_sequence() {
        let mut policy = ReconnectionPolicy::new(1000, 5);
        policy.on_disconnected(0);
        let _ = policy.next_attempt(1000);
        policy.on_attempt_failed(1000);

        policy.on_reconnected();
        assert!(!policy.reconnecting());
        assert!(!policy.exhausted());

        // A later disconnect starts again from the base delay.
        policy.on_disconnected(50_000);
        assert!(policy.next_attempt(50_999).is_none());
        assert_eq!(
            policy.next_attempt(51_000),
            Some(ReconnectAttempt { attempt: 0 })
        );
    }

    #[test]
    fn reconnected_cancels_pending_deadline() {
        let mut policy = ReconnectionPolicy::new(1000, 5);
        policy.on_disconnected(0);
        // The embedder reconnected out-of-band before the deadline.
        policy.on_reconnected();
        assert!(policy.next_attempt(10_000).is_none());
    }

    #[test]
    fn duplicate_disconnect_does_not_restart_backoff() {
        let mut policy = ReconnectionPolicy::new(1000, 5);
        policy.on_disconnected(0);
        let _ = policy.next_attempt(1000);
        policy.on_attempt_failed(1000);
        // attempt 1 armed with deadline 3000.
        policy.on_disconnected(1500);
        assert!(policy.next_attempt(2999).is_none());
        assert_eq!(
            policy.next_attempt(3000),
            Some(ReconnectAttempt { attempt: 1 })
        );
    }

    #[test]
    fn zero_max_attempts_is_immediately_exhausted() {
        let mut policy = ReconnectionPolicy::new(1000, 0);
        policy.on_disconnected(0);
        assert!(policy.exhausted());
        assert!(policy.next_attempt(10_000).is_none());
    }
}
