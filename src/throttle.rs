//! Per-kind outbound rate limiting.
//!
//! Continuous state messages (positions, ball, snapshots) are cheap to
//! drop: a newer one is always moments away. Edge-triggered input messages
//! are not — losing a "stop moving" edge leaves the remote player walking
//! into a wall forever — so edges are queued and coalesced instead of
//! dropped.

use std::collections::{HashMap, VecDeque};

use crate::protocol::{MessageKind, PeerMessage, TimestampMs};

/// Default minimum interval between position/ball messages (~30 Hz).
pub const DEFAULT_STATE_INTERVAL_MS: u64 = 33;

/// Default minimum interval between full snapshots (~1 Hz).
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 1000;

/// Default coalescing interval for edge-input flushes.
pub const DEFAULT_INPUT_INTERVAL_MS: u64 = 16;

/// Outbound rate limiter and edge-input queue.
#[derive(Debug)]
pub struct ThrottleGate {
    state_interval_ms: u64,
    snapshot_interval_ms: u64,
    input_interval_ms: u64,
    last_sent: HashMap<MessageKind, TimestampMs>,
    edge_queue: VecDeque<PeerMessage>,
    last_edge_flush: Option<TimestampMs>,
}

impl ThrottleGate {
    pub fn new(state_interval_ms: u64, snapshot_interval_ms: u64, input_interval_ms: u64) -> Self {
        Self {
            state_interval_ms,
            snapshot_interval_ms,
            input_interval_ms,
            last_sent: HashMap::new(),
            edge_queue: VecDeque::new(),
            last_edge_flush: None,
        }
    }

    /// Whether a message of `kind` may be sent at `now_ms`.
    ///
    /// On `true` the kind's clock is advanced — the caller is committed to
    /// sending. `false` means the message should be dropped for rate;
    /// edge-input kinds never take this path (use
    /// [`queue_edge`](Self::queue_edge)).
    pub fn try_send(&mut self, kind: MessageKind, now_ms: TimestampMs) -> bool {
        let interval = match kind {
            MessageKind::PlayerPosition | MessageKind::BallState => self.state_interval_ms,
            MessageKind::Snapshot => self.snapshot_interval_ms,
            MessageKind::InputEdge => self.input_interval_ms,
            MessageKind::Control => return true,
        };
        match self.last_sent.get(&kind) {
            Some(last) if now_ms.saturating_sub(*last) < interval => false,
            _ => {
                self.last_sent.insert(kind, now_ms);
                true
            }
        }
    }

    /// Queue an edge-triggered input message. Never dropped.
    pub fn queue_edge(&mut self, msg: PeerMessage) {
        debug_assert_eq!(msg.kind(), MessageKind::InputEdge);
        self.edge_queue.push_back(msg);
    }

    /// Drain queued edges if the coalescing interval has elapsed.
    ///
    /// Everything queued goes out in one batch, preserving press/release
    /// order; an empty return either means nothing is queued or the
    /// interval has not yet passed.
    pub fn flush_edges(&mut self, now_ms: TimestampMs) -> Vec<PeerMessage> {
        if self.edge_queue.is_empty() {
            return Vec::new();
        }
        if let Some(last) = self.last_edge_flush {
            if now_ms.saturating_sub(last) < self.input_interval_ms {
                return Vec::new();
            }
        }
        self.last_edge_flush = Some(now_ms);
        self.edge_queue.drain(..).collect()
    }

    /// Number of edges waiting for the next flush window.
    pub fn pending_edges(&self) -> usize {
        self.edge_queue.len()
    }
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new(
            DEFAULT_STATE_INTERVAL_MS,
            DEFAULT_SNAPSHOT_INTERVAL_MS,
            DEFAULT_INPUT_INTERVAL_MS,
        )
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
    fn position_messages_are_capped_at_thirty_hertz() {
        let mut gate = ThrottleGate::default();
        assert!(gate.try_send(MessageKind::PlayerPosition, 0));
        // 16 ms later: too soon.
        assert!(!gate.try_send(MessageKind::PlayerPosition, 16));
        // 33 ms after the accepted send: allowed.
        assert!(gate.try_send(MessageKind::PlayerPosition, 33));
    }

    #[test]
    fn kinds_throttle_independently() {
        let mut gate = ThrottleGate::default();
        assert!(gate.try_send(MessageKind::PlayerPosition, 0));
        // Ball clock is separate from the player clock.
        assert!(gate.try_send(MessageKind::BallState, 1));
        assert!(!gate.try_send(MessageKind::BallState, 20));
    }

    #[test]
    fn snapshots_run_at_one_hertz() {
        let mut gate = ThrottleGate::default();
        assert!(gate.try_send(MessageKind::Snapshot, 0));
        assert!(!gate.try_send(MessageKind::Snapshot, 999));
        assert!(gate.try_send(MessageKind::Snapshot, 1000));
    }

    #[test]
    fn control_messages_are_never_throttled() {
        let mut gate = ThrottleGate::default();
        for now in 0..10 {
            assert!(gate.try_send(MessageKind::Control, now));
        }
    }

    #[test]
    fn edges_are_queued_not_dropped() {
        let mut gate = ThrottleGate::default();
        gate.queue_edge(PeerMessage::MoveLeft { pressed: true });
        gate.queue_edge(PeerMessage::MoveLeft { pressed: false });
        assert_eq!(gate.pending_edges(), 2);

        let flushed = gate.flush_edges(0);
        assert_eq!(
            flushed,
            vec![
                PeerMessage::MoveLeft { pressed: true },
                PeerMessage::MoveLeft { pressed: false },
            ]
        );
        assert_eq!(gate.pending_edges(), 0);
    }

    #[test]
    fn edge_flushes_are_coalesced() {
        let mut gate = ThrottleGate::default();
        gate.queue_edge(PeerMessage::Jump { pressed: true });
        assert_eq!(gate.flush_edges(0).len(), 1);

        // Queued right after a flush: held until the interval passes.
        gate.queue_edge(PeerMessage::Jump { pressed: false });
        assert!(gate.flush_edges(5).is_empty());
        assert_eq!(gate.pending_edges(), 1);

        let flushed = gate.flush_edges(16);
        assert_eq!(flushed, vec![PeerMessage::Jump { pressed: false }]);
    }

    #[test]
    fn a_release_edge_survives_the_rate_limit() {
        // The scenario the queue exists for: press and release inside one
        // coalescing window must both reach the peer.
        let mut gate = ThrottleGate::default();
        gate.queue_edge(PeerMessage::MoveRight { pressed: true });
        let first = gate.flush_edges(0);
        assert_eq!(first.len(), 1);

        gate.queue_edge(PeerMessage::MoveRight { pressed: false });
        // Not yet...
        assert!(gate.flush_edges(10).is_empty());
        // ...but never lost.
        assert_eq!(gate.flush_edges(40).len(), 1);
    }
}
