//! Time-delayed interpolation buffer for remote entities.
//!
//! The mirroring peer never simulates a remote entity; it renders it a
//! fixed `render_delay_ms` in the past, linearly interpolating between the
//! two received samples that straddle the render timestamp. Rendering
//! behind real time trades a little latency for smoothness under jitter.
//!
//! Two rules keep the output honest:
//!
//! - **Never extrapolate.** When the buffer is starved (packet loss, match
//!   just started) the last known sample is held as-is. Rendered positions
//!   are always a convex combination of two genuinely received samples, or
//!   equal to one.
//! - **Snap on large jumps.** A sample that lands further than the snap
//!   threshold from the newest buffered one is an authoritative correction
//!   (reset after a goal, kick-off seating), not motion. The buffer is
//!   cleared and the entity jumps straight there; smoothing a correction
//!   produces a visible drift-then-catch-up artifact.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::protocol::{EntityState, Facing, TimestampMs};

/// Default render delay: how far in the past remote entities are drawn.
pub const DEFAULT_RENDER_DELAY_MS: u64 = 100;

/// Default snap threshold for the ball, in world units.
///
/// A few times the ball's per-tick travel distance; anything larger than
/// this between consecutive samples is a teleport, not flight.
pub const BALL_SNAP_THRESHOLD: f32 = 150.0;

/// Default snap threshold for players, who move slower than the ball.
pub const PLAYER_SNAP_THRESHOLD: f32 = 60.0;

/// Velocity magnitude below which an entity is considered facing-idle.
const FACING_DEADZONE: f32 = 1.0;

/// Hard cap on buffered samples. At 30 Hz this covers more than a second
/// of history, far beyond the render delay.
const MAX_SAMPLES: usize = 64;

/// Interpolated pose handed to the render step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedState {
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub facing: Facing,
}

/// Sample buffer and interpolator for one non-owned entity.
///
/// Used for the remote player always, and for the ball on the peer that
/// does not hold ball authority.
#[derive(Debug)]
pub struct RemoteStateBuffer {
    samples: VecDeque<EntityState>,
    snap_threshold: f32,
    render_delay_ms: u64,
}

impl RemoteStateBuffer {
    /// Create a buffer with an explicit snap threshold and render delay.
    pub fn new(snap_threshold: f32, render_delay_ms: u64) -> Self {
        Self {
            samples: VecDeque::new(),
            snap_threshold,
            render_delay_ms,
        }
    }

    /// Buffer tuned for the ball.
    pub fn for_ball() -> Self {
        Self::new(BALL_SNAP_THRESHOLD, DEFAULT_RENDER_DELAY_MS)
    }

    /// Buffer tuned for a remote player.
    pub fn for_player() -> Self {
        Self::new(PLAYER_SNAP_THRESHOLD, DEFAULT_RENDER_DELAY_MS)
    }

    /// Ingest a sample from the wire.
    ///
    /// Samples must arrive in non-decreasing timestamp order per sender;
    /// anything at or before the newest buffered timestamp is dropped.
    /// A jump beyond the snap threshold clears history and keeps only the
    /// new sample.
    pub fn push(&mut self, sample: EntityState) {
        if let Some(newest) = self.samples.back() {
            if sample.timestamp <= newest.timestamp {
                debug!(
                    incoming = sample.timestamp,
                    newest = newest.timestamp,
                    "dropping out-of-order sample"
                );
                return;
            }
            if sample.distance_to(newest) > self.snap_threshold {
                debug!(
                    distance = sample.distance_to(newest),
                    threshold = self.snap_threshold,
                    "snap: clearing interpolation history"
                );
                self.samples.clear();
            }
        }

        self.samples.push_back(sample);
        if self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    /// Compute the pose to draw at `now_ms`.
    ///
    /// Returns `None` until the first sample arrives. Entries older than
    /// the render timestamp's lower neighbor are pruned as a side effect.
    pub fn render(&mut self, now_ms: TimestampMs) -> Option<RenderedState> {
        let render_ts = now_ms.saturating_sub(self.render_delay_ms);

        let newest = *self.samples.back()?;
        if render_ts >= newest.timestamp {
            // Starved (or exactly on the newest sample): hold it, never
            // project past observed data.
            trace!(render_ts, newest = newest.timestamp, "holding newest sample");
            return Some(Self::held(&newest));
        }

        let oldest = *self.samples.front()?;
        if render_ts <= oldest.timestamp {
            return Some(Self::held(&oldest));
        }

        // Drop samples that can no longer be a lower neighbor: everything
        // strictly before the last sample at-or-below render_ts.
        while self.samples.len() >= 2 {
            let second_ts = self.samples.get(1).map(|s| s.timestamp)?;
            if second_ts <= render_ts {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let p0 = *self.samples.front()?;
        let p1 = *self.samples.get(1)?;

        let span = p1.timestamp.saturating_sub(p0.timestamp);
        if span == 0 {
            return Some(Self::held(&p1));
        }
        let t = (render_ts - p0.timestamp) as f32 / span as f32;

        let velocity_x = p0.velocity_x + (p1.velocity_x - p0.velocity_x) * t;
        let velocity_y = p0.velocity_y + (p1.velocity_y - p0.velocity_y) * t;
        Some(RenderedState {
            x: p0.x + (p1.x - p0.x) * t,
            y: p0.y + (p1.y - p0.y) * t,
            velocity_x,
            velocity_y,
            facing: facing_from_velocity(velocity_x),
        })
    }

    /// Timestamp of the newest buffered sample, if any.
    pub fn newest_timestamp(&self) -> Option<TimestampMs> {
        self.samples.back().map(|s| s.timestamp)
    }

    /// Whether the buffer has no sample newer than `max_age_ms` before
    /// `now_ms`. A stale buffer may be corrected by a full snapshot.
    pub fn is_stale(&self, now_ms: TimestampMs, max_age_ms: u64) -> bool {
        match self.newest_timestamp() {
            Some(ts) => now_ms.saturating_sub(ts) > max_age_ms,
            None => true,
        }
    }

    /// Discard all history, e.g. after a reconnection gap.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has arrived yet (or history was cleared).
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn held(sample: &EntityState) -> RenderedState {
        RenderedState {
            x: sample.x,
            y: sample.y,
            velocity_x: sample.velocity_x,
            velocity_y: sample.velocity_y,
            facing: facing_from_velocity(sample.velocity_x),
        }
    }
}

/// Facing from the sign of horizontal velocity, with a deadzone so a
/// near-stationary entity reads as idle instead of flickering.
fn facing_from_velocity(velocity_x: f32) -> Facing {
    if velocity_x > FACING_DEADZONE {
        Facing::Right
    } else if velocity_x < -FACING_DEADZONE {
        Facing::Left
    } else {
        Facing::Idle
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

    fn sample(x: f32, y: f32, vx: f32, timestamp: TimestampMs) -> EntityState {
        EntityState {
            x,
            y,
            velocity_x: vx,
            velocity_y: 0.0,
            rotation: None,
            direction: Facing::Idle,
            is_on_ground: false,
            timestamp,
        }
    }

    #[test]
    fn empty_buffer_renders_nothing() {
        let mut buffer = RemoteStateBuffer::for_ball();
        assert!(buffer.render(1000).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn single_sample_is_held() {
        let mut buffer = RemoteStateBuffer::for_ball();
        buffer.push(sample(100.0, 200.0, 0.0, 0));

        let rendered = buffer.render(500).unwrap();
        assert_eq!(rendered.x, 100.0);
        assert_eq!(rendered.y, 200.0);
    }

    #[test]
    fn interpolates_midway_between_straddling_samples() {
        let mut buffer = RemoteStateBuffer::new(1000.0, 100);
        buffer.push(sample(0.0, 0.0, 100.0, 0));
        buffer.push(sample(100.0, 50.0, 100.0, 100));

        // render_ts = 150 - 100 = 50 → halfway.
        let rendered = buffer.render(150).unwrap();
        assert!((rendered.x - 50.0).abs() < f32::EPSILON);
        assert!((rendered.y - 25.0).abs() < f32::EPSILON);
        assert_eq!(rendered.facing, Facing::Right);
    }

    #[test]
    fn rendered_position_is_convex_combination() {
        let mut buffer = RemoteStateBuffer::new(1000.0, 100);
        buffer.push(sample(10.0, -5.0, 0.0, 1000));
        buffer.push(sample(90.0, 35.0, 0.0, 1100));

        for now in [1101, 1125, 1150, 1175, 1199] {
            let rendered = buffer.render(now).unwrap();
            assert!(
                (10.0..=90.0).contains(&rendered.x),
                "x {} outside segment at now={now}",
                rendered.x
            );
            assert!((-5.0..=35.0).contains(&rendered.y));
        }
    }

    #[test]
    fn snap_clears_history_and_next_render_is_exact() {
        let mut buffer = RemoteStateBuffer::for_ball();
        buffer.push(sample(100.0, 100.0, 0.0, 0));
        buffer.push(sample(110.0, 100.0, 0.0, 33));
        // 400 units away — far beyond the 150-unit ball threshold.
        buffer.push(sample(510.0, 100.0, 0.0, 66));

        assert_eq!(buffer.len(), 1);
        let rendered = buffer.render(100).unwrap();
        assert_eq!(rendered.x, 510.0);
        assert_eq!(rendered.y, 100.0);
    }

    #[test]
    fn small_jump_does_not_snap() {
        let mut buffer = RemoteStateBuffer::for_ball();
        buffer.push(sample(100.0, 100.0, 0.0, 0));
        buffer.push(sample(140.0, 100.0, 0.0, 33));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn out_of_order_sample_is_dropped() {
        let mut buffer = RemoteStateBuffer::for_player();
        buffer.push(sample(0.0, 0.0, 0.0, 100));
        buffer.push(sample(50.0, 0.0, 0.0, 50));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.newest_timestamp(), Some(100));
    }

    #[test]
    fn starved_buffer_holds_newest_without_extrapolating() {
        let mut buffer = RemoteStateBuffer::new(1000.0, 100);
        buffer.push(sample(0.0, 0.0, 400.0, 0));
        buffer.push(sample(50.0, 0.0, 400.0, 50));

        // Long after the last sample: held, not projected forward.
        let rendered = buffer.render(5000).unwrap();
        assert_eq!(rendered.x, 50.0);
    }

    #[test]
    fn render_before_oldest_sample_holds_oldest() {
        let mut buffer = RemoteStateBuffer::new(1000.0, 100);
        buffer.push(sample(10.0, 0.0, 0.0, 1000));
        buffer.push(sample(20.0, 0.0, 0.0, 1050));

        // render_ts = 900, before the first sample.
        let rendered = buffer.render(1000).unwrap();
        assert_eq!(rendered.x, 10.0);
    }

    #[test]
    fn superseded_samples_are_pruned() {
        let mut buffer = RemoteStateBuffer::new(1000.0, 100);
        for i in 0..10u64 {
            buffer.push(sample(i as f32, 0.0, 0.0, i * 33));
        }
        // render_ts = 200: samples at 0, 33, 66, 99, 132 are superseded by
        // the lower neighbor at 198.
        let _ = buffer.render(300);
        assert!(buffer.len() <= 5, "expected pruning, len={}", buffer.len());
    }

    #[test]
    fn facing_deadzone_yields_idle() {
        let mut buffer = RemoteStateBuffer::for_player();
        buffer.push(sample(0.0, 0.0, 0.5, 0));
        assert_eq!(buffer.render(100).unwrap().facing, Facing::Idle);

        let mut buffer = RemoteStateBuffer::for_player();
        buffer.push(sample(0.0, 0.0, -20.0, 0));
        assert_eq!(buffer.render(100).unwrap().facing, Facing::Left);
    }

    #[test]
    fn staleness_reflects_newest_sample_age() {
        let mut buffer = RemoteStateBuffer::for_ball();
        assert!(buffer.is_stale(0, 250));

        buffer.push(sample(0.0, 0.0, 0.0, 1000));
        assert!(!buffer.is_stale(1200, 250));
        assert!(buffer.is_stale(1300, 250));
    }

    /// The authoritative rest-to-motion scenario: ball at rest, two flight
    /// samples, render 100 ms behind now lands exactly on the newest one.
    #[test]
    fn render_at_newest_sample_timestamp_returns_it_exactly() {
        let mut buffer = RemoteStateBuffer::for_ball();
        buffer.push(sample(900.0, 600.0, 400.0, 0));
        buffer.push(sample(950.0, 600.0, 400.0, 50));

        // now=150, delay=100 → render_ts = 50 = newest timestamp.
        let rendered = buffer.render(150).unwrap();
        assert_eq!(rendered.x, 950.0);
        assert_eq!(rendered.y, 600.0);
    }

    #[test]
    fn buffer_length_is_bounded() {
        let mut buffer = RemoteStateBuffer::new(f32::MAX, 100);
        for i in 0..200u64 {
            buffer.push(sample(0.0, 0.0, 0.0, i));
        }
        assert!(buffer.len() <= MAX_SAMPLES);
    }
}
