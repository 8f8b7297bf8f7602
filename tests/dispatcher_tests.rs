#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration-style dispatcher tests for goalline-sync.
//!
//! Uses the shared `MockTransport` from `tests/common` to script peer
//! messages and verify that `SyncDispatcher` routes them correctly,
//! including handshake transitions, authority gating, interpolation
//! reads, and event delivery.

mod common;

use std::time::Duration;

use goalline_sync::protocol::{InputKind, PeerMessage, PlayerSide, Score};
use goalline_sync::{SyncConfig, SyncDispatcher, SyncError, SyncEvent};

use common::{
    all_ready_json, ball, ball_state_json, entity, game_started_json, goal_json,
    player_ready_json, position_json, snapshot_json, MockTransport,
};

// ════════════════════════════════════════════════════════════════════
// Helper: start a dispatcher with scripted peer messages
// ════════════════════════════════════════════════════════════════════

/// Start a dispatcher seated as `side` with the given scripted frames.
#[allow(clippy::type_complexity)]
fn start_dispatcher(
    side: PlayerSide,
    incoming: Vec<Option<Result<String, SyncError>>>,
) -> (
    SyncDispatcher,
    tokio::sync::mpsc::Receiver<SyncEvent>,
    std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    std::sync::Arc<std::sync::atomic::AtomicBool>,
) {
    let (transport, sent, closed) = MockTransport::new(incoming);
    let config = SyncConfig::new("conn-local", "conn-remote").with_assigned_side(side);
    let (dispatcher, events) =
        SyncDispatcher::start(transport, config).expect("dispatcher start");
    (dispatcher, events, sent, closed)
}

/// Give the background transport loop time to drain its scripted frames.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

/// Drain every event currently queued.
fn drain(rx: &mut tokio::sync::mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

/// Parse every recorded outbound frame.
fn parse_sent(sent: &std::sync::Mutex<Vec<String>>) -> Vec<PeerMessage> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|json| serde_json::from_str(json).expect("parse outbound frame"))
        .collect()
}

// ════════════════════════════════════════════════════════════════════
// Startup and identity
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn start_emits_connected_on_first_pump() {
    let (mut sync, mut events, _sent, _closed) =
        start_dispatcher(PlayerSide::PlayerOne, vec![]);
    settle().await;
    sync.pump(1_000);
    let evs = drain(&mut events);
    assert!(matches!(evs.first(), Some(SyncEvent::Connected)), "{evs:?}");
    assert!(sync.is_connected());
    assert!(sync.is_ball_authority());
    sync.shutdown().await;
}

#[tokio::test]
async fn identical_connection_ids_are_a_fatal_desync() {
    let (transport, _sent, _closed) = MockTransport::new(vec![]);
    let config = SyncConfig::new("conn-same", "conn-same");
    let err = SyncDispatcher::start(transport, config).expect_err("must refuse to seat");
    assert!(matches!(err, SyncError::IdentityConflict(_)), "{err:?}");
}

// ════════════════════════════════════════════════════════════════════
// Ready handshake and match start
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn handshake_remote_ready_then_start() {
    let (mut sync, mut events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerOne,
        vec![
            Some(Ok(player_ready_json(PlayerSide::PlayerTwo))),
            Some(Ok(all_ready_json())),
            Some(Ok(game_started_json(90))),
        ],
    );
    settle().await;
    sync.pump(1_000);

    let evs = drain(&mut events);
    assert!(evs.iter().any(|e| matches!(
        e,
        SyncEvent::RemoteReady {
            side: PlayerSide::PlayerTwo
        }
    )));
    assert!(evs.iter().any(|e| matches!(e, SyncEvent::AllReady)));
    assert!(evs
        .iter()
        .any(|e| matches!(e, SyncEvent::MatchStarted { duration_secs: 90 })));
    assert_eq!(sync.time_remaining(), 90);
    sync.shutdown().await;
}

#[tokio::test]
async fn mark_ready_sends_exactly_once() {
    let (mut sync, _events, sent, _closed) =
        start_dispatcher(PlayerSide::PlayerTwo, vec![]);
    sync.mark_ready().expect("mark ready");
    sync.mark_ready().expect("second call is a no-op");
    settle().await;

    let messages = parse_sent(&sent);
    let ready_count = messages
        .iter()
        .filter(|m| {
            matches!(
                m,
                PeerMessage::PlayerReady {
                    player_position: PlayerSide::PlayerTwo
                }
            )
        })
        .count();
    assert_eq!(ready_count, 1);
    sync.shutdown().await;
}

#[tokio::test]
async fn ready_claiming_the_local_seat_is_dropped() {
    let (mut sync, mut events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerOne,
        vec![Some(Ok(player_ready_json(PlayerSide::PlayerOne)))],
    );
    settle().await;
    sync.pump(1_000);
    let evs = drain(&mut events);
    assert!(!evs.iter().any(|e| matches!(e, SyncEvent::RemoteReady { .. })));
    sync.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Authority gating
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn mirror_peer_cannot_send_authoritative_state() {
    let (mut sync, _events, _sent, _closed) =
        start_dispatcher(PlayerSide::PlayerTwo, vec![]);
    assert!(!sync.is_ball_authority());

    let err = sync
        .send_ball_state(ball(600.0, 300.0, 1_000), 1_000)
        .expect_err("mirror must not broadcast ball state");
    assert!(matches!(err, SyncError::NotAuthority));

    let err = sync
        .report_goal(PlayerSide::PlayerTwo)
        .expect_err("mirror must not declare goals");
    assert!(matches!(err, SyncError::NotAuthority));

    sync.shutdown().await;
}

#[tokio::test]
async fn inbound_ball_state_is_dropped_on_the_authority() {
    let (mut sync, _events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerOne,
        vec![Some(Ok(ball_state_json(600.0, 300.0, 1_000)))],
    );
    settle().await;
    sync.pump(1_200);
    // The authority renders its own simulation; the echoed sample must not
    // have seeded a buffer.
    assert!(sync.ball(1_200).is_none());
    sync.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Goals and score
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn authority_goal_applies_sends_and_emits() {
    let (mut sync, mut events, sent, _closed) = start_dispatcher(
        PlayerSide::PlayerOne,
        vec![Some(Ok(game_started_json(120)))],
    );
    settle().await;
    sync.pump(1_000);
    drain(&mut events);

    assert!(sync.report_goal(PlayerSide::PlayerOne).expect("goal"));
    // Second detection during the cooldown is absorbed and not sent.
    assert!(!sync.report_goal(PlayerSide::PlayerOne).expect("cooldown"));
    settle().await;

    assert_eq!(sync.score(), Score { player1: 1, player2: 0 });
    let evs = drain(&mut events);
    assert!(evs.iter().any(|e| matches!(
        e,
        SyncEvent::GoalScored {
            scorer: PlayerSide::PlayerOne,
            ..
        }
    )));

    let goals = parse_sent(&sent)
        .iter()
        .filter(|m| matches!(m, PeerMessage::GoalScored { .. }))
        .count();
    assert_eq!(goals, 1);
    sync.shutdown().await;
}

#[tokio::test]
async fn mirror_applies_inbound_goal() {
    let (mut sync, mut events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerTwo,
        vec![
            Some(Ok(game_started_json(120))),
            Some(Ok(goal_json(PlayerSide::PlayerTwo))),
        ],
    );
    settle().await;
    sync.pump(1_000);

    assert_eq!(sync.score(), Score { player1: 0, player2: 1 });
    let evs = drain(&mut events);
    assert!(evs.iter().any(|e| matches!(
        e,
        SyncEvent::GoalScored {
            scorer: PlayerSide::PlayerTwo,
            ..
        }
    )));
    sync.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Remote entity interpolation through the dispatcher
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ball_renders_interpolated_on_the_mirror() {
    let (mut sync, _events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerTwo,
        vec![
            Some(Ok(ball_state_json(100.0, 300.0, 1_000))),
            Some(Ok(ball_state_json(200.0, 300.0, 1_100))),
        ],
    );
    settle().await;
    sync.pump(1_150);

    // Render time 1_150 - 100 = 1_050, midway between the samples.
    let pose = sync.ball(1_150).expect("interpolated ball");
    assert!((pose.x - 150.0).abs() < 1.0, "x = {}", pose.x);
    sync.shutdown().await;
}

#[tokio::test]
async fn remote_player_ignores_frames_for_the_local_seat() {
    let (mut sync, _events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerOne,
        vec![
            // A frame mislabeled with our own seat must be dropped.
            Some(Ok(position_json(PlayerSide::PlayerOne, 10.0, 10.0, 1_000))),
            Some(Ok(position_json(PlayerSide::PlayerTwo, 900.0, 500.0, 1_000))),
        ],
    );
    settle().await;
    sync.pump(1_200);

    let pose = sync.remote_player(1_200).expect("remote pose");
    assert!((pose.x - 900.0).abs() < 1.0, "x = {}", pose.x);
    sync.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Snapshot precedence
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn snapshot_does_not_override_fresh_ball_samples() {
    let (mut sync, _events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerTwo,
        vec![
            Some(Ok(ball_state_json(100.0, 300.0, 1_000))),
            Some(Ok(ball_state_json(120.0, 300.0, 1_050))),
            // Snapshot carries a wildly different ball but the buffer is
            // fresh, so it only updates bookkeeping.
            Some(Ok(snapshot_json(
                ball(999.0, 50.0, 1_060),
                Score { player1: 0, player2: 0 },
                120,
                false,
            ))),
        ],
    );
    settle().await;
    sync.pump(1_100);

    let pose = sync.ball(1_100).expect("ball pose");
    assert!(pose.x < 130.0, "snapshot stomped fresh samples: x = {}", pose.x);
    sync.shutdown().await;
}

#[tokio::test]
async fn snapshot_reseeds_a_stale_ball_buffer() {
    let (mut sync, _events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerTwo,
        vec![
            Some(Ok(ball_state_json(100.0, 300.0, 1_000))),
            Some(Ok(snapshot_json(
                ball(640.0, 360.0, 2_000),
                Score { player1: 1, player2: 0 },
                110,
                false,
            ))),
        ],
    );
    settle().await;
    // By pump time the lone fine-grained sample is 1 s old.
    sync.pump(2_000);

    assert_eq!(sync.score(), Score { player1: 1, player2: 0 });
    let pose = sync.ball(2_100).expect("ball pose");
    assert!((pose.x - 640.0).abs() < 1.0, "x = {}", pose.x);
    sync.shutdown().await;
}

#[tokio::test]
async fn snapshot_ended_flag_finishes_a_match_with_a_lost_game_ended() {
    let (mut sync, mut events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerTwo,
        vec![
            Some(Ok(game_started_json(120))),
            Some(Ok(snapshot_json(
                ball(640.0, 360.0, 5_000),
                Score { player1: 2, player2: 1 },
                0,
                true,
            ))),
        ],
    );
    settle().await;
    sync.pump(5_000);

    let evs = drain(&mut events);
    assert!(evs.iter().any(|e| matches!(
        e,
        SyncEvent::MatchEnded {
            winner: Some(PlayerSide::PlayerOne),
            ..
        }
    )));
    sync.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Input edges and send throttling
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn inbound_input_edges_become_events() {
    let (mut sync, mut events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerOne,
        vec![Some(Ok(
            serde_json::to_string(&PeerMessage::Jump { pressed: true }).unwrap()
        ))],
    );
    settle().await;
    sync.pump(1_000);

    let evs = drain(&mut events);
    assert!(evs.iter().any(|e| matches!(
        e,
        SyncEvent::RemoteInput {
            kind: InputKind::Jump,
            pressed: true
        }
    )));
    sync.shutdown().await;
}

#[tokio::test]
async fn queued_edges_flush_on_pump_without_loss() {
    let (mut sync, _events, sent, _closed) =
        start_dispatcher(PlayerSide::PlayerOne, vec![]);
    sync.send_input_edge(InputKind::Kick, true);
    sync.send_input_edge(InputKind::Kick, false);
    sync.pump(1_000);
    settle().await;

    let kicks: Vec<bool> = parse_sent(&sent)
        .iter()
        .filter_map(|m| match m {
            PeerMessage::Kick { pressed } => Some(*pressed),
            _ => None,
        })
        .collect();
    assert_eq!(kicks, vec![true, false]);
    sync.shutdown().await;
}

#[tokio::test]
async fn position_sends_are_capped_per_interval() {
    let (mut sync, _events, sent, _closed) =
        start_dispatcher(PlayerSide::PlayerOne, vec![]);

    assert!(sync
        .send_local_position(entity(100.0, 500.0, 1_000), 1_000)
        .expect("first send"));
    assert!(!sync
        .send_local_position(entity(101.0, 500.0, 1_010), 1_010)
        .expect("inside the interval"));
    assert!(sync
        .send_local_position(entity(102.0, 500.0, 1_040), 1_040)
        .expect("interval elapsed"));
    settle().await;

    let positions = parse_sent(&sent)
        .iter()
        .filter(|m| matches!(m, PeerMessage::PlayerPosition { .. }))
        .count();
    assert_eq!(positions, 2);
    sync.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Match clock
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn authority_announces_result_when_the_clock_expires() {
    let (mut sync, mut events, sent, _closed) = start_dispatcher(
        PlayerSide::PlayerOne,
        vec![Some(Ok(game_started_json(1)))],
    );
    settle().await;
    sync.pump(10_000);
    drain(&mut events);

    // One simulated second later the clock hits zero.
    sync.pump(11_000);

    let evs = drain(&mut events);
    assert!(evs.iter().any(|e| matches!(e, SyncEvent::MatchEnded { .. })), "{evs:?}");
    settle().await;
    assert!(parse_sent(&sent)
        .iter()
        .any(|m| matches!(m, PeerMessage::GameEnded(_))));
    sync.shutdown().await;
}

#[tokio::test]
async fn mirror_waits_for_the_authoritative_result() {
    let (mut sync, mut events, sent, _closed) = start_dispatcher(
        PlayerSide::PlayerTwo,
        vec![Some(Ok(game_started_json(1)))],
    );
    settle().await;
    sync.pump(10_000);
    drain(&mut events);
    sync.pump(11_000);

    // The clock froze locally but no result event fires until the payload
    // arrives.
    assert_eq!(sync.time_remaining(), 0);
    let evs = drain(&mut events);
    assert!(!evs.iter().any(|e| matches!(e, SyncEvent::MatchEnded { .. })));
    settle().await;
    assert!(!parse_sent(&sent)
        .iter()
        .any(|m| matches!(m, PeerMessage::GameEnded(_))));
    sync.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Disconnection and reconnection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn transport_error_pauses_and_schedules_reconnect() {
    let (mut sync, mut events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerOne,
        vec![
            Some(Ok(game_started_json(120))),
            Some(Err(SyncError::TransportReceive("reset by peer".into()))),
        ],
    );
    settle().await;
    sync.pump(1_000);

    let evs = drain(&mut events);
    assert!(evs
        .iter()
        .any(|e| matches!(e, SyncEvent::Disconnected { reason: Some(_) })));
    assert!(!sync.is_connected());
    assert!(matches!(sync.mark_ready(), Err(SyncError::NotConnected)));

    // The first backoff deadline (1 s) elapses.
    sync.pump(2_100);
    let evs = drain(&mut events);
    assert!(evs
        .iter()
        .any(|e| matches!(e, SyncEvent::ReconnectDue { attempt: 0 })));
    sync.shutdown().await;
}

#[tokio::test]
async fn backoff_doubles_and_eventually_gives_up() {
    let (transport, _sent, _closed) =
        MockTransport::new(vec![Some(Err(SyncError::TransportClosed))]);
    let config = SyncConfig::new("conn-local", "conn-remote")
        .with_assigned_side(PlayerSide::PlayerOne)
        .with_reconnect_policy(1_000, 2);
    let (mut sync, mut events) =
        SyncDispatcher::start(transport, config).expect("dispatcher start");
    settle().await;

    sync.pump(0);
    sync.pump(1_000);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::ReconnectDue { attempt: 0 })));

    sync.reconnect_attempt_failed(1_000);
    sync.pump(3_000); // 1_000 + doubled 2_000
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::ReconnectDue { attempt: 1 })));

    sync.reconnect_attempt_failed(3_000);
    sync.pump(3_001);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::ReconnectFailed)));
    sync.shutdown().await;
}

#[tokio::test]
async fn reattach_restores_the_link_and_discards_history() {
    let (mut sync, mut events, _sent, _closed) = start_dispatcher(
        PlayerSide::PlayerTwo,
        vec![
            Some(Ok(game_started_json(120))),
            Some(Ok(ball_state_json(100.0, 300.0, 1_000))),
            Some(Err(SyncError::TransportClosed)),
        ],
    );
    settle().await;
    sync.pump(1_000);
    drain(&mut events);
    assert!(!sync.is_connected());

    let (fresh, sent2, _closed2) = MockTransport::new(vec![]);
    sync.reattach(fresh);
    settle().await;
    sync.pump(2_000);

    assert!(sync.is_connected());
    // Pre-gap samples are gone until the peer re-seeds them.
    assert!(sync.ball(2_000).is_none());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::Connected)));

    sync.request_rematch().expect("send over the new transport");
    settle().await;
    assert!(!sent2.lock().unwrap().is_empty());
    sync.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Rematch
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn rematch_confirmation_resets_for_a_fresh_match() {
    let (mut sync, mut events, sent, _closed) = start_dispatcher(
        PlayerSide::PlayerTwo,
        vec![
            Some(Ok(game_started_json(120))),
            Some(Ok(goal_json(PlayerSide::PlayerOne))),
            Some(Ok(serde_json::to_string(&PeerMessage::RematchRequest).unwrap())),
        ],
    );
    settle().await;
    sync.pump(1_000);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::RematchRequested)));
    assert_eq!(sync.score(), Score { player1: 1, player2: 0 });

    sync.confirm_rematch().expect("confirm");
    settle().await;

    assert_eq!(sync.score(), Score { player1: 0, player2: 0 });
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::RematchConfirmed)));
    assert!(parse_sent(&sent)
        .iter()
        .any(|m| matches!(m, PeerMessage::RematchConfirmed)));
    sync.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shutdown_closes_the_transport() {
    let (mut sync, _events, _sent, closed) =
        start_dispatcher(PlayerSide::PlayerOne, vec![]);
    settle().await;
    sync.shutdown().await;
    assert!(closed.load(std::sync::atomic::Ordering::Relaxed));
    assert!(!sync.is_connected());
}
