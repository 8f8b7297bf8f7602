#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for the peer match protocol.
//!
//! The two game clients already speak this JSON dialect, so the tests pin
//! the exact tag spellings and payload field names rather than merely
//! round-tripping: a rename that still round-trips in Rust would silently
//! break interop.

use goalline_sync::protocol::{
    BallSnapshot, EntityState, Facing, GameEndedPayload, GameSnapshot, PeerMessage, PlayerSide,
    PlayersSnapshot, Score,
};
use serde_json::{json, Value};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn to_value(msg: &PeerMessage) -> Value {
    serde_json::to_value(msg).expect("serialize")
}

fn sample_entity() -> EntityState {
    EntityState {
        x: 120.5,
        y: 480.0,
        velocity_x: -3.5,
        velocity_y: 0.0,
        rotation: None,
        direction: Facing::Left,
        is_on_ground: true,
        timestamp: 1_700_000_000_000,
    }
}

fn sample_ball() -> BallSnapshot {
    BallSnapshot {
        x: 640.0,
        y: 200.0,
        velocity_x: 12.0,
        velocity_y: -4.5,
        timestamp: 1_700_000_000_050,
    }
}

// ════════════════════════════════════════════════════════════════════
// Tag spellings
// ════════════════════════════════════════════════════════════════════

#[test]
fn message_tags_are_kebab_case() {
    let cases = [
        (
            PeerMessage::PlayerReady {
                player_position: PlayerSide::PlayerOne,
            },
            "player-ready",
        ),
        (
            PeerMessage::AllPlayersReady {
                ready_players: vec![],
            },
            "all-players-ready",
        ),
        (
            PeerMessage::GameStarted { match_duration: 120 },
            "game-started",
        ),
        (
            PeerMessage::PlayerPosition {
                position: PlayerSide::PlayerTwo,
                player: sample_entity(),
            },
            "player-position",
        ),
        (
            PeerMessage::BallState { ball: sample_ball() },
            "ball-state",
        ),
        (PeerMessage::MoveLeft { pressed: true }, "move-left"),
        (PeerMessage::MoveRight { pressed: false }, "move-right"),
        (PeerMessage::Jump { pressed: true }, "jump"),
        (PeerMessage::Kick { pressed: true }, "kick"),
        (
            PeerMessage::GoalScored {
                scorer: PlayerSide::PlayerOne,
            },
            "goal-scored",
        ),
        (PeerMessage::RematchRequest, "rematch-request"),
        (PeerMessage::RematchConfirmed, "rematch-confirmed"),
        (PeerMessage::RematchDeclined, "rematch-declined"),
    ];
    for (msg, tag) in cases {
        assert_eq!(to_value(&msg)["type"], tag, "{msg:?}");
    }
}

// ════════════════════════════════════════════════════════════════════
// Payload shapes
// ════════════════════════════════════════════════════════════════════

#[test]
fn player_ready_wire_shape() {
    let msg = PeerMessage::PlayerReady {
        player_position: PlayerSide::PlayerTwo,
    };
    assert_eq!(
        to_value(&msg),
        json!({"type": "player-ready", "data": {"playerPosition": "player2"}})
    );
}

#[test]
fn all_players_ready_wire_shape() {
    let msg = PeerMessage::AllPlayersReady {
        ready_players: vec![PlayerSide::PlayerOne, PlayerSide::PlayerTwo],
    };
    assert_eq!(
        to_value(&msg),
        json!({"type": "all-players-ready", "data": {"readyPlayers": ["player1", "player2"]}})
    );
}

#[test]
fn game_started_wire_shape() {
    let msg = PeerMessage::GameStarted { match_duration: 90 };
    assert_eq!(
        to_value(&msg),
        json!({"type": "game-started", "data": {"matchDuration": 90}})
    );
}

#[test]
fn player_position_payload_is_camel_case() {
    let msg = PeerMessage::PlayerPosition {
        position: PlayerSide::PlayerOne,
        player: sample_entity(),
    };
    let data = &to_value(&msg)["data"];
    assert_eq!(data["position"], "player1");
    let player = &data["player"];
    assert_eq!(player["velocityX"], -3.5);
    assert_eq!(player["isOnGround"], true);
    assert_eq!(player["direction"], "left");
    // Players never rotate; the field is omitted rather than null.
    assert!(player.get("rotation").is_none());
}

#[test]
fn ball_state_wire_shape() {
    let msg = PeerMessage::BallState { ball: sample_ball() };
    assert_eq!(
        to_value(&msg),
        json!({
            "type": "ball-state",
            "data": {
                "ball": {
                    "x": 640.0,
                    "y": 200.0,
                    "velocityX": 12.0,
                    "velocityY": -4.5,
                    "timestamp": 1_700_000_000_050_u64
                }
            }
        })
    );
}

#[test]
fn input_edge_wire_shape() {
    let msg = PeerMessage::Jump { pressed: true };
    assert_eq!(to_value(&msg), json!({"type": "jump", "data": {"pressed": true}}));
}

#[test]
fn unit_messages_carry_no_data_key() {
    let val = to_value(&PeerMessage::RematchRequest);
    assert!(val.get("data").is_none(), "{val}");
}

#[test]
fn game_ended_wire_shape() {
    let msg = PeerMessage::GameEnded(GameEndedPayload {
        final_score: Score {
            player1: 3,
            player2: 1,
        },
        winner: Some(PlayerSide::PlayerOne),
        reason: "time".into(),
        duration: 120,
    });
    assert_eq!(
        to_value(&msg),
        json!({
            "type": "game-ended",
            "data": {
                "finalScore": {"player1": 3, "player2": 1},
                "winner": "player1",
                "reason": "time",
                "duration": 120
            }
        })
    );
}

#[test]
fn game_ended_draw_omits_winner() {
    let msg = PeerMessage::GameEnded(GameEndedPayload {
        final_score: Score {
            player1: 2,
            player2: 2,
        },
        winner: None,
        reason: "time".into(),
        duration: 120,
    });
    assert!(to_value(&msg)["data"].get("winner").is_none());
}

#[test]
fn game_state_snapshot_wire_shape() {
    let msg = PeerMessage::GameState(Box::new(GameSnapshot {
        ball: sample_ball(),
        players: PlayersSnapshot {
            player1: sample_entity(),
            player2: sample_entity(),
        },
        score: Score {
            player1: 1,
            player2: 0,
        },
        time_remaining: 87,
        game_ended: false,
    }));
    let data = &to_value(&msg)["data"];
    assert_eq!(data["timeRemaining"], 87);
    assert_eq!(data["gameEnded"], false);
    assert_eq!(data["score"]["player1"], 1);
    assert_eq!(data["players"]["player1"]["x"], 120.5);
}

// ════════════════════════════════════════════════════════════════════
// Inbound tolerance
// ════════════════════════════════════════════════════════════════════

#[test]
fn entity_state_rotation_and_direction_are_optional_inbound() {
    // Player frames from the other client omit rotation and may omit
    // direction entirely.
    let raw = json!({
        "type": "player-position",
        "data": {
            "position": "player2",
            "player": {
                "x": 900.0,
                "y": 500.0,
                "velocityX": 0.0,
                "velocityY": 0.0,
                "isOnGround": true,
                "timestamp": 5_000
            }
        }
    });
    let msg: PeerMessage = serde_json::from_value(raw).expect("deserialize");
    if let PeerMessage::PlayerPosition { player, .. } = msg {
        assert_eq!(player.rotation, None);
        assert_eq!(player.direction, Facing::Idle);
    } else {
        panic!("expected PlayerPosition");
    }
}

#[test]
fn ball_rotation_survives_a_round_trip() {
    let mut entity: EntityState = sample_ball().into();
    entity.rotation = Some(0.5);
    let json = serde_json::to_string(&entity).expect("serialize");
    assert!(json.contains("\"rotation\":0.5"));
    let back: EntityState = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.rotation, Some(0.5));
}

#[test]
fn unknown_message_type_is_an_error_not_a_panic() {
    let raw = r#"{"type":"chat-message","data":{"text":"gg"}}"#;
    let parsed = serde_json::from_str::<PeerMessage>(raw);
    assert!(parsed.is_err());
}

#[test]
fn malformed_payload_is_an_error() {
    // Right tag, wrong payload shape.
    let raw = r#"{"type":"game-started","data":{"matchDuration":"soon"}}"#;
    assert!(serde_json::from_str::<PeerMessage>(raw).is_err());
}

// ════════════════════════════════════════════════════════════════════
// Value helpers
// ════════════════════════════════════════════════════════════════════

#[test]
fn score_indexes_by_side() {
    let mut score = Score::default();
    score.increment(PlayerSide::PlayerTwo);
    score.increment(PlayerSide::PlayerTwo);
    score.increment(PlayerSide::PlayerOne);
    assert_eq!(score.of(PlayerSide::PlayerOne), 1);
    assert_eq!(score.of(PlayerSide::PlayerTwo), 2);
}

#[test]
fn sides_serialize_as_player_numbers() {
    assert_eq!(
        serde_json::to_value(PlayerSide::PlayerOne).expect("serialize"),
        json!("player1")
    );
    assert_eq!(PlayerSide::PlayerOne.other(), PlayerSide::PlayerTwo);
}
