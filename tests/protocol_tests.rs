#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Protocol serialization tests for the Kingdoms room client.
//!
//! Every outbound message is checked against the exact JSON the room server
//! expects, and inbound fixtures mirror frames the server really sends.

use kingdoms_room_client::board::{Cell, CellType, Cursor, CursorMove, GameMap};
use kingdoms_room_client::protocol::{
    decode, encode, ChatMessage, ClientMessage, GameStat, Player, PlayerStatus, ServerMessage,
};
use serde_json::{json, Value};

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

fn wire(message: &ClientMessage) -> Value {
    serde_json::from_str(&encode(message).expect("encode")).expect("valid json")
}

// ════════════════════════════════════════════════════════════════════
// Outbound shapes
// ════════════════════════════════════════════════════════════════════

#[test]
fn auth_shape() {
    let msg = ClientMessage::Auth {
        token: "eyJhbGciOi".into(),
    };
    assert_eq!(wire(&msg), json!({"at": "auth", "token": "eyJhbGciOi"}));
}

#[test]
fn color_shape() {
    assert_eq!(
        wire(&ClientMessage::Color { color: 3 }),
        json!({"at": "color", "color": 3})
    );
}

#[test]
fn ready_shape() {
    assert_eq!(wire(&ClientMessage::Ready), json!({"at": "ready"}));
}

#[test]
fn cursor_shape() {
    let msg = ClientMessage::Cursor {
        cursor: Cursor::new(4, 7),
    };
    assert_eq!(
        wire(&msg),
        json!({"at": "cursor", "cursor": {"row": 4, "col": 7}})
    );
}

#[test]
fn move_shape() {
    let msg: ClientMessage = CursorMove::step(Cursor::new(2, 2), Cursor::new(2, 3)).into();
    assert_eq!(
        wire(&msg),
        json!({
            "at": "move",
            "previous": {"row": 2, "col": 2},
            "current": {"row": 2, "col": 3}
        })
    );
}

#[test]
fn reset_move_shape() {
    let msg: ClientMessage = CursorMove::reset().into();
    assert_eq!(wire(&msg), json!({"at": "move"}));
}

#[test]
fn chat_shape() {
    let msg = ClientMessage::Chat(ChatMessage {
        user_id: 12,
        message: "gl hf".into(),
        username: "ann".into(),
        timestamp: "2026-05-01T10:00:00.000Z".into(),
    });
    assert_eq!(
        wire(&msg),
        json!({
            "at": "chat",
            "user_id": 12,
            "message": "gl hf",
            "username": "ann",
            "timestamp": "2026-05-01T10:00:00.000Z"
        })
    );
}

// ════════════════════════════════════════════════════════════════════
// Inbound fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn server_auth_confirm() {
    assert_eq!(
        decode(r#"{"at": "auth", "status": true}"#).unwrap(),
        ServerMessage::Auth { status: Some(true) }
    );
}

#[test]
fn server_players() {
    let frame = json!({
        "at": "players",
        "players": [
            {"id": 1, "username": "ann", "color": 0, "status": "not_ready"},
            {"id": 2, "username": "bob", "color": 4, "status": "ready"},
            {"id": 3, "username": "cid", "color": 2, "status": "not-ready"}
        ]
    });
    let ServerMessage::Players { players } = decode(&frame.to_string()).unwrap() else {
        panic!("expected players");
    };
    assert_eq!(players.len(), 3);
    assert_eq!(
        players[1],
        Player {
            id: 2,
            username: "bob".into(),
            color: 4,
            status: PlayerStatus::Ready,
        }
    );
    assert_eq!(players[2].status, PlayerStatus::NotReady);
}

#[test]
fn player_status_wire_names() {
    for (raw, status) in [
        ("not_ready", PlayerStatus::NotReady),
        ("ready", PlayerStatus::Ready),
        ("win", PlayerStatus::Win),
        ("lose", PlayerStatus::Lose),
        ("stop", PlayerStatus::Stop),
    ] {
        let parsed: PlayerStatus = serde_json::from_value(json!(raw)).unwrap();
        assert_eq!(parsed, status);
        assert_eq!(serde_json::to_value(status).unwrap(), json!(raw));
    }
}

#[test]
fn server_start() {
    assert_eq!(decode(r#"{"at":"start"}"#).unwrap(), ServerMessage::Start);
}

#[test]
fn server_update_with_fog_and_cursors() {
    let frame = json!({
        "at": "update",
        "map": [
            [{"type": "king", "player": 1, "power": 11}, {"type": "field", "player": 1, "power": 2}, {}],
            [{"type": "block"}, {"type": "castle", "power": 40}, {"type": "hide"}],
            [{"type": "spawn"}, {"type": "field"}, {"type": "field", "player": 2, "power": 6}]
        ],
        "turn": 17,
        "stat": [
            {"id": 1, "username": "ann", "color": 0, "status": "ready"},
            {"fields": 2, "power": 13}
        ],
        "cursor": {"row": 0, "col": 1},
        "prev_cursor": {"row": 0, "col": 0}
    });
    let ServerMessage::Update(update) = decode(&frame.to_string()).unwrap() else {
        panic!("expected update");
    };

    assert_eq!(update.turn, 17);
    assert_eq!((update.map.height(), update.map.width()), (3, 3));
    assert_eq!(update.cursor, Some(Cursor::new(0, 1)));
    assert_eq!(update.prev_cursor, Some(Cursor::new(0, 0)));
    assert_eq!(update.stat.1, GameStat { fields: 2, power: 13 });

    let map = &update.map;
    assert!(map.get(Cursor::new(0, 0)).unwrap().is_owned_by(1));
    assert_eq!(map.get(Cursor::new(0, 2)).unwrap().kind, CellType::Hidden);
    assert_eq!(map.get(Cursor::new(1, 0)).unwrap().kind, CellType::Blocker);
    assert_eq!(map.get(Cursor::new(1, 1)).unwrap().strength(), 40);
    assert_eq!(map.get(Cursor::new(2, 0)).unwrap().kind, CellType::Spawn);
    assert!(!map.get(Cursor::new(2, 2)).unwrap().is_owned_by(1));
}

#[test]
fn server_chat() {
    let frame = r#"{"at":"chat","user_id":2,"message":"hi","username":"bob","timestamp":"2026-05-01T10:00:00.000Z"}"#;
    let ServerMessage::Chat(chat) = decode(frame).unwrap() else {
        panic!("expected chat");
    };
    assert_eq!(chat.user_id, 2);
    assert_eq!(chat.message, "hi");
}

// ════════════════════════════════════════════════════════════════════
// Data model on the wire
// ════════════════════════════════════════════════════════════════════

#[test]
fn cell_wire_names() {
    for (raw, kind) in [
        ("spawn", CellType::Spawn),
        ("hide", CellType::Hidden),
        ("king", CellType::King),
        ("block", CellType::Blocker),
        ("field", CellType::Field),
        ("castle", CellType::Castle),
    ] {
        let parsed: CellType = serde_json::from_value(json!(raw)).unwrap();
        assert_eq!(parsed, kind);
        assert_eq!(serde_json::to_value(kind).unwrap(), json!(raw));
    }
}

#[test]
fn cell_owner_is_player_on_the_wire() {
    let cell = Cell::new(CellType::Field).with_owner(9).with_power(3);
    assert_eq!(
        serde_json::to_value(&cell).unwrap(),
        json!({"type": "field", "power": 3, "player": 9})
    );
}

#[test]
fn blocker_owner_is_dropped_on_decode() {
    let map: GameMap =
        serde_json::from_value(json!([[{"type": "block", "player": 4, "power": 1}]])).unwrap();
    let cell = map.get(Cursor::new(0, 0)).unwrap();
    assert_eq!(cell.owner, None);
    assert_eq!(cell.power, None);
}

#[test]
fn empty_map_is_valid() {
    let map: GameMap = serde_json::from_value(json!([])).unwrap();
    assert_eq!((map.height(), map.width()), (0, 0));
    assert!(!map.contains(Cursor::new(0, 0)));
}

// ════════════════════════════════════════════════════════════════════
// Rejections
// ════════════════════════════════════════════════════════════════════

#[test]
fn malformed_frames_are_errors() {
    for frame in [
        "",
        "{}",
        r#"{"at": 5}"#,
        r#"{"at": "players"}"#,
        r#"{"at": "update", "map": [[{}], [{}, {}]], "turn": 1, "stat": []}"#,
        r#"{"at": "chat", "user_id": "two"}"#,
        r#"{"at": "auth", "status": "yes"}"#,
    ] {
        assert!(decode(frame).is_err(), "{frame:?} should not decode");
    }
}

#[test]
fn unknown_cell_type_is_an_error() {
    let frame = json!({
        "at": "update",
        "map": [[{"type": "lava"}]],
        "turn": 1,
        "stat": [{"id": 1, "username": "ann", "color": 0}, {"fields": 0, "power": 0}]
    });
    assert!(decode(&frame.to_string()).is_err());
}
