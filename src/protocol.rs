//! Wire-compatible protocol types for Kingdoms room connections.
//!
//! Every frame is a JSON object tagged by its `at` field. The shapes here match
//! the room server's message definitions exactly, including its wire names for
//! cell types (`hide`, `block`) and the `player` field that carries a cell's
//! owner.

use serde::{Deserialize, Serialize};

use crate::board::{Cursor, CursorMove, GameMap};
use crate::error::Result;

// ── Type aliases ────────────────────────────────────────────────────

/// Identifier of a user (and of the player they control).
pub type UserId = i64;

/// Index into the fixed color [`PALETTE`](crate::config::PALETTE).
pub type ColorIndex = u8;

// ── Players ─────────────────────────────────────────────────────────

/// Lobby and game status of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    #[default]
    #[serde(alias = "not-ready")]
    NotReady,
    Ready,
    Win,
    Lose,
    /// The player left a running game.
    Stop,
}

/// A player in the room roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: UserId,
    pub username: String,
    pub color: ColorIndex,
    #[serde(default)]
    pub status: PlayerStatus,
}

/// Player half of the per-player statistics pair in `update` messages.
pub type PlayerData = Player;

/// Territory statistics for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameStat {
    pub fields: u32,
    pub power: u32,
}

// ── Payload structs ─────────────────────────────────────────────────

/// A chat line as it travels over the wire, in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user_id: UserId,
    pub message: String,
    pub username: String,
    /// ISO 8601 timestamp stamped by the sending client.
    pub timestamp: String,
}

/// Payload of the `update` server message.
/// Boxed in `ServerMessage` to reduce enum size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub map: GameMap,
    pub turn: u32,
    pub stat: (PlayerData, GameStat),
    /// Cursor the server will execute the next step from; absent when the
    /// player has no active path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    /// Source cell of the step executed this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<Cursor>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bearer token; must be the first frame on every connection.
    Auth { token: String },
    /// Pick a lobby color.
    Color { color: ColorIndex },
    /// Mark the player as ready to start.
    Ready,
    /// Jump the server-side cursor to a cell.
    Cursor { cursor: Cursor },
    /// Queue one step of the attack path. Both fields absent resets the path.
    Move {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<Cursor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<Cursor>,
    },
    /// Send a chat line to the room.
    Chat(ChatMessage),
}

impl From<CursorMove> for ClientMessage {
    fn from(step: CursorMove) -> Self {
        Self::Move {
            previous: step.previous,
            current: step.current,
        }
    }
}

/// Message types sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake acknowledged.
    Auth {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<bool>,
    },
    /// Full roster broadcast.
    Players { players: Vec<Player> },
    /// The game has started.
    Start,
    /// Per-turn board snapshot (boxed to reduce enum size).
    Update(Box<UpdatePayload>),
    /// A chat line broadcast to the room, including the sender's own.
    Chat(ChatMessage),
}

// ── Codec ───────────────────────────────────────────────────────────

/// Serialize a client message into a text frame.
///
/// # Errors
///
/// Returns [`KingdomsError::Serialization`](crate::KingdomsError::Serialization)
/// if the message cannot be encoded.
pub fn encode(message: &ClientMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Parse a text frame into a server message.
///
/// # Errors
///
/// Returns [`KingdomsError::Serialization`](crate::KingdomsError::Serialization)
/// for malformed JSON, an unknown `at` tag, or an invalid map.
pub fn decode(frame: &str) -> Result<ServerMessage> {
    Ok(serde_json::from_str(frame)?)
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
    use serde_json::json;

    #[test]
    fn ready_is_a_bare_tag() {
        let value: serde_json::Value =
            serde_json::from_str(&encode(&ClientMessage::Ready).unwrap()).unwrap();
        assert_eq!(value, json!({ "at": "ready" }));
    }

    #[test]
    fn reset_move_omits_both_cursors() {
        let value: serde_json::Value =
            serde_json::from_str(&encode(&CursorMove::reset().into()).unwrap()).unwrap();
        assert_eq!(value, json!({ "at": "move" }));
    }

    #[test]
    fn chat_is_flattened_under_the_tag() {
        let msg = ClientMessage::Chat(ChatMessage {
            user_id: 4,
            message: "hi".into(),
            username: "ann".into(),
            timestamp: "2026-01-01T00:00:00.000Z".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "at": "chat",
                "user_id": 4,
                "message": "hi",
                "username": "ann",
                "timestamp": "2026-01-01T00:00:00.000Z"
            })
        );
    }

    #[test]
    fn auth_ack_with_status() {
        let msg = decode(r#"{"at":"auth","status":true}"#).unwrap();
        assert_eq!(msg, ServerMessage::Auth { status: Some(true) });
        let msg = decode(r#"{"at":"auth"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Auth { status: None });
    }

    #[test]
    fn update_without_cursors() {
        let frame = json!({
            "at": "update",
            "map": [[{"type": "field"}]],
            "turn": 3,
            "stat": [
                {"id": 1, "username": "ann", "color": 0, "status": "ready"},
                {"fields": 1, "power": 2}
            ]
        })
        .to_string();
        let ServerMessage::Update(update) = decode(&frame).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(update.turn, 3);
        assert!(update.cursor.is_none());
        assert!(update.prev_cursor.is_none());
        assert_eq!(update.stat.1, GameStat { fields: 1, power: 2 });
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert!(decode(r#"{"at":"teleport"}"#).is_err());
    }

    #[test]
    fn ragged_update_map_is_an_error() {
        let frame = json!({
            "at": "update",
            "map": [[{"type": "field"}], []],
            "turn": 1,
            "stat": [
                {"id": 1, "username": "ann", "color": 0, "status": "ready"},
                {"fields": 1, "power": 2}
            ]
        })
        .to_string();
        assert!(decode(&frame).is_err());
    }
}
