//! # Kingdoms Room Client
//!
//! Async client for one room of the Kingdoms territory game.
//!
//! The client keeps a local view of the room (roster, lobby colors, the
//! board, the chat log) in sync with the authoritative server over a single
//! JSON connection, and lets the player plan multi-step attack paths that
//! the server executes one step per turn.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Connector`] and [`Transport`] for any backend
//! - **Wire-compatible**: protocol types match the room server's messages exactly
//! - **WebSocket built-in**: the default `transport-websocket` feature provides [`WebSocketConnector`]
//! - **Bounded reconnection**: transient closes are retried, everything else fails with an [`ErrorCategory`]
//! - **Observable**: every state slice is a `tokio::sync::watch` channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kingdoms_room_client::{
//!     Identity, InputEvent, RoomClient, RoomConfig, Session, StaticToken, WebSocketConnector,
//! };
//!
//! let session = Session::new(Identity::new(7, "ann"), StaticToken::new(token));
//! let config = RoomConfig::new("wss://play.example.com");
//! let mut client = RoomClient::open(WebSocketConnector::new(), &config, session, "room-42");
//!
//! let (keys, mut input) = tokio::sync::mpsc::unbounded_channel::<InputEvent>();
//! let phase = client.run(&mut input).await;
//! println!("room ended in phase {phase}");
//! ```

pub mod board;
pub mod chat;
pub mod client;
pub mod close_codes;
pub mod config;
pub mod connection;
pub mod error;
pub mod input;
pub mod moves;
pub mod protocol;
pub mod room;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use board::{Cell, CellType, Cursor, CursorMove, Direction, GameMap};
pub use chat::{ChatChannel, ChatLine, ChatLog};
pub use client::RoomClient;
pub use close_codes::{ErrorCategory, ErrorClass};
pub use config::{RoomConfig, PALETTE};
pub use connection::{ConnectionEvent, ConnectionManager, MessageSink, RoomSender};
pub use error::{KingdomsError, Result};
pub use input::{InputEvent, InputSource};
pub use moves::{DirectionQueue, MoveQueueController};
pub use protocol::{ClientMessage, ServerMessage};
pub use room::{Applied, BoardSnapshot, Phase, RoomStateMachine, Roster};
pub use session::{Identity, Session, StaticToken, TokenProvider};
pub use transport::{Connector, Incoming, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
