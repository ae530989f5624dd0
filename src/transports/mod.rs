//! Transport implementations for room connections.
//!
//! This module provides concrete [`Transport`](crate::Transport) and
//! [`Connector`](crate::Connector) implementations behind feature gates:
//!
//! | Feature                | Connector              | Transport              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketConnector`] | [`WebSocketTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), kingdoms_room_client::KingdomsError> {
//! use kingdoms_room_client::{Connector, Incoming, Transport, WebSocketConnector};
//!
//! let mut ws = WebSocketConnector::new()
//!     .connect("ws://localhost:8000/ws/rooms/abc/?user_id=1&username=ann")
//!     .await?;
//! ws.send(r#"{"at":"auth","token":"..."}"#.to_string()).await?;
//!
//! if let Incoming::Text(frame) = ws.recv().await? {
//!     println!("server said: {frame}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
