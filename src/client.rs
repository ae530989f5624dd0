//! High-level room client.
//!
//! [`RoomClient`] wires one [`ConnectionManager`] to a [`RoomStateMachine`],
//! a [`MoveQueueController`] and a [`ChatChannel`]. Connection events are fed
//! to the state machine in arrival order; every board update is then
//! reconciled against the planned path. Lobby intents (`color`, `ready`) are
//! validated locally before they reach the network.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = Session::new(Identity::new(7, "ann"), StaticToken::new(token));
//! let config = RoomConfig::from_env()?;
//! let mut client = RoomClient::open(WebSocketConnector::new(), &config, session, "room-42");
//!
//! let mut phase = client.subscribe_phase();
//! tokio::spawn(async move {
//!     while phase.changed().await.is_ok() {
//!         println!("room is now {}", *phase.borrow());
//!     }
//! });
//!
//! let (keys, mut input) = tokio::sync::mpsc::unbounded_channel();
//! keys.send(InputEvent::Arrow(Direction::Up))?;
//! let final_phase = client.run(&mut input).await;
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::board::{Cursor, Direction};
use crate::chat::{ChatChannel, ChatLine, ChatLog, READY_ANNOUNCEMENT};
use crate::config::{RoomConfig, PALETTE};
use crate::connection::{ConnectionEvent, ConnectionManager, MessageSink, RoomSender};
use crate::error::{KingdomsError, Result};
use crate::input::{InputEvent, InputSource};
use crate::moves::{DirectionQueue, MoveQueueController};
use crate::protocol::{ChatMessage, ClientMessage, ColorIndex};
use crate::room::{Applied, BoardSnapshot, Phase, RoomStateMachine, Roster};
use crate::session::{Identity, Session};
use crate::transport::Connector;

/// One room session.
///
/// Dropping the client aborts the connection task. Call
/// [`close`](Self::close) for a graceful shutdown.
pub struct RoomClient {
    room_id: String,
    identity: Identity,
    connection: ConnectionManager,
    events: mpsc::Receiver<ConnectionEvent>,
    room: RoomStateMachine,
    moves: MoveQueueController<RoomSender>,
    chat: ChatChannel<RoomSender>,
}

/// What woke the event loop.
enum Wakeup {
    Connection(Option<ConnectionEvent>),
    Input(Option<InputEvent>),
}

impl RoomClient {
    /// Connect to `room_id` and start the connection task.
    ///
    /// Must be called within a tokio runtime.
    pub fn open<C: Connector>(
        connector: C,
        config: &RoomConfig,
        session: Session,
        room_id: impl Into<String>,
    ) -> Self {
        let room_id = room_id.into();
        let identity = session.identity().clone();
        info!(room = %room_id, user_id = identity.user_id, "opening room");

        let (connection, events) = ConnectionManager::open(connector, config, session, &room_id);
        let sender = connection.sender();
        Self {
            room_id,
            moves: MoveQueueController::new(sender.clone(), identity.user_id),
            chat: ChatChannel::new(sender, identity.clone()),
            identity,
            connection,
            events,
            room: RoomStateMachine::new(),
        }
    }

    // ── Event processing ────────────────────────────────────────────

    /// Wait for the next connection event and apply it.
    ///
    /// Returns `None` once the connection task has finished.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        let event = self.events.recv().await?;
        self.process(&event);
        Some(event)
    }

    /// Apply a connection event to the room and the move queue.
    ///
    /// A new board is reconciled against the planned path before it is
    /// published, so board subscribers always see the matching queue.
    pub fn process(&mut self, event: &ConnectionEvent) -> Applied {
        let moves = &mut self.moves;
        self.room.handle_then(event, |snapshot| {
            moves.reconcile(Arc::clone(snapshot));
        })
    }

    /// Drive the room until the connection ends, feeding player input to the
    /// move queue. Returns the final phase.
    ///
    /// Rejected input is logged and otherwise ignored. An exhausted input
    /// source stops being polled; the loop keeps serving the connection.
    pub async fn run<I: InputSource>(&mut self, input: &mut I) -> Phase {
        let mut input_open = true;
        loop {
            let wakeup = tokio::select! {
                event = self.events.recv() => Wakeup::Connection(event),
                next = input.next_event(), if input_open => Wakeup::Input(next),
            };

            match wakeup {
                Wakeup::Connection(Some(event)) => {
                    self.process(&event);
                    if matches!(event, ConnectionEvent::Failed(_) | ConnectionEvent::Closed) {
                        break;
                    }
                }
                Wakeup::Connection(None) => break,
                Wakeup::Input(Some(event)) => {
                    if let Err(e) = self.handle_input(event) {
                        debug!(?event, "input rejected: {e}");
                    }
                }
                Wakeup::Input(None) => {
                    debug!("input source exhausted");
                    input_open = false;
                }
            }
        }
        self.room.phase()
    }

    // ── Intents ─────────────────────────────────────────────────────

    /// Forward a board input event to the move queue.
    ///
    /// # Errors
    ///
    /// See [`MoveQueueController::handle_input`].
    pub fn handle_input(&self, event: InputEvent) -> Result<()> {
        self.moves.handle_input(event)
    }

    /// Move the cursor one cell; see [`MoveQueueController::step`].
    ///
    /// # Errors
    ///
    /// See [`MoveQueueController::step`].
    pub fn step(&self, direction: Direction) -> Result<()> {
        self.moves.step(direction).map(|_| ())
    }

    /// Drop the planned path; see [`MoveQueueController::cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::NotConnected`] if the reset could not be sent.
    pub fn cancel(&self) -> Result<()> {
        self.moves.cancel()
    }

    /// Pick a lobby color.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::UnknownColor`] for an index outside the
    /// palette and [`KingdomsError::ColorTaken`] for a color someone in the
    /// roster holds. Neither sends anything.
    pub fn select_color(&self, color: ColorIndex) -> Result<()> {
        if usize::from(color) >= PALETTE.len() {
            debug!(color, "unknown color rejected");
            return Err(KingdomsError::UnknownColor(color));
        }
        if self.room.roster().color_taken(color) {
            debug!(color, "taken color rejected");
            return Err(KingdomsError::ColorTaken(color));
        }
        self.connection.send(ClientMessage::Color { color })
    }

    /// Mark the player as ready.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::NotConnected`] before the handshake completes.
    pub fn ready(&self) -> Result<()> {
        self.connection.send(ClientMessage::Ready)
    }

    /// Tell the room in chat that the player is ready. Independent of
    /// [`ready`](Self::ready).
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::NotConnected`] before the handshake completes.
    pub fn announce_ready(&self) -> Result<ChatMessage> {
        self.chat.send(READY_ANNOUNCEMENT)
    }

    /// Send a chat line.
    ///
    /// # Errors
    ///
    /// See [`ChatChannel::send`].
    pub fn send_chat(&self, text: &str) -> Result<ChatMessage> {
        self.chat.send(text)
    }

    /// Close the connection. The room keeps its last state.
    pub async fn close(&mut self) {
        self.connection.close().await;
        while let Ok(event) = self.events.try_recv() {
            self.process(&event);
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn phase(&self) -> Phase {
        self.room.phase()
    }

    pub fn roster(&self) -> Arc<Roster> {
        self.room.roster()
    }

    pub fn board(&self) -> Option<Arc<BoardSnapshot>> {
        self.room.board()
    }

    pub fn chat_lines(&self) -> Vec<ChatLine> {
        self.room.chat_lines()
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.moves.cursor()
    }

    pub fn queue(&self) -> DirectionQueue {
        self.moves.queue()
    }

    pub fn is_authenticated(&self) -> bool {
        self.connection.is_authenticated()
    }

    pub fn room(&self) -> &RoomStateMachine {
        &self.room
    }

    pub fn moves(&self) -> &MoveQueueController<RoomSender> {
        &self.moves
    }

    /// A sender for outbound messages outside the built-in intents.
    pub fn sender(&self) -> RoomSender {
        self.connection.sender()
    }

    // ── Subscriptions ───────────────────────────────────────────────

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.room.subscribe_phase()
    }

    pub fn subscribe_roster(&self) -> watch::Receiver<Arc<Roster>> {
        self.room.subscribe_roster()
    }

    pub fn subscribe_board(&self) -> watch::Receiver<Option<Arc<BoardSnapshot>>> {
        self.room.subscribe_board()
    }

    pub fn subscribe_chat(&self) -> watch::Receiver<ChatLog> {
        self.room.subscribe_chat()
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<DirectionQueue> {
        self.moves.subscribe_queue()
    }

    pub fn subscribe_cursor(&self) -> watch::Receiver<Option<Cursor>> {
        self.moves.subscribe_cursor()
    }
}

impl MessageSink for RoomClient {
    fn send(&self, message: ClientMessage) -> Result<()> {
        self.connection.send(message)
    }
}

impl std::fmt::Debug for RoomClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomClient")
            .field("room_id", &self.room_id)
            .field("user_id", &self.identity.user_id)
            .field("phase", &self.room.phase())
            .field("connection", &self.connection)
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use crate::close_codes::ErrorCategory;
    use crate::session::StaticToken;
    use crate::transport::{Incoming, Transport};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    // ── Loopback transport ──────────────────────────────────────────

    /// Frames pushed by the test arrive through `incoming`; frames sent by
    /// the client land in `outgoing`.
    struct LoopbackTransport {
        incoming: mpsc::UnboundedReceiver<Incoming>,
        outgoing: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            let _ = self.outgoing.send(message);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Incoming> {
            match self.incoming.recv().await {
                Some(incoming) => Ok(incoming),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct LoopbackConnector {
        transport: StdMutex<Option<LoopbackTransport>>,
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        type Transport = LoopbackTransport;

        async fn connect(&self, _url: &str) -> Result<LoopbackTransport> {
            self.transport
                .lock()
                .unwrap()
                .take()
                .ok_or(KingdomsError::TransportClosed)
        }
    }

    struct Server {
        to_client: mpsc::UnboundedSender<Incoming>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    impl Server {
        fn push(&self, frame: serde_json::Value) {
            self.to_client.send(Incoming::Text(frame.to_string())).unwrap();
        }

        async fn next_message(&mut self) -> ClientMessage {
            let frame = self.from_client.recv().await.unwrap();
            serde_json::from_str(&frame).unwrap()
        }
    }

    fn open() -> (RoomClient, Server) {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let connector = LoopbackConnector {
            transport: StdMutex::new(Some(LoopbackTransport { incoming, outgoing })),
        };
        let session = Session::new(Identity::new(1, "ann"), StaticToken::new("tok"));
        let client = RoomClient::open(connector, &RoomConfig::new("ws://test"), session, "r1");
        (client, Server { to_client, from_client })
    }

    /// Open a client and complete the handshake.
    async fn open_in_lobby() -> (RoomClient, Server) {
        let (mut client, mut server) = open();
        assert!(matches!(
            server.next_message().await,
            ClientMessage::Auth { .. }
        ));
        server.push(json!({"at": "auth", "status": true}));
        client.next_event().await.unwrap(); // Opened
        client.next_event().await.unwrap(); // auth
        assert_eq!(client.phase(), Phase::Config);
        (client, server)
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn lobby_intents_before_handshake_are_rejected() {
        let (mut client, _server) = open();
        assert!(matches!(client.ready(), Err(KingdomsError::NotConnected)));
        client.close().await;
    }

    #[tokio::test]
    async fn select_color_validates_locally() {
        let (mut client, mut server) = open_in_lobby().await;
        server.push(json!({
            "at": "players",
            "players": [{"id": 2, "username": "bob", "color": 0, "status": "not_ready"}]
        }));
        client.next_event().await.unwrap();

        assert!(matches!(
            client.select_color(0),
            Err(KingdomsError::ColorTaken(0))
        ));
        assert!(matches!(
            client.select_color(5),
            Err(KingdomsError::UnknownColor(5))
        ));

        client.select_color(2).unwrap();
        assert_eq!(
            server.next_message().await,
            ClientMessage::Color { color: 2 }
        );
        client.close().await;
    }

    #[tokio::test]
    async fn ready_and_announcement_are_separate_messages() {
        let (mut client, mut server) = open_in_lobby().await;

        client.ready().unwrap();
        assert_eq!(server.next_message().await, ClientMessage::Ready);

        let sent = client.announce_ready().unwrap();
        assert_eq!(sent.message, "I am ready");
        assert_eq!(server.next_message().await, ClientMessage::Chat(sent));
        client.close().await;
    }

    #[tokio::test]
    async fn update_reconciles_move_queue() {
        let (mut client, mut server) = open_in_lobby().await;
        server.push(json!({"at": "start"}));
        server.push(json!({
            "at": "update",
            "map": [
                [{"type": "king", "player": 1, "power": 4}, {"type": "field"}]
            ],
            "turn": 1,
            "stat": [{"id": 1, "username": "ann", "color": 0, "status": "ready"}, {"fields": 1, "power": 4}],
            "cursor": {"row": 0, "col": 0}
        }));
        client.next_event().await.unwrap();
        client.next_event().await.unwrap();
        assert_eq!(client.phase(), Phase::Active);
        assert_eq!(client.cursor(), Some(Cursor::new(0, 0)));

        client.step(Direction::Right).unwrap();
        assert!(matches!(
            server.next_message().await,
            ClientMessage::Move { .. }
        ));
        assert_eq!(client.queue().queued_at(Cursor::new(0, 0)), 1);

        server.push(json!({
            "at": "update",
            "map": [
                [{"type": "king", "player": 1, "power": 1}, {"type": "field", "player": 1, "power": 3}]
            ],
            "turn": 2,
            "stat": [{"id": 1, "username": "ann", "color": 0, "status": "ready"}, {"fields": 2, "power": 4}],
            "cursor": {"row": 0, "col": 1},
            "prev_cursor": {"row": 0, "col": 0}
        }));
        client.next_event().await.unwrap();
        assert!(client.queue().is_empty());
        assert_eq!(client.board().unwrap().turn, 2);
        client.close().await;
    }

    #[tokio::test]
    async fn run_returns_error_phase_on_terminal_close() {
        let (mut client, server) = open();
        server
            .to_client
            .send(Incoming::Closed {
                code: Some(4020),
                reason: "Room is in game".into(),
            })
            .unwrap();

        let phase = client.run(&mut crate::input::NoInput).await;
        assert_eq!(phase, Phase::Error(ErrorCategory::GameAlreadyStarted));
    }

    #[tokio::test]
    async fn run_feeds_input_to_move_queue() {
        let (mut client, mut server) = open_in_lobby().await;
        server.push(json!({"at": "start"}));
        server.push(json!({
            "at": "update",
            "map": [[{"type": "king", "player": 1, "power": 4}], [{"type": "field"}]],
            "turn": 1,
            "stat": [{"id": 1, "username": "ann", "color": 0, "status": "ready"}, {"fields": 1, "power": 4}],
            "cursor": {"row": 0, "col": 0}
        }));

        let (keys, mut input) = mpsc::unbounded_channel();
        keys.send(InputEvent::from_key("Escape").unwrap()).unwrap();
        drop(keys);

        let runner = tokio::spawn(async move {
            let phase = client.run(&mut input).await;
            (client, phase)
        });

        // The reset arrives whatever order start/update/escape interleave in.
        assert_eq!(
            server.next_message().await,
            ClientMessage::Move {
                previous: None,
                current: None
            }
        );
        server
            .to_client
            .send(Incoming::Closed {
                code: Some(5000),
                reason: String::new(),
            })
            .unwrap();

        let (_client, phase) = runner.await.unwrap();
        assert_eq!(phase, Phase::Error(ErrorCategory::InternalServerError));
    }

    #[tokio::test]
    async fn debug_impl() {
        let (mut client, _server) = open();
        let debug = format!("{client:?}");
        assert!(debug.contains("RoomClient"));
        assert!(debug.contains("r1"));
        client.close().await;
    }
}
