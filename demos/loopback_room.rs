//! # Loopback Room Example
//!
//! Plays a short game against an in-process fake server through a custom
//! [`Connector`]. Useful as a template for:
//!
//! - **Testing**: drive the room without a real server
//! - **Custom backends**: adapt any I/O layer that can report close codes
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_room
//! ```

use std::sync::Mutex;

use async_trait::async_trait;
use kingdoms_room_client::{
    Connector, Cursor, Direction, Identity, Incoming, InputEvent, KingdomsError, RoomClient,
    RoomConfig, Session, StaticToken, Transport,
};
use serde_json::json;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based transport and the connector that hands it out
// ─────────────────────────────────────────────────────────────────────

/// Client half of the loopback.
pub struct LoopbackTransport {
    /// Frames the client sends (the fake server reads the other end).
    tx: mpsc::UnboundedSender<String>,
    /// Frames and closes from the fake server.
    rx: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), KingdomsError> {
        self.tx
            .send(message)
            .map_err(|e| KingdomsError::TransportSend(e.to_string()))
    }

    /// Cancel-safe because `UnboundedReceiver::recv` is. A dropped server
    /// reads as an abnormal close.
    async fn recv(&mut self) -> Result<Incoming, KingdomsError> {
        Ok(self.rx.recv().await.unwrap_or(Incoming::Closed {
            code: None,
            reason: "server gone".into(),
        }))
    }

    async fn close(&mut self) -> Result<(), KingdomsError> {
        self.rx.close();
        Ok(())
    }
}

/// Hands out its single transport once.
struct LoopbackConnector(Mutex<Option<LoopbackTransport>>);

#[async_trait]
impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&self, url: &str) -> Result<LoopbackTransport, KingdomsError> {
        tracing::info!("connecting to {url}");
        let transport = self
            .0
            .lock()
            .map_err(|_| KingdomsError::TransportClosed)?
            .take();
        transport.ok_or_else(|| {
            KingdomsError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: The fake server
// ─────────────────────────────────────────────────────────────────────

fn update(turn: u32, cursor: Option<(usize, usize)>, prev: Option<(usize, usize)>) -> String {
    let mut frame = json!({
        "at": "update",
        "map": [
            [{"type": "king", "player": 1, "power": 8}, {"type": "field"}, {"type": "block"}],
            [{"type": "field"}, {"type": "castle", "power": 30}, {"type": "hide"}]
        ],
        "turn": turn,
        "stat": [
            {"id": 1, "username": "ann", "color": 0, "status": "ready"},
            {"fields": 1, "power": 8}
        ]
    });
    if let (Some((row, col)), Some(object)) = (cursor, frame.as_object_mut()) {
        object.insert("cursor".into(), json!({"row": row, "col": col}));
    }
    if let (Some((row, col)), Some(object)) = (prev, frame.as_object_mut()) {
        object.insert("prev_cursor".into(), json!({"row": row, "col": col}));
    }
    frame.to_string()
}

/// Answers the handshake, starts the game, executes one planned step and
/// then closes the room as a server-side error.
async fn fake_server(
    mut from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Incoming>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let send = |frame: String| to_client.send(Incoming::Text(frame));

    let auth = from_client.recv().await.ok_or("client left before auth")?;
    tracing::info!("server received: {auth}");
    send(json!({"at": "auth", "status": true}).to_string())?;
    send(json!({"at": "players", "players": [{"id": 1, "username": "ann", "color": 0, "status": "ready"}]}).to_string())?;
    send(json!({"at": "start"}).to_string())?;
    send(update(1, Some((0, 0)), None))?;

    // Wait for the planned step, then execute it.
    while let Some(frame) = from_client.recv().await {
        tracing::info!("server received: {frame}");
        if frame.contains("\"previous\"") {
            send(update(2, Some((0, 1)), Some((0, 0))))?;
            break;
        }
    }

    to_client.send(Incoming::Closed {
        code: Some(5000),
        reason: "demo over".into(),
    })?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire the client to the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let connector = LoopbackConnector(Mutex::new(Some(LoopbackTransport {
        tx: client_tx,
        rx: client_rx,
    })));
    let server = tokio::spawn(fake_server(server_rx, server_tx));

    let session = Session::new(Identity::new(1, "ann"), StaticToken::new("demo-token"));
    let mut client = RoomClient::open(connector, &RoomConfig::new("loop://local"), session, "demo");

    // Plan one step as soon as the first board arrives.
    let (keys, mut input) = mpsc::unbounded_channel();
    let mut board = client.subscribe_board();
    tokio::spawn(async move {
        while board.changed().await.is_ok() {
            let first_board = board.borrow_and_update().is_some();
            if first_board {
                let _ = keys.send(InputEvent::Arrow(Direction::Right));
                break;
            }
        }
    });

    let mut queue = client.subscribe_queue();
    tokio::spawn(async move {
        while queue.changed().await.is_ok() {
            let origin = Cursor::new(0, 0);
            let pending = queue.borrow_and_update().directions_at(origin);
            tracing::info!("planned at {origin}: {pending:?}");
        }
    });

    let phase = client.run(&mut input).await;
    tracing::info!("room ended in phase: {phase}");

    if let Err(e) = server.await? {
        tracing::warn!("fake server: {e}");
    }
    Ok(())
}
