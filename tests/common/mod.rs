#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Kingdoms room client integration tests.
//!
//! Provides a channel-based [`MockConnector`] whose transports are driven by
//! [`ServerHandle`]s, plus helpers for building server frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use kingdoms_room_client::protocol::{ClientMessage, ServerMessage};
use kingdoms_room_client::{
    Connector, Identity, Incoming, KingdomsError, RoomConfig, Session, StaticToken, Transport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// How long a test waits for a frame before failing.
const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

// ── MockTransport ───────────────────────────────────────────────────

/// One scripted connection.
///
/// Frames pushed through the paired [`ServerHandle`] are returned by `recv()`
/// in order; once the handle is dropped and the queue drained, `recv()` hangs
/// so the connection stays open until closed. Everything the client sends is
/// forwarded to the handle.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Result<Incoming, KingdomsError>>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), KingdomsError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KingdomsError::TransportClosed);
        }
        let _ = self.outgoing.send(message);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Incoming, KingdomsError> {
        match self.incoming.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), KingdomsError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ── ServerHandle ────────────────────────────────────────────────────

/// The server side of one [`MockTransport`].
pub struct ServerHandle {
    to_client: mpsc::UnboundedSender<Result<Incoming, KingdomsError>>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Push a raw text frame.
    pub fn push_raw(&self, frame: &str) {
        let _ = self.to_client.send(Ok(Incoming::Text(frame.to_string())));
    }

    /// Push a JSON frame.
    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    /// Push a typed server message.
    pub fn push_message(&self, message: &ServerMessage) {
        self.push_raw(&serde_json::to_string(message).unwrap());
    }

    /// Close the connection with a close code.
    pub fn close_with(&self, code: u16) {
        let _ = self.to_client.send(Ok(Incoming::Closed {
            code: Some(code),
            reason: String::new(),
        }));
    }

    /// Fail the next receive with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .to_client
            .send(Err(KingdomsError::TransportReceive(reason.to_string())));
    }

    /// Next raw frame the client sent.
    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(FRAME_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client transport dropped")
    }

    /// Next message the client sent, decoded.
    pub async fn next_message(&mut self) -> ClientMessage {
        let frame = self.next_frame().await;
        serde_json::from_str(&frame).unwrap()
    }

    /// Next message the client sent, as loose JSON.
    pub async fn next_json(&mut self) -> Value {
        let frame = self.next_frame().await;
        serde_json::from_str(&frame).unwrap()
    }

    /// Returns `true` if nothing else has been sent so far.
    pub fn nothing_sent(&mut self) -> bool {
        self.from_client.try_recv().is_err()
    }

    /// Returns `true` once the client closed the transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out one prepared [`MockTransport`] per connect call and counts the
/// calls. A connect with nothing prepared fails with a refused connection.
#[derive(Clone, Default)]
pub struct MockConnector {
    pending: Arc<StdMutex<VecDeque<MockTransport>>>,
    connects: Arc<AtomicUsize>,
    urls: Arc<StdMutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare the transport for the next connect call.
    pub fn expect_connection(&self) -> ServerHandle {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.pending.lock().unwrap().push_back(MockTransport {
            incoming,
            outgoing,
            closed: Arc::clone(&closed),
        });
        ServerHandle {
            to_client,
            from_client,
            closed,
        }
    }

    /// Number of connect calls so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// URLs passed to connect, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, url: &str) -> Result<MockTransport, KingdomsError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        self.pending.lock().unwrap().pop_front().ok_or_else(|| {
            KingdomsError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
        })
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub const ME: i64 = 1;

pub fn session() -> Session {
    Session::new(Identity::new(ME, "ann"), StaticToken::new("access-token"))
}

pub fn config() -> RoomConfig {
    RoomConfig::new("ws://rooms.test")
}

pub fn auth_json() -> Value {
    json!({"at": "auth", "status": true})
}

pub fn player_json(id: i64, color: u8, status: &str) -> Value {
    json!({"id": id, "username": format!("player{id}"), "color": color, "status": status})
}

pub fn players_json(players: Vec<Value>) -> Value {
    json!({"at": "players", "players": players})
}

pub fn chat_json(user_id: i64, text: &str) -> Value {
    json!({
        "at": "chat",
        "user_id": user_id,
        "message": text,
        "username": format!("player{user_id}"),
        "timestamp": "2026-05-01T10:00:00.000Z"
    })
}

/// A 3x3 board with my king at (1,1) holding `power`, an enemy field at
/// (0,2) and plain fields elsewhere.
pub fn update_json(turn: u32, power: u32, cursor: Option<(usize, usize)>, prev: Option<(usize, usize)>) -> Value {
    let field = json!({"type": "field"});
    let king = json!({"type": "king", "player": ME, "power": power});
    let enemy = json!({"type": "field", "player": 2, "power": 3});
    let mut frame = json!({
        "at": "update",
        "map": [
            [field.clone(), field.clone(), enemy],
            [field.clone(), king, field.clone()],
            [field.clone(), field.clone(), field]
        ],
        "turn": turn,
        "stat": [player_json(ME, 0, "ready"), {"fields": 1, "power": power}]
    });
    if let Some((row, col)) = cursor {
        frame["cursor"] = json!({"row": row, "col": col});
    }
    if let Some((row, col)) = prev {
        frame["prev_cursor"] = json!({"row": row, "col": col});
    }
    frame
}
