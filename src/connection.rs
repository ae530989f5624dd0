//! Connection lifecycle for one room.
//!
//! [`ConnectionManager`] is a thin handle over a background task that owns
//! the single live [`Transport`]. The task:
//!
//! 1. opens a transport through the [`Connector`],
//! 2. sends an `auth` frame with a bearer token from the [`Session`],
//! 3. forwards decoded server messages as [`ConnectionEvent`]s, in arrival
//!    order, and writes queued [`ClientMessage`]s to the socket,
//! 4. on a close with code `1008` tears the transport down and reconnects,
//!    up to [`RoomConfig::max_reconnect_attempts`] times,
//! 5. on any other close code, or a transport error, emits
//!    [`ConnectionEvent::Failed`] and exits.
//!
//! The attempt counter resets when the server acknowledges `auth` on a fresh
//! connection. Outbound messages are only accepted while the connection is
//! authenticated; they are fire-and-forget and never retried.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = Session::new(Identity::new(7, "ann"), StaticToken::new(token));
//! let config = RoomConfig::new("wss://play.example.com");
//! let (mut connection, mut events) =
//!     ConnectionManager::open(WebSocketConnector::new(), &config, session, "room-42");
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Message(msg) => { /* … */ }
//!         ConnectionEvent::Failed(category) => break,
//!         _ => {}
//!     }
//! }
//! connection.close().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::close_codes::{ErrorCategory, ABNORMAL_CLOSE_CODE};
use crate::config::RoomConfig;
use crate::error::{KingdomsError, Result};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::session::Session;
use crate::transport::{Connector, Incoming, Transport};

// ── Events ──────────────────────────────────────────────────────────

/// Lifecycle and message events emitted by the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A transport opened and the `auth` frame was sent. `attempt` is the
    /// reconnection attempt that produced it (`0` for the first connection).
    Opened { attempt: u32 },
    /// A decoded server message.
    Message(ServerMessage),
    /// The server closed with the transient code and a new connection is
    /// about to be opened.
    Reconnecting { attempt: u32, max_attempts: u32 },
    /// Terminal failure. No further events follow.
    Failed(ErrorCategory),
    /// The connection was closed locally. No further events follow.
    Closed,
}

// ── Outbound seam ───────────────────────────────────────────────────

/// Destination for outbound intents.
///
/// Implemented by [`RoomSender`]; tests substitute a recorder.
pub trait MessageSink {
    /// Queue a message for the server without waiting for any reply.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::NotConnected`] if no authenticated connection
    /// is live.
    fn send(&self, message: ClientMessage) -> Result<()>;
}

impl<S: MessageSink + ?Sized> MessageSink for &S {
    fn send(&self, message: ClientMessage) -> Result<()> {
        (**self).send(message)
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle and the connection task.
struct ConnectionState {
    connected: AtomicBool,
    authenticated: AtomicBool,
    attempts: AtomicU32,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        }
    }

    fn mark_down(&self) {
        self.connected.store(false, Ordering::Release);
        self.authenticated.store(false, Ordering::Release);
    }
}

/// Cloneable sending half of a [`ConnectionManager`].
#[derive(Clone)]
pub struct RoomSender {
    cmd_tx: mpsc::UnboundedSender<ClientMessage>,
    state: Arc<ConnectionState>,
}

impl MessageSink for RoomSender {
    fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.state.authenticated.load(Ordering::Acquire) {
            return Err(KingdomsError::NotConnected);
        }
        self.cmd_tx
            .send(message)
            .map_err(|_| KingdomsError::NotConnected)
    }
}

impl std::fmt::Debug for RoomSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSender")
            .field(
                "authenticated",
                &self.state.authenticated.load(Ordering::Acquire),
            )
            .finish()
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// Handle to the background connection task of one room.
///
/// Dropping the handle aborts the task, which cancels any pending
/// reconnection timer and drops the transport. [`close`](Self::close) does
/// the same gracefully.
pub struct ConnectionManager {
    sender: RoomSender,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl ConnectionManager {
    /// Spawn the connection task for `room_id` and return the handle plus
    /// the event receiver.
    ///
    /// Must be called within a tokio runtime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn open<C: Connector>(
        connector: C,
        config: &RoomConfig,
        session: Session,
        room_id: &str,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let url = config.room_url(room_id, session.identity());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let state = Arc::new(ConnectionState::new());

        let connection = ConnectionLoop {
            connector,
            url,
            session,
            max_attempts: config.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay,
            cmd_rx,
            event_tx,
            state: Arc::clone(&state),
            shutdown_rx,
        };
        let task = tokio::spawn(connection.run());

        let manager = Self {
            sender: RoomSender { cmd_tx, state },
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (manager, event_rx)
    }

    /// Queue an outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::NotConnected`] unless the connection is
    /// authenticated.
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.sender.send(message)
    }

    /// A cloneable sender for components that emit intents.
    pub fn sender(&self) -> RoomSender {
        self.sender.clone()
    }

    /// Returns `true` while a transport is open.
    pub fn is_connected(&self) -> bool {
        self.sender.state.connected.load(Ordering::Acquire)
    }

    /// Returns `true` once the server acknowledged `auth` on the live transport.
    pub fn is_authenticated(&self) -> bool {
        self.sender.state.authenticated.load(Ordering::Acquire)
    }

    /// Reconnection attempts since the last acknowledged handshake.
    pub fn reconnect_attempts(&self) -> u32 {
        self.sender.state.attempts.load(Ordering::Acquire)
    }

    /// Close the connection and stop the background task.
    ///
    /// The task gets the configured shutdown timeout to close the transport
    /// and emit [`ConnectionEvent::Closed`]; after that it is aborted.
    pub async fn close(&mut self) {
        debug!("ConnectionManager: close requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection task did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection task aborted: {join_err}");
                    }
                }
            }
        }

        self.sender.state.mark_down();
    }
}

impl MessageSink for ConnectionManager {
    fn send(&self, message: ClientMessage) -> Result<()> {
        self.sender.send(message)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connected", &self.is_connected())
            .field("authenticated", &self.is_authenticated())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // No executor is available here to drive a graceful close, so abort:
        // the task future, its transport and any reconnect timer are dropped.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Connection task ─────────────────────────────────────────────────

/// How one transport's session ended.
enum SessionEnd {
    Shutdown,
    Closed(u16),
    Failed(ErrorCategory),
}

struct ConnectionLoop<C: Connector> {
    connector: C,
    url: String,
    session: Session,
    max_attempts: u32,
    reconnect_delay: Duration,
    cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    state: Arc<ConnectionState>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl<C: Connector> ConnectionLoop<C> {
    async fn run(mut self) {
        debug!(url = %self.url, "connection task started");

        loop {
            match self.connect_once().await {
                SessionEnd::Shutdown => {
                    emit_event(&self.event_tx, ConnectionEvent::Closed).await;
                    break;
                }
                SessionEnd::Failed(category) => {
                    self.fail(category).await;
                    break;
                }
                SessionEnd::Closed(code) => {
                    if let Some(category) = ErrorCategory::from_close_code(code) {
                        warn!(code, %category, "room connection closed by server");
                        self.fail(category).await;
                        break;
                    }

                    let attempts = self.state.attempts.load(Ordering::Acquire);
                    if attempts >= self.max_attempts {
                        warn!(attempts, "reconnection attempts exhausted");
                        self.fail(ErrorCategory::CouldNotConnect).await;
                        break;
                    }

                    let attempt = attempts + 1;
                    self.state.attempts.store(attempt, Ordering::Release);
                    info!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "transient close, reconnecting"
                    );
                    emit_event(
                        &self.event_tx,
                        ConnectionEvent::Reconnecting {
                            attempt,
                            max_attempts: self.max_attempts,
                        },
                    )
                    .await;

                    if !self.wait_before_reconnect().await {
                        emit_event(&self.event_tx, ConnectionEvent::Closed).await;
                        break;
                    }
                }
            }
        }

        self.state.mark_down();
        debug!("connection task exited");
    }

    /// Open one transport and serve it until it ends. The transport is
    /// dropped before this returns.
    async fn connect_once(&mut self) -> SessionEnd {
        let connected = tokio::select! {
            biased;
            _ = &mut self.shutdown_rx => return SessionEnd::Shutdown,
            result = self.connector.connect(&self.url) => result,
        };

        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                error!("could not open room connection: {e}");
                return SessionEnd::Failed(ErrorCategory::Connectivity);
            }
        };

        self.state.connected.store(true, Ordering::Release);
        let attempt = self.state.attempts.load(Ordering::Acquire);
        debug!(attempt, "room transport opened");
        emit_event(&self.event_tx, ConnectionEvent::Opened { attempt }).await;

        let end = self.serve(&mut transport).await;
        self.state.mark_down();
        if matches!(end, SessionEnd::Closed(_)) {
            self.discard_stale_commands();
        }

        if !matches!(end, SessionEnd::Closed(_)) {
            if let Err(e) = transport.close().await {
                debug!("transport close failed: {e}");
            }
        }
        end
    }

    async fn serve(&mut self, transport: &mut C::Transport) -> SessionEnd {
        let token = tokio::select! {
            biased;
            _ = &mut self.shutdown_rx => return SessionEnd::Shutdown,
            token = self.session.access_token() => token,
        };
        let token = match token {
            Ok(token) => token,
            Err(e) => {
                error!("no access token for room handshake: {e}");
                return SessionEnd::Failed(ErrorCategory::AuthorizationFailure);
            }
        };
        // Nothing queued before this handshake belongs to this transport.
        self.discard_stale_commands();
        if let Err(e) = send_message(transport, &ClientMessage::Auth { token }).await {
            error!("failed to send auth frame: {e}");
            return SessionEnd::Failed(ErrorCategory::Connectivity);
        }
        debug!("auth frame sent");

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    debug!("shutdown signal received");
                    return SessionEnd::Shutdown;
                }

                cmd = self.cmd_rx.recv() => {
                    let Some(message) = cmd else {
                        debug!("command channel closed, shutting down connection");
                        return SessionEnd::Shutdown;
                    };
                    if let Err(e) = send_message(transport, &message).await {
                        error!("transport send error: {e}");
                        return SessionEnd::Failed(ErrorCategory::Connectivity);
                    }
                }

                incoming = transport.recv() => match incoming {
                    Ok(Incoming::Text(frame)) => self.dispatch(&frame).await,
                    Ok(closed @ Incoming::Closed { .. }) => {
                        let code = closed.close_code().unwrap_or(ABNORMAL_CLOSE_CODE);
                        debug!(code, ?closed, "transport closed");
                        return SessionEnd::Closed(code);
                    }
                    Err(e) => {
                        error!("transport receive error: {e}");
                        return SessionEnd::Failed(ErrorCategory::Connectivity);
                    }
                },
            }
        }
    }

    async fn dispatch(&mut self, frame: &str) {
        match protocol::decode(frame) {
            Ok(message) => {
                if matches!(message, ServerMessage::Auth { .. }) {
                    self.state.authenticated.store(true, Ordering::Release);
                    self.state.attempts.store(0, Ordering::Release);
                    info!("room handshake acknowledged");
                }
                emit_event(&self.event_tx, ConnectionEvent::Message(message)).await;
            }
            Err(e) => {
                warn!("failed to decode server frame: {e}; raw: {frame}");
            }
        }
    }

    /// Drop intents queued for a session that has ended. Outbound messages
    /// are never carried over to another transport.
    fn discard_stale_commands(&mut self) {
        while let Ok(message) = self.cmd_rx.try_recv() {
            debug!(?message, "dropping intent queued for a closed session");
        }
    }

    /// Sleep for the reconnect delay. Returns `false` if shutdown was
    /// requested meanwhile.
    async fn wait_before_reconnect(&mut self) -> bool {
        tokio::select! {
            biased;
            _ = &mut self.shutdown_rx => false,
            _ = tokio::time::sleep(self.reconnect_delay) => true,
        }
    }

    async fn fail(&self, category: ErrorCategory) {
        error!(%category, "room connection failed");
        emit_event(&self.event_tx, ConnectionEvent::Failed(category)).await;
    }
}

async fn send_message<T: Transport>(transport: &mut T, message: &ClientMessage) -> Result<()> {
    let frame = protocol::encode(message)?;
    debug!("sending client message: {:?}", std::mem::discriminant(message));
    transport.send(frame).await
}

/// Deliver an event in order. Waits for channel capacity rather than dropping,
/// since every server message changes room state.
async fn emit_event(event_tx: &mpsc::Sender<ConnectionEvent>, event: ConnectionEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
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
    use crate::session::{Identity, StaticToken};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// Replays scripted frames, then idles forever.
    struct MockTransport {
        incoming: VecDeque<Result<Incoming>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Incoming> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Hands out one scripted transport per connect call.
    struct MockConnector {
        scripts: StdMutex<VecDeque<Vec<Result<Incoming>>>>,
        connects: Arc<AtomicUsize>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    impl MockConnector {
        fn new(
            scripts: Vec<Vec<Result<Incoming>>>,
        ) -> (Self, Arc<AtomicUsize>, Arc<StdMutex<Vec<String>>>) {
            let connects = Arc::new(AtomicUsize::new(0));
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let connector = Self {
                scripts: StdMutex::new(VecDeque::from(scripts)),
                connects: Arc::clone(&connects),
                sent: Arc::clone(&sent),
            };
            (connector, connects, sent)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn connect(&self, _url: &str) -> Result<MockTransport> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front().ok_or_else(|| {
                KingdomsError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
            })?;
            Ok(MockTransport {
                incoming: VecDeque::from(script),
                sent: Arc::clone(&self.sent),
            })
        }
    }

    fn session() -> Session {
        Session::new(Identity::new(7, "ann"), StaticToken::new("tok-7"))
    }

    fn text(frame: &str) -> Result<Incoming> {
        Ok(Incoming::Text(frame.to_string()))
    }

    fn closed(code: u16) -> Result<Incoming> {
        Ok(Incoming::Closed {
            code: Some(code),
            reason: String::new(),
        })
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn auth_is_first_frame_and_ack_authenticates() {
        let (connector, _connects, sent) = MockConnector::new(vec![vec![text(r#"{"at":"auth"}"#)]]);
        let (mut connection, mut events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session(), "r1");

        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Opened { attempt: 0 }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Message(ServerMessage::Auth { status: None })
        );
        assert!(connection.is_authenticated());

        let first: ClientMessage = serde_json::from_str(&sent.lock().unwrap()[0]).unwrap();
        assert_eq!(
            first,
            ClientMessage::Auth {
                token: "tok-7".into()
            }
        );

        connection.close().await;
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Closed);
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn send_before_ack_is_rejected() {
        let (connector, _connects, _sent) = MockConnector::new(vec![vec![]]);
        let (mut connection, mut events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session(), "r1");

        let _ = events.recv().await; // Opened
        let err = connection.send(ClientMessage::Ready).unwrap_err();
        assert!(matches!(err, KingdomsError::NotConnected));

        connection.close().await;
    }

    #[tokio::test]
    async fn terminal_close_code_fails_without_retry() {
        let (connector, connects, _sent) = MockConnector::new(vec![vec![closed(4040)]]);
        let (_connection, mut events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session(), "r1");

        let _ = events.recv().await; // Opened
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Failed(ErrorCategory::RoomNotFound)
        );
        assert!(events.recv().await.is_none());
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_close_reconnects() {
        let (connector, connects, sent) = MockConnector::new(vec![
            vec![closed(1008)],
            vec![text(r#"{"at":"auth"}"#)],
        ]);
        let (mut connection, mut events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session(), "r1");

        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Opened { attempt: 0 }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Reconnecting {
                attempt: 1,
                max_attempts: 10
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Opened { attempt: 1 }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::Message(ServerMessage::Auth { .. })
        ));
        assert_eq!(connection.reconnect_attempts(), 0);
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        // Every connection authenticates on its own.
        assert_eq!(sent.lock().unwrap().len(), 2);

        connection.close().await;
    }

    #[tokio::test]
    async fn connect_failure_is_connectivity_error() {
        let (connector, _connects, _sent) = MockConnector::new(vec![]);
        let (_connection, mut events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session(), "r1");

        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Failed(ErrorCategory::Connectivity)
        );
    }

    #[tokio::test]
    async fn receive_error_is_connectivity_error() {
        let (connector, _connects, _sent) = MockConnector::new(vec![vec![Err(
            KingdomsError::TransportReceive("reset".into()),
        )]]);
        let (_connection, mut events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session(), "r1");

        let _ = events.recv().await; // Opened
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Failed(ErrorCategory::Connectivity)
        );
    }

    #[tokio::test]
    async fn missing_token_is_authorization_failure() {
        let (connector, _connects, sent) = MockConnector::new(vec![vec![]]);
        let session = Session::new(Identity::new(7, "ann"), StaticToken::new(""));
        let (_connection, mut events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session, "r1");

        let _ = events.recv().await; // Opened
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Failed(ErrorCategory::AuthorizationFailure)
        );
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let (connector, _connects, _sent) = MockConnector::new(vec![vec![
            text("not json"),
            text(r#"{"at":"start"}"#),
        ]]);
        let (mut connection, mut events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session(), "r1");

        let _ = events.recv().await; // Opened
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Message(ServerMessage::Start)
        );

        connection.close().await;
    }

    #[tokio::test]
    async fn close_during_reconnect_delay_cancels_timer() {
        let (connector, connects, _sent) = MockConnector::new(vec![vec![closed(1008)], vec![]]);
        let config = RoomConfig::new("ws://test").with_reconnect_delay(Duration::from_secs(3600));
        let (mut connection, mut events) =
            ConnectionManager::open(connector, &config, session(), "r1");

        let _ = events.recv().await; // Opened
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::Reconnecting { attempt: 1, .. }
        ));

        connection.close().await;
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Closed);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn intents_queued_before_a_reconnect_are_not_replayed() {
        let (connector, connects, sent) = MockConnector::new(vec![
            vec![closed(1008)],
            vec![text(r#"{"at":"auth"}"#)],
        ]);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, mut events) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // Left over from a session the server closes straight away.
        cmd_tx.send(ClientMessage::Ready).unwrap();
        cmd_tx.send(ClientMessage::Color { color: 2 }).unwrap();

        let connection = ConnectionLoop {
            connector,
            url: "ws://test/ws/rooms/r1/".into(),
            session: session(),
            max_attempts: 10,
            reconnect_delay: Duration::ZERO,
            cmd_rx,
            event_tx,
            state: Arc::new(ConnectionState::new()),
            shutdown_rx,
        };
        let task = tokio::spawn(connection.run());

        while !matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::Message(ServerMessage::Auth { .. })
        ) {}

        let frames: Vec<ClientMessage> = sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect();
        assert_eq!(frames.len(), 2, "only the two handshakes: {frames:?}");
        assert!(frames
            .iter()
            .all(|frame| matches!(frame, ClientMessage::Auth { .. })));
        assert_eq!(connects.load(Ordering::SeqCst), 2);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Closed);
    }

    /// Transport that hangs forever in `close()` so the shutdown abort path
    /// can be tested.
    struct HangingCloseTransport {
        close_called: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    impl Drop for HangingCloseTransport {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl Transport for HangingCloseTransport {
        async fn send(&mut self, _message: String) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Incoming> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            self.close_called.store(true, Ordering::Release);
            std::future::pending().await
        }
    }

    struct HangingConnector {
        close_called: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for HangingConnector {
        type Transport = HangingCloseTransport;

        async fn connect(&self, _url: &str) -> Result<HangingCloseTransport> {
            Ok(HangingCloseTransport {
                close_called: Arc::clone(&self.close_called),
                dropped: Arc::clone(&self.dropped),
            })
        }
    }

    #[tokio::test]
    async fn close_timeout_aborts_stuck_task() {
        let close_called = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicBool::new(false));
        let connector = HangingConnector {
            close_called: Arc::clone(&close_called),
            dropped: Arc::clone(&dropped),
        };
        let config = RoomConfig::new("ws://test").with_shutdown_timeout(Duration::from_millis(20));
        let (mut connection, mut events) = ConnectionManager::open(connector, &config, session(), "r1");

        let _ = events.recv().await; // Opened
        connection.close().await;

        assert!(
            close_called.load(Ordering::Acquire),
            "transport.close() should have been attempted during graceful shutdown"
        );
        assert!(
            dropped.load(Ordering::Acquire),
            "timed-out close should abort the task and drop the transport"
        );
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn drop_aborts_task() {
        let (connector, _connects, _sent) = MockConnector::new(vec![vec![text(r#"{"at":"auth"}"#)]]);
        let (connection, mut events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session(), "r1");

        let _ = events.recv().await; // Opened
        drop(connection);

        // The aborted task drops its event sender, so the channel drains and ends.
        while let Some(_event) = events.recv().await {}
    }

    #[tokio::test]
    async fn debug_impl() {
        let (connector, _connects, _sent) = MockConnector::new(vec![vec![]]);
        let (mut connection, _events) =
            ConnectionManager::open(connector, &RoomConfig::new("ws://test"), session(), "r1");
        let debug = format!("{connection:?}");
        assert!(debug.contains("ConnectionManager"));
        connection.close().await;
    }
}
