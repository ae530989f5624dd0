//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketConnector`] opens [`WebSocketTransport`]s. Both `ws://` and
//! `wss://` URLs are supported; TLS is handled transparently via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is enabled
//! (it is enabled by default).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::KingdomsError;
use crate::transport::{Connector, Incoming, Transport};

/// Type alias for the underlying WebSocket stream.
///
/// Made public so that callers can construct a [`WebSocketTransport`] from an
/// existing stream via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any messages,
/// making it safe to use inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::Io`] if the URL is invalid or the connection
    /// cannot be established. When the underlying error is an I/O error its
    /// [`ErrorKind`](std::io::ErrorKind) is preserved; all other errors are
    /// mapped to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, KingdomsError> {
        tracing::debug!(url = %url, "connecting to room socket");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            KingdomsError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "room socket established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    ///
    /// Useful for custom TLS configuration, proxies or extra headers.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), KingdomsError> {
        if self.closed {
            return Err(KingdomsError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| KingdomsError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Incoming, KingdomsError> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(KingdomsError::TransportReceive(e.to_string())),
                None => {
                    self.closed = true;
                    return Ok(Incoming::Closed {
                        code: None,
                        reason: String::new(),
                    });
                }
            };

            match msg {
                Message::Text(text) => return Ok(Incoming::Text(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received close frame");
                    self.closed = true;
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    return Ok(Incoming::Closed { code, reason });
                }
                Message::Ping(_) => {
                    // tungstenite queues the Pong reply itself.
                    tracing::debug!("received ping");
                }
                Message::Pong(_) => {
                    tracing::debug!("received pong (ignored)");
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary frame, skipping");
                }
                Message::Frame(_) => {
                    // Never produced by the read half; kept for exhaustiveness.
                    tracing::debug!("received raw frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), KingdomsError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| KingdomsError::TransportSend(e.to_string()))
    }
}

/// A [`Connector`] that opens [`WebSocketTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail connection attempts that take longer than `timeout`.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, url: &str) -> Result<WebSocketTransport, KingdomsError> {
        match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, WebSocketTransport::connect(url))
                .await
                .map_err(|_| KingdomsError::Timeout)?,
            None => WebSocketTransport::connect(url).await,
        }
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketConnector::new()
            .connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, KingdomsError::Io(_)));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address guarantees the deadline is hit first.
        let err = WebSocketConnector::new()
            .with_connect_timeout(Duration::from_millis(50))
            .connect("ws://192.0.2.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, KingdomsError::Timeout));
    }

    // ── Mock-stream helpers ──────────────────────────────────────────────

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    // ── Mock-stream tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn recv_receives_text_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"at":"auth"}"#.into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new().connect(&url).await.unwrap();
        let frame = transport.recv().await.unwrap();
        assert_eq!(frame, Incoming::Text(r#"{"at":"auth"}"#.into()));
    }

    #[tokio::test]
    async fn recv_reports_close_code() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: CloseCode::from(4010),
                reason: "There is not slots".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new().connect(&url).await.unwrap();
        let closed = transport.recv().await.unwrap();
        assert_eq!(closed.close_code(), Some(4010));
        if let Incoming::Closed { reason, .. } = closed {
            assert_eq!(reason, "There is not slots");
        }
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new().connect(&url).await.unwrap();
        let frame = transport.recv().await.unwrap();
        assert_eq!(frame, Incoming::Text("after_binary".into()));
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketConnector::new().connect(&url).await.unwrap();
        transport.close().await.unwrap();
        // Second close is a no-op.
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, KingdomsError::TransportClosed));
    }

    #[tokio::test]
    async fn send_reaches_server() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new().connect(&url).await.unwrap();
        transport.send(r#"{"at":"ready"}"#.to_string()).await.unwrap();
        let frame = transport.recv().await.unwrap();
        assert_eq!(frame, Incoming::Text(r#"{"at":"ready"}"#.into()));
    }
}
