//! Transport abstraction for room connections.
//!
//! The room protocol exchanges JSON text frames over one persistent
//! bidirectional connection. Two capability traits keep the connection logic
//! independent of the socket library:
//!
//! - [`Transport`] is one live connection. Besides text frames it must report
//!   the close code the server ended the connection with, because the close
//!   code decides between reconnecting and failing.
//! - [`Connector`] opens a fresh [`Transport`] for a URL. The
//!   [`ConnectionManager`](crate::connection::ConnectionManager) calls it once
//!   per attempt, so reconnection never reuses a torn-down handle.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use kingdoms_room_client::error::KingdomsError;
//! use kingdoms_room_client::transport::{Incoming, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), KingdomsError> {
//!         // Send the JSON text frame
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Result<Incoming, KingdomsError> {
//!         // Next text frame, or the close code once the peer closes
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), KingdomsError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::close_codes::ABNORMAL_CLOSE_CODE;
use crate::error::KingdomsError;

/// What a [`Transport`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// One complete JSON text frame.
    Text(String),
    /// The connection ended. `code` is `None` when it dropped without a close
    /// frame.
    Closed { code: Option<u16>, reason: String },
}

impl Incoming {
    /// The effective close code, treating a missing close frame as an abnormal
    /// closure (`1006`). Returns `None` for text frames.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Text(_) => None,
            Self::Closed { code, .. } => Some(code.unwrap_or(ABNORMAL_CLOSE_CODE)),
        }
    }
}

/// A bidirectional text transport for one room connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is used inside
/// `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::TransportSend`] if the frame could not be sent,
    /// or [`KingdomsError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), KingdomsError>;

    /// Receive the next text frame or the close notification.
    ///
    /// After [`Incoming::Closed`] has been returned the transport is finished.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::TransportReceive`] on a transport failure.
    async fn recv(&mut self) -> Result<Incoming, KingdomsError>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), KingdomsError>;
}

/// Opens fresh [`Transport`]s.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport this connector produces.
    type Transport: Transport;

    /// Open a new connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::Io`] (or [`KingdomsError::Timeout`]) if the
    /// connection cannot be established.
    async fn connect(&self, url: &str) -> Result<Self::Transport, KingdomsError>;
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

    #[test]
    fn missing_close_frame_is_abnormal() {
        let closed = Incoming::Closed {
            code: None,
            reason: String::new(),
        };
        assert_eq!(closed.close_code(), Some(ABNORMAL_CLOSE_CODE));
    }

    #[test]
    fn text_has_no_close_code() {
        assert_eq!(Incoming::Text("{}".into()).close_code(), None);
    }
}
