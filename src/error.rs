//! Error types for the Kingdoms room client.

use thiserror::Error;

/// Errors that can occur when using the room client.
///
/// Terminal room failures (room full, authorization, exhausted reconnects)
/// are not represented here; they surface as
/// [`Phase::Error`](crate::room::Phase::Error) carrying an
/// [`ErrorCategory`](crate::close_codes::ErrorCategory).
#[derive(Debug, Error)]
pub enum KingdomsError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was already closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted to send while no authenticated connection is live.
    #[error("not connected to room")]
    NotConnected,

    /// The token capability could not produce a bearer token.
    #[error("could not obtain access token: {0}")]
    Token(String),

    /// A required configuration value is missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A map received from the server is not a rectangular grid.
    #[error("invalid map: {0}")]
    InvalidMap(String),

    /// The requested palette color is already used by another player.
    #[error("color {0} is already taken")]
    ColorTaken(u8),

    /// The requested palette color does not exist.
    #[error("color {0} is not in the palette")]
    UnknownColor(u8),

    /// Chat text was empty after trimming.
    #[error("chat message is empty")]
    EmptyChatMessage,

    /// A cursor coordinate lies outside the current map.
    #[error("cursor ({row}, {col}) is outside the map")]
    CursorOutOfBounds {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
    },

    /// A board intent was issued before the game produced a map.
    #[error("no active game board")]
    NoActiveBoard,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for room client operations.
pub type Result<T> = std::result::Result<T, KingdomsError>;
