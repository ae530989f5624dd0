//! Close-code classification for room connections.
//!
//! The room server ends a session by closing the socket with an application
//! close code. Code `1008` is reserved for transient conditions and is retried
//! by the [`ConnectionManager`](crate::connection::ConnectionManager); every
//! other code is terminal and maps to a fixed [`ErrorCategory`].

use std::fmt;

/// Close code the server uses for transient, retryable conditions.
pub const TRANSIENT_CLOSE_CODE: u16 = 1008;

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Terminal failure categories shown to the user.
///
/// Exactly one category is displayed at a time and there is no automatic
/// recovery: the consumer must open a fresh connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// `4010`: the room has no free slots.
    RoomFull,
    /// `4020`: the game is already in progress.
    GameAlreadyStarted,
    /// `4030`, `4031`: the token was rejected or the auth flow was violated.
    AuthorizationFailure,
    /// `4040`: the room does not exist.
    RoomNotFound,
    /// `5000`: the server failed internally.
    InternalServerError,
    /// Any close code outside the table.
    UnknownError,
    /// Transient closes kept happening until the reconnect bound was hit.
    CouldNotConnect,
    /// The transport itself failed (connect error, receive error).
    Connectivity,
}

/// Coarse error taxonomy the categories fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Retried locally with a bounded number of attempts.
    TransientConnectivity,
    /// The user must re-authenticate.
    Authorization,
    /// The user must pick a different room.
    CapacityLifecycle,
    /// Surfaced as-is; nothing the client can do.
    ServerInternal,
}

impl ErrorCategory {
    /// Classify a close code.
    ///
    /// Returns `None` for [`TRANSIENT_CLOSE_CODE`], which is not an error
    /// category but a request to reconnect.
    pub fn from_close_code(code: u16) -> Option<Self> {
        match code {
            TRANSIENT_CLOSE_CODE => None,
            4010 => Some(Self::RoomFull),
            4020 => Some(Self::GameAlreadyStarted),
            4030 | 4031 => Some(Self::AuthorizationFailure),
            4040 => Some(Self::RoomNotFound),
            5000 => Some(Self::InternalServerError),
            _ => Some(Self::UnknownError),
        }
    }

    /// Short human-readable label for the category.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RoomFull => "room full",
            Self::GameAlreadyStarted => "game already started",
            Self::AuthorizationFailure => "authorization failure",
            Self::RoomNotFound => "room not found",
            Self::InternalServerError => "internal server error",
            Self::UnknownError => "unknown error",
            Self::CouldNotConnect => "could not connect",
            Self::Connectivity => "connection error",
        }
    }

    /// Longer explanation suitable for an error screen.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RoomFull => "The room has reached its player limit. Choose another room.",
            Self::GameAlreadyStarted => {
                "The game in this room has already started. Choose another room."
            }
            Self::AuthorizationFailure => "Your session could not be verified. Please log in again.",
            Self::RoomNotFound => "The room does not exist or has been closed.",
            Self::InternalServerError => "The server failed to process the room.",
            Self::UnknownError => "The connection was closed for an unknown reason.",
            Self::CouldNotConnect => "The server could not be reached after several attempts.",
            Self::Connectivity => "Something went wrong with the connection.",
        }
    }

    /// The taxonomy class of this category.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CouldNotConnect | Self::Connectivity => ErrorClass::TransientConnectivity,
            Self::AuthorizationFailure => ErrorClass::Authorization,
            Self::RoomFull | Self::GameAlreadyStarted | Self::RoomNotFound => {
                ErrorClass::CapacityLifecycle
            }
            Self::InternalServerError | Self::UnknownError => ErrorClass::ServerInternal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
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
    fn close_code_table() {
        assert_eq!(ErrorCategory::from_close_code(4010), Some(ErrorCategory::RoomFull));
        assert_eq!(
            ErrorCategory::from_close_code(4020),
            Some(ErrorCategory::GameAlreadyStarted)
        );
        assert_eq!(
            ErrorCategory::from_close_code(4030),
            Some(ErrorCategory::AuthorizationFailure)
        );
        assert_eq!(
            ErrorCategory::from_close_code(4031),
            Some(ErrorCategory::AuthorizationFailure)
        );
        assert_eq!(ErrorCategory::from_close_code(4040), Some(ErrorCategory::RoomNotFound));
        assert_eq!(
            ErrorCategory::from_close_code(5000),
            Some(ErrorCategory::InternalServerError)
        );
    }

    #[test]
    fn transient_code_is_not_a_category() {
        assert_eq!(ErrorCategory::from_close_code(TRANSIENT_CLOSE_CODE), None);
    }

    #[test]
    fn unlisted_codes_are_unknown() {
        for code in [1000, ABNORMAL_CLOSE_CODE, 4100, 4999] {
            assert_eq!(
                ErrorCategory::from_close_code(code),
                Some(ErrorCategory::UnknownError),
                "code {code}"
            );
        }
    }

    #[test]
    fn labels_match_display() {
        assert_eq!(ErrorCategory::RoomFull.to_string(), "room full");
        assert_eq!(ErrorCategory::CouldNotConnect.to_string(), "could not connect");
    }

    #[test]
    fn classes() {
        assert_eq!(ErrorCategory::RoomNotFound.class(), ErrorClass::CapacityLifecycle);
        assert_eq!(
            ErrorCategory::AuthorizationFailure.class(),
            ErrorClass::Authorization
        );
        assert_eq!(
            ErrorCategory::CouldNotConnect.class(),
            ErrorClass::TransientConnectivity
        );
        assert_eq!(
            ErrorCategory::InternalServerError.class(),
            ErrorClass::ServerInternal
        );
    }
}
