//! Explicit session context handed to the connection and chat components.
//!
//! A [`Session`] is created at login and dropped at logout. It carries who the
//! player is and a [`TokenProvider`] capability that yields a fresh bearer
//! token each time a connection authenticates; token refresh and retry are the
//! provider's concern.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{KingdomsError, Result};
use crate::protocol::UserId;

/// Who the local player is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// Capability that produces a valid bearer token or fails.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Produce a bearer token for the `auth` handshake.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::Token`] if no valid token can be obtained.
    async fn access_token(&self) -> Result<String>;
}

/// A [`TokenProvider`] that always returns the same token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        if self.0.is_empty() {
            return Err(KingdomsError::Token("token is empty".into()));
        }
        Ok(self.0.clone())
    }
}

/// Identity plus token capability for one logged-in user.
#[derive(Clone)]
pub struct Session {
    identity: Identity,
    tokens: Arc<dyn TokenProvider>,
}

impl Session {
    pub fn new(identity: Identity, tokens: impl TokenProvider) -> Self {
        Self {
            identity,
            tokens: Arc::new(tokens),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Ask the token capability for a bearer token.
    ///
    /// # Errors
    ///
    /// Propagates the provider's failure.
    pub async fn access_token(&self) -> Result<String> {
        self.tokens.access_token().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
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

    #[tokio::test]
    async fn static_token_is_returned() {
        let session = Session::new(Identity::new(1, "ann"), StaticToken::new("tok"));
        assert_eq!(session.access_token().await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn empty_static_token_fails() {
        let session = Session::new(Identity::new(1, "ann"), StaticToken::new(""));
        let err = session.access_token().await.unwrap_err();
        assert!(matches!(err, KingdomsError::Token(_)));
    }

    #[test]
    fn custom_provider_is_consulted_each_time() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct Rotating(AtomicU32);

        #[async_trait]
        impl TokenProvider for Rotating {
            async fn access_token(&self) -> Result<String> {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                Ok(format!("tok-{n}"))
            }
        }

        let session = Session::new(Identity::new(1, "ann"), Rotating(AtomicU32::new(0)));
        let first = tokio_test::assert_ok!(tokio_test::block_on(session.access_token()));
        let second = tokio_test::assert_ok!(tokio_test::block_on(session.access_token()));
        assert_eq!((first.as_str(), second.as_str()), ("tok-0", "tok-1"));
    }

    #[test]
    fn debug_hides_token() {
        let session = Session::new(Identity::new(1, "ann"), StaticToken::new("secret"));
        let debug = format!("{session:?}");
        assert!(debug.contains("ann"));
        assert!(!debug.contains("secret"));
    }
}
