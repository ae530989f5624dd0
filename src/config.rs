//! Room connection configuration.

use std::time::Duration;

use crate::error::{KingdomsError, Result};
use crate::session::Identity;

/// Default number of reconnection attempts after transient closes.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default capacity of the bounded connection event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// The fixed lobby color palette. Players pick colors by index.
pub const PALETTE: [&str; 5] = [
    "#0369A1", // sky
    "#D97706", // amber
    "#059669", // emerald
    "#C026D3", // fuchsia
    "#DC2626", // red
];

/// Environment variable holding the WebSocket base URL.
pub const WS_BASE_URL_ENV: &str = "KINGDOMS_WS_BASE_URL";
/// Environment variable overriding the reconnect delay, in milliseconds.
pub const RECONNECT_DELAY_ENV: &str = "KINGDOMS_RECONNECT_DELAY_MS";
/// Environment variable overriding the reconnect attempt bound.
pub const MAX_RECONNECT_ATTEMPTS_ENV: &str = "KINGDOMS_MAX_RECONNECT_ATTEMPTS";

/// Configuration for a room connection.
///
/// # Example
///
/// ```
/// use kingdoms_room_client::config::RoomConfig;
/// use std::time::Duration;
///
/// let config = RoomConfig::new("wss://play.example.com")
///     .with_reconnect_delay(Duration::from_millis(250));
/// assert_eq!(config.max_reconnect_attempts, 10);
/// ```
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// WebSocket base URL, e.g. `wss://play.example.com`.
    pub ws_base: String,
    /// How many times a transient (`1008`) close is retried before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before each reconnection attempt. Zero retries immediately.
    pub reconnect_delay: Duration,
    /// Capacity of the bounded connection event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`ConnectionManager::close`](crate::connection::ConnectionManager::close)
    /// waits for the background task before aborting it.
    pub shutdown_timeout: Duration,
}

impl RoomConfig {
    /// Create a configuration with the given WebSocket base URL and defaults.
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::ZERO,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Build a configuration from `KINGDOMS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::Config`] if the base URL is missing or an
    /// override is not a number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let ws_base = lookup(WS_BASE_URL_ENV)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| KingdomsError::Config(format!("{WS_BASE_URL_ENV} is not set")))?;
        let mut config = Self::new(ws_base.trim());

        if let Some(raw) = lookup(RECONNECT_DELAY_ENV) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                KingdomsError::Config(format!("{RECONNECT_DELAY_ENV} must be a number, got {raw:?}"))
            })?;
            config.reconnect_delay = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup(MAX_RECONNECT_ATTEMPTS_ENV) {
            config.max_reconnect_attempts = raw.trim().parse().map_err(|_| {
                KingdomsError::Config(format!(
                    "{MAX_RECONNECT_ATTEMPTS_ENV} must be a number, got {raw:?}"
                ))
            })?;
        }
        Ok(config)
    }

    /// Set the reconnection attempt bound.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the delay before each reconnection attempt.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// URL of the room endpoint for the given player.
    pub fn room_url(&self, room_id: &str, identity: &Identity) -> String {
        format!(
            "{}/ws/rooms/{}/?user_id={}&username={}",
            self.ws_base.trim_end_matches('/'),
            urlencoding::encode(room_id),
            identity.user_id,
            urlencoding::encode(&identity.username),
        )
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
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = RoomConfig::new("ws://localhost:8000");
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.reconnect_delay, Duration::ZERO);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = RoomConfig::new("ws://x").with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn room_url_encodes_query() {
        let config = RoomConfig::new("wss://play.example.com/");
        let url = config.room_url("abc", &Identity::new(42, "Ann Lee&co"));
        assert_eq!(
            url,
            "wss://play.example.com/ws/rooms/abc/?user_id=42&username=Ann%20Lee%26co"
        );
    }

    #[test]
    fn env_requires_base_url() {
        let err = RoomConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, KingdomsError::Config(_)));
    }

    #[test]
    fn env_overrides() {
        let config = RoomConfig::from_lookup(lookup(&[
            (WS_BASE_URL_ENV, "ws://host:1"),
            (RECONNECT_DELAY_ENV, "500"),
            (MAX_RECONNECT_ATTEMPTS_ENV, "3"),
        ]))
        .unwrap();
        assert_eq!(config.ws_base, "ws://host:1");
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.max_reconnect_attempts, 3);
    }

    #[test]
    fn env_rejects_non_numeric_delay() {
        let err = RoomConfig::from_lookup(lookup(&[
            (WS_BASE_URL_ENV, "ws://host:1"),
            (RECONNECT_DELAY_ENV, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, KingdomsError::Config(_)));
    }

    #[test]
    fn palette_has_five_colors() {
        assert_eq!(PALETTE.len(), 5);
    }
}
