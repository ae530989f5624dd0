//! Room chat: outbound [`ChatChannel`] and the append-only [`ChatLog`].
//!
//! Sent lines are not echoed locally. The server broadcasts every line back
//! to all members, the sender included, and the log is built only from those
//! broadcasts so every client sees the same order.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use tracing::debug;

use crate::connection::MessageSink;
use crate::error::{KingdomsError, Result};
use crate::protocol::{ChatMessage, ClientMessage, UserId};
use crate::session::Identity;

/// Text sent by [`RoomClient::announce_ready`](crate::client::RoomClient::announce_ready).
pub const READY_ANNOUNCEMENT: &str = "I am ready";

// ── Outbound ────────────────────────────────────────────────────────

/// Sends chat lines stamped with the session identity.
#[derive(Debug, Clone)]
pub struct ChatChannel<S> {
    sink: S,
    identity: Identity,
}

impl<S: MessageSink> ChatChannel<S> {
    pub fn new(sink: S, identity: Identity) -> Self {
        Self { sink, identity }
    }

    /// Trim `text` and send it as a `chat` message.
    ///
    /// Returns the message as sent.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::EmptyChatMessage`] without touching the
    /// network if nothing is left after trimming, or the sink's error.
    pub fn send(&self, text: &str) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            debug!("empty chat message rejected");
            return Err(KingdomsError::EmptyChatMessage);
        }

        let message = ChatMessage {
            user_id: self.identity.user_id,
            message: text.to_string(),
            username: self.identity.username.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.sink.send(ClientMessage::Chat(message.clone()))?;
        Ok(message)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// One received chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    /// Position in the log, starting at 0.
    pub sequence_id: u64,
    pub user_id: UserId,
    pub username: String,
    /// Literal text with control characters removed. Never markup.
    pub text: String,
    /// Timestamp as stamped by the sender.
    pub timestamp: String,
    /// `timestamp` converted to local time, if it parsed.
    pub timestamp_local: Option<DateTime<Local>>,
}

/// Append-only chat history in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatLog {
    lines: Vec<ChatLine>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received message and return the new line.
    ///
    /// Every call appends exactly one line; duplicates are kept.
    pub fn receive(&mut self, message: ChatMessage) -> ChatLine {
        let timestamp_local = DateTime::parse_from_rfc3339(&message.timestamp)
            .ok()
            .map(|parsed| parsed.with_timezone(&Local));
        let line = ChatLine {
            sequence_id: self.lines.len() as u64,
            user_id: message.user_id,
            username: plain_text(&message.username),
            text: plain_text(&message.message),
            timestamp: message.timestamp,
            timestamp_local,
        };
        self.lines.push(line.clone());
        line
    }

    pub fn lines(&self) -> &[ChatLine] {
        &self.lines
    }

    pub fn last(&self) -> Option<&ChatLine> {
        self.lines.last()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Reduce untrusted text to its plain-text content.
///
/// The text is kept literally: `<b>` stays the three characters `<b>` and is
/// never interpreted as markup. Control characters other than newline are
/// removed and surrounding whitespace is trimmed.
pub fn plain_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c == '\n' || !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
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
    use std::sync::Mutex;

    /// Records every message instead of sending it.
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<ClientMessage>>,
    }

    impl MessageSink for Recorder {
        fn send(&self, message: ClientMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn channel() -> ChatChannel<Recorder> {
        ChatChannel::new(Recorder::default(), Identity::new(3, "bob"))
    }

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            user_id: 3,
            message: text.into(),
            username: "bob".into(),
            timestamp: "2026-03-01T12:00:00.000Z".into(),
        }
    }

    #[test]
    fn send_trims_and_stamps() {
        let chat = channel();
        let sent = chat.send("  hello  ").unwrap();
        assert_eq!(sent.message, "hello");
        assert_eq!(sent.user_id, 3);
        assert_eq!(sent.username, "bob");
        assert!(DateTime::parse_from_rfc3339(&sent.timestamp).is_ok());
        assert!(sent.timestamp.ends_with('Z'));

        let recorded = chat.sink.sent.lock().unwrap();
        assert_eq!(recorded.as_slice(), &[ClientMessage::Chat(sent.clone())]);
    }

    #[test]
    fn blank_text_never_reaches_the_sink() {
        let chat = channel();
        assert!(matches!(
            chat.send(" \t\n "),
            Err(KingdomsError::EmptyChatMessage)
        ));
        assert!(chat.sink.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn log_appends_every_message() {
        let mut log = ChatLog::new();
        log.receive(message("hi"));
        let second = log.receive(message("hi"));
        assert_eq!(log.len(), 2);
        assert_eq!(second.sequence_id, 1);
        assert_eq!(log.lines()[0].text, "hi");
    }

    #[test]
    fn log_parses_timestamp() {
        let mut log = ChatLog::new();
        let line = log.receive(message("hi"));
        assert!(line.timestamp_local.is_some());

        let mut bad = message("hi");
        bad.timestamp = "yesterday".into();
        let line = log.receive(bad);
        assert_eq!(line.timestamp, "yesterday");
        assert!(line.timestamp_local.is_none());
    }

    #[test]
    fn log_keeps_markup_as_literal_text() {
        let mut log = ChatLog::new();
        let line = log.receive(message("<b>bold</b> <script>alert(1)</script>move"));
        assert_eq!(line.text, "<b>bold</b> <script>alert(1)</script>move");
    }

    #[test]
    fn plain_text_never_loses_visible_characters() {
        assert_eq!(plain_text("press <Enter> to attack"), "press <Enter> to attack");
        assert_eq!(plain_text("a<b and b>c"), "a<b and b>c");
        assert_eq!(plain_text("a < b and c <3"), "a < b and c <3");
        assert_eq!(plain_text("x\u{7}y\u{1b}[31m"), "xy[31m");
        assert_eq!(plain_text("  two\nlines\r "), "two\nlines");
    }
}
