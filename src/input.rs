//! Injected input events for the move queue.
//!
//! The board UI (or a test) feeds [`InputEvent`]s through an [`InputSource`];
//! nothing in the crate reads a keyboard directly.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::board::{Cursor, Direction};

/// A player intent coming from the board surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Move the cursor one cell.
    Arrow(Direction),
    /// Drop the whole planned path.
    Cancel,
    /// Jump the cursor to a cell.
    Click(Cursor),
}

impl InputEvent {
    /// Map a DOM-style key name to an event.
    ///
    /// ```
    /// use kingdoms_room_client::board::Direction;
    /// use kingdoms_room_client::input::InputEvent;
    ///
    /// assert_eq!(InputEvent::from_key("ArrowLeft"), Some(InputEvent::Arrow(Direction::Left)));
    /// assert_eq!(InputEvent::from_key("Escape"), Some(InputEvent::Cancel));
    /// assert_eq!(InputEvent::from_key("Enter"), None);
    /// ```
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ArrowUp" => Some(Self::Arrow(Direction::Up)),
            "ArrowDown" => Some(Self::Arrow(Direction::Down)),
            "ArrowLeft" => Some(Self::Arrow(Direction::Left)),
            "ArrowRight" => Some(Self::Arrow(Direction::Right)),
            "Escape" => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// A source of player input.
///
/// [`next_event`](InputSource::next_event) must be cancel-safe because the
/// room event loop polls it inside `tokio::select!`.
#[async_trait]
pub trait InputSource: Send {
    /// The next event, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<InputEvent>;
}

#[async_trait]
impl InputSource for mpsc::Receiver<InputEvent> {
    async fn next_event(&mut self) -> Option<InputEvent> {
        self.recv().await
    }
}

#[async_trait]
impl InputSource for mpsc::UnboundedReceiver<InputEvent> {
    async fn next_event(&mut self) -> Option<InputEvent> {
        self.recv().await
    }
}

/// An input source that never yields; for sessions without a board surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

#[async_trait]
impl InputSource for NoInput {
    async fn next_event(&mut self) -> Option<InputEvent> {
        std::future::pending().await
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
    fn arrow_keys() {
        for (key, direction) in [
            ("ArrowUp", Direction::Up),
            ("ArrowDown", Direction::Down),
            ("ArrowLeft", Direction::Left),
            ("ArrowRight", Direction::Right),
        ] {
            assert_eq!(InputEvent::from_key(key), Some(InputEvent::Arrow(direction)));
        }
        assert_eq!(InputEvent::from_key("arrowup"), None);
    }

    #[tokio::test]
    async fn channel_source_yields_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(InputEvent::Cancel).unwrap();
        tx.send(InputEvent::Click(Cursor::new(1, 2))).unwrap();
        drop(tx);

        assert_eq!(rx.next_event().await, Some(InputEvent::Cancel));
        assert_eq!(rx.next_event().await, Some(InputEvent::Click(Cursor::new(1, 2))));
        assert_eq!(rx.next_event().await, None);
    }
}
