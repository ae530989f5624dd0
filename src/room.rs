//! Room state machine.
//!
//! ```text
//!  Connecting ──auth──▶ Config ──start──▶ Active
//!       ▲                  │                 │
//!       └──reconnecting────┘                 │
//!  any ──terminal failure──▶ Error(category)
//! ```
//!
//! The machine is driven only by inbound server messages and connection
//! lifecycle events. Outbound intents never change state directly; the room
//! changes when the server answers with `players` or `update`.
//!
//! Every state slice lives in its own [`watch`] channel and is replaced in a
//! single step, so subscribers never observe a half-applied update.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::board::{Cursor, GameMap};
use crate::chat::{ChatLine, ChatLog};
use crate::close_codes::ErrorCategory;
use crate::connection::ConnectionEvent;
use crate::protocol::{ColorIndex, GameStat, Player, PlayerData, ServerMessage, UpdatePayload, UserId};

// ── Phase ───────────────────────────────────────────────────────────

/// Visible phase of the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Waiting for the transport or the handshake acknowledgement.
    #[default]
    Connecting,
    /// Lobby: players pick colors and mark themselves ready.
    Config,
    /// A game is running.
    Active,
    /// Terminal failure. Recovery needs a fresh connection.
    Error(ErrorCategory),
}

impl Phase {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The failure category, if the room is in the error phase.
    pub fn error(&self) -> Option<ErrorCategory> {
        match self {
            Self::Error(category) => Some(*category),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Config => f.write_str("config"),
            Self::Active => f.write_str("active"),
            Self::Error(category) => write!(f, "error: {category}"),
        }
    }
}

// ── Roster ──────────────────────────────────────────────────────────

/// Room members and the colors they hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    players: Vec<Player>,
    taken_colors: Vec<ColorIndex>,
}

impl Roster {
    /// Build a roster; taken colors are exactly the players' colors, in order.
    pub fn from_players(players: Vec<Player>) -> Self {
        let taken_colors = players.iter().map(|player| player.color).collect();
        Self {
            players,
            taken_colors,
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn taken_colors(&self) -> &[ColorIndex] {
        &self.taken_colors
    }

    pub fn color_taken(&self, color: ColorIndex) -> bool {
        self.taken_colors.contains(&color)
    }

    pub fn player(&self, id: UserId) -> Option<&Player> {
        self.players.iter().find(|player| player.id == id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

// ── Board snapshot ──────────────────────────────────────────────────

/// Everything one `update` carries, replaced as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub map: GameMap,
    pub turn: u32,
    pub stat: (PlayerData, GameStat),
    /// Server cursor; `None` when the player has no active path.
    pub cursor: Option<Cursor>,
    /// Source cell of the step executed this turn.
    pub prev_cursor: Option<Cursor>,
}

impl From<UpdatePayload> for BoardSnapshot {
    fn from(update: UpdatePayload) -> Self {
        Self {
            map: update.map,
            turn: update.turn,
            stat: update.stat,
            cursor: update.cursor,
            prev_cursor: update.prev_cursor,
        }
    }
}

// ── Machine ─────────────────────────────────────────────────────────

/// What [`RoomStateMachine::apply`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// `Connecting` moved to `Config`.
    Authenticated,
    /// The roster was replaced.
    Roster(Arc<Roster>),
    /// `Config` moved to `Active`.
    Started,
    /// The board snapshot was replaced.
    Board(Arc<BoardSnapshot>),
    /// A chat line was appended.
    Chat(ChatLine),
    /// The message does not apply in the current phase.
    Ignored,
}

/// Holds the room's observable state.
#[derive(Debug)]
pub struct RoomStateMachine {
    phase: watch::Sender<Phase>,
    roster: watch::Sender<Arc<Roster>>,
    board: watch::Sender<Option<Arc<BoardSnapshot>>>,
    chat: watch::Sender<ChatLog>,
}

impl Default for RoomStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStateMachine {
    /// A machine in [`Phase::Connecting`] with no roster, board or chat.
    pub fn new() -> Self {
        Self {
            phase: watch::Sender::new(Phase::Connecting),
            roster: watch::Sender::new(Arc::new(Roster::default())),
            board: watch::Sender::new(None),
            chat: watch::Sender::new(ChatLog::new()),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn roster(&self) -> Arc<Roster> {
        Arc::clone(&self.roster.borrow())
    }

    pub fn board(&self) -> Option<Arc<BoardSnapshot>> {
        self.board.borrow().clone()
    }

    pub fn chat_lines(&self) -> Vec<ChatLine> {
        self.chat.borrow().lines().to_vec()
    }

    // ── Subscriptions ───────────────────────────────────────────────

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn subscribe_roster(&self) -> watch::Receiver<Arc<Roster>> {
        self.roster.subscribe()
    }

    pub fn subscribe_board(&self) -> watch::Receiver<Option<Arc<BoardSnapshot>>> {
        self.board.subscribe()
    }

    pub fn subscribe_chat(&self) -> watch::Receiver<ChatLog> {
        self.chat.subscribe()
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Apply one decoded server message.
    ///
    /// Messages that do not fit the current phase are ignored; nothing is
    /// applied once the room is in [`Phase::Error`].
    pub fn apply(&self, message: ServerMessage) -> Applied {
        self.apply_then(message, |_| {})
    }

    /// Like [`apply`](Self::apply), but runs `before_publish` on a new board
    /// snapshot before board subscribers can see it. State derived from the
    /// board (the move queue) is brought up to date there, so observers never
    /// read a new map next to stale derived state.
    pub fn apply_then(
        &self,
        message: ServerMessage,
        before_publish: impl FnOnce(&Arc<BoardSnapshot>),
    ) -> Applied {
        let phase = self.phase();
        if phase.is_error() {
            debug!(%phase, "room failed, message ignored");
            return Applied::Ignored;
        }

        match message {
            ServerMessage::Auth { status } => {
                if status == Some(false) {
                    warn!("handshake acknowledged with status false");
                }
                if phase == Phase::Connecting {
                    self.transition(Phase::Config);
                    Applied::Authenticated
                } else {
                    debug!(%phase, "auth ignored");
                    Applied::Ignored
                }
            }
            ServerMessage::Players { players } => {
                if !matches!(phase, Phase::Config | Phase::Active) {
                    debug!(%phase, "roster ignored");
                    return Applied::Ignored;
                }
                let roster = Arc::new(Roster::from_players(players));
                debug!(
                    players = roster.len(),
                    taken = ?roster.taken_colors(),
                    "roster replaced"
                );
                self.roster.send_replace(Arc::clone(&roster));
                Applied::Roster(roster)
            }
            ServerMessage::Start => {
                if phase == Phase::Config {
                    self.transition(Phase::Active);
                    Applied::Started
                } else {
                    debug!(%phase, "start ignored");
                    Applied::Ignored
                }
            }
            ServerMessage::Update(update) => {
                if phase != Phase::Active {
                    debug!(%phase, "update ignored");
                    return Applied::Ignored;
                }
                let snapshot = Arc::new(BoardSnapshot::from(*update));
                debug!(
                    turn = snapshot.turn,
                    cursor = ?snapshot.cursor,
                    prev_cursor = ?snapshot.prev_cursor,
                    "board replaced"
                );
                before_publish(&snapshot);
                self.board.send_replace(Some(Arc::clone(&snapshot)));
                Applied::Board(snapshot)
            }
            ServerMessage::Chat(message) => {
                let mut appended = None;
                self.chat.send_modify(|log| appended = Some(log.receive(message)));
                appended.map_or(Applied::Ignored, Applied::Chat)
            }
        }
    }

    /// Apply a connection lifecycle event.
    pub fn handle(&self, event: &ConnectionEvent) -> Applied {
        self.handle_then(event, |_| {})
    }

    /// Like [`handle`](Self::handle), with a board hook as in
    /// [`apply_then`](Self::apply_then).
    pub fn handle_then(
        &self,
        event: &ConnectionEvent,
        before_publish: impl FnOnce(&Arc<BoardSnapshot>),
    ) -> Applied {
        match event {
            ConnectionEvent::Message(message) => self.apply_then(message.clone(), before_publish),
            ConnectionEvent::Reconnecting { .. } => {
                if !self.phase().is_error() {
                    self.transition(Phase::Connecting);
                }
                Applied::Ignored
            }
            ConnectionEvent::Failed(category) => {
                self.fail(*category);
                Applied::Ignored
            }
            ConnectionEvent::Opened { .. } | ConnectionEvent::Closed => Applied::Ignored,
        }
    }

    /// Enter the terminal error phase. The first failure wins.
    pub fn fail(&self, category: ErrorCategory) {
        if self.phase().is_error() {
            return;
        }
        self.transition(Phase::Error(category));
    }

    fn transition(&self, next: Phase) {
        let previous = self.phase.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "room phase changed");
        }
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
    use crate::board::{Cell, CellType};
    use crate::protocol::{ChatMessage, PlayerStatus};

    fn player(id: UserId, color: ColorIndex) -> Player {
        Player {
            id,
            username: format!("p{id}"),
            color,
            status: PlayerStatus::NotReady,
        }
    }

    fn update(turn: u32, cursor: Option<Cursor>) -> ServerMessage {
        ServerMessage::Update(Box::new(UpdatePayload {
            map: GameMap::from_rows(vec![vec![Cell::new(CellType::Field); 2]; 2]).unwrap(),
            turn,
            stat: (player(1, 0), GameStat { fields: 1, power: 1 }),
            cursor,
            prev_cursor: None,
        }))
    }

    fn active() -> RoomStateMachine {
        let room = RoomStateMachine::new();
        room.apply(ServerMessage::Auth { status: Some(true) });
        room.apply(ServerMessage::Start);
        room
    }

    #[test]
    fn happy_path_phases() {
        let room = RoomStateMachine::new();
        assert_eq!(room.phase(), Phase::Connecting);
        assert_eq!(
            room.apply(ServerMessage::Auth { status: None }),
            Applied::Authenticated
        );
        assert_eq!(room.phase(), Phase::Config);
        assert_eq!(room.apply(ServerMessage::Start), Applied::Started);
        assert_eq!(room.phase(), Phase::Active);
    }

    #[test]
    fn start_before_auth_is_ignored() {
        let room = RoomStateMachine::new();
        assert_eq!(room.apply(ServerMessage::Start), Applied::Ignored);
        assert_eq!(room.phase(), Phase::Connecting);
    }

    #[test]
    fn roster_recomputes_taken_colors() {
        let room = RoomStateMachine::new();
        room.apply(ServerMessage::Auth { status: None });
        room.apply(ServerMessage::Players {
            players: vec![player(1, 0), player(2, 3)],
        });
        let roster = room.roster();
        assert_eq!(roster.taken_colors(), &[0, 3]);
        assert!(roster.color_taken(3));
        assert!(!roster.color_taken(1));

        room.apply(ServerMessage::Players {
            players: vec![player(2, 3)],
        });
        assert_eq!(room.roster().taken_colors(), &[3]);
        assert!(room.roster().player(1).is_none());
    }

    #[test]
    fn update_outside_active_is_ignored() {
        let room = RoomStateMachine::new();
        room.apply(ServerMessage::Auth { status: None });
        assert_eq!(room.apply(update(1, None)), Applied::Ignored);
        assert!(room.board().is_none());
    }

    #[test]
    fn update_replaces_board_in_one_step() {
        let room = active();
        let mut board_rx = room.subscribe_board();

        room.apply(update(1, Some(Cursor::new(0, 0))));
        room.apply(update(2, None));

        assert!(board_rx.has_changed().unwrap());
        let seen = board_rx.borrow_and_update().clone().unwrap();
        assert_eq!(seen.turn, 2);
        assert_eq!(seen.cursor, None);
    }

    #[test]
    fn board_hook_runs_before_subscribers_see_the_board() {
        let room = active();
        let board_rx = room.subscribe_board();
        let mut seen_during_hook = None;

        room.apply_then(update(4, None), |snapshot| {
            seen_during_hook = Some((snapshot.turn, room.board(), board_rx.has_changed().unwrap()));
        });

        assert_eq!(seen_during_hook, Some((4, None, false)));
        assert_eq!(room.board().unwrap().turn, 4);
        assert!(board_rx.has_changed().unwrap());
    }

    #[test]
    fn board_hook_is_skipped_for_ignored_updates() {
        let room = RoomStateMachine::new();
        let mut called = false;
        assert_eq!(room.apply_then(update(1, None), |_| called = true), Applied::Ignored);
        assert!(!called);
    }

    #[test]
    fn chat_is_accepted_in_every_live_phase() {
        let room = RoomStateMachine::new();
        let chat = ChatMessage {
            user_id: 1,
            message: "<i>gg</i>".into(),
            username: "p1".into(),
            timestamp: "2026-03-01T12:00:00.000Z".into(),
        };
        let Applied::Chat(line) = room.apply(ServerMessage::Chat(chat.clone())) else {
            panic!("expected chat line");
        };
        assert_eq!(line.text, "<i>gg</i>");
        room.apply(ServerMessage::Auth { status: None });
        room.apply(ServerMessage::Chat(chat));
        assert_eq!(room.chat_lines().len(), 2);
    }

    #[test]
    fn error_is_terminal() {
        let room = active();
        room.handle(&ConnectionEvent::Failed(ErrorCategory::RoomFull));
        assert_eq!(room.phase(), Phase::Error(ErrorCategory::RoomFull));

        room.fail(ErrorCategory::UnknownError);
        room.handle(&ConnectionEvent::Reconnecting {
            attempt: 1,
            max_attempts: 10,
        });
        assert_eq!(room.apply(ServerMessage::Start), Applied::Ignored);
        assert_eq!(room.phase().error(), Some(ErrorCategory::RoomFull));
    }

    #[test]
    fn reconnecting_returns_to_connecting() {
        let room = RoomStateMachine::new();
        room.apply(ServerMessage::Auth { status: None });
        room.handle(&ConnectionEvent::Reconnecting {
            attempt: 1,
            max_attempts: 10,
        });
        assert_eq!(room.phase(), Phase::Connecting);
        room.handle(&ConnectionEvent::Message(ServerMessage::Auth { status: None }));
        assert_eq!(room.phase(), Phase::Config);
    }

    #[tokio::test]
    async fn phase_subscribers_are_notified() {
        let room = RoomStateMachine::new();
        let mut phase_rx = room.subscribe_phase();
        room.apply(ServerMessage::Auth { status: None });
        phase_rx.changed().await.unwrap();
        assert_eq!(*phase_rx.borrow(), Phase::Config);
    }
}
