//! Planned attack paths.
//!
//! Arrow keys walk the local cursor across the board. Each step taken from an
//! eligible cell is sent to the server as a `move` and recorded in the
//! [`DirectionQueue`] under its source cell. The server executes one queued
//! step per turn and reports the executed step's source as `prev_cursor`;
//! [`MoveQueueController::reconcile`] then pops the oldest direction queued at
//! that cell.
//!
//! A cell is eligible when the player owns it with power above one, or when a
//! plan already exists anywhere on the board (continuing a plan is always
//! allowed).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::board::{CellType, Cursor, CursorMove, Direction};
use crate::connection::MessageSink;
use crate::error::{KingdomsError, Result};
use crate::input::InputEvent;
use crate::protocol::{ClientMessage, UserId};
use crate::room::BoardSnapshot;

/// Minimum power a cell needs to start a new plan, exclusive.
const MIN_SOURCE_POWER: u32 = 1;

// ── DirectionQueue ──────────────────────────────────────────────────

/// Per-cell FIFO of planned directions, keyed by the step's source cell.
///
/// Cells never map to an empty queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectionQueue {
    entries: BTreeMap<Cursor, VecDeque<Direction>>,
}

impl DirectionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cells with at least one planned direction.
    pub fn cell_count(&self) -> usize {
        self.entries.len()
    }

    /// Total planned steps across all cells.
    pub fn step_count(&self) -> usize {
        self.entries.values().map(VecDeque::len).sum()
    }

    /// Number of steps planned from `cell`.
    pub fn queued_at(&self, cell: Cursor) -> usize {
        self.entries.get(&cell).map_or(0, VecDeque::len)
    }

    /// Planned directions from `cell` in execution order.
    pub fn sequence_at(&self, cell: Cursor) -> Vec<Direction> {
        self.entries
            .get(&cell)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Distinct planned directions from `cell`, for drawing markers.
    pub fn directions_at(&self, cell: Cursor) -> BTreeSet<Direction> {
        self.entries
            .get(&cell)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Iterate over cells with planned steps.
    pub fn cells(&self) -> impl Iterator<Item = (Cursor, &VecDeque<Direction>)> {
        self.entries.iter().map(|(cell, queue)| (*cell, queue))
    }

    /// Append a direction to `cell`'s queue.
    pub fn push(&mut self, cell: Cursor, direction: Direction) {
        self.entries.entry(cell).or_default().push_back(direction);
    }

    /// Remove the oldest direction queued at `cell`, dropping the entry once
    /// it is empty.
    pub fn pop_front(&mut self, cell: Cursor) -> Option<Direction> {
        let queue = self.entries.get_mut(&cell)?;
        let popped = queue.pop_front();
        if queue.is_empty() {
            self.entries.remove(&cell);
        }
        popped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop entries for cells outside a `height` x `width` grid. Returns how
    /// many were dropped.
    pub fn retain_within(&mut self, height: usize, width: usize) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|cell, _| cell.row < height && cell.col < width);
        before - self.entries.len()
    }

    /// Bring the queue in line with a server update.
    ///
    /// No server cursor clears everything. Otherwise entries that fell off
    /// the map are dropped and the step executed from `prev_cursor` is
    /// popped. Returns the popped direction.
    pub fn reconcile(&mut self, snapshot: &BoardSnapshot) -> Option<Direction> {
        if snapshot.cursor.is_none() {
            self.clear();
            return None;
        }
        let dropped = self.retain_within(snapshot.map.height(), snapshot.map.width());
        if dropped > 0 {
            debug!(dropped, "planned cells left the map");
        }
        snapshot.prev_cursor.and_then(|cell| self.pop_front(cell))
    }
}

// ── Controller ──────────────────────────────────────────────────────

/// Turns movement intents into `move`/`cursor` messages and keeps the
/// direction queue consistent with the server.
#[derive(Debug)]
pub struct MoveQueueController<S> {
    sink: S,
    player: UserId,
    board: Option<Arc<BoardSnapshot>>,
    cursor: watch::Sender<Option<Cursor>>,
    queue: watch::Sender<DirectionQueue>,
}

impl<S: MessageSink> MoveQueueController<S> {
    /// A controller for `player` with no board and an empty queue.
    pub fn new(sink: S, player: UserId) -> Self {
        Self {
            sink,
            player,
            board: None,
            cursor: watch::Sender::new(None),
            queue: watch::Sender::new(DirectionQueue::new()),
        }
    }

    /// Local cursor.
    pub fn cursor(&self) -> Option<Cursor> {
        *self.cursor.borrow()
    }

    /// A copy of the current queue.
    pub fn queue(&self) -> DirectionQueue {
        self.queue.borrow().clone()
    }

    /// Distinct planned directions from `cell`.
    pub fn directions_at(&self, cell: Cursor) -> BTreeSet<Direction> {
        self.queue.borrow().directions_at(cell)
    }

    pub fn subscribe_cursor(&self) -> watch::Receiver<Option<Cursor>> {
        self.cursor.subscribe()
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<DirectionQueue> {
        self.queue.subscribe()
    }

    /// Dispatch an input event.
    ///
    /// # Errors
    ///
    /// See [`step`](Self::step), [`cancel`](Self::cancel) and
    /// [`click`](Self::click).
    pub fn handle_input(&self, event: InputEvent) -> Result<()> {
        match event {
            InputEvent::Arrow(direction) => self.step(direction).map(|_| ()),
            InputEvent::Cancel => self.cancel(),
            InputEvent::Click(cell) => self.click(cell).map(|_| ()),
        }
    }

    /// Move the local cursor one cell in `direction`.
    ///
    /// Returns the step sent to the server, or `None` when nothing was sent:
    /// there is no cursor yet, the move would leave the map, or the source
    /// cell is not eligible (the cursor still moves in that case).
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::NoActiveBoard`] before the first update, or
    /// the sink's error. A failed send leaves cursor and queue unchanged.
    pub fn step(&self, direction: Direction) -> Result<Option<CursorMove>> {
        let board = self.board.as_ref().ok_or(KingdomsError::NoActiveBoard)?;
        let Some(from) = self.cursor() else {
            trace!("no cursor, step ignored");
            return Ok(None);
        };
        let Some(to) = direction.apply(from, board.map.height(), board.map.width()) else {
            trace!(%from, ?direction, "step would leave the map");
            return Ok(None);
        };

        if !self.can_plan_from(board, from) {
            debug!(%from, %to, "source not eligible, cursor moved without a plan");
            self.cursor.send_replace(Some(to));
            return Ok(None);
        }

        // The queue records the move the server will execute, read off the
        // two cells rather than the key that was pressed.
        let Some(queued) = Direction::between(from, to) else {
            return Ok(None);
        };
        let step = CursorMove::step(from, to);
        self.sink.send(step.into())?;
        self.cursor.send_replace(Some(to));
        self.queue.send_modify(|queue| queue.push(from, queued));
        debug!(%from, %to, direction = ?queued, "step planned");
        Ok(Some(step))
    }

    /// Drop the whole plan and tell the server with an empty `move`.
    ///
    /// The reset is sent even when the queue is already empty. The local
    /// cursor is left alone.
    ///
    /// # Errors
    ///
    /// Returns the sink's error; the local queue is cleared regardless.
    pub fn cancel(&self) -> Result<()> {
        self.queue.send_if_modified(|queue| {
            let had_plan = !queue.is_empty();
            queue.clear();
            had_plan
        });
        debug!("plan cancelled");
        self.sink.send(CursorMove::reset().into())
    }

    /// Move the local cursor to `cell`.
    ///
    /// Returns `true` if a `cursor` message was sent, which happens only for
    /// a field or king the player owns.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::NoActiveBoard`] before the first update,
    /// [`KingdomsError::CursorOutOfBounds`] for a cell outside the map, or
    /// the sink's error.
    pub fn click(&self, cell: Cursor) -> Result<bool> {
        let board = self.board.as_ref().ok_or(KingdomsError::NoActiveBoard)?;
        let Some(target) = board.map.get(cell) else {
            debug!(row = cell.row, col = cell.col, "click outside the map rejected");
            return Err(KingdomsError::CursorOutOfBounds {
                row: cell.row,
                col: cell.col,
            });
        };

        let selectable = matches!(target.kind, CellType::Field | CellType::King)
            && target.is_owned_by(self.player);
        if selectable {
            self.sink.send(ClientMessage::Cursor { cursor: cell })?;
        }
        self.cursor.send_replace(Some(cell));
        debug!(%cell, selectable, "cursor set by click");
        Ok(selectable)
    }

    /// Take a new board snapshot and reconcile the queue against it.
    ///
    /// Returns the direction popped for the executed step, if any.
    pub fn reconcile(&mut self, snapshot: Arc<BoardSnapshot>) -> Option<Direction> {
        let mut popped = None;
        self.queue.send_if_modified(|queue| {
            let before = queue.clone();
            popped = queue.reconcile(&snapshot);
            *queue != before
        });
        if let Some(direction) = popped {
            debug!(turn = snapshot.turn, ?direction, "planned step executed");
        }

        let local = self.cursor();
        let adopt = match local {
            None => true,
            Some(cell) => !snapshot.map.contains(cell),
        };
        if adopt && local != snapshot.cursor {
            self.cursor.send_replace(snapshot.cursor);
        }

        self.board = Some(snapshot);
        popped
    }

    fn can_plan_from(&self, board: &BoardSnapshot, from: Cursor) -> bool {
        let strong_own_cell = board
            .map
            .get(from)
            .is_some_and(|cell| cell.is_owned_by(self.player) && cell.strength() > MIN_SOURCE_POWER);
        strong_own_cell || !self.queue.borrow().is_empty()
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
    use crate::board::{Cell, GameMap};
    use crate::protocol::{GameStat, Player, PlayerStatus};
    use std::sync::Mutex;

    const ME: UserId = 1;

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

    impl Recorder {
        fn take(&self) -> Vec<ClientMessage> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    /// 3x3 map: my king at (1,1) with power 5, my weak field at (0,0),
    /// an enemy field at (2,2), the rest plain fields.
    fn map() -> GameMap {
        let mut rows = vec![vec![Cell::new(CellType::Field); 3]; 3];
        rows[1][1] = Cell::new(CellType::King).with_owner(ME).with_power(5);
        rows[0][0] = Cell::new(CellType::Field).with_owner(ME).with_power(1);
        rows[2][2] = Cell::new(CellType::Field).with_owner(2).with_power(9);
        GameMap::from_rows(rows).unwrap()
    }

    fn snapshot(map: GameMap, cursor: Option<Cursor>, prev: Option<Cursor>) -> Arc<BoardSnapshot> {
        Arc::new(BoardSnapshot {
            map,
            turn: 1,
            stat: (
                Player {
                    id: ME,
                    username: "me".into(),
                    color: 0,
                    status: PlayerStatus::Ready,
                },
                GameStat::default(),
            ),
            cursor,
            prev_cursor: prev,
        })
    }

    fn controller_at(cursor: Cursor) -> MoveQueueController<Recorder> {
        let mut moves = MoveQueueController::new(Recorder::default(), ME);
        moves.reconcile(snapshot(map(), Some(cursor), None));
        moves
    }

    const KING: Cursor = Cursor { row: 1, col: 1 };

    #[test]
    fn step_before_board_is_rejected() {
        let moves = MoveQueueController::new(Recorder::default(), ME);
        assert!(matches!(
            moves.step(Direction::Up),
            Err(KingdomsError::NoActiveBoard)
        ));
    }

    #[test]
    fn first_update_sets_cursor() {
        let moves = controller_at(KING);
        assert_eq!(moves.cursor(), Some(KING));
    }

    #[test]
    fn step_from_strong_own_cell_is_planned() {
        let moves = controller_at(KING);
        let step = moves.step(Direction::Right).unwrap().unwrap();
        assert_eq!(step, CursorMove::step(KING, Cursor::new(1, 2)));
        assert_eq!(moves.cursor(), Some(Cursor::new(1, 2)));
        assert_eq!(moves.queue().sequence_at(KING), vec![Direction::Right]);
        assert_eq!(
            moves.sink.take(),
            vec![ClientMessage::Move {
                previous: Some(KING),
                current: Some(Cursor::new(1, 2)),
            }]
        );
    }

    #[test]
    fn queued_directions_match_the_cells_stepped_between() {
        let moves = controller_at(KING);
        for direction in [Direction::Up, Direction::Left, Direction::Down, Direction::Right] {
            moves.step(direction).unwrap();
        }

        for message in moves.sink.take() {
            let ClientMessage::Move {
                previous: Some(from),
                current: Some(to),
            } = message
            else {
                panic!("expected a planned step, got {message:?}");
            };
            let queued = moves.queue().sequence_at(from);
            assert!(
                queued.contains(&Direction::between(from, to).unwrap()),
                "{from} -> {to} missing from {queued:?}"
            );
        }
        assert_eq!(moves.queue().step_count(), 4);
        assert_eq!(moves.cursor(), Some(KING));
    }

    #[test]
    fn weak_cell_moves_cursor_only() {
        let moves = controller_at(Cursor::new(0, 0));
        assert_eq!(moves.step(Direction::Right).unwrap(), None);
        assert_eq!(moves.cursor(), Some(Cursor::new(0, 1)));
        assert!(moves.queue().is_empty());
        assert!(moves.sink.take().is_empty());
    }

    #[test]
    fn existing_plan_continues_through_any_cell() {
        let moves = controller_at(KING);
        moves.step(Direction::Down).unwrap().unwrap(); // (1,1) -> (2,1)
        // (2,1) is unowned, but a plan exists.
        moves.step(Direction::Right).unwrap().unwrap(); // (2,1) -> (2,2)
        assert_eq!(moves.queue().step_count(), 2);
        assert_eq!(
            moves.queue().sequence_at(Cursor::new(2, 1)),
            vec![Direction::Right]
        );
    }

    #[test]
    fn step_off_the_map_is_a_no_op() {
        let moves = controller_at(Cursor::new(0, 0));
        assert_eq!(moves.step(Direction::Up).unwrap(), None);
        assert_eq!(moves.step(Direction::Left).unwrap(), None);
        assert_eq!(moves.cursor(), Some(Cursor::new(0, 0)));
        assert!(moves.sink.take().is_empty());
    }

    #[test]
    fn origin_queue_counts_every_step_from_it() {
        let moves = controller_at(KING);
        // Bounce between the king and each neighbour.
        let plan = [
            (Direction::Up, Direction::Down),
            (Direction::Up, Direction::Down),
            (Direction::Left, Direction::Right),
            (Direction::Down, Direction::Up),
            (Direction::Right, Direction::Left),
        ];
        for (out, back) in plan {
            moves.step(out).unwrap().unwrap();
            moves.step(back).unwrap().unwrap();
        }
        let queue = moves.queue();
        assert_eq!(queue.queued_at(KING), plan.len());
        assert_eq!(queue.directions_at(KING).len(), 4);
        assert!(queue.directions_at(KING).len() <= 4);
        assert_eq!(
            queue.sequence_at(KING),
            plan.iter().map(|(out, _)| *out).collect::<Vec<_>>()
        );
    }

    #[test]
    fn directions_are_deduplicated() {
        let mut queue = DirectionQueue::new();
        for direction in [Direction::Up, Direction::Up, Direction::Left] {
            queue.push(KING, direction);
        }
        assert_eq!(
            queue.directions_at(KING),
            BTreeSet::from([Direction::Up, Direction::Left])
        );
        assert_eq!(queue.queued_at(KING), 3);
    }

    #[test]
    fn cancel_on_empty_queue_sends_one_reset() {
        let moves = controller_at(KING);
        moves.cancel().unwrap();
        assert!(moves.queue().is_empty());
        assert_eq!(
            moves.sink.take(),
            vec![ClientMessage::Move {
                previous: None,
                current: None
            }]
        );
    }

    #[test]
    fn cancel_clears_plan_but_keeps_cursor() {
        let moves = controller_at(KING);
        moves.step(Direction::Up).unwrap();
        moves.cancel().unwrap();
        assert!(moves.queue().is_empty());
        assert_eq!(moves.cursor(), Some(Cursor::new(0, 1)));
    }

    #[test]
    fn reconcile_pops_oldest_at_prev_cursor() {
        let mut moves = controller_at(KING);
        moves.queue.send_modify(|queue| {
            queue.push(KING, Direction::Up);
            queue.push(KING, Direction::Left);
        });

        let popped = moves.reconcile(snapshot(map(), Some(Cursor::new(0, 1)), Some(KING)));
        assert_eq!(popped, Some(Direction::Up));
        assert_eq!(moves.queue().sequence_at(KING), vec![Direction::Left]);

        let popped = moves.reconcile(snapshot(map(), Some(Cursor::new(1, 0)), Some(KING)));
        assert_eq!(popped, Some(Direction::Left));
        assert!(moves.queue().is_empty());
    }

    #[test]
    fn update_without_cursor_clears_queue() {
        let mut moves = controller_at(KING);
        moves.step(Direction::Up).unwrap();
        moves.step(Direction::Left).unwrap();
        assert!(!moves.queue().is_empty());

        moves.reconcile(snapshot(map(), None, Some(Cursor::new(2, 2))));
        assert!(moves.queue().is_empty());
    }

    #[test]
    fn shrunken_map_drops_stale_entries() {
        let mut moves = controller_at(KING);
        moves.queue.send_modify(|queue| {
            queue.push(Cursor::new(2, 2), Direction::Up);
            queue.push(Cursor::new(0, 0), Direction::Right);
        });
        let small = GameMap::from_rows(vec![vec![Cell::new(CellType::Field); 2]; 2]).unwrap();
        moves.reconcile(snapshot(small, Some(Cursor::new(0, 0)), None));

        let queue = moves.queue();
        assert_eq!(queue.queued_at(Cursor::new(2, 2)), 0);
        assert_eq!(queue.queued_at(Cursor::new(0, 0)), 1);
        assert_eq!(moves.cursor(), Some(KING));
    }

    #[test]
    fn cursor_off_shrunken_map_adopts_server_cursor() {
        let mut moves = controller_at(Cursor::new(2, 2));
        let small = GameMap::from_rows(vec![vec![Cell::new(CellType::Field); 2]; 2]).unwrap();
        moves.reconcile(snapshot(small, Some(Cursor::new(0, 1)), None));
        assert_eq!(moves.cursor(), Some(Cursor::new(0, 1)));
    }

    #[test]
    fn click_own_king_sends_cursor() {
        let moves = controller_at(Cursor::new(0, 0));
        assert!(moves.click(KING).unwrap());
        assert_eq!(
            moves.sink.take(),
            vec![ClientMessage::Cursor { cursor: KING }]
        );
        assert_eq!(moves.cursor(), Some(KING));
    }

    #[test]
    fn click_foreign_cell_moves_cursor_only() {
        let moves = controller_at(KING);
        assert!(!moves.click(Cursor::new(2, 2)).unwrap());
        assert!(moves.sink.take().is_empty());
        assert_eq!(moves.cursor(), Some(Cursor::new(2, 2)));
    }

    #[test]
    fn click_outside_map_is_rejected() {
        let moves = controller_at(KING);
        assert!(matches!(
            moves.click(Cursor::new(3, 0)),
            Err(KingdomsError::CursorOutOfBounds { row: 3, col: 0 })
        ));
        assert_eq!(moves.cursor(), Some(KING));
    }

    #[test]
    fn handle_input_dispatches() {
        let moves = controller_at(KING);
        moves.handle_input(InputEvent::Arrow(Direction::Down)).unwrap();
        moves.handle_input(InputEvent::Cancel).unwrap();
        moves.handle_input(InputEvent::Click(KING)).unwrap();
        assert_eq!(moves.sink.take().len(), 3);
    }

    #[tokio::test]
    async fn queue_subscribers_see_changes() {
        let moves = controller_at(KING);
        let mut queue_rx = moves.subscribe_queue();
        moves.step(Direction::Left).unwrap();
        queue_rx.changed().await.unwrap();
        assert_eq!(queue_rx.borrow().queued_at(KING), 1);
    }
}
