//! Board data model: cells, the rectangular game map, cursors and directions.
//!
//! A [`GameMap`] is an immutable snapshot. The server replaces it wholesale on
//! every `update`, so nothing here mutates a map in place.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KingdomsError;
use crate::protocol::UserId;

// ── Cells ───────────────────────────────────────────────────────────

/// Kind of a board cell, using the server's wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    /// Starting position that has not been claimed.
    Spawn,
    /// Fog of war.
    #[default]
    #[serde(rename = "hide")]
    Hidden,
    /// A player's king.
    King,
    /// Impassable terrain.
    #[serde(rename = "block")]
    Blocker,
    /// Plain territory.
    Field,
    /// A fortified cell.
    Castle,
}

impl CellType {
    /// Whether cells of this kind can carry an owner and power.
    pub fn is_ownable(&self) -> bool {
        matches!(self, Self::King | Self::Castle | Self::Field)
    }
}

/// A single board cell.
///
/// Cells whose fields were stripped by the server's fog of war arrive as `{}`
/// and decode as [`CellType::Hidden`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "type", default)]
    pub kind: CellType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<u32>,
    #[serde(rename = "player", default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserId>,
}

impl Cell {
    /// Create an unowned cell of the given kind.
    pub fn new(kind: CellType) -> Self {
        Self {
            kind,
            power: None,
            owner: None,
        }
    }

    /// Set the owner of the cell.
    #[must_use]
    pub fn with_owner(mut self, owner: UserId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Set the power of the cell.
    #[must_use]
    pub fn with_power(mut self, power: u32) -> Self {
        self.power = Some(power);
        self
    }

    /// Returns `true` if `player` owns this cell.
    pub fn is_owned_by(&self, player: UserId) -> bool {
        self.kind.is_ownable() && self.owner == Some(player)
    }

    /// Power of the cell, treating a missing value as zero.
    pub fn strength(&self) -> u32 {
        self.power.unwrap_or(0)
    }

    /// Drop owner and power from kinds that cannot carry them.
    fn normalized(mut self) -> Self {
        if !self.kind.is_ownable() {
            self.owner = None;
            self.power = None;
        }
        self
    }
}

// ── Cursor ──────────────────────────────────────────────────────────

/// A 0-indexed board coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
}

impl Cursor {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Human coordinate label: column letters followed by the 1-based row,
    /// e.g. `(2, 1)` is `B3`.
    pub fn label(&self) -> String {
        let mut letters = Vec::new();
        let mut col = self.col + 1;
        while col > 0 {
            let rem = (col - 1) % 26;
            // rem < 26, so the cast cannot truncate.
            letters.push(char::from(b'A' + rem as u8));
            col = (col - 1) / 26;
        }
        letters.reverse();
        let mut label: String = letters.into_iter().collect();
        label.push_str(&(self.row + 1).to_string());
        label
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A cursor step, as produced by the board and sent in `move` messages.
///
/// Both fields absent is a reset: the player cancelled the planned path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorMove {
    pub previous: Option<Cursor>,
    pub current: Option<Cursor>,
}

impl CursorMove {
    /// A step from `previous` to `current`.
    pub fn step(previous: Cursor, current: Cursor) -> Self {
        Self {
            previous: Some(previous),
            current: Some(current),
        }
    }

    /// The empty move that resets the path.
    pub fn reset() -> Self {
        Self::default()
    }

    pub fn is_reset(&self) -> bool {
        self.previous.is_none() && self.current.is_none()
    }
}

// ── Direction ───────────────────────────────────────────────────────

/// One of the four board directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    /// Derive the direction of a step from its coordinate delta.
    ///
    /// Row changes take precedence over column changes. A zero delta yields
    /// `None`.
    pub fn between(from: Cursor, to: Cursor) -> Option<Self> {
        if to.row < from.row {
            Some(Self::Up)
        } else if to.row > from.row {
            Some(Self::Down)
        } else if to.col < from.col {
            Some(Self::Left)
        } else if to.col > from.col {
            Some(Self::Right)
        } else {
            None
        }
    }

    /// The neighbour of `from` in this direction, or `None` if it would leave
    /// a `height` x `width` grid.
    pub fn apply(self, from: Cursor, height: usize, width: usize) -> Option<Cursor> {
        let next = match self {
            Self::Up => Cursor::new(from.row.checked_sub(1)?, from.col),
            Self::Down => Cursor::new(from.row + 1, from.col),
            Self::Left => Cursor::new(from.row, from.col.checked_sub(1)?),
            Self::Right => Cursor::new(from.row, from.col + 1),
        };
        (next.row < height && next.col < width).then_some(next)
    }
}

// ── GameMap ─────────────────────────────────────────────────────────

/// A rectangular grid of cells, validated when decoded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<Cell>>", into = "Vec<Vec<Cell>>")]
pub struct GameMap {
    rows: Vec<Vec<Cell>>,
    width: usize,
}

impl GameMap {
    /// Build a map from rows, rejecting ragged grids.
    ///
    /// # Errors
    ///
    /// Returns [`KingdomsError::InvalidMap`] if the rows differ in length.
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Result<Self, KingdomsError> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some(index) = rows.iter().position(|row| row.len() != width) {
            return Err(KingdomsError::InvalidMap(format!(
                "row {index} has {} cells, expected {width}",
                rows.get(index).map_or(0, Vec::len)
            )));
        }
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Cell::normalized).collect())
            .collect();
        Ok(Self { rows, width })
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns `true` if `cursor` lies inside the grid.
    pub fn contains(&self, cursor: Cursor) -> bool {
        cursor.row < self.height() && cursor.col < self.width
    }

    /// The cell at `cursor`, if it lies inside the grid.
    pub fn get(&self, cursor: Cursor) -> Option<&Cell> {
        self.rows.get(cursor.row)?.get(cursor.col)
    }

    /// Iterate over the rows of the grid.
    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Iterate over every cell together with its coordinate.
    pub fn cells(&self) -> impl Iterator<Item = (Cursor, &Cell)> {
        self.rows.iter().enumerate().flat_map(|(row, cells)| {
            cells
                .iter()
                .enumerate()
                .map(move |(col, cell)| (Cursor::new(row, col), cell))
        })
    }
}

impl TryFrom<Vec<Vec<Cell>>> for GameMap {
    type Error = KingdomsError;

    fn try_from(rows: Vec<Vec<Cell>>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<GameMap> for Vec<Vec<Cell>> {
    fn from(map: GameMap) -> Self {
        map.rows
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
    fn direction_from_delta() {
        let origin = Cursor::new(2, 2);
        assert_eq!(Direction::between(origin, Cursor::new(1, 2)), Some(Direction::Up));
        assert_eq!(Direction::between(origin, Cursor::new(3, 2)), Some(Direction::Down));
        assert_eq!(Direction::between(origin, Cursor::new(2, 1)), Some(Direction::Left));
        assert_eq!(Direction::between(origin, Cursor::new(2, 3)), Some(Direction::Right));
        assert_eq!(Direction::between(origin, origin), None);
    }

    #[test]
    fn apply_stays_inside_grid() {
        assert_eq!(Direction::Up.apply(Cursor::new(0, 0), 3, 3), None);
        assert_eq!(Direction::Left.apply(Cursor::new(0, 0), 3, 3), None);
        assert_eq!(Direction::Down.apply(Cursor::new(2, 0), 3, 3), None);
        assert_eq!(Direction::Right.apply(Cursor::new(0, 2), 3, 3), None);
        assert_eq!(
            Direction::Right.apply(Cursor::new(0, 1), 3, 3),
            Some(Cursor::new(0, 2))
        );
    }

    #[test]
    fn apply_then_between_agree() {
        let from = Cursor::new(1, 1);
        for direction in Direction::ALL {
            let to = direction.apply(from, 3, 3).unwrap();
            assert_eq!(Direction::between(from, to), Some(direction));
        }
    }

    #[test]
    fn labels() {
        assert_eq!(Cursor::new(0, 0).label(), "A1");
        assert_eq!(Cursor::new(2, 1).label(), "B3");
        assert_eq!(Cursor::new(9, 25).label(), "Z10");
        assert_eq!(Cursor::new(0, 26).label(), "AA1");
    }

    #[test]
    fn ragged_map_is_rejected() {
        let rows = vec![
            vec![Cell::new(CellType::Field), Cell::new(CellType::Field)],
            vec![Cell::new(CellType::Field)],
        ];
        let err = GameMap::from_rows(rows).unwrap_err();
        assert!(matches!(err, KingdomsError::InvalidMap(_)));
    }

    #[test]
    fn non_ownable_cells_lose_owner() {
        let rows = vec![vec![
            Cell::new(CellType::Blocker).with_owner(3).with_power(4),
            Cell::new(CellType::Field).with_owner(3).with_power(4),
        ]];
        let map = GameMap::from_rows(rows).unwrap();
        assert_eq!(map.get(Cursor::new(0, 0)), Some(&Cell::new(CellType::Blocker)));
        assert!(map.get(Cursor::new(0, 1)).unwrap().is_owned_by(3));
    }

    #[test]
    fn fog_cell_decodes_as_hidden() {
        let map: GameMap = serde_json::from_str(r#"[[{}, {"type": "king", "player": 7, "power": 12}]]"#)
            .unwrap();
        assert_eq!(map.get(Cursor::new(0, 0)).unwrap().kind, CellType::Hidden);
        let king = map.get(Cursor::new(0, 1)).unwrap();
        assert_eq!(king.kind, CellType::King);
        assert_eq!(king.strength(), 12);
        assert_eq!((map.height(), map.width()), (1, 2));
    }

    #[test]
    fn cells_iterates_row_major() {
        let map = GameMap::from_rows(vec![
            vec![Cell::new(CellType::Field), Cell::new(CellType::Spawn)],
            vec![Cell::new(CellType::Castle), Cell::new(CellType::Hidden)],
        ])
        .unwrap();
        let coords: Vec<Cursor> = map.cells().map(|(c, _)| c).collect();
        assert_eq!(
            coords,
            vec![
                Cursor::new(0, 0),
                Cursor::new(0, 1),
                Cursor::new(1, 0),
                Cursor::new(1, 1)
            ]
        );
    }
}
