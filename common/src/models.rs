use std::{fmt, str::FromStr};

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// A board coordinate. `x` is the column, `y` the row.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pos {
    pub x: usize,
    pub y: usize,
}

/// What a player can see of a single cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tile {
    Untouched,
    Flagged,
    Dug { adjacent: u8 },
}

impl Tile {
    /// The character this tile renders as.
    pub fn symbol(self) -> char {
        match self {
            Tile::Untouched => '-',
            Tile::Flagged => 'F',
            Tile::Dug { adjacent: 0 } => ' ',
            Tile::Dug { adjacent } => char::from(b'0' + adjacent.min(9)),
        }
    }

    fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '-' => Some(Tile::Untouched),
            'F' => Some(Tile::Flagged),
            ' ' => Some(Tile::Dug { adjacent: 0 }),
            '1'..='8' => Some(Tile::Dug {
                adjacent: symbol as u8 - b'0',
            }),
            _ => None,
        }
    }
}

/// A point-in-time copy of the player-visible layer of a board.
///
/// Rendering (`Display`) produces one line per row with no trailing newline; `FromStr`
/// parses that rendering back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    rows: usize,
    cols: usize,
    tiles: Vec<Tile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ParseSnapshotError {
    #[display("board text is empty")]
    Empty,
    #[display("row {row} has {found} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[display("unexpected symbol {symbol:?} at row {row}, column {col}")]
    UnknownSymbol { row: usize, col: usize, symbol: char },
}

impl Snapshot {
    /// Builds a snapshot from row-major tiles. `tiles.len()` must equal `rows * cols`.
    pub fn new(rows: usize, cols: usize, tiles: Vec<Tile>) -> Self {
        assert_eq!(tiles.len(), rows * cols, "snapshot size mismatch");
        Self { rows, cols, tiles }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn tile(&self, y: usize, x: usize) -> Option<Tile> {
        if y < self.rows && x < self.cols {
            self.tiles.get(y * self.cols + x).copied()
        } else {
            None
        }
    }

    pub fn get(&self, pos: Pos) -> Option<Tile> {
        self.tile(pos.y, pos.x)
    }

    pub fn row_iter(&self) -> impl Iterator<Item = &[Tile]> {
        self.tiles.chunks(self.cols)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.row_iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            let line: String = row.iter().map(|tile| tile.symbol()).collect();
            f.write_str(&line)?;
        }
        Ok(())
    }
}

impl FromStr for Snapshot {
    type Err = ParseSnapshotError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(ParseSnapshotError::Empty);
        }

        let lines: Vec<&str> = text.split('\n').collect();
        let cols = lines[0].chars().count();
        if cols == 0 {
            return Err(ParseSnapshotError::Empty);
        }

        let mut tiles = Vec::with_capacity(lines.len() * cols);
        for (row, line) in lines.iter().enumerate() {
            let found = line.chars().count();
            if found != cols {
                return Err(ParseSnapshotError::RaggedRow {
                    row,
                    found,
                    expected: cols,
                });
            }
            for (col, symbol) in line.chars().enumerate() {
                let tile = Tile::from_symbol(symbol)
                    .ok_or(ParseSnapshotError::UnknownSymbol { row, col, symbol })?;
                tiles.push(tile);
            }
        }

        Ok(Self {
            rows: lines.len(),
            cols,
            tiles,
        })
    }
}
