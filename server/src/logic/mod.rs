use std::{
    collections::HashSet,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use derive_more::{Display, Error};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::{debug, info, instrument, trace};

use minesweeper_common::models::{Snapshot, Tile};

use crate::data::{Cell, Field, RevealedState, neighbors};

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum BoardError {
    #[display("board dimensions must be positive, got {rows}x{cols}")]
    InvalidDimension { rows: usize, cols: usize },
    #[display("bomb count {bombs} exceeds the {cells} cells of the board")]
    InvalidBombCount { bombs: usize, cells: usize },
    #[display("bomb position ({y}, {x}) is outside the board")]
    InvalidBombPosition { y: usize, x: usize },
}

/// A cell whose stored neighbour count disagrees with the bombs around it.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("cell ({y}, {x}) records {recorded} neighbouring bombs but has {actual}")]
pub struct InvariantViolation {
    pub y: usize,
    pub x: usize,
    pub recorded: u8,
    pub actual: u8,
}

/// Full copy of a board's three layers, hidden ones included. For diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layers {
    pub rows: usize,
    pub cols: usize,
    pub display: Vec<RevealedState>,
    pub bombs: Vec<bool>,
    pub counts: Vec<u8>,
}

impl Layers {
    /// `U`ntouched, `F`lagged or `D`ug per cell.
    pub fn display_map(&self) -> String {
        self.render(|i| match self.display[i] {
            RevealedState::Untouched => 'U',
            RevealedState::Flagged => 'F',
            RevealedState::Dug => 'D',
        })
    }

    /// `B` for an armed bomb, `E` otherwise.
    pub fn bomb_map(&self) -> String {
        self.render(|i| if self.bombs[i] { 'B' } else { 'E' })
    }

    pub fn count_map(&self) -> String {
        self.render(|i| char::from(b'0' + self.counts[i]))
    }

    fn render(&self, symbol: impl Fn(usize) -> char) -> String {
        (0..self.rows)
            .map(|y| (0..self.cols).map(|x| symbol(y * self.cols + x)).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A minesweeper board shared by every player of a game.
///
/// Mutations (`dig`, `flag`, `deflag`) each hold the exclusive lock for their whole
/// duration, so they are linearizable. `snapshot` takes the shared lock and never sees a
/// half-applied dig.
#[derive(Debug)]
pub struct Board {
    rows: usize,
    cols: usize,
    field: RwLock<Field>,
}

fn validate_dimensions(rows: usize, cols: usize) -> Result<usize, BoardError> {
    if rows == 0 || cols == 0 {
        return Err(BoardError::InvalidDimension { rows, cols });
    }
    rows.checked_mul(cols)
        .ok_or(BoardError::InvalidDimension { rows, cols })
}

fn generate_bombs(cells: usize, bombs: usize, seed: u64) -> Vec<bool> {
    let mut layout = vec![false; cells];
    layout[..bombs].fill(true);

    let mut rng = StdRng::seed_from_u64(seed);
    layout.shuffle(&mut rng);
    layout
}

fn count_adjacent_bombs(bombs: &[bool], rows: usize, cols: usize, y: usize, x: usize) -> u8 {
    neighbors(rows, cols, y, x)
        .filter(|&(ny, nx)| bombs[ny * cols + nx])
        .count() as u8
}

impl From<&Cell> for Tile {
    fn from(value: &Cell) -> Self {
        match value.revealed {
            RevealedState::Untouched => Self::Untouched,
            RevealedState::Flagged => Self::Flagged,
            RevealedState::Dug => Self::Dug {
                adjacent: value.adjacent,
            },
        }
    }
}

impl Field {
    fn new(rows: usize, cols: usize, bombs: &[bool]) -> Self {
        let cells = (0..rows * cols)
            .map(|i| Cell {
                bomb: bombs[i],
                adjacent: count_adjacent_bombs(bombs, rows, cols, i / cols, i % cols),
                revealed: RevealedState::Untouched,
            })
            .collect();

        Self { rows, cols, cells }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.rows,
            self.cols,
            self.cells.iter().map(Tile::from).collect(),
        )
    }

    /// Removes the bomb at `(y, x)` from the board and from every neighbour's count.
    fn defuse(&mut self, y: usize, x: usize) {
        let index = y * self.cols + x;
        self.cells[index].bomb = false;
        for (ny, nx) in neighbors(self.rows, self.cols, y, x) {
            let cell = &mut self.cells[ny * self.cols + nx];
            cell.adjacent = cell.adjacent.saturating_sub(1);
        }
    }

    /// Digs `(y, x)` and floods outward through zero-count cells. Flagged cells are never
    /// dug; a cell turns `Dug` before its neighbours are queued, which keeps every cell to a
    /// single visit. Returns how many cells were dug.
    fn reveal_from(&mut self, y: usize, x: usize) -> usize {
        let cols = self.cols;
        self.cells[y * cols + x].revealed = RevealedState::Dug;
        let mut revealed = 1;

        let mut stack = Vec::new();
        if self.cells[y * cols + x].adjacent == 0 {
            stack.push((y, x));
        }

        while let Some((cy, cx)) = stack.pop() {
            for (ny, nx) in neighbors(self.rows, cols, cy, cx) {
                let cell = &mut self.cells[ny * cols + nx];
                if cell.revealed != RevealedState::Untouched {
                    continue;
                }

                cell.revealed = RevealedState::Dug;
                revealed += 1;
                if cell.adjacent == 0 {
                    stack.push((ny, nx));
                }
            }
        }

        revealed
    }

    fn check_cell(&self, y: usize, x: usize) -> Result<(), InvariantViolation> {
        let recorded = self.cells[y * self.cols + x].adjacent;
        let actual = neighbors(self.rows, self.cols, y, x)
            .filter(|&(ny, nx)| self.cells[ny * self.cols + nx].bomb)
            .count() as u8;
        if recorded != actual {
            return Err(InvariantViolation {
                y,
                x,
                recorded,
                actual,
            });
        }
        Ok(())
    }

    /// Checks `(y, x)` and its neighbours, the only counts a dig at `(y, x)` can change.
    fn check_around(&self, y: usize, x: usize) -> Result<(), InvariantViolation> {
        std::iter::once((y, x))
            .chain(neighbors(self.rows, self.cols, y, x))
            .try_for_each(|(cy, cx)| self.check_cell(cy, cx))
    }

    fn check_invariant(&self) -> Result<(), InvariantViolation> {
        for y in 0..self.rows {
            for x in 0..self.cols {
                self.check_cell(y, x)?;
            }
        }
        Ok(())
    }
}

impl Board {
    /// Builds a `rows × cols` board with `bombs` bombs shuffled into place by `seed`.
    /// Equal arguments always give equal boards.
    #[instrument(level = "trace")]
    pub fn new(rows: usize, cols: usize, bombs: usize, seed: u64) -> Result<Self, BoardError> {
        let cells = validate_dimensions(rows, cols)?;
        if bombs > cells {
            return Err(BoardError::InvalidBombCount { bombs, cells });
        }

        info!(
            "Creating board: {}x{} with {} bombs (seed {})",
            rows, cols, bombs, seed
        );
        let layout = generate_bombs(cells, bombs, seed);
        Ok(Self::from_field(Field::new(rows, cols, &layout)))
    }

    /// Builds a board with bombs at exactly the given `(y, x)` positions.
    #[instrument(level = "trace", skip(bombs))]
    pub fn from_layout(
        rows: usize,
        cols: usize,
        bombs: &[(usize, usize)],
    ) -> Result<Self, BoardError> {
        let cells = validate_dimensions(rows, cols)?;

        let mut layout = vec![false; cells];
        let positions: HashSet<_> = bombs.iter().copied().collect();
        for (y, x) in positions {
            if y >= rows || x >= cols {
                return Err(BoardError::InvalidBombPosition { y, x });
            }
            layout[y * cols + x] = true;
        }

        Ok(Self::from_field(Field::new(rows, cols, &layout)))
    }

    fn from_field(field: Field) -> Self {
        Self {
            rows: field.rows,
            cols: field.cols,
            field: RwLock::new(field),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    // A poisoned lock means a mutation panicked half way, possibly on a failed invariant
    // check. Serving that board any further is not an option.
    fn read(&self) -> RwLockReadGuard<'_, Field> {
        self.field
            .read()
            .expect("board lock poisoned by a failed mutation")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Field> {
        self.field
            .write()
            .expect("board lock poisoned by a failed mutation")
    }

    pub fn snapshot(&self) -> Snapshot {
        self.read().snapshot()
    }

    /// Digs the cell at row `y`, column `x`.
    ///
    /// Returns `false` only when a bomb was dug. Such a bomb is defused: the cell stays
    /// playable as a dug cell and stops counting towards its neighbours. Out-of-bounds,
    /// flagged and already dug cells are left alone and return `true`.
    #[instrument(level = "trace", skip(self))]
    pub fn dig(&self, y: usize, x: usize) -> bool {
        let mut field = self.write();

        let Some(index) = field.index(y, x) else {
            debug!("Ignoring dig outside the board at ({}, {})", y, x);
            return true;
        };
        if field.cells[index].revealed != RevealedState::Untouched {
            debug!(
                "Ignoring dig on {:?} cell ({}, {})",
                field.cells[index].revealed, y, x
            );
            return true;
        }

        let hit_bomb = field.cells[index].bomb;
        if hit_bomb {
            info!("Bomb dug and defused at ({}, {})", y, x);
            field.defuse(y, x);
        }
        let revealed = field.reveal_from(y, x);
        debug!("Dig at ({}, {}) revealed {} cells", y, x, revealed);

        // Every build verifies the dug neighbourhood; debug builds sweep the whole board.
        let checked = if cfg!(debug_assertions) {
            field.check_invariant()
        } else {
            field.check_around(y, x)
        };
        if let Err(violation) = checked {
            panic!("board invariant violated after dig at ({y}, {x}): {violation}");
        }

        !hit_bomb
    }

    /// Flags an untouched cell. Anything else is left alone.
    #[instrument(level = "trace", skip(self))]
    pub fn flag(&self, y: usize, x: usize) {
        let mut field = self.write();
        if let Some(index) = field.index(y, x)
            && field.cells[index].revealed == RevealedState::Untouched
        {
            field.cells[index].revealed = RevealedState::Flagged;
            trace!("Cell ({}, {}) flagged", y, x);
        }
    }

    /// Removes the flag from a flagged cell. Anything else is left alone.
    #[instrument(level = "trace", skip(self))]
    pub fn deflag(&self, y: usize, x: usize) {
        let mut field = self.write();
        if let Some(index) = field.index(y, x)
            && field.cells[index].revealed == RevealedState::Flagged
        {
            field.cells[index].revealed = RevealedState::Untouched;
            trace!("Cell ({}, {}) deflagged", y, x);
        }
    }

    /// Number of bombs not yet defused.
    pub fn bombs_remaining(&self) -> usize {
        self.read().cells.iter().filter(|cell| cell.bomb).count()
    }

    pub fn layers(&self) -> Layers {
        let field = self.read();
        Layers {
            rows: field.rows,
            cols: field.cols,
            display: field.cells.iter().map(|cell| cell.revealed).collect(),
            bombs: field.cells.iter().map(|cell| cell.bomb).collect(),
            counts: field.cells.iter().map(|cell| cell.adjacent).collect(),
        }
    }

    /// Verifies every neighbour count against the bombs still on the board.
    pub fn check_invariant(&self) -> Result<(), InvariantViolation> {
        self.read().check_invariant()
    }
}
