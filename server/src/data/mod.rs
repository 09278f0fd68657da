#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealedState {
    Untouched,
    Flagged,
    Dug,
}

#[derive(Debug, Clone)]
pub struct Cell {
    pub bomb: bool,
    pub adjacent: u8,
    pub revealed: RevealedState,
}

/// Row-major cell storage for one board.
#[derive(Debug)]
pub struct Field {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<Cell>,
}

impl Field {
    pub fn index(&self, y: usize, x: usize) -> Option<usize> {
        (y < self.rows && x < self.cols).then(|| y * self.cols + x)
    }
}

/// The in-bounds 8-connected neighbours of `(y, x)` on a `rows × cols` grid.
pub fn neighbors(
    rows: usize,
    cols: usize,
    y: usize,
    x: usize,
) -> impl Iterator<Item = (usize, usize)> {
    (-1i64..=1)
        .flat_map(|dy| (-1i64..=1).map(move |dx| (dy, dx)))
        .filter(|&(dy, dx)| dy != 0 || dx != 0)
        .filter_map(move |(dy, dx)| {
            let new_y = y as i64 + dy;
            let new_x = x as i64 + dx;

            if new_y >= 0 && new_y < rows as i64 && new_x >= 0 && new_x < cols as i64 {
                Some((new_y as usize, new_x as usize))
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_has_three_neighbors() {
        let mut found: Vec<_> = neighbors(4, 4, 0, 0).collect();
        found.sort();
        assert_eq!(found, vec![(0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn interior_has_eight_neighbors() {
        assert_eq!(neighbors(3, 3, 1, 1).count(), 8);
        assert!(neighbors(3, 3, 1, 1).all(|pos| pos != (1, 1)));
    }

    #[test]
    fn single_cell_has_none() {
        assert_eq!(neighbors(1, 1, 0, 0).count(), 0);
    }
}
