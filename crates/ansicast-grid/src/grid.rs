use std::sync::Arc;

/// A completed screen: `rows * cols` characters and the same number of packed
/// colors, indexed by `row * cols + col`.
///
/// Both halves live in one shared allocation (`chars ++ colors`). A `Grid` is
/// immutable once built, so clones are cheap and can be handed to other
/// threads without locking.
#[derive(Clone, PartialEq, Eq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Arc<[u8]>,
}

impl Grid {
    /// Build a grid from a `chars ++ colors` buffer.
    ///
    /// Returns `None` unless `cells.len() == 2 * rows * cols`.
    pub fn from_cells(rows: usize, cols: usize, cells: Vec<u8>) -> Option<Self> {
        if cells.len() != rows * cols * 2 {
            return None;
        }
        Some(Self {
            rows,
            cols,
            cells: Arc::from(cells),
        })
    }

    /// Build a grid from separate character and color halves.
    pub fn from_parts(rows: usize, cols: usize, chars: &[u8], colors: &[u8]) -> Option<Self> {
        let len = rows * cols;
        if chars.len() != len || colors.len() != len {
            return None;
        }
        let mut cells = Vec::with_capacity(len * 2);
        cells.extend_from_slice(chars);
        cells.extend_from_slice(colors);
        Self::from_cells(rows, cols, cells)
    }

    /// A grid of spaces with color 0.
    pub fn blank(rows: usize, cols: usize) -> Self {
        let len = rows * cols;
        let mut cells = vec![0u8; len * 2];
        cells[..len].fill(b' ');
        Self {
            rows,
            cols,
            cells: Arc::from(cells),
        }
    }

    /// Copy a working buffer into fresh shared storage.
    pub(crate) fn snapshot(rows: usize, cols: usize, buffer: &[u8]) -> Self {
        debug_assert_eq!(buffer.len(), rows * cols * 2);
        Self {
            rows,
            cols,
            cells: Arc::from(buffer),
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of cells (`rows * cols`).
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Character bytes, row-major.
    pub fn chars(&self) -> &[u8] {
        &self.cells[..self.len()]
    }

    /// Packed 3-3-2 colors, row-major.
    pub fn colors(&self) -> &[u8] {
        &self.cells[self.len()..]
    }

    /// The whole `chars ++ colors` buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.cells
    }

    /// Linear index of a cell.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Character at the given row and column.
    ///
    /// Returns `None` when out of bounds.
    pub fn char_at(&self, row: usize, col: usize) -> Option<u8> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.chars()[self.index(row, col)])
    }

    /// Packed color at the given row and column.
    pub fn color_at(&self, row: usize, col: usize) -> Option<u8> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.colors()[self.index(row, col)])
    }

    /// Characters of one row as text, mostly for logs and tests.
    pub fn row_text(&self, row: usize) -> String {
        let start = row * self.cols;
        String::from_utf8_lossy(&self.chars()[start..start + self.cols]).into_owned()
    }
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows: Vec<String> = (0..self.rows).map(|row| self.row_text(row)).collect();
        f.debug_struct("Grid")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("text", &rows)
            .finish()
    }
}
