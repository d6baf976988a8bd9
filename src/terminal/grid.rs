use bitflags::bitflags;

use super::color::Color;
use super::cursor::CellAttrs;

bitflags! {
    /// Per-cell flags for wide character tracking.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct CellFlags: u8 {
        /// This cell holds a wide (2-column) character
        const WIDE_CHAR   = 1 << 0;
        /// This cell is the trailing spacer of a wide character
        const WIDE_SPACER = 1 << 1;
    }
}

/// A single terminal cell. `text` holds a full grapheme cluster: the base
/// character plus any zero-width joiners, variation selectors, or combining
/// marks printed after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub text: String,
    pub fg: Color,
    pub bg: Color,
    pub attrs: CellAttrs,
    pub flags: CellFlags,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            text: " ".to_string(),
            fg: Color::Default,
            bg: Color::Default,
            attrs: CellAttrs::empty(),
            flags: CellFlags::empty(),
        }
    }
}

impl Cell {
    pub fn new(c: char, fg: Color, bg: Color, attrs: CellAttrs, wide: bool) -> Self {
        Self {
            text: c.to_string(),
            fg,
            bg,
            attrs,
            flags: if wide {
                CellFlags::WIDE_CHAR
            } else {
                CellFlags::empty()
            },
        }
    }

    /// Create a spacer cell for the trailing half of a wide character.
    pub fn wide_spacer() -> Self {
        Self {
            flags: CellFlags::WIDE_SPACER,
            ..Default::default()
        }
    }

    /// Append a zero-width character to this cell's grapheme cluster.
    pub fn push_zero_width(&mut self, c: char) {
        self.text.push(c);
    }

    /// Erase the cell using the given background color (per ECMA-48).
    pub fn erase(&mut self, bg: Color) {
        self.text.clear();
        self.text.push(' ');
        self.fg = Color::Default;
        self.bg = bg;
        self.attrs = CellAttrs::empty();
        self.flags = CellFlags::empty();
    }
}

/// A single row in the terminal grid.
#[derive(Debug, Clone)]
pub struct Row {
    pub cells: Vec<Cell>,
    pub dirty: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            dirty: true,
        }
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.erase(Color::Default);
        }
        self.dirty = true;
    }

    /// Erase all cells using the given background color (per ECMA-48).
    pub fn erase_with_bg(&mut self, bg: Color) {
        for cell in &mut self.cells {
            cell.erase(bg);
        }
        self.dirty = true;
    }
}

/// The terminal grid: a fixed `rows x cols` screen. Content scrolled off the
/// top is discarded; replay only ever paints the visible screen.
pub struct Grid {
    pub rows: Vec<Row>,
    pub cols: u16,
    pub visible_rows: u16,
}

impl Grid {
    pub fn new(visible_rows: u16, cols: u16) -> Self {
        let rows = (0..visible_rows).map(|_| Row::new(cols)).collect();
        Self {
            rows,
            cols,
            visible_rows,
        }
    }

    pub fn row(&self, row: u16) -> &Row {
        &self.rows[row as usize]
    }

    pub fn row_mut(&mut self, row: u16) -> &mut Row {
        &mut self.rows[row as usize]
    }

    /// Write a cell at the given position.
    pub fn set_cell(&mut self, row: u16, col: u16, cell: Cell) {
        if col < self.cols && row < self.visible_rows {
            let r = self.row_mut(row);
            r.cells[col as usize] = cell;
            r.dirty = true;
        }
    }

    /// Scroll the region [top, bottom] up by one line. The top line is
    /// discarded and a blank line is inserted at the bottom.
    pub fn scroll_up(&mut self, top: u16, bottom: u16) {
        let top_idx = top as usize;
        let bottom_idx = bottom as usize;
        if top_idx > bottom_idx || bottom_idx >= self.rows.len() {
            return;
        }

        self.rows.remove(top_idx);
        self.rows.insert(bottom_idx, Row::new(self.cols));

        for i in top..=bottom {
            self.row_mut(i).dirty = true;
        }
    }

    /// Scroll the region [top, bottom] down by one line. The bottom line is
    /// discarded and a blank line is inserted at the top.
    pub fn scroll_down(&mut self, top: u16, bottom: u16) {
        let top_idx = top as usize;
        let bottom_idx = bottom as usize;
        if top_idx > bottom_idx || bottom_idx >= self.rows.len() {
            return;
        }

        self.rows.remove(bottom_idx);
        self.rows.insert(top_idx, Row::new(self.cols));

        for i in top..=bottom {
            self.row_mut(i).dirty = true;
        }
    }

    /// Collect the indices of all dirty rows, clearing their dirty flags.
    pub fn take_dirty_rows(&mut self) -> Vec<u16> {
        let mut result = Vec::new();
        for i in 0..self.visible_rows {
            if self.rows[i as usize].dirty {
                result.push(i);
                self.rows[i as usize].dirty = false;
            }
        }
        result
    }

    /// Mark all rows as dirty (for full redraws).
    pub fn mark_all_dirty(&mut self) {
        for row in &mut self.rows {
            row.dirty = true;
        }
    }

    /// Erase cells in a row from start_col to end_col (exclusive),
    /// filling with the given background color (per ECMA-48).
    pub fn erase_cells(&mut self, row: u16, start_col: u16, end_col: u16, bg: Color) {
        if row >= self.visible_rows {
            return;
        }
        let r = self.row_mut(row);
        let start = start_col as usize;
        let end = (end_col as usize).min(r.cells.len());
        for i in start..end {
            r.cells[i].erase(bg);
        }
        r.dirty = true;
    }

    /// Insert blank cells at position, shifting existing cells right.
    pub fn insert_cells(&mut self, row: u16, col: u16, count: u16) {
        if row >= self.visible_rows {
            return;
        }
        let r = self.row_mut(row);
        let col = col as usize;
        let count = count as usize;
        let len = r.cells.len();
        if col >= len {
            return;
        }

        for _ in 0..count.min(len - col) {
            r.cells.pop();
            r.cells.insert(col, Cell::default());
        }
        r.dirty = true;
    }

    /// Delete cells at position, shifting remaining cells left.
    pub fn delete_cells(&mut self, row: u16, col: u16, count: u16) {
        if row >= self.visible_rows {
            return;
        }
        let r = self.row_mut(row);
        let col = col as usize;
        let count = count as usize;

        let to_remove = count.min(r.cells.len().saturating_sub(col));
        for _ in 0..to_remove {
            if col < r.cells.len() {
                r.cells.remove(col);
                r.cells.push(Cell::default());
            }
        }
        r.dirty = true;
    }
}
