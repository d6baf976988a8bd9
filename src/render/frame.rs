use std::collections::BTreeMap;

use super::cell::CharacterCell;
use crate::terminal::grid::{CellFlags, Row};

/// Sparse mapping from column index to rendered cell. An absent column is a
/// default blank cell. Wide glyphs occupy their primary column plus the
/// following spacer column, both mapping to the same cell value.
pub type LineBuffer = BTreeMap<u16, CharacterCell>;

/// One stable screen between two redraws.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Milliseconds since session start.
    pub time_ms: u64,
    /// Time until the next frame (or the trailing pad on the last frame).
    pub duration_ms: u64,
    /// Non-empty rows of the screen.
    pub lines: BTreeMap<u16, LineBuffer>,
}

/// The appearance-and-duration record for one row's content: the line showed
/// `line` from `time_ms` for `duration_ms`, then was overwritten or erased.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEvent {
    pub row: u16,
    pub line: LineBuffer,
    pub time_ms: u64,
    pub duration_ms: u64,
}

/// Convert an emulator row into a sparse LineBuffer, dropping blank cells.
pub fn line_buffer_from_row(row: &Row, bright_palette: bool) -> LineBuffer {
    let mut line = LineBuffer::new();
    for (col, cell) in row.cells.iter().enumerate() {
        if cell.flags.contains(CellFlags::WIDE_SPACER) {
            continue;
        }
        let converted = CharacterCell::from_grid_cell(cell, bright_palette);
        if converted.is_blank() {
            continue;
        }
        let col = col as u16;
        if cell.flags.contains(CellFlags::WIDE_CHAR) {
            line.insert(col + 1, converted.clone());
        }
        line.insert(col, converted);
    }
    line
}
