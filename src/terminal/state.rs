use unicode_width::UnicodeWidthChar;

use super::color::Color;
use super::cursor::{CellAttrs, CursorState};
use super::grid::{Cell, Grid};
use super::modes::TerminalModes;

/// Position and visibility of the cursor at one point in time, compared
/// across frames to decide which rows need a cursor repaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub row: u16,
    pub col: u16,
    pub visible: bool,
}

/// Full terminal state. Implements `vte::Perform` to process escape sequences.
pub struct TerminalState {
    pub grid: Grid,
    pub alt_grid: Option<Grid>,
    pub using_alt: bool,
    pub cursor: CursorState,
    pub modes: TerminalModes,
    pub scroll_top: u16,
    pub scroll_bottom: u16,
    pub tab_stops: Vec<bool>,
    cols: u16,
    rows: u16,
    /// DEC Special Graphics charset active (ESC ( 0)
    charset_g0_drawing: bool,
    /// Grid position of the last printed character, the anchor for
    /// zero-width characters that extend its grapheme cluster.
    last_print: Option<(u16, u16)>,
    /// Last character passed through `print()`, used by CSI REP (`b`).
    last_printed_char: char,
}

impl TerminalState {
    pub fn new(rows: u16, cols: u16) -> Self {
        let mut tab_stops = vec![false; cols as usize];
        for i in (0..cols as usize).step_by(8) {
            tab_stops[i] = true;
        }

        Self {
            grid: Grid::new(rows, cols),
            alt_grid: None,
            using_alt: false,
            cursor: CursorState::new(),
            modes: TerminalModes::default(),
            scroll_top: 0,
            scroll_bottom: rows.saturating_sub(1),
            tab_stops,
            cols,
            rows,
            charset_g0_drawing: false,
            last_print: None,
            last_printed_char: ' ',
        }
    }

    pub fn columns(&self) -> u16 {
        self.cols
    }

    pub fn lines(&self) -> u16 {
        self.rows
    }

    /// Feed a chunk of bytes through the given vte parser.
    pub fn feed(&mut self, parser: &mut vte::Parser, bytes: &[u8]) {
        for &byte in bytes {
            parser.advance(self, byte);
        }
    }

    /// The grid currently being drawn to (main or alternate).
    pub fn active_grid(&self) -> &Grid {
        if self.using_alt {
            self.alt_grid.as_ref().unwrap_or(&self.grid)
        } else {
            &self.grid
        }
    }

    /// Drain the dirty row indices of the active grid.
    pub fn take_dirty_rows(&mut self) -> Vec<u16> {
        self.active_grid_mut().take_dirty_rows()
    }

    pub fn cursor_snapshot(&self) -> CursorSnapshot {
        CursorSnapshot {
            row: self.cursor.row,
            // The column may sit one past the edge while a wrap is pending
            col: self.cursor.col.min(self.cols.saturating_sub(1)),
            visible: self.cursor.visible && self.modes.cursor_visible,
        }
    }

    // Helper: get the active grid mutably. Callers must copy any self.* values
    // they need BEFORE calling this, because it borrows &mut self.
    fn active_grid_mut(&mut self) -> &mut Grid {
        if self.using_alt {
            self.alt_grid.as_mut().unwrap()
        } else {
            &mut self.grid
        }
    }

    fn linefeed(&mut self) {
        if self.cursor.row == self.scroll_bottom {
            let top = self.scroll_top;
            let bottom = self.scroll_bottom;
            self.active_grid_mut().scroll_up(top, bottom);
        } else if self.cursor.row < self.rows.saturating_sub(1) {
            self.cursor.row += 1;
        }
    }

    fn reverse_index(&mut self) {
        if self.cursor.row == self.scroll_top {
            let top = self.scroll_top;
            let bottom = self.scroll_bottom;
            self.active_grid_mut().scroll_down(top, bottom);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
        }
    }

    fn carriage_return(&mut self) {
        self.cursor.col = 0;
    }

    fn backspace(&mut self) {
        if self.cursor.col > 0 {
            self.cursor.col -= 1;
        }
    }

    fn tab(&mut self) {
        let col = self.cursor.col as usize + 1;
        for i in col..self.cols as usize {
            if self.tab_stops.get(i).copied().unwrap_or(false) {
                self.cursor.col = i as u16;
                return;
            }
        }
        self.cursor.col = self.cols.saturating_sub(1);
    }

    fn cursor_up(&mut self, n: u16) {
        let min_row = if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom
        {
            self.scroll_top
        } else {
            0
        };
        self.cursor.row = self.cursor.row.saturating_sub(n).max(min_row);
    }

    fn cursor_down(&mut self, n: u16) {
        let max_row = if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom
        {
            self.scroll_bottom
        } else {
            self.rows.saturating_sub(1)
        };
        self.cursor.row = (self.cursor.row + n).min(max_row);
    }

    fn cursor_forward(&mut self, n: u16) {
        self.cursor.col = (self.cursor.col + n).min(self.cols.saturating_sub(1));
    }

    fn cursor_backward(&mut self, n: u16) {
        self.cursor.col = self.cursor.col.saturating_sub(n);
    }

    fn erase_display(&mut self, mode: u16) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let cols = self.cols;
        let rows = self.rows;
        let bg = self.cursor.bg;
        let grid = self.active_grid_mut();
        match mode {
            0 => {
                grid.erase_cells(crow, ccol, cols, bg);
                for r in (crow + 1)..rows {
                    grid.row_mut(r).erase_with_bg(bg);
                }
            }
            1 => {
                for r in 0..crow {
                    grid.row_mut(r).erase_with_bg(bg);
                }
                grid.erase_cells(crow, 0, ccol + 1, bg);
            }
            2 => {
                for r in 0..rows {
                    grid.row_mut(r).erase_with_bg(bg);
                }
            }
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: u16) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let cols = self.cols;
        let bg = self.cursor.bg;
        let grid = self.active_grid_mut();
        match mode {
            0 => grid.erase_cells(crow, ccol, cols, bg),
            1 => grid.erase_cells(crow, 0, ccol + 1, bg),
            2 => grid.row_mut(crow).erase_with_bg(bg),
            _ => {}
        }
    }

    fn insert_lines(&mut self, n: u16) {
        if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom {
            let crow = self.cursor.row;
            let bottom = self.scroll_bottom;
            for _ in 0..n {
                self.active_grid_mut().scroll_down(crow, bottom);
            }
            self.cursor.col = 0;
        }
    }

    fn delete_lines(&mut self, n: u16) {
        if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom {
            let crow = self.cursor.row;
            let bottom = self.scroll_bottom;
            for _ in 0..n {
                self.active_grid_mut().scroll_up(crow, bottom);
            }
            self.cursor.col = 0;
        }
    }

    fn erase_chars(&mut self, n: u16) {
        let end = (self.cursor.col + n).min(self.cols);
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let bg = self.cursor.bg;
        self.active_grid_mut().erase_cells(crow, ccol, end, bg);
    }

    fn insert_chars(&mut self, n: u16) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        self.active_grid_mut().insert_cells(crow, ccol, n);
    }

    fn delete_chars(&mut self, n: u16) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        self.active_grid_mut().delete_cells(crow, ccol, n);
    }

    fn scroll_up_n(&mut self, n: u16) {
        let top = self.scroll_top;
        let bottom = self.scroll_bottom;
        for _ in 0..n {
            self.active_grid_mut().scroll_up(top, bottom);
        }
    }

    fn scroll_down_n(&mut self, n: u16) {
        let top = self.scroll_top;
        let bottom = self.scroll_bottom;
        for _ in 0..n {
            self.active_grid_mut().scroll_down(top, bottom);
        }
    }

    fn save_cursor(&mut self) {
        self.cursor.save();
    }

    fn restore_cursor(&mut self) {
        self.cursor.restore();
    }

    fn enter_alt_screen(&mut self) {
        if !self.using_alt {
            self.alt_grid = Some(Grid::new(self.rows, self.cols));
            self.using_alt = true;
            self.modes.alt_screen = true;
        }
    }

    fn exit_alt_screen(&mut self) {
        if self.using_alt {
            self.using_alt = false;
            self.modes.alt_screen = false;
            self.alt_grid = None;
            self.grid.mark_all_dirty();
        }
    }

    fn clear_screen(&mut self) {
        let rows = self.rows;
        let grid = self.active_grid_mut();
        for r in 0..rows {
            grid.row_mut(r).clear();
        }
        self.cursor.row = 0;
        self.cursor.col = 0;
    }

    /// Apply a run of SGR codes to the pen. Codes 38 and 48 consume their
    /// extended-color subparameters; everything unrecognized is skipped.
    fn handle_sgr(&mut self, params: &[u16]) {
        // An empty CSI m means reset
        let params = if params.is_empty() { &[0u16][..] } else { params };
        let pen = &mut self.cursor;

        let mut idx = 0;
        while idx < params.len() {
            let code = params[idx];
            idx += 1;
            match code {
                0 => {
                    pen.fg = Color::Default;
                    pen.bg = Color::Default;
                    pen.attrs = CellAttrs::empty();
                }
                1..=9 => {
                    if let Some(attr) = sgr_attr(code) {
                        pen.attrs.insert(attr);
                    }
                }
                22 => pen.attrs.remove(CellAttrs::BOLD | CellAttrs::DIM),
                23..=29 => {
                    if let Some(attr) = sgr_attr(code - 20) {
                        pen.attrs.remove(attr);
                    }
                }
                30..=37 => pen.fg = Color::Indexed((code - 30) as u8),
                38 => match sgr_extended_color(&params[idx..]) {
                    Some((color, used)) => {
                        pen.fg = color;
                        idx += used;
                    }
                    None => idx += 1,
                },
                39 => pen.fg = Color::Default,
                40..=47 => pen.bg = Color::Indexed((code - 40) as u8),
                48 => match sgr_extended_color(&params[idx..]) {
                    Some((color, used)) => {
                        pen.bg = color;
                        idx += used;
                    }
                    None => idx += 1,
                },
                49 => pen.bg = Color::Default,
                90..=97 => pen.fg = Color::Indexed((code - 90 + 8) as u8),
                100..=107 => pen.bg = Color::Indexed((code - 100 + 8) as u8),
                _ => {}
            }
        }
    }

    fn set_dec_mode(&mut self, params: &[u16], enable: bool) {
        for &p in params {
            match p {
                6 => {
                    self.modes.origin = enable;
                    // DECOM toggle homes cursor
                    if enable {
                        self.cursor.row = self.scroll_top;
                    } else {
                        self.cursor.row = 0;
                    }
                    self.cursor.col = 0;
                }
                7 => self.modes.autowrap = enable,
                25 => self.modes.cursor_visible = enable,
                47 => {
                    if enable {
                        self.enter_alt_screen();
                    } else {
                        self.exit_alt_screen();
                    }
                }
                1047 => {
                    // Alt screen with clear on enter (no cursor save/restore)
                    if enable {
                        self.enter_alt_screen();
                        self.clear_screen();
                    } else {
                        self.exit_alt_screen();
                    }
                }
                1048 => {
                    // Save/restore cursor (used with mode 1047)
                    if enable {
                        self.save_cursor();
                    } else {
                        self.restore_cursor();
                    }
                }
                1049 => {
                    if enable {
                        self.save_cursor();
                        self.enter_alt_screen();
                        self.clear_screen();
                    } else {
                        self.exit_alt_screen();
                        self.restore_cursor();
                    }
                }
                _ => {}
            }
        }
    }

    fn set_mode(&mut self, params: &[u16], enable: bool) {
        for &p in params {
            match p {
                4 => self.modes.insert = enable,
                20 => self.modes.linefeed_newline = enable,
                _ => {}
            }
        }
    }

    fn put_char(&mut self, c: char, width: u16) {
        if self.cursor.col >= self.cols {
            if self.modes.autowrap {
                self.carriage_return();
                self.linefeed();
            } else {
                self.cursor.col = self.cols.saturating_sub(1);
            }
        }

        if self.modes.insert {
            let row = self.cursor.row;
            let col = self.cursor.col;
            self.active_grid_mut().insert_cells(row, col, width);
        }

        let row = self.cursor.row;
        let col = self.cursor.col;
        let cell = Cell::new(c, self.cursor.fg, self.cursor.bg, self.cursor.attrs, width == 2);
        let cols = self.cols;

        let grid = self.active_grid_mut();
        grid.set_cell(row, col, cell);

        if width == 2 && col + 1 < cols {
            grid.set_cell(row, col + 1, Cell::wide_spacer());
        }

        self.last_print = Some((row, col));
        self.cursor.col += width;
    }
}

/// Map ASCII to DEC Special Graphics (line-drawing) character.
fn dec_line_drawing_char(c: char) -> char {
    match c {
        '`' => '◆', // diamond
        'a' => '▒', // checkerboard
        'j' => '┘',
        'k' => '┐',
        'l' => '┌',
        'm' => '└',
        'n' => '┼',
        'o' => '⎺', // scan 1
        'p' => '⎻', // scan 3
        'q' => '─',
        'r' => '⎼', // scan 7
        's' => '⎽', // scan 9
        't' => '├',
        'u' => '┤',
        'v' => '┴',
        'w' => '┬',
        'x' => '│',
        'y' => '≤',
        'z' => '≥',
        '{' => 'π',
        '|' => '≠',
        '}' => '£',
        '~' => '·',
        _ => c,
    }
}

/// The cell attribute set or cleared by a basic SGR code (1-9; the matching
/// clear codes map back here via `code - 20`).
fn sgr_attr(code: u16) -> Option<CellAttrs> {
    Some(match code {
        1 => CellAttrs::BOLD,
        2 => CellAttrs::DIM,
        3 => CellAttrs::ITALIC,
        4 => CellAttrs::UNDERLINE,
        5 => CellAttrs::BLINK,
        7 => CellAttrs::REVERSE,
        8 => CellAttrs::HIDDEN,
        9 => CellAttrs::STRIKETHROUGH,
        _ => return None,
    })
}

/// Decode the subparameters of SGR 38/48: `5;n` selects a palette index,
/// `2;r;g;b` a direct color. Returns the color and how many parameters the
/// form consumed.
fn sgr_extended_color(rest: &[u16]) -> Option<(Color, usize)> {
    match *rest.first()? {
        5 => {
            let n = *rest.get(1)?;
            Some((Color::Indexed(n as u8), 2))
        }
        2 => {
            let (r, g, b) = (*rest.get(1)?, *rest.get(2)?, *rest.get(3)?);
            Some((Color::Rgb(r as u8, g as u8, b as u8), 4))
        }
        _ => None,
    }
}

fn extract_params(params: &vte::Params) -> Vec<u16> {
    params
        .iter()
        .flat_map(|subparams| subparams.iter().copied())
        .collect()
}

fn param(params: &[u16], idx: usize, default: u16) -> u16 {
    params
        .get(idx)
        .copied()
        .filter(|&v| v != 0)
        .unwrap_or(default)
}

impl vte::Perform for TerminalState {
    fn print(&mut self, c: char) {
        // Apply DEC Special Graphics charset mapping
        let c = if self.charset_g0_drawing {
            dec_line_drawing_char(c)
        } else {
            c
        };
        self.last_printed_char = c;
        let width = UnicodeWidthChar::width(c).unwrap_or(0) as u16;

        // Zero-width characters (combining marks, variation selectors, ZWJ)
        // extend the grapheme cluster of the last printed cell rather than
        // occupying a cell of their own.
        if width == 0 {
            if let Some((row, col)) = self.last_print {
                let grid = self.active_grid_mut();
                if row < grid.visible_rows && col < grid.cols {
                    let r = grid.row_mut(row);
                    r.cells[col as usize].push_zero_width(c);
                    r.dirty = true;
                }
            }
            return;
        }

        self.put_char(c, width);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x08 => self.backspace(),
            0x09 => self.tab(),
            0x0A | 0x0B | 0x0C => {
                self.linefeed();
                if self.modes.linefeed_newline {
                    self.carriage_return();
                }
            }
            0x0D => self.carriage_return(),
            _ => {}
        }
    }

    fn csi_dispatch(
        &mut self,
        params: &vte::Params,
        intermediates: &[u8],
        _ignore: bool,
        action: char,
    ) {
        let raw = extract_params(params);
        let is_private = intermediates.contains(&b'?');

        match (action, is_private) {
            ('A', false) => self.cursor_up(param(&raw, 0, 1)),
            ('B', false) => self.cursor_down(param(&raw, 0, 1)),
            ('C', false) => self.cursor_forward(param(&raw, 0, 1)),
            ('D', false) => self.cursor_backward(param(&raw, 0, 1)),
            ('E', false) => {
                self.cursor.col = 0;
                self.cursor_down(param(&raw, 0, 1));
            }
            ('F', false) => {
                self.cursor.col = 0;
                self.cursor_up(param(&raw, 0, 1));
            }
            ('G', false) => {
                self.cursor.col = (param(&raw, 0, 1) - 1).min(self.cols.saturating_sub(1));
            }
            ('H' | 'f', false) => {
                let row = param(&raw, 0, 1) - 1;
                if self.modes.origin {
                    self.cursor.row = (self.scroll_top + row).min(self.scroll_bottom);
                } else {
                    self.cursor.row = row.min(self.rows.saturating_sub(1));
                }
                self.cursor.col = (param(&raw, 1, 1) - 1).min(self.cols.saturating_sub(1));
            }
            ('J', false) => self.erase_display(param(&raw, 0, 0)),
            ('K', false) => self.erase_line(param(&raw, 0, 0)),
            ('L', false) => self.insert_lines(param(&raw, 0, 1)),
            ('M', false) => self.delete_lines(param(&raw, 0, 1)),
            ('P', false) => self.delete_chars(param(&raw, 0, 1)),
            ('S', false) => self.scroll_up_n(param(&raw, 0, 1)),
            ('T', false) => self.scroll_down_n(param(&raw, 0, 1)),
            ('X', false) => self.erase_chars(param(&raw, 0, 1)),
            ('@', false) => self.insert_chars(param(&raw, 0, 1)),
            ('d', false) => {
                let row = param(&raw, 0, 1) - 1;
                if self.modes.origin {
                    self.cursor.row = (self.scroll_top + row).min(self.scroll_bottom);
                } else {
                    self.cursor.row = row.min(self.rows.saturating_sub(1));
                }
            }
            ('m', false) => self.handle_sgr(&raw),
            ('r', false) => {
                let top = param(&raw, 0, 1).saturating_sub(1);
                let bottom = param(&raw, 1, self.rows).saturating_sub(1);
                self.scroll_top = top;
                self.scroll_bottom = bottom.min(self.rows.saturating_sub(1));
                self.cursor.row = if self.modes.origin {
                    self.scroll_top
                } else {
                    0
                };
                self.cursor.col = 0;
            }
            ('h', true) => self.set_dec_mode(&raw, true),
            ('l', true) => self.set_dec_mode(&raw, false),
            ('h', false) => self.set_mode(&raw, true),
            ('l', false) => self.set_mode(&raw, false),
            ('s', false) => self.save_cursor(),
            ('u', false) => self.restore_cursor(),
            ('b', false) => {
                let count = param(&raw, 0, 1) as usize;
                let c = self.last_printed_char;
                let width = UnicodeWidthChar::width(c).unwrap_or(0) as u16;
                if width == 0 {
                    return;
                }
                for _ in 0..count.min(2048) {
                    self.put_char(c, width);
                }
            }
            _ => {}
        }
    }

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {
        // Title, hyperlink, and clipboard sequences have no visual effect on
        // the replayed screen; consume and drop them.
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        match (byte, intermediates) {
            (b'c', []) => {
                let rows = self.rows;
                let cols = self.cols;
                *self = TerminalState::new(rows, cols);
                self.grid.mark_all_dirty();
            }
            (b'D', []) => self.linefeed(),
            (b'E', []) => {
                self.carriage_return();
                self.linefeed();
            }
            (b'H', []) => {
                let col = self.cursor.col as usize;
                if col < self.tab_stops.len() {
                    self.tab_stops[col] = true;
                }
            }
            (b'M', []) => self.reverse_index(),
            (b'7', []) => self.save_cursor(),
            (b'8', []) => self.restore_cursor(),
            // SCS G0: DEC Special Graphics (line drawing)
            (b'0', [b'(']) => self.charset_g0_drawing = true,
            // SCS G0: ASCII
            (b'B', [b'(']) => self.charset_g0_drawing = false,
            _ => {}
        }
    }

    fn hook(&mut self, _params: &vte::Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {
        // DCS payloads (Sixel, XTGETTCAP, ...) are dropped; nothing in a
        // replayed recording can answer them.
    }

    fn unhook(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::grid::CellFlags;

    fn feed_bytes(state: &mut TerminalState, bytes: &[u8]) {
        let mut parser = vte::Parser::new();
        state.feed(&mut parser, bytes);
    }

    fn row_text(state: &TerminalState, row: u16, take: usize) -> String {
        state
            .active_grid()
            .row(row)
            .cells
            .iter()
            .take(take)
            .map(|c| c.text.as_str())
            .collect()
    }

    #[test]
    fn private_mode_1049_toggles_alt_screen() {
        let mut state = TerminalState::new(24, 80);
        assert!(!state.using_alt);

        feed_bytes(&mut state, b"\x1b[?1049h");
        assert!(state.using_alt, "expected ?1049h to enter alt screen");

        feed_bytes(&mut state, b"\x1b[?1049l");
        assert!(!state.using_alt, "expected ?1049l to exit alt screen");
    }

    #[test]
    fn cup_positions_to_correct_rows() {
        let mut state = TerminalState::new(10, 40);
        feed_bytes(&mut state, b"\x1b[3;1HHello");
        assert_eq!(
            state.cursor.row, 2,
            "row should be 2 (0-based) after CSI 3;1 H"
        );

        feed_bytes(&mut state, b"\x1b[5;1HWorld");
        assert_eq!(
            state.cursor.row, 4,
            "row should be 4 (0-based) after CSI 5;1 H"
        );

        assert_eq!(row_text(&state, 2, 5), "Hello");
        assert_eq!(row_text(&state, 4, 5), "World");
        assert_eq!(row_text(&state, 3, 5), "     ");
    }

    #[test]
    fn origin_mode_offsets_cup_by_scroll_region() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[6;21r");
        assert_eq!(state.scroll_top, 5);
        assert_eq!(state.scroll_bottom, 20);

        feed_bytes(&mut state, b"\x1b[?6h");
        assert!(state.modes.origin);
        assert_eq!(state.cursor.row, 5);

        feed_bytes(&mut state, b"\x1b[1;1H");
        assert_eq!(state.cursor.row, 5, "origin mode: row 1 -> scroll_top (5)");

        feed_bytes(&mut state, b"\x1b[3;1H");
        assert_eq!(
            state.cursor.row, 7,
            "origin mode: row 3 -> scroll_top + 2 (7)"
        );

        feed_bytes(&mut state, b"\x1b[?6l");
        assert!(!state.modes.origin);
        assert_eq!(state.cursor.row, 0);

        feed_bytes(&mut state, b"\x1b[3;1H");
        assert_eq!(state.cursor.row, 2, "no origin mode: row 3 -> absolute 2");
    }

    #[test]
    fn cuu_cud_respect_scroll_region() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[6;16r");

        feed_bytes(&mut state, b"\x1b[11;1H");
        assert_eq!(state.cursor.row, 10);

        feed_bytes(&mut state, b"\x1b[20A");
        assert_eq!(state.cursor.row, 5, "CUU inside region stops at scroll_top");

        feed_bytes(&mut state, b"\x1b[11;1H");
        feed_bytes(&mut state, b"\x1b[20B");
        assert_eq!(
            state.cursor.row, 15,
            "CUD inside region stops at scroll_bottom"
        );
    }

    #[test]
    fn linefeed_at_bottom_scrolls_region() {
        let mut state = TerminalState::new(3, 10);
        feed_bytes(&mut state, b"one\r\ntwo\r\nthree");
        assert_eq!(row_text(&state, 0, 5), "one  ");

        feed_bytes(&mut state, b"\r\nfour");
        assert_eq!(row_text(&state, 0, 5), "two  ");
        assert_eq!(row_text(&state, 2, 5), "four ");
    }

    #[test]
    fn sgr_sets_colors_and_attributes() {
        let mut state = TerminalState::new(2, 20);
        feed_bytes(&mut state, b"\x1b[1;31;44mX\x1b[0mY");

        let x = &state.grid.row(0).cells[0];
        assert_eq!(x.fg, Color::Indexed(1));
        assert_eq!(x.bg, Color::Indexed(4));
        assert!(x.attrs.contains(CellAttrs::BOLD));

        let y = &state.grid.row(0).cells[1];
        assert_eq!(y.fg, Color::Default);
        assert_eq!(y.bg, Color::Default);
        assert!(y.attrs.is_empty());
    }

    #[test]
    fn sgr_256_and_truecolor() {
        let mut state = TerminalState::new(1, 20);
        feed_bytes(&mut state, b"\x1b[38;5;208ma\x1b[48;2;1;2;3mb");

        assert_eq!(state.grid.row(0).cells[0].fg, Color::Indexed(208));
        assert_eq!(state.grid.row(0).cells[1].bg, Color::Rgb(1, 2, 3));
    }

    #[test]
    fn wide_char_occupies_two_cells() {
        let mut state = TerminalState::new(1, 10);
        feed_bytes(&mut state, "漢a".as_bytes());

        let cells = &state.grid.row(0).cells;
        assert_eq!(cells[0].text, "漢");
        assert!(cells[0].flags.contains(CellFlags::WIDE_CHAR));
        assert!(cells[1].flags.contains(CellFlags::WIDE_SPACER));
        assert_eq!(cells[2].text, "a");
        assert_eq!(state.cursor.col, 3);
    }

    #[test]
    fn zero_width_chars_join_previous_cell() {
        let mut state = TerminalState::new(1, 10);
        // e, combining acute accent, then a
        feed_bytes(&mut state, "e\u{0301}a".as_bytes());

        let cells = &state.grid.row(0).cells;
        assert_eq!(cells[0].text, "e\u{0301}");
        assert_eq!(cells[1].text, "a", "combining mark must not shift later text");
    }

    #[test]
    fn emoji_with_selectors_keeps_following_text() {
        let mut state = TerminalState::new(1, 10);
        // e + sleuth emoji + VS16 + ZWJ + a
        feed_bytes(&mut state, "e\u{1F575}\u{FE0F}\u{200D}a".as_bytes());

        let texts: String = state
            .grid
            .row(0)
            .cells
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert!(texts.contains('a'), "trailing character lost: {:?}", texts);
    }

    #[test]
    fn rep_repeats_last_printed_char() {
        let mut state = TerminalState::new(1, 10);
        feed_bytes(&mut state, b"x\x1b[3b");
        assert_eq!(row_text(&state, 0, 5), "xxxx ");
    }

    #[test]
    fn autowrap_wraps_at_last_column() {
        let mut state = TerminalState::new(2, 4);
        feed_bytes(&mut state, b"abcde");
        assert_eq!(row_text(&state, 0, 4), "abcd");
        assert_eq!(row_text(&state, 1, 4), "e   ");
    }

    #[test]
    fn erase_line_modes() {
        let mut state = TerminalState::new(1, 6);
        feed_bytes(&mut state, b"abcdef\x1b[1;4H\x1b[1K");
        assert_eq!(row_text(&state, 0, 6), "    ef");

        let mut state = TerminalState::new(1, 6);
        feed_bytes(&mut state, b"abcdef\x1b[1;4H\x1b[0K");
        assert_eq!(row_text(&state, 0, 6), "abc   ");
    }

    #[test]
    fn cursor_visibility_mode() {
        let mut state = TerminalState::new(2, 10);
        assert!(state.cursor_snapshot().visible);

        feed_bytes(&mut state, b"\x1b[?25l");
        assert!(!state.cursor_snapshot().visible);

        feed_bytes(&mut state, b"\x1b[?25h");
        assert!(state.cursor_snapshot().visible);
    }

    #[test]
    fn dec_special_graphics_charset() {
        let mut state = TerminalState::new(1, 10);
        feed_bytes(&mut state, b"\x1b(0qx\x1b(Bq");
        let cells = &state.grid.row(0).cells;
        assert_eq!(cells[0].text, "─");
        assert_eq!(cells[1].text, "│");
        assert_eq!(cells[2].text, "q");
    }

    #[test]
    fn ris_resets_screen() {
        let mut state = TerminalState::new(2, 10);
        feed_bytes(&mut state, b"hello\x1bc");
        assert_eq!(row_text(&state, 0, 5), "     ");
        assert_eq!(state.cursor.col, 0);
    }
}
