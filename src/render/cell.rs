use unicode_width::UnicodeWidthStr;

use crate::terminal::color::{extended_to_rgb, Color};
use crate::terminal::cursor::CellAttrs;
use crate::terminal::grid::Cell;

/// Rendering color of one character cell: the default pair, a themable
/// palette slot, or a literal RGB value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellColor {
    Foreground,
    Background,
    Indexed(u8),
    Rgb(u32),
}

impl CellColor {
    fn resolve(color: Color, bold: bool, bright_palette: bool) -> Self {
        match color {
            Color::Default => CellColor::Foreground,
            Color::Indexed(i) if i < 8 => {
                // Bold plus a basic color selects the bright slot when the
                // palette carries one.
                if bold && bright_palette {
                    CellColor::Indexed(i + 8)
                } else {
                    CellColor::Indexed(i)
                }
            }
            Color::Indexed(i) if i < 16 => CellColor::Indexed(i),
            Color::Indexed(i) => {
                let (r, g, b) = extended_to_rgb(i);
                CellColor::Rgb(pack_rgb(r, g, b))
            }
            Color::Rgb(r, g, b) => CellColor::Rgb(pack_rgb(r, g, b)),
        }
    }
}

fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// One rendered character cell. `text` is a full grapheme cluster; two cells
/// compare equal iff every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacterCell {
    pub text: String,
    pub color: CellColor,
    pub background_color: CellColor,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
}

impl CharacterCell {
    /// Convert an emulator cell. `bright_palette` reports whether the theme
    /// carries the bright 8-15 slots; without them bold keeps the base index.
    pub fn from_grid_cell(cell: &Cell, bright_palette: bool) -> Self {
        let bold = cell.attrs.contains(CellAttrs::BOLD);
        let fg = CellColor::resolve(cell.fg, bold, bright_palette);
        let bg = match cell.bg {
            Color::Default => CellColor::Background,
            other => CellColor::resolve(other, false, bright_palette),
        };

        // SGR 7 (REVERSE): swap colors after resolution
        let (fg, bg) = if cell.attrs.contains(CellAttrs::REVERSE) {
            (bg, fg)
        } else {
            (fg, bg)
        };

        // SGR 8 (HIDDEN): make text invisible by matching fg to bg
        let fg = if cell.attrs.contains(CellAttrs::HIDDEN) {
            bg
        } else {
            fg
        };

        Self {
            text: cell.text.clone(),
            color: fg,
            background_color: bg,
            bold,
            italic: cell.attrs.contains(CellAttrs::ITALIC),
            underline: cell.attrs.contains(CellAttrs::UNDERLINE),
            strikethrough: cell.attrs.contains(CellAttrs::STRIKETHROUGH),
        }
    }

    /// The reverse-video cell drawn at the cursor position.
    pub fn cursor_overlay(text: &str) -> Self {
        Self {
            text: text.to_string(),
            color: CellColor::Background,
            background_color: CellColor::Foreground,
            bold: false,
            italic: false,
            underline: false,
            strikethrough: false,
        }
    }

    /// Display width in terminal cells (wide glyphs count 2, zero-width
    /// extenders count 0).
    pub fn display_width(&self) -> u16 {
        UnicodeWidthStr::width(self.text.as_str()).max(1) as u16
    }

    /// A cell contributes nothing visible: a plain space on the default
    /// background with no decoration.
    pub fn is_blank(&self) -> bool {
        self.text == " "
            && self.background_color == CellColor::Background
            && !self.underline
            && !self.strikethrough
    }
}
