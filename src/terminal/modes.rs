/// Terminal mode flags: the DEC and ANSI modes that affect replay output.
#[derive(Debug, Clone)]
pub struct TerminalModes {
    /// DECOM: origin mode
    pub origin: bool,
    /// DECAWM: auto-wrap mode
    pub autowrap: bool,
    /// DECTCEM: text cursor visible
    pub cursor_visible: bool,
    /// Alternate screen active
    pub alt_screen: bool,
    /// Insert mode (IRM)
    pub insert: bool,
    /// Line feed / new line mode (LNM)
    pub linefeed_newline: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            origin: false,
            autowrap: true,
            cursor_visible: true,
            alt_screen: false,
            insert: false,
            linefeed_newline: false,
        }
    }
}
