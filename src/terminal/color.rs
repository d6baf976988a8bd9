/// Terminal color as tracked by the emulator: 16-color / 256-color indexed,
/// truecolor, or the default foreground/background pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Default for Color {
    fn default() -> Self {
        Color::Default
    }
}

/// Convert a 256-color index above the themable range to an RGB tuple.
/// 16-231 are a 6x6x6 color cube, 232-255 are a grayscale ramp. Indices
/// 0-15 resolve through the recording's theme and never reach this function.
pub fn extended_to_rgb(index: u8) -> (u8, u8, u8) {
    match index {
        // 6x6x6 color cube
        16..=231 => {
            let idx = index - 16;
            let r = idx / 36;
            let g = (idx % 36) / 6;
            let b = idx % 6;
            let to_val = |v: u8| if v == 0 { 0 } else { 55 + 40 * v };
            (to_val(r), to_val(g), to_val(b))
        }
        // Grayscale ramp
        232..=255 => {
            let v = 8 + 10 * (index - 232);
            (v, v, v)
        }
        _ => (0, 0, 0),
    }
}
