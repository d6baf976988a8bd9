pub mod color;
pub mod cursor;
pub mod grid;
pub mod modes;
pub mod state;

pub use state::{CursorSnapshot, TerminalState};
