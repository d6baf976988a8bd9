pub mod cell;
pub mod frame;

pub use cell::{CellColor, CharacterCell};
pub use frame::{Frame, LineBuffer, LineEvent};
