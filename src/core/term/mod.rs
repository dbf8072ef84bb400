//! Terminal emulation primitives.
//!
//! - **grid**: fixed character grid and cursor
//! - **parser**: VT escape sequence state machine driving the grid
//! - **decoder**: chunk-boundary-safe lossy UTF-8 decoding

pub mod decoder;
pub mod grid;
pub mod parser;

pub use decoder::Utf8Decoder;
pub use grid::{Cursor, TerminalGrid};
pub use parser::VtParser;
