//! Input handling.
//!
//! - **keymapper**: Key presses to device byte sequences

pub mod keymapper;

pub use keymapper::*;
