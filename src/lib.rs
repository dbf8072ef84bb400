//! upyterm: serial terminal and script runner for MicroPython boards.

pub mod config;
pub mod core;
pub mod ui;
