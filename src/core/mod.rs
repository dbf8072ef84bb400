//! Serial terminal engine.
//!
//! - **port**: Serial backend seam (real ports via `serialport`)
//! - **transport**: Connection, reader thread and paced writes
//! - **chain**: Ordered workers that observe every chunk read
//! - **term**: Byte decoder, VT parser and character grid
//! - **emulator**: Permanent worker keeping a screen up to date
//! - **exec**: Running scripts through the device's raw prompt
//! - **session**: All of the above wired together
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Transport
//! │   ├── Writer (paced, chunked)
//! │   └── reader thread ── InterceptorChain
//! │                         ├── EmulatorWorker ── Screen (grid + parser)
//! │                         └── PendingCommand (while a script runs)
//! └── RemoteExec
//! ```

pub mod chain;
pub mod emulator;
pub mod exec;
pub mod port;
pub mod session;
pub mod term;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
