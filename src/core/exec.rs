//! Remote script execution
//!
//! Drives the device prompt through a two-marker handshake:
//!
//! ```text
//! execute(script)
//!   └─ write INTERRUPT ─▶ AwaitMenu ── "to exit\r\n>" ──▶ write wrapped script
//!                                                          │
//!                         on_complete(captured) ◀── "\x04>" ── AwaitCompletion
//! ```
//!
//! One [`PendingCommand`] worker walks both stages, so at most one stage is
//! ever registered per call. Only one command may be in flight at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::chain::{Worker, WorkerError};
use super::transport::{lock, Outbound, Transport, TransportError};

/// Keyboard interrupt twice, then enter the raw prompt
pub const INTERRUPT: &[u8] = b"\r\x03\x03\r\x01";
/// Suffix printed once the raw prompt accepts input
pub const MENU_READY: &[u8] = b"to exit\r\n>";
/// End of transmission followed by the prompt
pub const COMPLETION: &[u8] = b"\x04>";

/// Statement printing `ESC c`, sent ahead of every script
const CLEAR_SCREEN: &str = "print(\"\x1bc\")\r";
const LIST_DIR_SCRIPT: &str = "print(os.listdir())";

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Another script is still running")]
    Busy,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Device did not answer within {0:?}")]
    TimedOut(Duration),

    #[error("Script execution was cancelled")]
    Cancelled,

    #[error("Connection closed before the script finished")]
    Abandoned,

    #[error("Unexpected device output: {0}")]
    UnexpectedOutput(String),
}

/// Receives the captured output (including the trailing [`COMPLETION`])
pub type Completion = Box<dyn FnOnce(Result<Vec<u8>, ExecError>) + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Give up after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Bytes sent once the prompt is ready
pub fn wrap_script(script: &str) -> Vec<u8> {
    format!("{CLEAR_SCREEN}{script}\r\x04").into_bytes()
}

/// Captured output without the trailing completion marker
pub fn strip_completion_marker(captured: &[u8]) -> &[u8] {
    captured.strip_suffix(COMPLETION).unwrap_or(captured)
}

/// Names from the first `[...]` Python list in `output`
pub fn parse_dir_listing(output: &str) -> Result<Vec<String>, ExecError> {
    static LIST: OnceLock<Regex> = OnceLock::new();
    static NAME: OnceLock<Regex> = OnceLock::new();
    let list = LIST.get_or_init(|| Regex::new(r"(?s)\[(.*?)\]").expect("valid regex"));
    let name = NAME.get_or_init(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).expect("valid regex"));

    let body = list
        .captures(output)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| ExecError::UnexpectedOutput(output.trim().to_string()))?;

    Ok(name
        .captures_iter(body.as_str())
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecStage {
    AwaitMenu,
    AwaitCompletion,
}

/// State shared by a pending command and its handle
struct Ticket {
    completion: Mutex<Option<Completion>>,
    cancelled: AtomicBool,
    settled: AtomicBool,
    busy: Arc<AtomicBool>,
}

impl Ticket {
    /// Deliver `result` (if any) exactly once and release the busy flag
    fn settle(&self, result: Option<Result<Vec<u8>, ExecError>>) {
        let completion = lock(&self.completion).take();
        if !self.settled.swap(true, Ordering::SeqCst) {
            self.busy.store(false, Ordering::SeqCst);
        }
        if let (Some(completion), Some(result)) = (completion, result) {
            completion(result);
        }
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

/// Handle to a command in flight
#[derive(Clone)]
pub struct ExecHandle {
    ticket: Arc<Ticket>,
}

impl ExecHandle {
    /// Ask the command to stop; its completion receives
    /// [`ExecError::Cancelled`] on the next read-loop pass
    pub fn cancel(&self) {
        self.ticket.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once the command delivered a result or was dropped
    pub fn is_finished(&self) -> bool {
        self.ticket.is_settled()
    }
}

/// Chain worker for one `execute` call
struct PendingCommand {
    stage: ExecStage,
    buffer: Vec<u8>,
    wrapped: Vec<u8>,
    outbound: Arc<dyn Outbound>,
    deadline: Option<Instant>,
    timeout: Duration,
    ticket: Arc<Ticket>,
}

impl PendingCommand {
    fn new(
        script: &str,
        outbound: Arc<dyn Outbound>,
        options: ExecOptions,
        ticket: Arc<Ticket>,
    ) -> Self {
        Self {
            stage: ExecStage::AwaitMenu,
            buffer: Vec::new(),
            wrapped: wrap_script(script),
            outbound,
            deadline: options.timeout.map(|t| Instant::now() + t),
            timeout: options.timeout.unwrap_or_default(),
            ticket,
        }
    }

    fn await_menu(&mut self, chunk: &[u8]) -> bool {
        self.buffer.extend_from_slice(chunk);
        if !self.buffer.ends_with(MENU_READY) {
            // Only a marker-sized tail can still complete a match
            let excess = self.buffer.len().saturating_sub(MENU_READY.len());
            self.buffer.drain(..excess);
            return false;
        }

        debug!("Device prompt ready, injecting script");
        self.buffer.clear();
        self.stage = ExecStage::AwaitCompletion;
        if let Err(e) = self.outbound.send(&self.wrapped) {
            warn!("Failed to inject script: {}", e);
            self.ticket.settle(Some(Err(e.into())));
            return true;
        }
        false
    }

    fn await_completion(&mut self, chunk: &[u8]) -> bool {
        self.buffer.extend_from_slice(chunk);
        if !self.buffer.ends_with(COMPLETION) {
            return false;
        }

        debug!("Script finished with {} byte(s) of output", self.buffer.len());
        let captured = std::mem::take(&mut self.buffer);
        self.ticket.settle(Some(Ok(captured)));
        true
    }
}

impl Worker for PendingCommand {
    fn name(&self) -> &str {
        match self.stage {
            ExecStage::AwaitMenu => "exec:await-menu",
            ExecStage::AwaitCompletion => "exec:await-completion",
        }
    }

    fn offer(&mut self, chunk: &[u8]) -> Result<bool, WorkerError> {
        if self.ticket.is_settled() {
            return Ok(true);
        }
        // A cancelled command must not inject anything; expire reports it
        if self.ticket.cancelled.load(Ordering::SeqCst) {
            return Ok(false);
        }

        Ok(match self.stage {
            ExecStage::AwaitMenu => self.await_menu(chunk),
            ExecStage::AwaitCompletion => self.await_completion(chunk),
        })
    }

    fn expire(&mut self, now: Instant) -> bool {
        if self.ticket.is_settled() {
            return true;
        }
        if self.ticket.cancelled.load(Ordering::SeqCst) {
            info!("Script execution cancelled");
            self.ticket.settle(Some(Err(ExecError::Cancelled)));
            return true;
        }
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            warn!("Script execution timed out in stage {:?}", self.stage);
            self.ticket.settle(Some(Err(ExecError::TimedOut(self.timeout))));
            return true;
        }
        false
    }
}

impl Drop for PendingCommand {
    fn drop(&mut self) {
        // Torn down before finishing: the completion is dropped uncalled
        self.ticket.settle(None);
    }
}

/// Runs scripts on the device attached to a transport
pub struct RemoteExec {
    transport: Arc<Transport>,
    busy: Arc<AtomicBool>,
}

impl RemoteExec {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while a command is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Run `script` without a timeout
    pub fn execute(
        &self,
        script: &str,
        on_complete: impl FnOnce(Result<Vec<u8>, ExecError>) + Send + 'static,
    ) -> Result<ExecHandle, ExecError> {
        self.execute_with(script, ExecOptions::default(), on_complete)
    }

    /// Run `script`; `on_complete` is invoked from the reader thread at most once.
    ///
    /// `on_complete` must not open or close the transport (directly or via a
    /// `Session`): that joins the reader thread from itself. Send the result
    /// to another thread instead, as [`RemoteExec::run_blocking`] does.
    ///
    /// If the connection closes or faults first, `on_complete` is dropped
    /// without being called.
    pub fn execute_with(
        &self,
        script: &str,
        options: ExecOptions,
        on_complete: impl FnOnce(Result<Vec<u8>, ExecError>) + Send + 'static,
    ) -> Result<ExecHandle, ExecError> {
        if !self.transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExecError::Busy);
        }

        let completion: Completion = Box::new(on_complete);
        let ticket = Arc::new(Ticket {
            completion: Mutex::new(Some(completion)),
            cancelled: AtomicBool::new(false),
            settled: AtomicBool::new(false),
            busy: self.busy.clone(),
        });
        let outbound: Arc<dyn Outbound> = Arc::new(self.transport.writer());
        let pending = PendingCommand::new(script, outbound, options, ticket.clone());

        // Register before interrupting so no reply can slip past
        self.transport.register_worker(Box::new(pending));
        info!("Executing {} byte script", script.len());

        if let Err(e) = self.transport.write(INTERRUPT) {
            // Withdraw: the worker sees a settled ticket and leaves the chain
            ticket.settle(None);
            return Err(e.into());
        }
        Ok(ExecHandle { ticket })
    }

    /// Run `script` and wait for its captured output
    pub fn run_blocking(&self, script: &str, options: ExecOptions) -> Result<Vec<u8>, ExecError> {
        let (tx, rx) = mpsc::channel();
        self.execute_with(script, options, move |result| {
            let _ = tx.send(result);
        })?;
        rx.recv().map_err(|_| ExecError::Abandoned)?
    }

    /// File names in the device's current directory
    pub fn list_dir(&self, options: ExecOptions) -> Result<Vec<String>, ExecError> {
        let captured = self.run_blocking(LIST_DIR_SCRIPT, options)?;
        let output = String::from_utf8_lossy(strip_completion_marker(&captured));
        parse_dir_listing(&output)
    }
}
