//! Serial transport
//!
//! Owns the connection and a dedicated reader thread. The reader thread is
//! the only place bytes arrive from the device and the only place the
//! interceptor chain is touched while a connection is live; callers hand new
//! workers over through a mutex-guarded inbox. Writes go through a separate
//! writer half and are split into paced chunks.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::chain::{InterceptorChain, Worker};
use super::port::{PortSettings, SerialBackend, SerialHalves};

/// Largest slice handed to the device in one write
pub const DEFAULT_CHUNK_SIZE: usize = 256;
/// Delay between two consecutive chunks
pub const DEFAULT_PACING_DELAY: Duration = Duration::from_millis(10);

const READ_BUFFER_SIZE: usize = 4096;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open serial port {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("Serial port is not open")]
    NotOpen,

    #[error("Failed to write to serial port: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to list serial ports: {0}")]
    PortList(#[source] io::Error),
}

/// Write chunking policy. The target's input buffer is small and drops
/// bytes under burst writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub chunk_size: usize,
    pub delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            delay: DEFAULT_PACING_DELAY,
        }
    }
}

/// Something bytes can be sent to the device through
pub trait Outbound: Send + Sync {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to the writer half of the current connection
#[derive(Clone)]
pub struct Writer {
    half: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    pacing: Pacing,
}

impl Writer {
    fn new(pacing: Pacing) -> Self {
        Self {
            half: Arc::new(Mutex::new(None)),
            pacing,
        }
    }

    /// Write `bytes` in chunks of at most `chunk_size`, sleeping `delay`
    /// between chunks. Concurrent writers are serialized.
    pub fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = lock(&self.half);
        let writer = guard.as_mut().ok_or(TransportError::NotOpen)?;

        for (i, chunk) in bytes.chunks(self.pacing.chunk_size.max(1)).enumerate() {
            if i > 0 && !self.pacing.delay.is_zero() {
                thread::sleep(self.pacing.delay);
            }
            writer
                .write_all(chunk)
                .and_then(|_| writer.flush())
                .map_err(|e| {
                    warn!("Serial write failed: {}", e);
                    TransportError::Write(e)
                })?;
        }
        Ok(())
    }

    fn attach(&self, writer: Box<dyn Write + Send>) {
        *lock(&self.half) = Some(writer);
    }

    fn detach(&self) {
        lock(&self.half).take();
    }
}

impl Outbound for Writer {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.write(bytes)
    }
}

/// State shared with the reader thread
#[derive(Default)]
struct Shared {
    /// Workers waiting to join the chain
    inbox: Mutex<Vec<Box<dyn Worker>>>,
    running: AtomicBool,
}

impl Shared {
    fn take_inbox(&self) -> Vec<Box<dyn Worker>> {
        std::mem::take(&mut *lock(&self.inbox))
    }
}

/// Connection state, guarded by one mutex
#[derive(Default)]
struct Link {
    settings: Option<PortSettings>,
    reader: Option<JoinHandle<InterceptorChain>>,
    stop: Arc<AtomicBool>,
    /// The chain while no reader thread owns it
    parked: InterceptorChain,
}

/// Serial connection plus its reader thread
pub struct Transport {
    backend: Arc<dyn SerialBackend>,
    writer: Writer,
    shared: Arc<Shared>,
    link: Mutex<Link>,
}

impl Transport {
    pub fn new(backend: Arc<dyn SerialBackend>, pacing: Pacing) -> Self {
        Self {
            backend,
            writer: Writer::new(pacing),
            shared: Arc::new(Shared::default()),
            link: Mutex::new(Link::default()),
        }
    }

    /// Open `settings.port`, closing any current connection first
    pub fn open(&self, settings: PortSettings) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        self.shutdown(&mut link);

        let SerialHalves { reader, writer } = self.backend.open(&settings).map_err(|e| {
            error!("{}", e);
            e
        })?;
        self.writer.attach(writer);

        let mut chain = std::mem::take(&mut link.parked);
        chain.adopt(self.shared.take_inbox());

        let stop = Arc::new(AtomicBool::new(false));
        self.shared.running.store(true, Ordering::SeqCst);

        let reader_thread = {
            let stop = stop.clone();
            let shared = self.shared.clone();
            let writer = self.writer.clone();
            let port = settings.port.clone();
            thread::spawn(move || read_loop(reader, chain, &stop, &shared, &writer, &port))
        };

        info!(
            "Opened {} at {} baud (read timeout {:?})",
            settings.port, settings.baud_rate, settings.read_timeout
        );
        link.stop = stop;
        link.reader = Some(reader_thread);
        link.settings = Some(settings);
        Ok(())
    }

    /// Stop the reader thread and close the connection. Idempotent; no
    /// worker runs after this returns.
    pub fn close(&self) {
        let mut link = lock(&self.link);
        self.shutdown(&mut link);
    }

    fn shutdown(&self, link: &mut Link) {
        let Some(reader_thread) = link.reader.take() else {
            return;
        };

        link.stop.store(true, Ordering::SeqCst);
        self.writer.detach();

        match reader_thread.join() {
            Ok(chain) => link.parked = chain,
            Err(_) => error!("Serial reader thread panicked, its workers are lost"),
        }
        self.shared.running.store(false, Ordering::SeqCst);

        link.parked.adopt(self.shared.take_inbox());
        link.parked.teardown();

        if let Some(settings) = link.settings.take() {
            info!("Closed {}", settings.port);
        }
    }

    /// True while the reader thread is alive
    pub fn is_open(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Name of the open port
    pub fn port_name(&self) -> Option<String> {
        if !self.is_open() {
            return None;
        }
        lock(&self.link).settings.as_ref().map(|s| s.port.clone())
    }

    /// Add a worker to the end of the chain. It sees chunks read after this
    /// call; if the transport is closed it starts with the next `open`.
    pub fn register_worker(&self, worker: Box<dyn Worker>) {
        lock(&self.shared.inbox).push(worker);
    }

    /// Paced write to the device
    pub fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writer.write(bytes)
    }

    /// Write handle that does not keep the transport alive
    pub fn writer(&self) -> Writer {
        self.writer.clone()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Timed-out and interrupted reads just mean "nothing yet"
fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    mut chain: InterceptorChain,
    stop: &AtomicBool,
    shared: &Shared,
    writer: &Writer,
    port: &str,
) -> InterceptorChain {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    debug!("Reader thread started for {}", port);

    while !stop.load(Ordering::SeqCst) {
        let read = match reader.read(&mut buffer) {
            Ok(0) => {
                info!("{} was closed", port);
                break;
            }
            Ok(n) => n,
            Err(e) if is_idle(&e) => 0,
            Err(e) => {
                error!("Read from {} failed: {}", port, e);
                break;
            }
        };

        if stop.load(Ordering::SeqCst) {
            break;
        }
        chain.adopt(shared.take_inbox());
        if read > 0 {
            chain.dispatch(&buffer[..read]);
        }
        chain.expire(Instant::now());
    }

    // A fault closes the connection for writers too, and nothing will expire
    // the pending workers any more. Detach first so a late registration
    // either lands in the inbox taken here or fails its write.
    if !stop.load(Ordering::SeqCst) {
        writer.detach();
        chain.adopt(shared.take_inbox());
        chain.teardown();
    }
    shared.running.store(false, Ordering::SeqCst);
    debug!("Reader thread for {} exiting", port);
    chain
}
