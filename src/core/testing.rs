//! In-memory serial device for tests

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::port::{PortSettings, SerialBackend, SerialHalves};
use super::transport::TransportError;

enum Feed {
    Data(Vec<u8>),
    Fault,
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct DeviceState {
    to_host: Option<Sender<Feed>>,
    writes: Vec<(Instant, Vec<u8>)>,
    responder: Option<Responder>,
    opens: usize,
    refuse_open: bool,
}

/// A fake device: tests push bytes at the host and inspect what was written
#[derive(Clone, Default)]
pub(crate) struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self) -> Arc<dyn SerialBackend> {
        Arc::new(MockBackend {
            device: self.clone(),
        })
    }

    /// Deliver bytes to the current connection; false if nobody listens
    pub fn send(&self, bytes: &[u8]) -> bool {
        let state = self.state.lock().unwrap();
        match &state.to_host {
            Some(tx) => tx.send(Feed::Data(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Make the next read fail with a non-timeout error
    pub fn fault(&self) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = &state.to_host {
            let _ = tx.send(Feed::Fault);
        }
    }

    /// Answer host writes; each returned chunk is delivered separately
    pub fn respond_with(&self, responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) {
        self.state.lock().unwrap().responder = Some(Box::new(responder));
    }

    pub fn refuse_open(&self) {
        self.state.lock().unwrap().refuse_open = true;
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    /// Every write call with its timestamp
    pub fn writes(&self) -> Vec<(Instant, Vec<u8>)> {
        self.state.lock().unwrap().writes.clone()
    }

    /// All written bytes concatenated
    pub fn written(&self) -> Vec<u8> {
        self.writes().into_iter().flat_map(|(_, bytes)| bytes).collect()
    }
}

struct MockBackend {
    device: MockDevice,
}

impl SerialBackend for MockBackend {
    fn open(&self, settings: &PortSettings) -> Result<SerialHalves, TransportError> {
        let mut state = self.device.state.lock().unwrap();
        if state.refuse_open {
            return Err(TransportError::OpenFailed {
                port: settings.port.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
            });
        }

        let (tx, rx) = mpsc::channel();
        state.to_host = Some(tx);
        state.opens += 1;

        Ok(SerialHalves {
            reader: Box::new(MockReader {
                rx,
                timeout: settings.read_timeout,
                leftover: Vec::new(),
            }),
            writer: Box::new(MockWriter {
                device: self.device.clone(),
            }),
        })
    }
}

struct MockReader {
    rx: Receiver<Feed>,
    timeout: Duration,
    leftover: Vec<u8>,
}

impl MockReader {
    fn drain_leftover(&mut self, buf: &mut [u8]) -> usize {
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        n
    }
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.leftover.is_empty() {
            return Ok(self.drain_leftover(buf));
        }
        match self.rx.recv_timeout(self.timeout) {
            Ok(Feed::Data(data)) => {
                self.leftover = data;
                Ok(self.drain_leftover(buf))
            }
            Ok(Feed::Fault) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")),
            Err(RecvTimeoutError::Timeout) => Err(io::ErrorKind::TimedOut.into()),
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }
}

struct MockWriter {
    device: MockDevice,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.state.lock().unwrap();
        state.writes.push((Instant::now(), buf.to_vec()));

        let replies = state
            .responder
            .as_mut()
            .map(|respond| respond(buf))
            .unwrap_or_default();
        if let Some(tx) = &state.to_host {
            for reply in replies.into_iter().filter(|r| !r.is_empty()) {
                let _ = tx.send(Feed::Data(reply));
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
