//! Session management
//!
//! Wires a transport, the emulated screen and the exec protocol together the
//! way a front end uses them: one permanent emulator worker, keystrokes
//! written straight to the device, scripts run through [`RemoteExec`].

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use super::emulator::{Screen, ScreenEvent};
use super::exec::RemoteExec;
use super::port::{PortSettings, SerialBackend, SystemSerial};
use super::transport::{Pacing, Transport, TransportError};
use crate::config::Config;
use crate::ui::{Key, KeyMapper};

/// A serial terminal session
pub struct Session {
    transport: Arc<Transport>,
    screen: Screen,
    exec: RemoteExec,
    events: Receiver<ScreenEvent>,
    read_timeout: Duration,
}

impl Session {
    /// Create a closed session with a `rows`×`columns` screen
    pub fn new(
        backend: Arc<dyn SerialBackend>,
        pacing: Pacing,
        rows: u16,
        columns: u16,
        read_timeout: Duration,
    ) -> Self {
        let transport = Arc::new(Transport::new(backend, pacing));
        let (screen, events) = Screen::new(rows, columns);
        transport.register_worker(Box::new(screen.worker()));

        Self {
            exec: RemoteExec::new(transport.clone()),
            transport,
            screen,
            events,
            read_timeout,
        }
    }

    /// Session on real serial ports
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(SystemSerial),
            config.pacing(),
            config.terminal.rows,
            config.terminal.columns,
            config.read_timeout(),
        )
    }

    /// Open `port`, replacing any current connection
    pub fn open(&self, port: &str, baud_rate: u32) -> Result<(), TransportError> {
        self.transport
            .open(PortSettings::new(port, baud_rate).with_read_timeout(self.read_timeout))
    }

    pub fn close(&self) {
        self.transport.close();
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn port_name(&self) -> Option<String> {
        self.transport.port_name()
    }

    /// Write raw input to the device
    pub fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.transport.write(data)
    }

    /// Translate and send one key press
    pub fn send_key(&self, key: Key, text: &str) -> Result<(), TransportError> {
        let bytes = KeyMapper::translate(key, text);
        if bytes.is_empty() {
            return Ok(());
        }
        self.transport.write(&bytes)
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn exec(&self) -> &RemoteExec {
        &self.exec
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Drain pending screen events (non-blocking). True if a redraw is due.
    pub fn process_events(&self) -> bool {
        let mut redraw = false;
        loop {
            match self.events.try_recv() {
                Ok(ScreenEvent::Redraw) => redraw = true,
                Ok(ScreenEvent::Resized { .. }) => redraw = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        redraw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exec::{strip_completion_marker, ExecOptions, INTERRUPT};
    use crate::core::testing::MockDevice;
    use std::thread;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    fn session(device: &MockDevice) -> Session {
        Session::new(
            device.backend(),
            Pacing::default(),
            24,
            80,
            Duration::from_millis(50),
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_device_output_reaches_screen() {
        let device = MockDevice::new();
        let session = session(&device);
        session.open("/dev/mock0", 115200).unwrap();

        device.send(b">>> ");
        assert!(wait_until(|| session.process_events()));
        assert_eq!(session.screen().lines()[0], ">>>");
        assert_eq!(session.screen().cursor_position(), (0, 4));
        assert!(!session.process_events());
    }

    #[test]
    fn test_keys_are_written_translated() {
        let device = MockDevice::new();
        let session = session(&device);
        session.open("/dev/mock0", 115200).unwrap();

        session.send_key(Key::Up, "").unwrap();
        session.send_key(Key::Other, "a").unwrap();
        session.send_key(Key::Other, "").unwrap();
        assert_eq!(device.written(), b"\x1b[Aa");
    }

    #[test]
    fn test_emulator_survives_reconnect() {
        let device = MockDevice::new();
        let session = session(&device);
        session.open("/dev/mock0", 115200).unwrap();
        session.close();
        assert!(session.write(b"x").is_err());

        session.open("/dev/mock0", 115200).unwrap();
        device.send(b"back");
        assert!(wait_until(|| session.screen().lines()[0] == "back"));
    }

    #[test]
    fn test_script_output_is_also_rendered() {
        let device = MockDevice::new();
        device.respond_with(|written| {
            if written == INTERRUPT {
                vec![b"raw REPL; CTRL-B to exit\r\n>".to_vec()]
            } else if written.ends_with(b"\r\x04") {
                vec![b"OK42\r\n\x04\x04>".to_vec()]
            } else {
                Vec::new()
            }
        });
        let session = session(&device);
        session.open("/dev/mock0", 115200).unwrap();

        let captured = session
            .exec()
            .run_blocking("print(42)", ExecOptions::with_timeout(WAIT))
            .unwrap();
        assert_eq!(strip_completion_marker(&captured), b"OK42\r\n\x04");
        assert!(wait_until(|| session
            .screen()
            .lines()
            .iter()
            .any(|line| line.contains("OK42"))));
    }
}
