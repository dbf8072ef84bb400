//! Serial port backend
//!
//! The transport only needs a reader half and a writer half over the same
//! device. `SystemSerial` provides them through the `serialport` crate;
//! tests substitute an in-memory device.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::transport::TransportError;

/// Default bounded wait of one read-loop iteration
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Where and how to open a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl PortSettings {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

/// Independent read and write handles to one device
pub struct SerialHalves {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Opens serial connections
pub trait SerialBackend: Send + Sync {
    fn open(&self, settings: &PortSettings) -> Result<SerialHalves, TransportError>;
}

/// Real serial ports, 8N1 without flow control
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerial;

impl SerialBackend for SystemSerial {
    fn open(&self, settings: &PortSettings) -> Result<SerialHalves, TransportError> {
        let open_failed = |e: serialport::Error| TransportError::OpenFailed {
            port: settings.port.clone(),
            source: e.into(),
        };

        let port = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()
            .map_err(open_failed)?;
        let writer = port.try_clone().map_err(open_failed)?;

        Ok(SerialHalves {
            reader: Box::new(PortHalf(port)),
            writer: Box::new(PortHalf(writer)),
        })
    }
}

/// List the serial devices present on this machine
pub fn available_ports() -> Result<Vec<String>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| TransportError::PortList(e.into()))?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

/// One handle of a cloned `SerialPort`
struct PortHalf(Box<dyn SerialPort>);

impl Read for PortHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for PortHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
