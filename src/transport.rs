use std::io::{self, BufRead, BufReader, Read, Write};
use std::thread;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort, SerialPortType};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Result of one bounded line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A decoded, trimmed line. May be empty.
    Line(String),
    /// The read timed out before a full line arrived. Partial bytes are kept for the next read.
    Idle,
}

/// Duplex line channel to the device. Dropping the value closes it.
pub trait Transport {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()>;
    fn read_line(&mut self) -> Result<ReadOutcome>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_command(bytes)
    }

    fn read_line(&mut self) -> Result<ReadOutcome> {
        (**self).read_line()
    }
}

/// Decode raw line bytes, replacing invalid UTF-8 instead of failing.
pub fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Longest line kept. Anything longer is dropped up to its newline.
pub const MAX_LINE_BYTES: usize = 4096;

pub struct StreamTransport<S: Read + Write> {
    reader: BufReader<S>,
    pending: Vec<u8>,
    discarding: bool,
}

pub type SerialTransport = StreamTransport<Box<dyn SerialPort>>;

impl<S: Read + Write> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        StreamTransport {
            reader: BufReader::new(stream),
            pending: Vec::new(),
            discarding: false,
        }
    }

    fn take_line(&mut self) -> String {
        let line = decode_line(&self.pending);
        self.pending.clear();
        line
    }
}

impl SerialTransport {
    /// Open `port_name`, wait for the board to come out of reset, then drop stale input.
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration, settle: Duration) -> Result<Self> {
        debug!(port = port_name, baud_rate, ?timeout, "opening serial port");
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|source| Error::Open {
                port: port_name.to_string(),
                source,
            })?;

        if !settle.is_zero() {
            thread::sleep(settle);
        }
        port.clear(ClearBuffer::Input)
            .map_err(|e| Error::Read(e.into()))?;

        Ok(StreamTransport::new(port))
    }
}

impl<S: Read + Write> Drop for StreamTransport<S> {
    fn drop(&mut self) {
        debug!("closing serial transport");
    }
}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        trace!(?bytes, "writing command");
        let stream = self.reader.get_mut();
        stream.write_all(bytes).map_err(Error::Write)?;
        stream.flush().map_err(Error::Write)
    }

    /// An oversized line and its tail both read as [`ReadOutcome::Idle`], so a
    /// device streaming bytes without newlines still runs into the idle limit.
    fn read_line(&mut self) -> Result<ReadOutcome> {
        let room = (MAX_LINE_BYTES - self.pending.len()) as u64;
        match (&mut self.reader).take(room).read_until(b'\n', &mut self.pending) {
            Ok(0) if self.pending.is_empty() => Err(Error::Disconnected),
            Ok(_)
                if self.pending.len() >= MAX_LINE_BYTES
                    && self.pending.last() != Some(&b'\n') =>
            {
                warn!(bytes = self.pending.len(), "dropping oversized line");
                self.pending.clear();
                self.discarding = true;
                Ok(ReadOutcome::Idle)
            }
            // Either a full line, or the final unterminated bytes before EOF.
            Ok(_) => {
                let line = self.take_line();
                if std::mem::take(&mut self.discarding) {
                    Ok(ReadOutcome::Idle)
                } else {
                    Ok(ReadOutcome::Line(line))
                }
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(ReadOutcome::Idle)
            }
            Err(e) => Err(Error::Read(e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub path: String,
    pub description: String,
}

pub fn available_ports() -> Result<Vec<PortEntry>> {
    let ports = serialport::available_ports().map_err(Error::Enumerate)?;
    Ok(ports
        .into_iter()
        .map(|p| PortEntry {
            description: describe(&p.port_type),
            path: p.port_name,
        })
        .collect())
}

pub fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(info) => {
            let name = info
                .product
                .as_deref()
                .or(info.manufacturer.as_deref())
                .unwrap_or("USB serial device");
            format!("{} ({:04x}:{:04x})", name, info.vid, info.pid)
        }
        SerialPortType::PciPort => "PCI serial port".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
        SerialPortType::Unknown => "n/a".to_string(),
    }
}
