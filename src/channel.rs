//! Serial transport consumed by the protocol engine.

use log::{debug, trace};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

use crate::constants::{BAUD_RATE, TIMEOUT_MS};
use crate::error::{Result, SyntaError};

/// Settings used to open a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl PortSettings {
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate: BAUD_RATE,
            timeout: Duration::from_millis(TIMEOUT_MS),
        }
    }
}

/// Byte stream to and from the motor controller.
///
/// Implementations only move bytes; framing and retries live above.
pub trait SerialChannel: Send {
    fn open(&mut self, settings: &PortSettings) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Drop anything left in the input buffer.
    fn clear_input(&mut self) -> Result<()>;

    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read one byte, `Ok(None)` when nothing arrived within `timeout`.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>>;
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}

/// Channel backed by an OS serial port
#[derive(Default)]
pub struct SerialPortChannel {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(SyntaError::NotConnected)
    }
}

impl SerialChannel for SerialPortChannel {
    fn open(&mut self, settings: &PortSettings) -> Result<()> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.timeout)
            .open()?;
        debug!("Opened {} at {} baud", settings.port, settings.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(port) = self.port.take() {
            debug!("Closed {}", port.name().unwrap_or_default());
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port()?.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        trace!("Sending:  {:?}", String::from_utf8_lossy(data));
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        let mut buf = [0u8; 1];
        match port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
