//! Serial session management
//!
//! Devices are opened in raw mode with a bounded read timeout. Every
//! operation is valid only on a descriptor this context opened and has not
//! closed yet.

use crate::backend::{Backend, Fd};
use crate::error::{HalError, classify};
use crate::Result;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wpi_config::SerialConfig;

/// Outcome of a blocking single-byte read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialRead {
    Byte(u8),
    /// Nothing arrived before the timeout expired
    Timeout,
}

impl SerialRead {
    /// Value reported for a timeout by [`SerialRead::as_raw`]
    pub const TIMEOUT_SENTINEL: i32 = -1;

    /// Byte value 0-255, or -1 on timeout
    pub fn as_raw(self) -> i32 {
        match self {
            SerialRead::Byte(b) => b as i32,
            SerialRead::Timeout => Self::TIMEOUT_SENTINEL,
        }
    }

    pub fn byte(self) -> Option<u8> {
        match self {
            SerialRead::Byte(b) => Some(b),
            SerialRead::Timeout => None,
        }
    }
}

/// An open serial device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSession {
    pub device: PathBuf,
    pub baud: u32,
}

/// Serial sessions owned by a context
#[derive(Debug, Clone, Default)]
pub struct SerialState {
    sessions: HashMap<Fd, SerialSession>,
}

impl SerialState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, fd: Fd) -> Option<&SerialSession> {
        self.sessions.get(&fd)
    }

    pub fn is_open(&self, fd: Fd) -> bool {
        self.sessions.contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Serial operations on a context
pub struct Serial<'a, B: Backend> {
    backend: &'a mut B,
    state: &'a mut SerialState,
    config: &'a SerialConfig,
}

impl<'a, B: Backend> Serial<'a, B> {
    pub(crate) fn new(
        backend: &'a mut B,
        state: &'a mut SerialState,
        config: &'a SerialConfig,
    ) -> Self {
        Self {
            backend,
            state,
            config,
        }
    }

    /// Open a device in raw mode with the configured read timeout
    pub fn open(&mut self, device: impl AsRef<Path>, baudrate: i32) -> Result<Fd> {
        let device = device.as_ref();
        if device.as_os_str().is_empty() {
            return Err(HalError::logic("invalid device value"));
        }
        if baudrate <= 0 {
            return Err(HalError::logic(format!("invalid baudrate value {baudrate}")));
        }
        let baud = baudrate as u32;

        let fd = self
            .backend
            .serial_open(device, baud, self.config.read_timeout())
            .map_err(classify)?;

        self.state.sessions.insert(
            fd,
            SerialSession {
                device: device.to_path_buf(),
                baud,
            },
        );
        tracing::info!("Serial device {} open at {} baud (fd {})", device.display(), baud, fd);
        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        self.require_open(fd)?;
        self.backend.serial_close(fd).map_err(classify)?;

        if let Some(session) = self.state.sessions.remove(&fd) {
            tracing::info!("Serial device {} closed (fd {})", session.device.display(), fd);
        }
        Ok(())
    }

    /// Discard pending input and output
    pub fn flush(&mut self, fd: Fd) -> Result<()> {
        self.require_open(fd)?;
        self.backend.serial_flush(fd).map_err(classify)
    }

    /// Send exactly one byte
    pub fn put_char(&mut self, fd: Fd, character: i32) -> Result<()> {
        let byte = u8::try_from(character)
            .map_err(|_| HalError::logic(format!("invalid value for character: {character}")))?;
        self.require_open(fd)?;

        match self.backend.serial_write_byte(fd, byte).map_err(classify)? {
            1 => Ok(()),
            n => Err(HalError::execution(format!(
                "write returned {n} (expected 1)"
            ))),
        }
    }

    /// Send a string, returning the number of bytes written
    pub fn puts(&mut self, fd: Fd, text: &str) -> Result<usize> {
        if text.as_bytes().contains(&0) {
            return Err(HalError::logic("text contains a NUL byte"));
        }
        self.require_open(fd)?;

        let sent = self
            .backend
            .serial_write_text(fd, text.as_bytes())
            .map_err(classify)?;
        if sent != text.len() {
            return Err(HalError::execution(format!(
                "wrote {sent} of {} bytes",
                text.len()
            )));
        }

        tracing::debug!("Serial fd {} sent {} bytes", fd, sent);
        Ok(sent)
    }

    /// Format and send; see [`serial_printf!`](crate::serial_printf)
    pub fn printf(&mut self, fd: Fd, args: fmt::Arguments<'_>) -> Result<usize> {
        match args.as_str() {
            Some(text) => self.puts(fd, text),
            None => self.puts(fd, &fmt::format(args)),
        }
    }

    /// Bytes waiting to be read; a fault is an error, never 0
    pub fn data_avail(&mut self, fd: Fd) -> Result<usize> {
        self.require_open(fd)?;
        self.backend.serial_available(fd).map_err(classify)
    }

    /// Block up to the configured timeout for one byte
    pub fn get_char(&mut self, fd: Fd) -> Result<SerialRead> {
        let timeout = self.config.read_timeout();
        self.get_char_timeout(fd, timeout)
    }

    pub fn get_char_timeout(&mut self, fd: Fd, timeout: Duration) -> Result<SerialRead> {
        self.require_open(fd)?;
        let read = self
            .backend
            .serial_read_byte(fd, timeout)
            .map_err(classify)?;
        if read == SerialRead::Timeout {
            tracing::debug!("Serial fd {} read timed out after {:?}", fd, timeout);
        }
        Ok(read)
    }

    pub fn session(&self, fd: Fd) -> Option<&SerialSession> {
        self.state.session(fd)
    }

    fn require_open(&self, fd: Fd) -> Result<()> {
        if self.state.is_open(fd) {
            Ok(())
        } else {
            Err(HalError::logic(format!("fd {fd} is not an open serial descriptor")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BackendCall, MockBackend};

    const PORT: &str = "/dev/ttyAMA0";

    #[test]
    fn test_read_sentinel() {
        assert_eq!(SerialRead::Byte(0).as_raw(), 0);
        assert_eq!(SerialRead::Byte(255).as_raw(), 255);
        assert_eq!(SerialRead::Timeout.as_raw(), -1);
        assert_eq!(SerialRead::Timeout.byte(), None);
    }

    #[test]
    fn test_open_validates_arguments() {
        let mut backend = MockBackend::new();
        let mut state = SerialState::new();
        let config = SerialConfig::default();
        let mut serial = Serial::new(&mut backend, &mut state, &config);

        assert!(serial.open("", 9600).unwrap_err().is_logic());
        assert!(serial.open(PORT, 0).unwrap_err().is_logic());
        assert!(serial.open(PORT, -9600).unwrap_err().is_logic());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_open_passes_configured_timeout() {
        let mut backend = MockBackend::new();
        let mut state = SerialState::new();
        let config = SerialConfig {
            read_timeout_ms: 1500,
        };
        let fd = Serial::new(&mut backend, &mut state, &config)
            .open(PORT, 115_200)
            .unwrap();

        assert!(backend.calls().contains(&BackendCall::SerialOpen {
            path: PathBuf::from(PORT),
            baud: 115_200,
            timeout: Duration::from_millis(1500),
        }));
        assert_eq!(state.session(fd).unwrap().baud, 115_200);
    }

    #[test]
    fn test_put_char_range() {
        let mut backend = MockBackend::new();
        let mut state = SerialState::new();
        let config = SerialConfig::default();
        let mut serial = Serial::new(&mut backend, &mut state, &config);
        let fd = serial.open(PORT, 9600).unwrap();

        assert!(serial.put_char(fd, 256).unwrap_err().is_logic());
        assert!(serial.put_char(fd, -1).unwrap_err().is_logic());
        serial.put_char(fd, 0).unwrap();
        serial.put_char(fd, 255).unwrap();
    }

    #[test]
    fn test_puts_rejects_nul() {
        let mut backend = MockBackend::new();
        let mut state = SerialState::new();
        let config = SerialConfig::default();
        let mut serial = Serial::new(&mut backend, &mut state, &config);
        let fd = serial.open(PORT, 9600).unwrap();

        assert!(serial.puts(fd, "AT\0+RST").unwrap_err().is_logic());
        assert_eq!(serial.puts(fd, "AT+RST\r\n").unwrap(), 8);
    }

    #[test]
    fn test_printf_formats_before_sending() {
        let mut backend = MockBackend::new();
        let mut state = SerialState::new();
        let config = SerialConfig::default();
        let mut serial = Serial::new(&mut backend, &mut state, &config);
        let fd = serial.open(PORT, 9600).unwrap();

        let sent = serial.printf(fd, format_args!("T={}C\n", 21)).unwrap();
        assert_eq!(sent, 6);
        assert_eq!(serial.data_avail(fd).unwrap(), 6);
    }

    #[test]
    fn test_operations_on_unknown_fd() {
        let mut backend = MockBackend::new();
        let mut state = SerialState::new();
        let config = SerialConfig::default();
        let mut serial = Serial::new(&mut backend, &mut state, &config);

        assert!(serial.flush(42).unwrap_err().is_logic());
        assert!(serial.put_char(42, 65).unwrap_err().is_logic());
        assert!(serial.puts(42, "x").unwrap_err().is_logic());
        assert!(serial.data_avail(42).unwrap_err().is_logic());
        assert!(serial.get_char(42).unwrap_err().is_logic());
        assert!(serial.close(42).unwrap_err().is_logic());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_flush_discards_pending_input() {
        let mut backend = MockBackend::new();
        let mut state = SerialState::new();
        let config = SerialConfig::default();
        let mut serial = Serial::new(&mut backend, &mut state, &config);
        let fd = serial.open(PORT, 9600).unwrap();

        serial.puts(fd, "hello").unwrap();
        assert_eq!(serial.data_avail(fd).unwrap(), 5);
        serial.flush(fd).unwrap();
        assert_eq!(serial.data_avail(fd).unwrap(), 0);
        assert_eq!(serial.get_char(fd).unwrap(), SerialRead::Timeout);
    }
}
