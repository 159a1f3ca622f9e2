//! Hardware backend contract
//!
//! A backend exposes the primitive driver operations the managers delegate
//! to. It does not validate anything: pin ranges, session lifecycles and
//! mode requirements are enforced by the managers before a call gets here.

use crate::error::BackendError;
use crate::gpio::{Level, PinMode, Pull};
use crate::serial::SerialRead;
use crate::spi::SpiMode;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use wpi_config::Scheme;

/// Raw file descriptor handed out for SPI and serial sessions
pub type Fd = std::os::fd::RawFd;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Version of the driver behind a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryVersion {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Primitive driver operations
pub trait Backend {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    fn version(&self) -> BackendResult<LibraryVersion>;

    /// Initialise the driver for a numbering scheme, returning its status code
    fn initialize(&mut self, scheme: Scheme) -> BackendResult<i32>;

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> BackendResult<()>;
    fn set_pull(&mut self, pin: u8, pull: Pull) -> BackendResult<()>;
    fn write_pin(&mut self, pin: u8, level: Level) -> BackendResult<()>;
    fn read_pin(&mut self, pin: u8) -> BackendResult<Level>;
    fn set_clock(&mut self, pin: u8, frequency: u32) -> BackendResult<()>;

    fn spi_open(&mut self, channel: u8, speed: u32, mode: SpiMode) -> BackendResult<Fd>;
    /// Full-duplex transfer; `buffer` is overwritten with the bytes read back
    fn spi_transfer(&mut self, fd: Fd, buffer: &mut [u8]) -> BackendResult<usize>;
    fn spi_close(&mut self, fd: Fd) -> BackendResult<()>;

    /// Open a serial device in raw mode with the given read timeout
    fn serial_open(&mut self, path: &Path, baud: u32, timeout: Duration) -> BackendResult<Fd>;
    fn serial_close(&mut self, fd: Fd) -> BackendResult<()>;
    /// Discard pending input and output
    fn serial_flush(&mut self, fd: Fd) -> BackendResult<()>;
    fn serial_write_byte(&mut self, fd: Fd, byte: u8) -> BackendResult<usize>;
    fn serial_write_text(&mut self, fd: Fd, text: &[u8]) -> BackendResult<usize>;
    fn serial_available(&mut self, fd: Fd) -> BackendResult<usize>;
    /// Block up to `timeout` for one byte
    fn serial_read_byte(&mut self, fd: Fd, timeout: Duration) -> BackendResult<SerialRead>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn version(&self) -> BackendResult<LibraryVersion> {
        (**self).version()
    }

    fn initialize(&mut self, scheme: Scheme) -> BackendResult<i32> {
        (**self).initialize(scheme)
    }

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> BackendResult<()> {
        (**self).set_pin_mode(pin, mode)
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) -> BackendResult<()> {
        (**self).set_pull(pin, pull)
    }

    fn write_pin(&mut self, pin: u8, level: Level) -> BackendResult<()> {
        (**self).write_pin(pin, level)
    }

    fn read_pin(&mut self, pin: u8) -> BackendResult<Level> {
        (**self).read_pin(pin)
    }

    fn set_clock(&mut self, pin: u8, frequency: u32) -> BackendResult<()> {
        (**self).set_clock(pin, frequency)
    }

    fn spi_open(&mut self, channel: u8, speed: u32, mode: SpiMode) -> BackendResult<Fd> {
        (**self).spi_open(channel, speed, mode)
    }

    fn spi_transfer(&mut self, fd: Fd, buffer: &mut [u8]) -> BackendResult<usize> {
        (**self).spi_transfer(fd, buffer)
    }

    fn spi_close(&mut self, fd: Fd) -> BackendResult<()> {
        (**self).spi_close(fd)
    }

    fn serial_open(&mut self, path: &Path, baud: u32, timeout: Duration) -> BackendResult<Fd> {
        (**self).serial_open(path, baud, timeout)
    }

    fn serial_close(&mut self, fd: Fd) -> BackendResult<()> {
        (**self).serial_close(fd)
    }

    fn serial_flush(&mut self, fd: Fd) -> BackendResult<()> {
        (**self).serial_flush(fd)
    }

    fn serial_write_byte(&mut self, fd: Fd, byte: u8) -> BackendResult<usize> {
        (**self).serial_write_byte(fd, byte)
    }

    fn serial_write_text(&mut self, fd: Fd, text: &[u8]) -> BackendResult<usize> {
        (**self).serial_write_text(fd, text)
    }

    fn serial_available(&mut self, fd: Fd) -> BackendResult<usize> {
        (**self).serial_available(fd)
    }

    fn serial_read_byte(&mut self, fd: Fd, timeout: Duration) -> BackendResult<SerialRead> {
        (**self).serial_read_byte(fd, timeout)
    }
}
