//! SPI session management
//!
//! Owns one descriptor per channel. A channel has to be set up before it
//! can transfer data or hand out its descriptor, and each descriptor is
//! closed exactly once.

use crate::backend::{Backend, Fd};
use crate::error::{HalError, classify};
use crate::Result;

/// Channels 0 and 1
pub const SPI_CHANNELS: usize = 2;

pub const SPI_MIN_SPEED: u32 = 500_000;
pub const SPI_MAX_SPEED: u32 = 32_000_000;

/// SPI transfer mode; bit 0 is CPOL, bit 1 is CPHA
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpiMode {
    #[default]
    Mode0 = 0,
    Mode1 = 1,
    Mode2 = 2,
    Mode3 = 3,
}

impl SpiMode {
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Clock polarity
    pub fn cpol(self) -> bool {
        self.bits() & 0b01 != 0
    }

    /// Clock phase
    pub fn cpha(self) -> bool {
        self.bits() & 0b10 != 0
    }
}

impl TryFrom<i32> for SpiMode {
    type Error = HalError;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(SpiMode::Mode0),
            1 => Ok(SpiMode::Mode1),
            2 => Ok(SpiMode::Mode2),
            3 => Ok(SpiMode::Mode3),
            _ => Err(HalError::logic(format!(
                "invalid mode value {raw}, use 0, 1, 2 or 3"
            ))),
        }
    }
}

/// An open SPI channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiSession {
    pub fd: Fd,
    pub speed: u32,
    pub mode: SpiMode,
}

/// SPI sessions owned by a context
#[derive(Debug, Clone, Default)]
pub struct SpiState {
    channels: [Option<SpiSession>; SPI_CHANNELS],
}

impl SpiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, channel: u8) -> Option<&SpiSession> {
        self.channels.get(channel as usize).and_then(Option::as_ref)
    }

    fn channel_of(&self, fd: Fd) -> Option<usize> {
        self.channels
            .iter()
            .position(|s| s.is_some_and(|s| s.fd == fd))
    }

    /// Descriptors currently open
    pub fn open_fds(&self) -> Vec<Fd> {
        self.channels.iter().flatten().map(|s| s.fd).collect()
    }
}

/// SPI operations on a context
pub struct Spi<'a, B: Backend> {
    backend: &'a mut B,
    state: &'a mut SpiState,
}

impl<'a, B: Backend> Spi<'a, B> {
    pub(crate) fn new(backend: &'a mut B, state: &'a mut SpiState) -> Self {
        Self { backend, state }
    }

    /// Set up a channel with CPOL=0 and CPHA=0
    pub fn setup(&mut self, channel: i32, speed: i32) -> Result<Fd> {
        self.setup_mode(channel, speed, 0)
    }

    /// Set up a channel with an explicit mode, reopening it if already open
    ///
    /// Bit 0 of `mode` is CPOL and bit 1 is CPHA, so mode 1 here is kernel
    /// SPI mode 2 and vice versa.
    ///
    /// A channel that is already open is closed first. If that close fails
    /// the old session stays in place and no new descriptor is opened.
    pub fn setup_mode(&mut self, channel: i32, speed: i32, mode: i32) -> Result<Fd> {
        let channel = validate_channel(channel)?;
        let speed = validate_speed(speed)?;
        let mode = SpiMode::try_from(mode)?;

        if let Some(old) = self.state.session(channel).copied() {
            tracing::info!("SPI channel {} reopened, closing fd {}", channel, old.fd);
            self.backend.spi_close(old.fd).map_err(classify)?;
            self.state.channels[channel as usize] = None;
        }

        let fd = self
            .backend
            .spi_open(channel, speed, mode)
            .map_err(classify)?;
        self.state.channels[channel as usize] = Some(SpiSession { fd, speed, mode });

        tracing::info!(
            "SPI channel {} open (fd {}, {} Hz, mode {})",
            channel,
            fd,
            speed,
            mode.bits()
        );
        Ok(fd)
    }

    pub fn get_fd(&self, channel: i32) -> Result<Fd> {
        let channel = validate_channel(channel)?;
        self.state
            .session(channel)
            .map(|s| s.fd)
            .ok_or_else(|| not_set_up(channel))
    }

    /// Full-duplex transfer; `buffer` is overwritten with the bytes read back
    pub fn data_rw(&mut self, channel: i32, buffer: &mut [u8]) -> Result<usize> {
        let channel = validate_channel(channel)?;
        if buffer.is_empty() {
            return Err(HalError::logic("invalid length of data"));
        }
        let fd = self
            .state
            .session(channel)
            .map(|s| s.fd)
            .ok_or_else(|| not_set_up(channel))?;

        let count = self.backend.spi_transfer(fd, buffer).map_err(classify)?;
        if count != buffer.len() {
            return Err(HalError::execution(format!(
                "SPI transfer moved {count} of {} bytes",
                buffer.len()
            )));
        }

        tracing::debug!("SPI channel {} transferred {} bytes", channel, count);
        Ok(count)
    }

    /// Close a descriptor returned by `setup`/`setup_mode`
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let channel = self
            .state
            .channel_of(fd)
            .ok_or_else(|| HalError::logic(format!("fd {fd} is not an open SPI descriptor")))?;

        self.backend.spi_close(fd).map_err(classify)?;
        self.state.channels[channel] = None;

        tracing::info!("SPI channel {} closed (fd {})", channel, fd);
        Ok(())
    }

    pub fn session(&self, channel: i32) -> Result<Option<SpiSession>> {
        Ok(self.state.session(validate_channel(channel)?).copied())
    }
}

fn validate_channel(channel: i32) -> Result<u8> {
    if (0..SPI_CHANNELS as i32).contains(&channel) {
        Ok(channel as u8)
    } else {
        Err(HalError::logic(format!(
            "invalid channel value {channel}, use 0 or 1"
        )))
    }
}

fn validate_speed(speed: i32) -> Result<u32> {
    match u32::try_from(speed) {
        Ok(speed) if (SPI_MIN_SPEED..=SPI_MAX_SPEED).contains(&speed) => Ok(speed),
        _ => Err(HalError::logic(format!(
            "invalid speed value {speed}, use a value between {SPI_MIN_SPEED} and {SPI_MAX_SPEED}"
        ))),
    }
}

fn not_set_up(channel: u8) -> HalError {
    HalError::logic(format!("SPI channel {channel} has not been set up"))
}
