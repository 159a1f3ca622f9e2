//! Mock backend for testing without real hardware
//!
//! Keeps pins, SPI devices and serial ports in memory. SPI transfers loop
//! MOSI back to MISO unless replies are scripted, and every serial port has
//! its TX wired to its own RX. Faults can be injected through [`MockState`],
//! and every delegated call is recorded so tests can check what reached the
//! backend.
//!
//! # Usage
//!
//! ```
//! use wpi_hal::mock::MockBackend;
//! use wpi_hal::Hal;
//!
//! let backend = MockBackend::new();
//! let state = backend.state();
//! let mut hal = Hal::new(backend);
//!
//! let fd = hal.serial().open("/dev/ttyAMA0", 9600).unwrap();
//! state.write().unwrap().inject_serial_input(fd, b"OK");
//! assert_eq!(hal.serial().data_avail(fd).unwrap(), 2);
//! ```

use crate::backend::{Backend, BackendResult, Fd, LibraryVersion};
use crate::error::BackendError;
use crate::gpio::{Level, PIN_COUNT, PinMode, Pull};
use crate::serial::SerialRead;
use crate::spi::SpiMode;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;
use wpi_config::Scheme;

/// Baud rates the mock accepts, matching the termios table
pub const SUPPORTED_BAUDS: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19_200, 38_400, 57_600,
    115_200, 230_400, 460_800, 500_000, 576_000, 921_600, 1_000_000, 1_152_000, 1_500_000,
    2_000_000, 2_500_000, 3_000_000, 3_500_000, 4_000_000,
];

/// A call that reached the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Initialize(Scheme),
    SetPinMode { pin: u8, mode: PinMode },
    SetPull { pin: u8, pull: Pull },
    WritePin { pin: u8, level: Level },
    ReadPin { pin: u8 },
    SetClock { pin: u8, frequency: u32 },
    SpiOpen { channel: u8, speed: u32, mode: SpiMode },
    SpiTransfer { fd: Fd, len: usize },
    SpiClose { fd: Fd },
    SerialOpen { path: PathBuf, baud: u32, timeout: Duration },
    SerialClose { fd: Fd },
    SerialFlush { fd: Fd },
    SerialWriteByte { fd: Fd, byte: u8 },
    SerialWriteText { fd: Fd, len: usize },
    SerialAvailable { fd: Fd },
    SerialReadByte { fd: Fd, timeout: Duration },
}

/// An open mock SPI device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSpiDevice {
    pub channel: u8,
    pub speed: u32,
    pub mode: SpiMode,
    /// Every byte clocked out on MOSI
    pub mosi: Vec<u8>,
}

/// An open mock serial port
#[derive(Debug, Clone)]
pub struct MockPort {
    pub path: PathBuf,
    pub baud: u32,
    pub timeout: Duration,
    pub rx: VecDeque<u8>,
    /// Every byte written to the port
    pub tx: Vec<u8>,
}

/// Shared mock state for synchronized access
#[derive(Debug)]
pub struct MockState {
    /// Every backend call fails as if the driver were missing
    pub unavailable: bool,
    /// `initialize` fails as if run without root
    pub deny_privilege: bool,
    /// Status returned by `initialize`
    pub init_status: i32,
    pub version: LibraryVersion,
    pub scheme: Option<Scheme>,
    pub modes: [Option<PinMode>; PIN_COUNT],
    pub pulls: [Pull; PIN_COUNT],
    pub levels: [Level; PIN_COUNT],
    pub clocks: HashMap<u8, u32>,
    /// Modes the driver refuses to apply
    pub reject_modes: Vec<PinMode>,
    pub spi: HashMap<Fd, MockSpiDevice>,
    /// Scripted MISO data, one entry per transfer
    pub spi_replies: VecDeque<Vec<u8>>,
    /// Transfers report this many bytes fewer than requested
    pub spi_short_by: usize,
    pub fail_spi_open: bool,
    /// `spi_close` fails and leaves the device open
    pub fail_spi_close: bool,
    /// Device paths that can be opened
    pub serial_devices: Vec<PathBuf>,
    pub serial: HashMap<Fd, MockPort>,
    /// Availability and reads fail with an I/O error
    pub serial_fault: bool,
    pub calls: Vec<BackendCall>,
    next_fd: Fd,
}

impl MockState {
    pub fn new() -> Self {
        Self {
            unavailable: false,
            deny_privilege: false,
            init_status: 0,
            version: LibraryVersion { major: 2, minor: 52 },
            scheme: None,
            modes: [None; PIN_COUNT],
            pulls: [Pull::Off; PIN_COUNT],
            levels: [Level::Low; PIN_COUNT],
            clocks: HashMap::new(),
            reject_modes: Vec::new(),
            spi: HashMap::new(),
            spi_replies: VecDeque::new(),
            spi_short_by: 0,
            fail_spi_open: false,
            fail_spi_close: false,
            serial_devices: ["/dev/ttyAMA0", "/dev/ttyS0", "/dev/serial0"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            serial: HashMap::new(),
            serial_fault: false,
            calls: Vec::new(),
            next_fd: 3,
        }
    }

    /// Queue bytes as if they had arrived on a serial port
    pub fn inject_serial_input(&mut self, fd: Fd, bytes: &[u8]) {
        if let Some(port) = self.serial.get_mut(&fd) {
            port.rx.extend(bytes);
        }
    }

    /// Drive the level an input pin reads back
    pub fn set_input_level(&mut self, pin: u8, level: Level) {
        if let Some(slot) = self.levels.get_mut(pin as usize) {
            *slot = level;
        }
    }

    fn allocate_fd(&mut self) -> Fd {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }
}

impl Default for MockState {
    fn default() -> Self {
        Self::new()
    }
}

/// Mock hardware backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Arc<RwLock<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::new())),
        }
    }

    /// A backend whose driver layer cannot be reached
    pub fn unavailable() -> Self {
        let backend = Self::new();
        if let Ok(mut state) = backend.state.write() {
            state.unavailable = true;
        }
        backend
    }

    /// Get shared state for manipulation in tests
    pub fn state(&self) -> Arc<RwLock<MockState>> {
        Arc::clone(&self.state)
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state
            .read()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state.write() {
            state.calls.clear();
        }
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.levels.get(pin as usize).copied())
    }

    pub fn clock(&self, pin: u8) -> Option<u32> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.clocks.get(&pin).copied())
    }

    pub fn open_spi_fds(&self) -> Vec<Fd> {
        let mut fds: Vec<Fd> = self
            .state
            .read()
            .map(|s| s.spi.keys().copied().collect())
            .unwrap_or_default();
        fds.sort_unstable();
        fds
    }

    pub fn serial_output(&self, fd: Fd) -> Vec<u8> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.serial.get(&fd).map(|p| p.tx.clone()))
            .unwrap_or_default()
    }

    /// Lock the state and record a call, failing if the driver is "missing"
    fn enter(&self, call: BackendCall) -> BackendResult<RwLockWriteGuard<'_, MockState>> {
        let mut state = self
            .state
            .write()
            .map_err(|_| BackendError::Unavailable("mock state poisoned".into()))?;
        state.calls.push(call);
        if state.unavailable {
            return Err(BackendError::Unavailable("mock driver not loaded".into()));
        }
        Ok(state)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn bad_fd(fd: Fd) -> BackendError {
    tracing::debug!("[MOCK] Unknown fd {}", fd);
    BackendError::BadDescriptor(fd)
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn version(&self) -> BackendResult<LibraryVersion> {
        let state = self
            .state
            .read()
            .map_err(|_| BackendError::Unavailable("mock state poisoned".into()))?;
        if state.unavailable {
            return Err(BackendError::Unavailable("mock driver not loaded".into()));
        }
        Ok(state.version)
    }

    fn initialize(&mut self, scheme: Scheme) -> BackendResult<i32> {
        let mut state = self.enter(BackendCall::Initialize(scheme))?;
        if state.deny_privilege {
            return Err(BackendError::PermissionDenied(
                "mock GPIO requires root".into(),
            ));
        }
        if state.init_status >= 0 {
            state.scheme = Some(scheme);
        }
        tracing::debug!("[MOCK] Initialised with scheme {}", scheme);
        Ok(state.init_status)
    }

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> BackendResult<()> {
        let mut state = self.enter(BackendCall::SetPinMode { pin, mode })?;
        if state.reject_modes.contains(&mode) {
            return Err(BackendError::Unsupported(format!("{mode} on pin {pin}")));
        }
        state.modes[pin as usize] = Some(mode);
        tracing::debug!("[MOCK] Pin {} mode {}", pin, mode);
        Ok(())
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) -> BackendResult<()> {
        let mut state = self.enter(BackendCall::SetPull { pin, pull })?;
        state.pulls[pin as usize] = pull;
        Ok(())
    }

    fn write_pin(&mut self, pin: u8, level: Level) -> BackendResult<()> {
        let mut state = self.enter(BackendCall::WritePin { pin, level })?;
        state.levels[pin as usize] = level;
        tracing::debug!("[MOCK] Pin {} driven {:?}", pin, level);
        Ok(())
    }

    fn read_pin(&mut self, pin: u8) -> BackendResult<Level> {
        let state = self.enter(BackendCall::ReadPin { pin })?;
        Ok(state.levels[pin as usize])
    }

    fn set_clock(&mut self, pin: u8, frequency: u32) -> BackendResult<()> {
        let mut state = self.enter(BackendCall::SetClock { pin, frequency })?;
        state.clocks.insert(pin, frequency);
        tracing::debug!("[MOCK] Pin {} clock {} Hz", pin, frequency);
        Ok(())
    }

    fn spi_open(&mut self, channel: u8, speed: u32, mode: SpiMode) -> BackendResult<Fd> {
        let mut state = self.enter(BackendCall::SpiOpen {
            channel,
            speed,
            mode,
        })?;
        if state.fail_spi_open {
            return Err(BackendError::Io(io::Error::from_raw_os_error(libc::ENOENT)));
        }
        let fd = state.allocate_fd();
        state.spi.insert(
            fd,
            MockSpiDevice {
                channel,
                speed,
                mode,
                mosi: Vec::new(),
            },
        );
        tracing::debug!("[MOCK] SPI channel {} opened as fd {}", channel, fd);
        Ok(fd)
    }

    fn spi_transfer(&mut self, fd: Fd, buffer: &mut [u8]) -> BackendResult<usize> {
        let mut state = self.enter(BackendCall::SpiTransfer {
            fd,
            len: buffer.len(),
        })?;
        let short_by = state.spi_short_by;
        let reply = state.spi_replies.pop_front();
        let device = state.spi.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;

        device.mosi.extend_from_slice(buffer);
        if let Some(reply) = reply {
            for (slot, byte) in buffer.iter_mut().zip(reply.into_iter().chain(std::iter::repeat(0))) {
                *slot = byte;
            }
        }
        Ok(buffer.len().saturating_sub(short_by))
    }

    fn spi_close(&mut self, fd: Fd) -> BackendResult<()> {
        let mut state = self.enter(BackendCall::SpiClose { fd })?;
        if state.fail_spi_close {
            return Err(BackendError::Io(io::Error::from_raw_os_error(libc::EIO)));
        }
        state.spi.remove(&fd).map(|_| ()).ok_or_else(|| bad_fd(fd))
    }

    fn serial_open(&mut self, path: &Path, baud: u32, timeout: Duration) -> BackendResult<Fd> {
        let mut state = self.enter(BackendCall::SerialOpen {
            path: path.to_path_buf(),
            baud,
            timeout,
        })?;
        if !state.serial_devices.iter().any(|d| d == path) {
            return Err(BackendError::Io(io::Error::from_raw_os_error(libc::ENOENT)));
        }
        if !SUPPORTED_BAUDS.contains(&baud) {
            return Err(BackendError::UnsupportedBaud(baud));
        }
        let fd = state.allocate_fd();
        state.serial.insert(
            fd,
            MockPort {
                path: path.to_path_buf(),
                baud,
                timeout,
                rx: VecDeque::new(),
                tx: Vec::new(),
            },
        );
        tracing::debug!("[MOCK] Serial {} opened as fd {}", path.display(), fd);
        Ok(fd)
    }

    fn serial_close(&mut self, fd: Fd) -> BackendResult<()> {
        let mut state = self.enter(BackendCall::SerialClose { fd })?;
        state.serial.remove(&fd).map(|_| ()).ok_or_else(|| bad_fd(fd))
    }

    fn serial_flush(&mut self, fd: Fd) -> BackendResult<()> {
        let mut state = self.enter(BackendCall::SerialFlush { fd })?;
        let port = state.serial.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
        port.rx.clear();
        Ok(())
    }

    fn serial_write_byte(&mut self, fd: Fd, byte: u8) -> BackendResult<usize> {
        let mut state = self.enter(BackendCall::SerialWriteByte { fd, byte })?;
        let port = state.serial.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
        port.tx.push(byte);
        port.rx.push_back(byte);
        Ok(1)
    }

    fn serial_write_text(&mut self, fd: Fd, text: &[u8]) -> BackendResult<usize> {
        let mut state = self.enter(BackendCall::SerialWriteText {
            fd,
            len: text.len(),
        })?;
        let port = state.serial.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
        port.tx.extend_from_slice(text);
        port.rx.extend(text);
        Ok(text.len())
    }

    fn serial_available(&mut self, fd: Fd) -> BackendResult<usize> {
        let mut state = self.enter(BackendCall::SerialAvailable { fd })?;
        if state.serial_fault {
            return Err(BackendError::Io(io::Error::from_raw_os_error(libc::EIO)));
        }
        let port = state.serial.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
        Ok(port.rx.len())
    }

    /// Returns `Timeout` at once when nothing is queued instead of sleeping
    fn serial_read_byte(&mut self, fd: Fd, timeout: Duration) -> BackendResult<SerialRead> {
        let mut state = self.enter(BackendCall::SerialReadByte { fd, timeout })?;
        if state.serial_fault {
            return Err(BackendError::Io(io::Error::from_raw_os_error(libc::EIO)));
        }
        let port = state.serial.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
        Ok(match port.rx.pop_front() {
            Some(byte) => SerialRead::Byte(byte),
            None => SerialRead::Timeout,
        })
    }
}
