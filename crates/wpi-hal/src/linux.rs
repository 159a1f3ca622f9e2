//! Linux backend
//!
//! GPIO through the sysfs tree, SPI through spidev and serial ports
//! through termios. Pull resistors and GPIO clocks need register access that
//! sysfs does not offer; pull changes are accepted as no-ops and clock
//! changes are reported as unsupported.

use crate::backend::{Backend, BackendResult, Fd, LibraryVersion};
use crate::error::BackendError;
use crate::gpio::{Level, PinMode, Pull};
use crate::serial::SerialRead;
use crate::spi::SpiMode;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices,
};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use wpi_config::{HalConfig, Scheme, SpiConfig};

/// wiringPi pin number to Broadcom line (revision 2 boards and later)
const WPI_TO_BCM: [u8; 32] = [
    17, 18, 27, 22, 23, 24, 25, 4, 2, 3, 8, 7, 10, 9, 11, 14, 15, 28, 29, 30, 31, 5, 6, 13, 19,
    26, 12, 16, 20, 21, 0, 1,
];

/// 40-pin header position to Broadcom line, `None` for power and ground
const PHYS_TO_BCM: [Option<u8>; 41] = [
    None,
    None, None,
    Some(2), None,
    Some(3), None,
    Some(4), Some(14),
    None, Some(15),
    Some(17), Some(18),
    Some(27), None,
    Some(22), Some(23),
    None, Some(24),
    Some(10), None,
    Some(9), Some(25),
    Some(11), Some(8),
    None, Some(7),
    Some(0), Some(1),
    Some(5), None,
    Some(6), Some(12),
    Some(13), None,
    Some(19), Some(16),
    Some(26), Some(20),
    None, Some(21),
];

/// Highest Broadcom line on the SoC
const MAX_BCM: u8 = 53;

/// Map a virtual pin onto a Broadcom line for a scheme
pub fn bcm_line(scheme: Scheme, pin: u8) -> Option<u8> {
    match scheme {
        Scheme::Wpi => WPI_TO_BCM.get(pin as usize).copied(),
        Scheme::Phys => PHYS_TO_BCM.get(pin as usize).copied().flatten(),
        Scheme::Gpio | Scheme::Sys => (pin <= MAX_BCM).then_some(pin),
    }
}

/// udev applies permissions to a freshly exported line asynchronously
const EXPORT_SETTLE_ATTEMPTS: u32 = 20;
const EXPORT_SETTLE_INTERVAL: Duration = Duration::from_millis(10);

nix::ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);

/// Kernel SPI mode flags; CPOL and CPHA taken from the mode's two low bits
fn spi_mode_flags(mode: SpiMode) -> SpiModeFlags {
    let mut flags = SpiModeFlags::SPI_MODE_0;
    if mode.cpol() {
        flags |= SpiModeFlags::SPI_CPOL;
    }
    if mode.cpha() {
        flags |= SpiModeFlags::SPI_CPHA;
    }
    flags
}

/// Major and minor number of a kernel release such as `6.1.21-v8+`
fn parse_release(release: &str) -> Option<LibraryVersion> {
    let mut parts = release.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some(LibraryVersion { major, minor })
}

/// Wait until a newly exported line accepts writes
fn wait_for_line(dir: &Path) {
    let direction = dir.join("direction");
    for _ in 0..EXPORT_SETTLE_ATTEMPTS {
        if OpenOptions::new().write(true).open(&direction).is_ok() {
            return;
        }
        thread::sleep(EXPORT_SETTLE_INTERVAL);
    }
    tracing::warn!("{} still not writable after export", direction.display());
}

fn baud_rate(baud: u32) -> Option<BaudRate> {
    let rate = match baud {
        50 => BaudRate::B50,
        75 => BaudRate::B75,
        110 => BaudRate::B110,
        134 => BaudRate::B134,
        150 => BaudRate::B150,
        200 => BaudRate::B200,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        1800 => BaudRate::B1800,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        460_800 => BaudRate::B460800,
        500_000 => BaudRate::B500000,
        576_000 => BaudRate::B576000,
        921_600 => BaudRate::B921600,
        1_000_000 => BaudRate::B1000000,
        1_152_000 => BaudRate::B1152000,
        1_500_000 => BaudRate::B1500000,
        2_000_000 => BaudRate::B2000000,
        2_500_000 => BaudRate::B2500000,
        3_000_000 => BaudRate::B3000000,
        3_500_000 => BaudRate::B3500000,
        4_000_000 => BaudRate::B4000000,
        _ => return None,
    };
    Some(rate)
}

/// termios VTIME is counted in tenths of a second and capped at 25.5 s
fn vtime(timeout: Duration) -> u8 {
    let tenths = timeout.as_millis().div_ceil(100);
    tenths.clamp(1, u8::MAX as u128) as u8
}

fn open_error(path: &Path, err: io::Error) -> BackendError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => BackendError::PermissionDenied(path.display().to_string()),
        _ => BackendError::Io(err),
    }
}

struct SerialHandle {
    file: File,
    vtime: u8,
}

/// Backend driving Linux kernel interfaces
pub struct LinuxBackend {
    sysfs_root: PathBuf,
    spi_config: SpiConfig,
    scheme: Scheme,
    spi: HashMap<Fd, Spidev>,
    serial: HashMap<Fd, SerialHandle>,
}

impl LinuxBackend {
    pub fn new(config: &HalConfig) -> Self {
        Self {
            sysfs_root: config.backend.gpio_sysfs_root.clone(),
            spi_config: config.spi.clone(),
            scheme: config.gpio.scheme,
            spi: HashMap::new(),
            serial: HashMap::new(),
        }
    }

    fn line(&self, pin: u8) -> BackendResult<u8> {
        bcm_line(self.scheme, pin).ok_or_else(|| {
            BackendError::Unsupported(format!(
                "pin {} has no GPIO line in scheme {}",
                pin, self.scheme
            ))
        })
    }

    fn line_dir(&self, bcm: u8) -> PathBuf {
        self.sysfs_root.join(format!("gpio{bcm}"))
    }

    /// Export a line if needed and return its sysfs directory
    fn exported(&self, pin: u8) -> BackendResult<PathBuf> {
        let bcm = self.line(pin)?;
        let dir = self.line_dir(bcm);
        if dir.exists() {
            return Ok(dir);
        }
        if self.scheme.is_restricted() {
            return Err(BackendError::Failed(format!(
                "gpio{bcm} is not exported; sys scheme expects it to be"
            )));
        }

        let export = self.sysfs_root.join("export");
        fs::write(&export, bcm.to_string()).map_err(|e| open_error(&export, e))?;
        tracing::debug!("Exported gpio{}", bcm);
        wait_for_line(&dir);
        Ok(dir)
    }

    fn serial_handle(&mut self, fd: Fd) -> BackendResult<&mut SerialHandle> {
        self.serial
            .get_mut(&fd)
            .ok_or(BackendError::BadDescriptor(fd))
    }

    fn configure_serial(file: &File, rate: BaudRate, vtime: u8) -> BackendResult<()> {
        let mut options = termios::tcgetattr(file)?;
        termios::cfmakeraw(&mut options);
        termios::cfsetspeed(&mut options, rate)?;

        options.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        options.control_flags &=
            !(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CSIZE);
        options.control_flags |= ControlFlags::CS8;
        options.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        options.control_chars[SpecialCharacterIndices::VTIME as usize] = vtime;

        termios::tcsetattr(file, SetArg::TCSANOW, &options)?;
        Ok(())
    }

    /// close(2) releases the descriptor even when it reports an error
    fn close_file(file: File) -> BackendResult<()> {
        nix::unistd::close(file.into_raw_fd())?;
        Ok(())
    }
}

impl Backend for LinuxBackend {
    fn name(&self) -> &'static str {
        "linux"
    }

    /// Release of the running kernel, which provides every driver used here
    fn version(&self) -> BackendResult<LibraryVersion> {
        let uts = nix::sys::utsname::uname()?;
        let release = uts.release().to_string_lossy();
        parse_release(&release).ok_or_else(|| {
            BackendError::Failed(format!("unrecognised kernel release {release:?}"))
        })
    }

    fn initialize(&mut self, scheme: Scheme) -> BackendResult<i32> {
        if !self.sysfs_root.is_dir() {
            return Err(BackendError::Unavailable(format!(
                "GPIO sysfs not found at {}",
                self.sysfs_root.display()
            )));
        }

        if !scheme.is_restricted() {
            let export = self.sysfs_root.join("export");
            OpenOptions::new()
                .write(true)
                .open(&export)
                .map_err(|e| open_error(&export, e))?;
        }

        self.scheme = scheme;
        tracing::info!(
            "sysfs GPIO ready at {} ({} numbering)",
            self.sysfs_root.display(),
            scheme
        );
        Ok(0)
    }

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> BackendResult<()> {
        let direction = match mode {
            PinMode::Input => "in",
            PinMode::Output => "out",
            other => {
                return Err(BackendError::Unsupported(format!(
                    "{other} needs register access"
                )));
            }
        };
        if self.scheme.is_restricted() {
            tracing::debug!("sys scheme: leaving pin {} direction unchanged", pin);
            return Ok(());
        }

        let dir = self.exported(pin)?;
        fs::write(dir.join("direction"), direction)?;
        Ok(())
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) -> BackendResult<()> {
        tracing::warn!(
            "sysfs cannot set pull resistors, pin {} pull {:?} ignored",
            pin,
            pull
        );
        Ok(())
    }

    fn write_pin(&mut self, pin: u8, level: Level) -> BackendResult<()> {
        let dir = self.exported(pin)?;
        fs::write(dir.join("value"), level.as_raw().to_string())?;
        Ok(())
    }

    fn read_pin(&mut self, pin: u8) -> BackendResult<Level> {
        let dir = self.exported(pin)?;
        let contents = fs::read_to_string(dir.join("value"))?;
        match contents.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(BackendError::Failed(format!(
                "unexpected value {other:?} on pin {pin}"
            ))),
        }
    }

    fn set_clock(&mut self, pin: u8, frequency: u32) -> BackendResult<()> {
        Err(BackendError::Unsupported(format!(
            "GPIO clock of {frequency} Hz on pin {pin} needs register access"
        )))
    }

    fn spi_open(&mut self, channel: u8, speed: u32, mode: SpiMode) -> BackendResult<Fd> {
        let path = self.spi_config.device_path(channel);
        let mut spi = Spidev::open(&path).map_err(|e| open_error(&path, e))?;

        let options = SpidevOptions::new()
            .bits_per_word(self.spi_config.bits_per_word)
            .max_speed_hz(speed)
            .mode(spi_mode_flags(mode))
            .build();
        spi.configure(&options)?;

        let fd = spi.as_raw_fd();
        self.spi.insert(fd, spi);
        tracing::debug!("Opened {} as fd {}", path.display(), fd);
        Ok(fd)
    }

    fn spi_transfer(&mut self, fd: Fd, buffer: &mut [u8]) -> BackendResult<usize> {
        let spi = self
            .spi
            .get_mut(&fd)
            .ok_or(BackendError::BadDescriptor(fd))?;
        let tx = buffer.to_vec();
        let mut transfer = SpidevTransfer::read_write(&tx, buffer);
        spi.transfer(&mut transfer)?;
        Ok(tx.len())
    }

    fn spi_close(&mut self, fd: Fd) -> BackendResult<()> {
        // Dropping the device closes its descriptor
        self.spi
            .remove(&fd)
            .map(drop)
            .ok_or(BackendError::BadDescriptor(fd))
    }

    fn serial_open(&mut self, path: &Path, baud: u32, timeout: Duration) -> BackendResult<Fd> {
        let rate = baud_rate(baud).ok_or(BackendError::UnsupportedBaud(baud))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| open_error(path, e))?;

        let vtime = vtime(timeout);
        Self::configure_serial(&file, rate, vtime)?;

        // Reads block again, bounded by VTIME
        let fd = file.as_raw_fd();
        nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_RDWR))?;

        self.serial.insert(fd, SerialHandle { file, vtime });
        tracing::debug!("Opened {} as fd {}", path.display(), fd);
        Ok(fd)
    }

    fn serial_close(&mut self, fd: Fd) -> BackendResult<()> {
        let handle = self
            .serial
            .remove(&fd)
            .ok_or(BackendError::BadDescriptor(fd))?;
        Self::close_file(handle.file)
    }

    fn serial_flush(&mut self, fd: Fd) -> BackendResult<()> {
        let handle = self.serial_handle(fd)?;
        termios::tcflush(&handle.file, FlushArg::TCIOFLUSH)?;
        Ok(())
    }

    fn serial_write_byte(&mut self, fd: Fd, byte: u8) -> BackendResult<usize> {
        let handle = self.serial_handle(fd)?;
        Ok(handle.file.write(&[byte])?)
    }

    fn serial_write_text(&mut self, fd: Fd, text: &[u8]) -> BackendResult<usize> {
        let handle = self.serial_handle(fd)?;
        handle.file.write_all(text)?;
        Ok(text.len())
    }

    fn serial_available(&mut self, fd: Fd) -> BackendResult<usize> {
        let handle = self.serial_handle(fd)?;
        let mut pending: libc::c_int = 0;
        // SAFETY: FIONREAD writes one c_int into `pending`.
        unsafe { fionread(handle.file.as_raw_fd(), &mut pending)? };
        Ok(pending.max(0) as usize)
    }

    fn serial_read_byte(&mut self, fd: Fd, timeout: Duration) -> BackendResult<SerialRead> {
        let handle = self.serial_handle(fd)?;

        let wanted = vtime(timeout);
        if wanted != handle.vtime {
            let mut options = termios::tcgetattr(&handle.file)?;
            options.control_chars[SpecialCharacterIndices::VTIME as usize] = wanted;
            termios::tcsetattr(&handle.file, SetArg::TCSANOW, &options)?;
            handle.vtime = wanted;
        }

        let mut byte = [0u8; 1];
        match handle.file.read(&mut byte)? {
            0 => Ok(SerialRead::Timeout),
            _ => Ok(SerialRead::Byte(byte[0])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Fake sysfs tree with pre-created line directories
    fn fake_sysfs(lines: &[u8]) -> TempDir {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::write(dir.path().join("export"), "").unwrap();
        for line in lines {
            let line_dir = dir.path().join(format!("gpio{line}"));
            fs::create_dir_all(&line_dir).unwrap();
            fs::write(line_dir.join("direction"), "in").unwrap();
            fs::write(line_dir.join("value"), "0").unwrap();
        }
        dir
    }

    fn backend_for(root: &Path, scheme: Scheme) -> LinuxBackend {
        let mut config = HalConfig::default();
        config.backend.gpio_sysfs_root = root.to_path_buf();
        config.gpio.scheme = scheme;
        LinuxBackend::new(&config)
    }

    #[test]
    fn test_wpi_mapping() {
        assert_eq!(bcm_line(Scheme::Wpi, 0), Some(17));
        assert_eq!(bcm_line(Scheme::Wpi, 7), Some(4));
        assert_eq!(bcm_line(Scheme::Wpi, 31), Some(1));
        assert_eq!(bcm_line(Scheme::Wpi, 32), None);
    }

    #[test]
    fn test_phys_mapping() {
        assert_eq!(bcm_line(Scheme::Phys, 7), Some(4));
        assert_eq!(bcm_line(Scheme::Phys, 40), Some(21));
        // Power and ground pins
        assert_eq!(bcm_line(Scheme::Phys, 1), None);
        assert_eq!(bcm_line(Scheme::Phys, 6), None);
        assert_eq!(bcm_line(Scheme::Phys, 41), None);
    }

    #[test]
    fn test_gpio_mapping_is_identity() {
        assert_eq!(bcm_line(Scheme::Gpio, 4), Some(4));
        assert_eq!(bcm_line(Scheme::Sys, 53), Some(53));
        assert_eq!(bcm_line(Scheme::Gpio, 54), None);
    }

    #[test]
    fn test_spi_mode_flags() {
        assert_eq!(spi_mode_flags(SpiMode::Mode0), SpiModeFlags::SPI_MODE_0);
        assert_eq!(spi_mode_flags(SpiMode::Mode1), SpiModeFlags::SPI_CPOL);
        assert_eq!(spi_mode_flags(SpiMode::Mode2), SpiModeFlags::SPI_CPHA);
        assert_eq!(spi_mode_flags(SpiMode::Mode3), SpiModeFlags::SPI_MODE_3);
    }

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(
            parse_release("6.1.21-v8+"),
            Some(LibraryVersion { major: 6, minor: 1 })
        );
        assert_eq!(
            parse_release("5.15.0"),
            Some(LibraryVersion { major: 5, minor: 15 })
        );
        assert_eq!(parse_release("unknown"), None);
        assert_eq!(parse_release("6"), None);
    }

    #[test]
    fn test_version_reports_running_kernel() {
        let backend = LinuxBackend::new(&HalConfig::default());
        let version = backend.version().unwrap();
        assert!(version.major >= 2);
    }

    #[test]
    fn test_baud_table() {
        assert_eq!(baud_rate(9600), Some(BaudRate::B9600));
        assert_eq!(baud_rate(115_200), Some(BaudRate::B115200));
        assert_eq!(baud_rate(12_345), None);
    }

    #[test]
    fn test_vtime_rounding() {
        assert_eq!(vtime(Duration::from_secs(10)), 100);
        assert_eq!(vtime(Duration::from_millis(250)), 3);
        assert_eq!(vtime(Duration::ZERO), 1);
        assert_eq!(vtime(Duration::from_secs(60)), 255);
    }

    #[test]
    fn test_initialize_missing_sysfs_is_unavailable() {
        let mut backend = backend_for(Path::new("/nonexistent/gpio"), Scheme::Wpi);
        assert!(matches!(
            backend.initialize(Scheme::Wpi),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn test_sysfs_direction_and_value() {
        let root = fake_sysfs(&[17]);
        let mut backend = backend_for(root.path(), Scheme::Wpi);
        assert_eq!(backend.initialize(Scheme::Wpi).unwrap(), 0);

        // wiringPi pin 0 is BCM 17
        backend.set_pin_mode(0, PinMode::Output).unwrap();
        backend.write_pin(0, Level::High).unwrap();

        let line = root.path().join("gpio17");
        assert_eq!(fs::read_to_string(line.join("direction")).unwrap(), "out");
        assert_eq!(fs::read_to_string(line.join("value")).unwrap(), "1");
        assert_eq!(backend.read_pin(0).unwrap(), Level::High);
    }

    #[test]
    fn test_sysfs_exports_missing_line() {
        let root = fake_sysfs(&[]);
        let mut backend = backend_for(root.path(), Scheme::Gpio);
        backend.initialize(Scheme::Gpio).unwrap();

        // The fake tree never grows gpio4, so the write after export fails
        assert!(backend.set_pin_mode(4, PinMode::Input).is_err());
        assert_eq!(fs::read_to_string(root.path().join("export")).unwrap(), "4");
    }

    #[test]
    fn test_waits_for_exported_line_to_appear() {
        let root = fake_sysfs(&[]);
        let mut backend = backend_for(root.path(), Scheme::Gpio);
        backend.initialize(Scheme::Gpio).unwrap();

        // Stand in for udev finishing the new node a little after export
        let line = root.path().join("gpio4");
        let udev = {
            let line = line.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                fs::create_dir_all(&line).unwrap();
                fs::write(line.join(".direction"), "in").unwrap();
                fs::rename(line.join(".direction"), line.join("direction")).unwrap();
            })
        };

        backend.set_pin_mode(4, PinMode::Output).unwrap();
        udev.join().unwrap();
        assert_eq!(fs::read_to_string(line.join("direction")).unwrap(), "out");
    }

    #[test]
    fn test_sys_scheme_never_exports() {
        let root = fake_sysfs(&[]);
        let mut backend = backend_for(root.path(), Scheme::Sys);
        backend.initialize(Scheme::Sys).unwrap();

        backend.set_pin_mode(4, PinMode::Output).unwrap();
        assert!(matches!(
            backend.write_pin(4, Level::High),
            Err(BackendError::Failed(_))
        ));
        assert_eq!(fs::read_to_string(root.path().join("export")).unwrap(), "");
    }

    #[test]
    fn test_register_modes_unsupported() {
        let root = fake_sysfs(&[4]);
        let mut backend = backend_for(root.path(), Scheme::Gpio);
        assert!(matches!(
            backend.set_pin_mode(4, PinMode::GpioClock),
            Err(BackendError::Unsupported(_))
        ));
        assert!(matches!(
            backend.set_clock(4, 9_500_000),
            Err(BackendError::Unsupported(_))
        ));
        backend.set_pull(4, Pull::Up).unwrap();
    }

    #[test]
    fn test_spi_open_missing_device() {
        let mut config = HalConfig::default();
        config.spi.device_pattern = "/nonexistent/spidev0.{channel}".into();
        let mut backend = LinuxBackend::new(&config);

        assert!(matches!(
            backend.spi_open(0, 1_000_000, SpiMode::Mode0),
            Err(BackendError::Io(_))
        ));
    }

    #[test]
    fn test_serial_unsupported_baud_checked_first() {
        let mut backend = LinuxBackend::new(&HalConfig::default());
        assert!(matches!(
            backend.serial_open(Path::new("/nonexistent/tty"), 12_345, Duration::from_secs(10)),
            Err(BackendError::UnsupportedBaud(12_345))
        ));
    }
}
