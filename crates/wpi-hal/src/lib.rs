//! Hardware Abstraction Layer (HAL)
//!
//! A validated contract over Raspberry Pi style GPIO, SPI and serial
//! hardware. Every operation checks its arguments and the state of the
//! session it touches before delegating to a [`Backend`], and every failure
//! is reported as one of the three [`ErrorKind`]s.
//!
//! All state lives in a [`Hal`] context. Pin modes, SPI channels and serial
//! descriptors are tracked per context, so two contexts never see each
//! other's sessions.
//!
//! # Backends
//!
//! - [`LinuxBackend`]: sysfs GPIO, spidev and termios
//! - [`MockBackend`]: in-memory loopback with fault injection
//!
//! # Example
//!
//! ```no_run
//! use wpi_hal::{Hal, PinMode, serial_printf};
//! use wpi_config::HalConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut hal = Hal::from_config(HalConfig::load_default()?);
//!     println!("wiringPi {}", hal.version()?);
//!
//!     let mut gpio = hal.gpio();
//!     gpio.setup("wpi")?;
//!     gpio.pin_mode(0, PinMode::Output)?;
//!     gpio.digital_write(0, 1)?;
//!
//!     let mut serial = hal.serial();
//!     let fd = serial.open("/dev/ttyAMA0", 9600)?;
//!     serial_printf!(serial, fd, "T={}C\n", 21)?;
//!     serial.close(fd)?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod context;
pub mod error;
pub mod gpio;
pub mod linux;
pub mod mock;
pub mod serial;
pub mod spi;

pub use backend::{Backend, BackendResult, Fd, LibraryVersion};
pub use context::Hal;
pub use error::{BackendError, ErrorKind, HalError, classify};
pub use gpio::{Gpio, GpioState, Level, Pin, PinMode, PinState, Pull, WriteValue, PIN_COUNT};
pub use linux::LinuxBackend;
pub use mock::{BackendCall, MockBackend, MockState};
pub use serial::{Serial, SerialRead, SerialSession, SerialState};
pub use spi::{Spi, SpiMode, SpiSession, SpiState, SPI_CHANNELS, SPI_MAX_SPEED, SPI_MIN_SPEED};
pub use wpi_config::{BeforeSetup, HalConfig, Scheme};

/// HAL Result type
pub type Result<T> = std::result::Result<T, HalError>;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Raw wiringPi constant values
pub mod constants {
    pub const INPUT: i32 = 0;
    pub const OUTPUT: i32 = 1;
    pub const PWM_OUTPUT: i32 = 2;
    pub const GPIO_CLOCK: i32 = 3;
    pub const SOFT_PWM_OUTPUT: i32 = 4;
    pub const SOFT_TONE_OUTPUT: i32 = 5;
    pub const PWM_TONE_OUTPUT: i32 = 6;

    pub const PUD_OFF: i32 = 0;
    pub const PUD_DOWN: i32 = 1;
    pub const PUD_UP: i32 = 2;

    pub const LOW: i32 = 0;
    pub const HIGH: i32 = 1;
}

/// Format and send text on a serial descriptor
///
/// Expands to [`Serial::printf`] with `format_args!`, so the text is fully
/// formatted before any byte is written.
#[macro_export]
macro_rules! serial_printf {
    ($serial:expr, $fd:expr, $($arg:tt)*) => {
        $serial.printf($fd, ::std::format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_match_enums() {
        assert_eq!(PinMode::try_from(constants::GPIO_CLOCK).unwrap(), PinMode::GpioClock);
        assert_eq!(PinMode::try_from(constants::PWM_TONE_OUTPUT).unwrap(), PinMode::PwmToneOutput);
        assert_eq!(Pull::try_from(constants::PUD_UP).unwrap(), Pull::Up);
        assert_eq!(WriteValue::from(constants::HIGH).level(), Level::High);
        assert_eq!(WriteValue::from(constants::LOW).level(), Level::Low);
    }

    #[test]
    fn test_serial_printf_macro() {
        let mut hal = Hal::new(MockBackend::new());
        let mut serial = hal.serial();
        let fd = serial.open("/dev/ttyAMA0", 9600).unwrap();

        let sent = serial_printf!(serial, fd, "{}-{:02}", "ch", 7).unwrap();
        assert_eq!(sent, 5);
    }
}
