//! HAL context
//!
//! [`Hal`] owns a backend, the configuration and the state of every
//! manager. Managers are short-lived views borrowed from it, so only one of
//! them can touch the backend at a time.

use crate::backend::{Backend, LibraryVersion};
use crate::error::classify;
use crate::gpio::{Gpio, GpioState};
use crate::linux::LinuxBackend;
use crate::mock::MockBackend;
use crate::serial::{Serial, SerialState};
use crate::spi::{Spi, SpiState};
use crate::Result;
use wpi_config::{BackendKind, HalConfig};

/// One independent set of GPIO, SPI and serial state over a backend
pub struct Hal<B: Backend> {
    backend: B,
    config: HalConfig,
    gpio: GpioState,
    spi: SpiState,
    serial: SerialState,
}

impl<B: Backend> Hal<B> {
    /// Create a context with default configuration
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, HalConfig::default())
    }

    pub fn with_config(backend: B, config: HalConfig) -> Self {
        tracing::debug!("HAL context created on {} backend", backend.name());
        Self {
            backend,
            config,
            gpio: GpioState::new(),
            spi: SpiState::new(),
            serial: SerialState::new(),
        }
    }

    pub fn gpio(&mut self) -> Gpio<'_, B> {
        Gpio::new(&mut self.backend, &mut self.gpio, &self.config.gpio)
    }

    pub fn spi(&mut self) -> Spi<'_, B> {
        Spi::new(&mut self.backend, &mut self.spi)
    }

    pub fn serial(&mut self) -> Serial<'_, B> {
        Serial::new(&mut self.backend, &mut self.serial, &self.config.serial)
    }

    /// Version of the underlying library
    pub fn version(&self) -> Result<LibraryVersion> {
        self.backend.version().map_err(classify)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    pub fn gpio_state(&self) -> &GpioState {
        &self.gpio
    }

    pub fn spi_state(&self) -> &SpiState {
        &self.spi
    }

    pub fn serial_state(&self) -> &SerialState {
        &self.serial
    }
}

impl Hal<Box<dyn Backend>> {
    /// Create a context on the backend named by the configuration
    pub fn from_config(config: HalConfig) -> Self {
        let backend: Box<dyn Backend> = match config.backend.kind {
            BackendKind::Linux => Box::new(LinuxBackend::new(&config)),
            BackendKind::Mock => {
                tracing::info!("[MOCK] Using mock backend");
                Box::new(MockBackend::new())
            }
        };
        Self::with_config(backend, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::PinMode;

    #[test]
    fn test_version_from_backend() {
        let hal = Hal::new(MockBackend::new());
        let version = hal.version().unwrap();
        assert_eq!(version.to_string(), "2.52");
    }

    #[test]
    fn test_unavailable_backend_is_runtime_error() {
        let mut hal = Hal::new(MockBackend::unavailable());
        assert!(hal.version().unwrap_err().is_runtime());
        assert!(hal.gpio().setup("wpi").unwrap_err().is_runtime());
    }

    #[test]
    fn test_contexts_are_isolated() {
        let mut first = Hal::new(MockBackend::new());
        let mut second = Hal::new(MockBackend::new());

        first.gpio().setup("wpi").unwrap();
        first.gpio().pin_mode(4, PinMode::Output).unwrap();
        let fd = first.spi().setup(0, 1_000_000).unwrap();

        assert_eq!(second.gpio_state().scheme(), None);
        assert!(second.gpio().mode_of(4).unwrap().is_none());
        assert!(second.spi().close(fd).unwrap_err().is_logic());
        assert_eq!(first.spi_state().open_fds(), vec![fd]);
    }

    #[test]
    fn test_from_config_selects_mock() {
        let mut config = HalConfig::default();
        config.backend.kind = BackendKind::Mock;
        let mut hal = Hal::from_config(config);

        assert_eq!(hal.backend().name(), "mock");
        hal.gpio().setup("gpio").unwrap();
    }
}
