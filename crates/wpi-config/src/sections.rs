//! Per-subsystem configuration sections

use crate::scheme::{BeforeSetup, Scheme};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// GPIO configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioConfig {
    /// Numbering scheme used when the caller does not pick one
    #[serde(default)]
    pub scheme: Scheme,

    /// Behaviour of pin operations issued before setup
    #[serde(default)]
    pub before_setup: BeforeSetup,

    /// Gate digital writes and clock settings on the tracked pin mode
    #[serde(default = "default_true")]
    pub enforce_modes: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::default(),
            before_setup: BeforeSetup::default(),
            enforce_modes: true,
        }
    }
}

/// SPI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpiConfig {
    /// spidev path, `{channel}` is replaced by the channel number
    #[serde(default = "default_device_pattern")]
    pub device_pattern: String,

    #[serde(default = "default_bits_per_word")]
    pub bits_per_word: u8,
}

fn default_device_pattern() -> String {
    "/dev/spidev0.{channel}".to_string()
}

fn default_bits_per_word() -> u8 {
    8
}

impl SpiConfig {
    /// Device path for a channel
    pub fn device_path(&self, channel: u8) -> PathBuf {
        PathBuf::from(
            self.device_pattern
                .replace("{channel}", &channel.to_string()),
        )
    }
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            device_pattern: default_device_pattern(),
            bits_per_word: default_bits_per_word(),
        }
    }
}

/// Serial configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Blocking read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// Which hardware backend to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Linux sysfs GPIO, spidev and termios
    #[default]
    Linux,
    /// In-memory backend for development without hardware
    Mock,
}

/// Backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Root of the sysfs GPIO tree
    #[serde(default = "default_gpio_sysfs_root")]
    pub gpio_sysfs_root: PathBuf,
}

fn default_gpio_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            gpio_sysfs_root: default_gpio_sysfs_root(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spi_device_path() {
        let config = SpiConfig::default();
        assert_eq!(config.device_path(0), PathBuf::from("/dev/spidev0.0"));
        assert_eq!(config.device_path(1), PathBuf::from("/dev/spidev0.1"));

        let custom = SpiConfig {
            device_pattern: "/dev/spidev{channel}.0".into(),
            bits_per_word: 8,
        };
        assert_eq!(custom.device_path(1), PathBuf::from("/dev/spidev1.0"));
    }

    #[test]
    fn test_serial_timeout_default() {
        assert_eq!(SerialConfig::default().read_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_gpio_defaults_enforce_modes() {
        let config: GpioConfig = toml::from_str("").unwrap();
        assert!(config.enforce_modes);
        assert_eq!(config.scheme, Scheme::Wpi);
    }
}
