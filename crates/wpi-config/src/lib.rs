//! Configuration for the wpi hardware layer
//!
//! Selects the backend, the default pin numbering scheme, the pre-setup policy
//! and the serial read timeout. Stored as TOML.

mod scheme;
mod sections;

pub use scheme::{BeforeSetup, Scheme};
pub use sections::{BackendConfig, BackendKind, GpioConfig, SerialConfig, SpiConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// System configuration path
pub const CONFIG_PATH: &str = "/etc/wpi/config.toml";

/// Environment variable overriding the configuration path
pub const CONFIG_ENV: &str = "WPI_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HalConfig {
    #[serde(default)]
    pub gpio: GpioConfig,

    #[serde(default)]
    pub spi: SpiConfig,

    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

impl HalConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$WPI_CONFIG`, then the system path, else defaults
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        let system_config = Path::new(CONFIG_PATH);
        if system_config.exists() {
            return Self::load(system_config);
        }

        tracing::warn!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the hardware layer cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.spi.device_pattern.contains("{channel}") {
            return Err(ConfigError::Invalid(format!(
                "spi.device_pattern must contain {{channel}}: {}",
                self.spi.device_pattern
            )));
        }
        if self.spi.bits_per_word == 0 {
            return Err(ConfigError::Invalid("spi.bits_per_word must be > 0".into()));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "serial.read_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}
