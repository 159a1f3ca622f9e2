//! Pin numbering schemes and the pre-setup policy

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pin numbering scheme selected at GPIO setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Virtual wiringPi numbering (0-63 mapped onto Broadcom lines)
    #[default]
    Wpi,
    /// Broadcom GPIO numbering
    Gpio,
    /// Broadcom numbering through an already exported sysfs tree, no mode changes
    Sys,
    /// Physical header pin numbering
    Phys,
}

impl Scheme {
    /// Identifier used on the wire and in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Wpi => "wpi",
            Scheme::Gpio => "gpio",
            Scheme::Sys => "sys",
            Scheme::Phys => "phys",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "wpi" => Some(Scheme::Wpi),
            "gpio" => Some(Scheme::Gpio),
            "sys" => Some(Scheme::Sys),
            "phys" => Some(Scheme::Phys),
            _ => None,
        }
    }

    /// Restricted schemes cannot change pin direction or pull resistors
    pub fn is_restricted(&self) -> bool {
        matches!(self, Scheme::Sys)
    }

    pub fn all() -> &'static [Scheme] {
        &[Scheme::Wpi, Scheme::Gpio, Scheme::Sys, Scheme::Phys]
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What pin operations do when GPIO setup has not run yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BeforeSetup {
    /// Reject the call with a logic error
    #[default]
    Fail,
    /// Hand the call to the backend and let it decide
    Delegate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_parse_roundtrip() {
        for scheme in Scheme::all() {
            assert_eq!(Scheme::parse(scheme.as_str()), Some(*scheme));
        }
        assert_eq!(Scheme::parse(" gpio "), Some(Scheme::Gpio));
        assert_eq!(Scheme::parse("bcm"), None);
        assert_eq!(Scheme::parse(""), None);
    }

    #[test]
    fn test_only_sys_is_restricted() {
        assert!(Scheme::Sys.is_restricted());
        assert!(!Scheme::Wpi.is_restricted());
        assert!(!Scheme::Phys.is_restricted());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Scheme::default(), Scheme::Wpi);
        assert_eq!(BeforeSetup::default(), BeforeSetup::Fail);
    }
}
