//! Pin state management
//!
//! Tracks the configured mode of each of the 64 virtual pins and gates
//! mode-dependent operations on it. Pins exist implicitly from the first
//! reference and keep their state for the lifetime of the owning context.

use crate::backend::Backend;
use crate::error::{HalError, classify};
use crate::Result;
use std::fmt;
use wpi_config::{BeforeSetup, GpioConfig, Scheme};

/// Number of virtual pins
pub const PIN_COUNT: usize = 64;

/// Pin modes, numbered as the wiringPi constants
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    Input = 0,
    Output = 1,
    PwmOutput = 2,
    GpioClock = 3,
    SoftPwmOutput = 4,
    SoftToneOutput = 5,
    PwmToneOutput = 6,
}

impl PinMode {
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn name(&self) -> &'static str {
        match self {
            PinMode::Input => "INPUT",
            PinMode::Output => "OUTPUT",
            PinMode::PwmOutput => "PWM_OUTPUT",
            PinMode::GpioClock => "GPIO_CLOCK",
            PinMode::SoftPwmOutput => "SOFT_PWM_OUTPUT",
            PinMode::SoftToneOutput => "SOFT_TONE_OUTPUT",
            PinMode::PwmToneOutput => "PWM_TONE_OUTPUT",
        }
    }

    pub fn all() -> &'static [PinMode] {
        &[
            PinMode::Input,
            PinMode::Output,
            PinMode::PwmOutput,
            PinMode::GpioClock,
            PinMode::SoftPwmOutput,
            PinMode::SoftToneOutput,
            PinMode::PwmToneOutput,
        ]
    }
}

impl TryFrom<i32> for PinMode {
    type Error = HalError;

    fn try_from(raw: i32) -> Result<Self> {
        PinMode::all()
            .iter()
            .copied()
            .find(|mode| mode.as_raw() == raw)
            .ok_or_else(|| HalError::logic(format!("invalid value for mode: {raw}")))
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pull resistor configuration
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pull {
    #[default]
    Off = 0,
    Down = 1,
    Up = 2,
}

impl Pull {
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for Pull {
    type Error = HalError;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Pull::Off),
            1 => Ok(Pull::Down),
            2 => Ok(Pull::Up),
            _ => Err(HalError::logic(format!("invalid value for pud: {raw}"))),
        }
    }
}

/// Logic level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn as_raw(self) -> i32 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value { Level::High } else { Level::Low }
    }
}

/// Value handed to `digital_write`
///
/// Zero is the only LOW. One is the canonical HIGH; every other value is
/// accepted as HIGH as well and kept distinct only so it can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteValue {
    Low,
    High,
    NonZero(i32),
}

impl WriteValue {
    /// Level actually driven onto the pin
    pub fn level(self) -> Level {
        match self {
            WriteValue::Low => Level::Low,
            WriteValue::High | WriteValue::NonZero(_) => Level::High,
        }
    }
}

impl From<i32> for WriteValue {
    fn from(raw: i32) -> Self {
        match raw {
            0 => WriteValue::Low,
            1 => WriteValue::High,
            other => WriteValue::NonZero(other),
        }
    }
}

impl From<Level> for WriteValue {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => WriteValue::Low,
            Level::High => WriteValue::High,
        }
    }
}

impl From<bool> for WriteValue {
    fn from(value: bool) -> Self {
        Level::from(value).into()
    }
}

/// A validated virtual pin number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pin(u8);

impl Pin {
    pub fn new(raw: i32) -> Result<Self> {
        if (0..PIN_COUNT as i32).contains(&raw) {
            Ok(Pin(raw as u8))
        } else {
            Err(HalError::logic(format!("invalid value for pin: {raw}")))
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

/// Tracked state of a single pin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinState {
    /// `None` until the first `pin_mode`
    pub mode: Option<PinMode>,
    pub pull: Pull,
}

/// GPIO state owned by a context
#[derive(Debug, Clone)]
pub struct GpioState {
    scheme: Option<Scheme>,
    pins: [PinState; PIN_COUNT],
}

impl GpioState {
    pub fn new() -> Self {
        Self {
            scheme: None,
            pins: [PinState::default(); PIN_COUNT],
        }
    }

    /// Scheme chosen by `setup`, if it has run
    pub fn scheme(&self) -> Option<Scheme> {
        self.scheme
    }

    pub fn pin(&self, pin: Pin) -> &PinState {
        &self.pins[pin.0 as usize]
    }

    fn pin_mut(&mut self, pin: Pin) -> &mut PinState {
        &mut self.pins[pin.0 as usize]
    }
}

impl Default for GpioState {
    fn default() -> Self {
        Self::new()
    }
}

/// GPIO operations on a context
pub struct Gpio<'a, B: Backend> {
    backend: &'a mut B,
    state: &'a mut GpioState,
    config: &'a GpioConfig,
}

impl<'a, B: Backend> Gpio<'a, B> {
    pub(crate) fn new(backend: &'a mut B, state: &'a mut GpioState, config: &'a GpioConfig) -> Self {
        Self {
            backend,
            state,
            config,
        }
    }

    /// Initialise GPIO with a scheme identifier (`wpi`, `gpio`, `sys`, `phys`)
    pub fn setup(&mut self, scheme: &str) -> Result<i32> {
        let scheme = Scheme::parse(scheme)
            .ok_or_else(|| HalError::logic(format!("invalid value for mode: {scheme:?}")))?;
        self.setup_scheme(scheme)
    }

    /// Initialise GPIO; valid once per context
    pub fn setup_scheme(&mut self, scheme: Scheme) -> Result<i32> {
        if let Some(current) = self.state.scheme {
            return Err(HalError::logic(format!(
                "setup already called with scheme {current}"
            )));
        }

        let status = self.backend.initialize(scheme).map_err(classify)?;
        if status < 0 {
            return Err(HalError::execution(format!("setup fails (status {status})")));
        }

        self.state.scheme = Some(scheme);
        tracing::info!("GPIO initialised on {} with scheme {}", self.backend.name(), scheme);
        Ok(status)
    }

    pub fn pin_mode(&mut self, pin: i32, mode: PinMode) -> Result<()> {
        let pin = Pin::new(pin)?;
        self.ensure_ready()?;

        self.backend
            .set_pin_mode(pin.number(), mode)
            .map_err(classify)?;
        self.state.pin_mut(pin).mode = Some(mode);

        tracing::debug!("Pin {} mode set to {}", pin.number(), mode);
        Ok(())
    }

    /// Configure the pull resistor
    ///
    /// In the `sys` scheme the backend may accept the call without touching
    /// the hardware; that is not detected here.
    pub fn pull_up_dn_control(&mut self, pin: i32, pull: Pull) -> Result<()> {
        let pin = Pin::new(pin)?;
        self.ensure_ready()?;

        if self.state.scheme.is_some_and(|s| s.is_restricted()) {
            tracing::warn!("Pull control on pin {} may have no effect in sys scheme", pin.number());
        }
        if self.state.pin(pin).mode != Some(PinMode::Input) {
            tracing::debug!("Pull set on pin {} which is not an input", pin.number());
        }

        self.backend.set_pull(pin.number(), pull).map_err(classify)?;
        self.state.pin_mut(pin).pull = pull;
        Ok(())
    }

    pub fn digital_write(&mut self, pin: i32, value: impl Into<WriteValue>) -> Result<()> {
        let pin = Pin::new(pin)?;
        let value = value.into();
        self.ensure_ready()?;
        self.require_mode(pin, PinMode::Output)?;

        if let WriteValue::NonZero(raw) = value {
            tracing::trace!("Pin {} write value {} treated as HIGH", pin.number(), raw);
        }

        self.backend
            .write_pin(pin.number(), value.level())
            .map_err(classify)
    }

    pub fn digital_read(&mut self, pin: i32) -> Result<Level> {
        let pin = Pin::new(pin)?;
        self.ensure_ready()?;
        self.backend.read_pin(pin.number()).map_err(classify)
    }

    /// Set the frequency of a GPIO clock pin
    ///
    /// The frequency is not checked against a safe range; values that upset
    /// onboard interfaces are the caller's problem. 9.5 MHz is known good.
    pub fn gpio_clock_set(&mut self, pin: i32, frequency: i32) -> Result<()> {
        let pin = Pin::new(pin)?;
        if frequency <= 0 {
            return Err(HalError::logic(format!("invalid value for frequency: {frequency}")));
        }
        self.ensure_ready()?;
        self.require_mode(pin, PinMode::GpioClock)?;

        self.backend
            .set_clock(pin.number(), frequency as u32)
            .map_err(classify)?;
        tracing::debug!("Pin {} clock set to {} Hz", pin.number(), frequency);
        Ok(())
    }

    /// Tracked mode of a pin, `None` if never configured
    pub fn mode_of(&self, pin: i32) -> Result<Option<PinMode>> {
        Ok(self.state.pin(Pin::new(pin)?).mode)
    }

    pub fn pull_of(&self, pin: i32) -> Result<Pull> {
        Ok(self.state.pin(Pin::new(pin)?).pull)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state.scheme.is_none() && self.config.before_setup == BeforeSetup::Fail {
            return Err(HalError::logic("GPIO setup has not been called"));
        }
        Ok(())
    }

    fn require_mode(&self, pin: Pin, required: PinMode) -> Result<()> {
        if !self.config.enforce_modes {
            return Ok(());
        }
        match self.state.pin(pin).mode {
            Some(mode) if mode == required => Ok(()),
            Some(mode) => Err(HalError::logic(format!(
                "pin {} is in {} mode, {} required",
                pin.number(),
                mode,
                required
            ))),
            None => Err(HalError::logic(format!(
                "pin {} mode is unset, {} required",
                pin.number(),
                required
            ))),
        }
    }
}
