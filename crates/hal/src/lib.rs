//! Hardware capabilities consumed by the headset detection core.
//!
//! The core never touches hardware directly. Everything it needs is expressed
//! as a small capability trait that platform code implements:
//!
//! - [`DigitalLine`] - an interrupt-capable input (detect line, button line)
//! - [`OutputLine`] - a plain output (the mic/ground switch-routing GPIO)
//! - [`AnalogSource`] - single-shot ADC reads
//! - [`HardwareRegisters`] - analog front-end register bank
//! - [`BiasSupply`] - mic bias power
//!
//! All methods take `&self` and must be callable from interrupt context
//! without blocking, except [`AnalogSource::read_raw`] and
//! [`BiasSupply::set_power`] which are only ever called from the worker.
//!
//! [`sim::SimBoard`] implements every capability in memory so the state
//! machines can be driven in tests and demos.

mod error;
pub mod regs;
pub mod sim;

use std::sync::Arc;

pub use error::HalError;
pub use regs::{AdcPath, AnalogFrontEnd, MicLevel, RegisterExt};

/// Edge/level an interrupt line is armed to trigger on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerLevel {
    Low,
    High,
}

impl TriggerLevel {
    pub fn opposite(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

/// Interrupt-capable input line.
pub trait DigitalLine: Send + Sync {
    /// Line name used in log and error context.
    fn name(&self) -> &str;

    /// Read the current line level (`true` = high).
    fn read_level(&self) -> Result<bool, HalError>;

    /// Re-arm the line interrupt on the given level.
    fn set_trigger_polarity(&self, level: TriggerLevel) -> Result<(), HalError>;

    /// Unmask (`true`) or mask (`false`) the line interrupt.
    fn enable(&self, on: bool) -> Result<(), HalError>;
}

/// Plain output line.
pub trait OutputLine: Send + Sync {
    fn name(&self) -> &str;

    fn set_level(&self, high: bool) -> Result<(), HalError>;
}

/// Single-shot ADC.
pub trait AnalogSource: Send + Sync {
    fn read_raw(&self, channel: u32) -> Result<i32, HalError>;
}

/// Register bank of the analog front end.
pub trait HardwareRegisters: Send + Sync {
    fn read(&self, addr: u32) -> Result<u32, HalError>;

    fn write(&self, addr: u32, value: u32) -> Result<(), HalError>;
}

/// Mic bias power control.
pub trait BiasSupply: Send + Sync {
    fn set_power(&self, on: bool) -> Result<(), HalError>;
}

pub type DigitalLineRef = Arc<dyn DigitalLine>;
pub type OutputLineRef = Arc<dyn OutputLine>;
pub type AnalogSourceRef = Arc<dyn AnalogSource>;
pub type RegistersRef = Arc<dyn HardwareRegisters>;
pub type BiasSupplyRef = Arc<dyn BiasSupply>;

/// The set of capabilities a board provides.
///
/// Every slot is optional so that a partially wired board can still start
/// the sub-machines it has hardware for.
#[derive(Clone, Default)]
pub struct Board {
    pub detect_line: Option<DigitalLineRef>,
    pub button_line: Option<DigitalLineRef>,
    pub switch_line: Option<OutputLineRef>,
    pub registers: Option<RegistersRef>,
    pub adc: Option<AnalogSourceRef>,
    pub bias: Option<BiasSupplyRef>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_detect_line(mut self, line: DigitalLineRef) -> Self {
        self.detect_line = Some(line);
        self
    }

    #[must_use]
    pub fn with_button_line(mut self, line: DigitalLineRef) -> Self {
        self.button_line = Some(line);
        self
    }

    #[must_use]
    pub fn with_switch_line(mut self, line: OutputLineRef) -> Self {
        self.switch_line = Some(line);
        self
    }

    #[must_use]
    pub fn with_registers(mut self, registers: RegistersRef) -> Self {
        self.registers = Some(registers);
        self
    }

    #[must_use]
    pub fn with_adc(mut self, adc: AnalogSourceRef) -> Self {
        self.adc = Some(adc);
        self
    }

    #[must_use]
    pub fn with_bias(mut self, bias: BiasSupplyRef) -> Self {
        self.bias = Some(bias);
        self
    }
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("detect_line", &self.detect_line.as_ref().map(|l| l.name().to_string()))
            .field("button_line", &self.button_line.as_ref().map(|l| l.name().to_string()))
            .field("switch_line", &self.switch_line.as_ref().map(|l| l.name().to_string()))
            .field("has_registers", &self.registers.is_some())
            .field("has_adc", &self.adc.is_some())
            .field("has_bias", &self.bias.is_some())
            .finish()
    }
}
