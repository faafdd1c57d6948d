//! Analog front-end register map and read-modify-write helpers.
//!
//! Addresses are offsets within the analog register bank exposed by
//! [`HardwareRegisters`].

use crate::{HalError, HardwareRegisters, RegistersRef};

/// Global clock enable register.
pub const GLB_CLK_EN: u32 = 0x0084;
/// Base of the headset detect block within the bank.
pub const DETECT_BASE: u32 = 0x0700;
/// Headset detect control register.
pub const DETECT_CTRL: u32 = DETECT_BASE + 0xA0;
/// Headset detect status register.
pub const DETECT_STATUS: u32 = DETECT_BASE + 0xC0;

/// `GLB_CLK_EN`: detect block clocks.
pub const DETECT_CLK_BITS: u32 = (1 << 14) | (1 << 15);

/// `DETECT_CTRL`: mic level field.
pub const MIC_LEVEL_MASK: u32 = 0x1e;
pub const MIC_LEVEL_DETECT: u32 = 0x02;
pub const MIC_LEVEL_IDLE: u32 = 0x16;
/// `DETECT_CTRL`: insertion threshold voltage field.
pub const INSERT_VOL_SHIFT: u32 = 5;
pub const INSERT_VOL_MASK: u32 = 0x3 << INSERT_VOL_SHIFT;
pub const INSERT_VOL_2P1V: u32 = 3;
/// `DETECT_CTRL`: set = detect circuit open (off).
pub const DETECT_CIRCUIT_OFF: u32 = 1 << 11;
/// `DETECT_CTRL`: set = headset mic routed to the AUXADC, clear = ground/left.
pub const ADC_SWITCH_MIC: u32 = 1 << 13;
pub const DETECT_ADC_EN: u32 = 1 << 14;
pub const DETECT_ADC_BUF: u32 = 1 << 15;

/// `DETECT_STATUS`: plug comparator bits.
pub const PLUG_MASK: u32 = (1 << 5) | (1 << 6);
pub const PLUG_PRESENT: u32 = PLUG_MASK;
/// `DETECT_STATUS`: debounced button template (plug bits plus button bit 7).
pub const BUTTON_MASK: u32 = (1 << 5) | (1 << 6) | (1 << 7);
pub const BUTTON_DOWN: u32 = 0xe0;

/// ADC channel wired to the headset mic pin.
pub const HEADMIC_ADC_CHANNEL: u32 = 5;

/// Read-modify-write helpers over any register bank.
pub trait RegisterExt {
    fn set_bits(&self, addr: u32, bits: u32) -> Result<(), HalError>;
    fn clear_bits(&self, addr: u32, bits: u32) -> Result<(), HalError>;
    /// Replace the bits selected by `mask` with `value`.
    fn update_masked(&self, addr: u32, mask: u32, value: u32) -> Result<(), HalError>;
}

impl<T: HardwareRegisters + ?Sized> RegisterExt for T {
    fn set_bits(&self, addr: u32, bits: u32) -> Result<(), HalError> {
        let current = self.read(addr)?;
        self.write(addr, current | bits)
    }

    fn clear_bits(&self, addr: u32, bits: u32) -> Result<(), HalError> {
        let current = self.read(addr)?;
        self.write(addr, current & !bits)
    }

    fn update_masked(&self, addr: u32, mask: u32, value: u32) -> Result<(), HalError> {
        let current = self.read(addr)?;
        self.write(addr, (current & !mask) | (value & mask))
    }
}

/// Which input the AUXADC measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcPath {
    /// Headset mic ring.
    Mic,
    /// Ground / left reference.
    Ground,
}

/// Mic level presets of the detect block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicLevel {
    /// Gain used while classifying an inserted accessory.
    Detect,
    /// Gain used with no mic present.
    Idle,
}

/// Named operations on the headset detect block.
#[derive(Clone)]
pub struct AnalogFrontEnd {
    regs: RegistersRef,
}

impl AnalogFrontEnd {
    pub fn new(regs: RegistersRef) -> Self {
        Self { regs }
    }

    pub fn registers(&self) -> &RegistersRef {
        &self.regs
    }

    /// Clock on, ADC buffer/enable on, 2.1 V insertion threshold.
    pub fn init_detect(&self) -> Result<(), HalError> {
        self.regs.set_bits(GLB_CLK_EN, DETECT_CLK_BITS)?;
        self.regs
            .set_bits(DETECT_CTRL, DETECT_ADC_BUF | DETECT_ADC_EN)?;
        self.regs.update_masked(
            DETECT_CTRL,
            INSERT_VOL_MASK,
            INSERT_VOL_2P1V << INSERT_VOL_SHIFT,
        )
    }

    pub fn set_detect_circuit(&self, on: bool) -> Result<(), HalError> {
        if on {
            self.regs.clear_bits(DETECT_CTRL, DETECT_CIRCUIT_OFF)
        } else {
            self.regs.set_bits(DETECT_CTRL, DETECT_CIRCUIT_OFF)
        }
    }

    pub fn route_adc(&self, path: AdcPath) -> Result<(), HalError> {
        match path {
            AdcPath::Mic => self.regs.set_bits(DETECT_CTRL, ADC_SWITCH_MIC),
            AdcPath::Ground => self.regs.clear_bits(DETECT_CTRL, ADC_SWITCH_MIC),
        }
    }

    pub fn set_mic_level(&self, level: MicLevel) -> Result<(), HalError> {
        let value = match level {
            MicLevel::Detect => MIC_LEVEL_DETECT,
            MicLevel::Idle => MIC_LEVEL_IDLE,
        };
        self.regs.update_masked(DETECT_CTRL, MIC_LEVEL_MASK, value)
    }

    /// Plug comparator reports an accessory.
    pub fn plug_status_present(&self) -> Result<bool, HalError> {
        Ok(self.regs.read(DETECT_STATUS)? & PLUG_MASK == PLUG_PRESENT)
    }

    /// Status matches the button-down template.
    pub fn button_status_down(&self) -> Result<bool, HalError> {
        Ok(self.regs.read(DETECT_STATUS)? & BUTTON_MASK == BUTTON_DOWN)
    }
}

impl std::fmt::Debug for AnalogFrontEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalogFrontEnd").finish_non_exhaustive()
    }
}
