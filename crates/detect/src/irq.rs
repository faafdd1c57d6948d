//! Interrupt-side state: event kinds, polarity flags, the button IRQ gate and
//! the plug status mirror.
//!
//! Everything here is touched from interrupt context and must stay
//! non-blocking.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use headset_events::{HeadsetType, PlugState};
use headset_hal::{DigitalLineRef, HalError, TriggerLevel};

/// The closed set of asynchronous inputs the device reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqEvent {
    /// Detect line interrupt.
    DetectEdge,
    /// Button line interrupt.
    ButtonEdge,
    /// Debounce timer expiry (for platforms that run their own timer).
    TimerFired,
}

/// Polarity flag of a level-triggered line.
///
/// The line is re-armed on the opposite level every time it fires, so one
/// line reports both insertion and removal. Flag `true` means the line is
/// armed on high.
#[derive(Debug)]
pub struct Polarity {
    active_low: AtomicBool,
}

impl Polarity {
    pub fn new(active_low: bool) -> Self {
        Self {
            active_low: AtomicBool::new(active_low),
        }
    }

    fn level_for(active_low: bool) -> TriggerLevel {
        if active_low {
            TriggerLevel::High
        } else {
            TriggerLevel::Low
        }
    }

    /// Level the line is currently armed on.
    pub fn armed(&self) -> TriggerLevel {
        Self::level_for(self.active_low.load(Ordering::SeqCst))
    }

    /// Flip the flag and return the level to re-arm on.
    pub fn flip(&self) -> TriggerLevel {
        let previous = self.active_low.fetch_xor(true, Ordering::SeqCst);
        Self::level_for(!previous)
    }

    /// Force the line to be armed on `level`.
    pub fn set(&self, level: TriggerLevel) {
        self.active_low
            .store(level == TriggerLevel::High, Ordering::SeqCst);
    }
}

/// Enable/disable gate for the button interrupt.
///
/// Shared by interrupt context (detect edge masks it) and the worker
/// (detection unmasks it). The line is only touched on actual transitions.
/// Once closed the gate stays masked.
pub struct ButtonIrqGate {
    line: Option<DigitalLineRef>,
    state: Mutex<GateState>,
}

#[derive(Debug, Clone, Copy)]
struct GateState {
    enabled: bool,
    closed: bool,
}

impl ButtonIrqGate {
    /// The gate starts enabled, matching a freshly requested interrupt.
    pub fn new(line: Option<DigitalLineRef>) -> Self {
        Self {
            line,
            state: Mutex::new(GateState {
                enabled: true,
                closed: false,
            }),
        }
    }

    /// Returns whether the state changed. Enabling a closed gate is a no-op.
    pub fn set_enabled(&self, on: bool) -> Result<bool, HalError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.enabled == on || (on && state.closed) {
            return Ok(false);
        }
        if let Some(line) = &self.line {
            line.enable(on)?;
        }
        state.enabled = on;
        Ok(true)
    }

    /// Mask the line for good. Later `set_enabled(true)` calls are refused.
    pub fn close(&self) -> Result<(), HalError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        if state.enabled {
            if let Some(line) = &self.line {
                line.enable(false)?;
            }
            state.enabled = false;
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}

impl std::fmt::Debug for ButtonIrqGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ButtonIrqGate")
            .field("enabled", &self.is_enabled())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Lock-free copy of the detection state for interrupt context and queries.
///
/// Written only by the detection worker.
#[derive(Debug, Default)]
pub struct PlugStatus {
    plug: AtomicU8,
    headset_type: AtomicU8,
}

const NO_TYPE: u8 = 0;

impl PlugStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plug_state(&self) -> PlugState {
        match self.plug.load(Ordering::SeqCst) {
            1 => PlugState::Inserted,
            2 => PlugState::Removed,
            _ => PlugState::Unknown,
        }
    }

    pub fn headset_type(&self) -> Option<HeadsetType> {
        match self.headset_type.load(Ordering::SeqCst) {
            1 => Some(HeadsetType::Normal),
            2 => Some(HeadsetType::NoMic),
            3 => Some(HeadsetType::NorthAmerica),
            4 => Some(HeadsetType::Apple),
            _ => None,
        }
    }

    /// Inserted with a mic-equipped accessory.
    pub fn accepts_buttons(&self) -> bool {
        self.plug_state() == PlugState::Inserted
            && self.headset_type().is_some_and(HeadsetType::has_mic)
    }

    pub(crate) fn store(&self, plug: PlugState, headset_type: Option<HeadsetType>) {
        let type_code = match headset_type {
            None => NO_TYPE,
            Some(HeadsetType::Normal) => 1,
            Some(HeadsetType::NoMic) => 2,
            Some(HeadsetType::NorthAmerica) => 3,
            Some(HeadsetType::Apple) => 4,
        };
        let plug_code = match plug {
            PlugState::Unknown => 0,
            PlugState::Inserted => 1,
            PlugState::Removed => 2,
        };
        // Type first so a reader that sees Inserted also sees its type.
        self.headset_type.store(type_code, Ordering::SeqCst);
        self.plug.store(plug_code, Ordering::SeqCst);
    }
}

/// State touched by both interrupt context and the worker.
#[derive(Debug)]
pub struct IrqShared {
    pub detect_polarity: Polarity,
    pub button_polarity: Polarity,
    pub button_gate: ButtonIrqGate,
    pub status: PlugStatus,
}

impl IrqShared {
    pub fn new(
        detect_active_low: bool,
        button_active_low: bool,
        button_line: Option<DigitalLineRef>,
    ) -> Self {
        Self {
            detect_polarity: Polarity::new(detect_active_low),
            button_polarity: Polarity::new(button_active_low),
            button_gate: ButtonIrqGate::new(button_line),
            status: PlugStatus::new(),
        }
    }
}
