//! In-memory board for tests and demos.
//!
//! [`SimBoard`] implements every capability against shared state. The
//! analog front end is modeled just far enough for the detection core:
//! `DETECT_STATUS` reflects the simulated plug/button comparators and the
//! ADC returns the mic or ground value depending on the `ADC_SWITCH_MIC`
//! routing bit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::regs::{ADC_SWITCH_MIC, BUTTON_MASK, DETECT_CTRL, DETECT_STATUS, PLUG_MASK};
use crate::{
    AnalogSource, BiasSupply, Board, DigitalLine, HalError, HardwareRegisters, OutputLine,
    TriggerLevel,
};

/// Observable state of a simulated interrupt line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineState {
    pub level: bool,
    pub polarity: Option<TriggerLevel>,
    pub enabled: bool,
    pub polarity_history: Vec<TriggerLevel>,
    pub enable_history: Vec<bool>,
}

/// Faults that can be injected into the simulated board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimFault {
    Adc,
    DetectLine,
    Registers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineId {
    Detect,
    Button,
}

#[derive(Default)]
struct SimState {
    detect: LineState,
    button: LineState,
    switch_level: bool,
    switch_history: Vec<bool>,
    regs: HashMap<u32, u32>,
    plug_status: bool,
    button_status: bool,
    mic_adc: i32,
    ground_adc: i32,
    scripted_adc: VecDeque<i32>,
    adc_reads: usize,
    bias_on: bool,
    bias_history: Vec<bool>,
    faults: Vec<SimFault>,
}

impl SimState {
    fn line(&mut self, id: LineId) -> &mut LineState {
        match id {
            LineId::Detect => &mut self.detect,
            LineId::Button => &mut self.button,
        }
    }

    fn has_fault(&self, fault: SimFault) -> bool {
        self.faults.contains(&fault)
    }

    fn status_register(&self) -> u32 {
        let mut value = self.regs.get(&DETECT_STATUS).copied().unwrap_or(0) & !BUTTON_MASK;
        if self.plug_status {
            value |= PLUG_MASK;
        }
        if self.plug_status && self.button_status {
            value |= BUTTON_MASK;
        }
        value
    }
}

#[derive(Default)]
struct SimShared {
    state: Mutex<SimState>,
}

impl SimShared {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Simulated headset jack, button and analog front end.
#[derive(Clone, Default)]
pub struct SimBoard {
    shared: Arc<SimShared>,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Board`] with every capability wired to this simulation.
    pub fn board(&self) -> Board {
        Board::new()
            .with_detect_line(Arc::new(SimLine::new(self, LineId::Detect, "headset_detect")))
            .with_button_line(Arc::new(SimLine::new(self, LineId::Button, "headset_button")))
            .with_switch_line(Arc::new(SimSwitch {
                shared: Arc::clone(&self.shared),
            }))
            .with_registers(Arc::new(SimRegisters {
                shared: Arc::clone(&self.shared),
            }))
            .with_adc(Arc::new(SimAdc {
                shared: Arc::clone(&self.shared),
            }))
            .with_bias(Arc::new(SimBias {
                shared: Arc::clone(&self.shared),
            }))
    }

    /// Insert or remove the accessory: drives the detect line and the plug
    /// comparator bits together.
    pub fn plug(&self, inserted: bool) {
        let mut state = self.shared.state();
        state.detect.level = inserted;
        state.plug_status = inserted;
        if !inserted {
            state.button_status = false;
            state.button.level = false;
        }
    }

    /// Drive the detect line alone, leaving the comparator untouched.
    pub fn set_detect_level(&self, level: bool) {
        self.shared.state().detect.level = level;
    }

    /// Hold or release the headset button.
    pub fn set_button(&self, down: bool) {
        let mut state = self.shared.state();
        state.button.level = down;
        state.button_status = down;
    }

    /// Steady ADC values returned on the mic and ground paths.
    pub fn set_adc(&self, mic: i32, ground: i32) {
        let mut state = self.shared.state();
        state.mic_adc = mic;
        state.ground_adc = ground;
    }

    /// Raw samples returned before falling back to the steady values.
    pub fn script_adc(&self, samples: impl IntoIterator<Item = i32>) {
        self.shared.state().scripted_adc.extend(samples);
    }

    pub fn set_fault(&self, fault: SimFault, active: bool) {
        let mut state = self.shared.state();
        state.faults.retain(|f| *f != fault);
        if active {
            state.faults.push(fault);
        }
    }

    pub fn detect_line(&self) -> LineState {
        self.shared.state().detect.clone()
    }

    pub fn button_line(&self) -> LineState {
        self.shared.state().button.clone()
    }

    pub fn switch_level(&self) -> bool {
        self.shared.state().switch_level
    }

    pub fn switch_history(&self) -> Vec<bool> {
        self.shared.state().switch_history.clone()
    }

    pub fn bias_on(&self) -> bool {
        self.shared.state().bias_on
    }

    pub fn bias_history(&self) -> Vec<bool> {
        self.shared.state().bias_history.clone()
    }

    pub fn register(&self, addr: u32) -> u32 {
        let state = self.shared.state();
        if addr == DETECT_STATUS {
            state.status_register()
        } else {
            state.regs.get(&addr).copied().unwrap_or(0)
        }
    }

    /// Number of raw ADC conversions performed so far.
    pub fn adc_reads(&self) -> usize {
        self.shared.state().adc_reads
    }
}

impl std::fmt::Debug for SimBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state();
        f.debug_struct("SimBoard")
            .field("detect", &state.detect.level)
            .field("button", &state.button.level)
            .field("bias_on", &state.bias_on)
            .finish_non_exhaustive()
    }
}

struct SimLine {
    shared: Arc<SimShared>,
    id: LineId,
    name: &'static str,
}

impl SimLine {
    fn new(board: &SimBoard, id: LineId, name: &'static str) -> Self {
        Self {
            shared: Arc::clone(&board.shared),
            id,
            name,
        }
    }

    fn check(&self, state: &SimState) -> Result<(), HalError> {
        if self.id == LineId::Detect && state.has_fault(SimFault::DetectLine) {
            return Err(HalError::Gpio {
                line: self.name.to_string(),
                reason: "injected fault".to_string(),
            });
        }
        Ok(())
    }
}

impl DigitalLine for SimLine {
    fn name(&self) -> &str {
        self.name
    }

    fn read_level(&self) -> Result<bool, HalError> {
        let mut state = self.shared.state();
        self.check(&state)?;
        Ok(state.line(self.id).level)
    }

    fn set_trigger_polarity(&self, level: TriggerLevel) -> Result<(), HalError> {
        let mut state = self.shared.state();
        let line = state.line(self.id);
        line.polarity = Some(level);
        line.polarity_history.push(level);
        Ok(())
    }

    fn enable(&self, on: bool) -> Result<(), HalError> {
        let mut state = self.shared.state();
        let line = state.line(self.id);
        line.enabled = on;
        line.enable_history.push(on);
        Ok(())
    }
}

struct SimSwitch {
    shared: Arc<SimShared>,
}

impl OutputLine for SimSwitch {
    fn name(&self) -> &str {
        "headset_switch"
    }

    fn set_level(&self, high: bool) -> Result<(), HalError> {
        let mut state = self.shared.state();
        state.switch_level = high;
        state.switch_history.push(high);
        Ok(())
    }
}

struct SimRegisters {
    shared: Arc<SimShared>,
}

impl HardwareRegisters for SimRegisters {
    fn read(&self, addr: u32) -> Result<u32, HalError> {
        let state = self.shared.state();
        if state.has_fault(SimFault::Registers) {
            return Err(HalError::Bus {
                addr,
                reason: "injected fault".to_string(),
            });
        }
        if addr == DETECT_STATUS {
            return Ok(state.status_register());
        }
        Ok(state.regs.get(&addr).copied().unwrap_or(0))
    }

    fn write(&self, addr: u32, value: u32) -> Result<(), HalError> {
        let mut state = self.shared.state();
        if state.has_fault(SimFault::Registers) {
            return Err(HalError::Bus {
                addr,
                reason: "injected fault".to_string(),
            });
        }
        state.regs.insert(addr, value);
        Ok(())
    }
}

struct SimAdc {
    shared: Arc<SimShared>,
}

impl AnalogSource for SimAdc {
    fn read_raw(&self, channel: u32) -> Result<i32, HalError> {
        let mut state = self.shared.state();
        if state.has_fault(SimFault::Adc) {
            return Err(HalError::Adc {
                channel,
                reason: "injected fault".to_string(),
            });
        }
        state.adc_reads += 1;
        if let Some(sample) = state.scripted_adc.pop_front() {
            return Ok(sample);
        }
        let routed_to_mic =
            state.regs.get(&DETECT_CTRL).copied().unwrap_or(0) & ADC_SWITCH_MIC != 0;
        Ok(if routed_to_mic {
            state.mic_adc
        } else {
            state.ground_adc
        })
    }
}

struct SimBias {
    shared: Arc<SimShared>,
}

impl BiasSupply for SimBias {
    fn set_power(&self, on: bool) -> Result<(), HalError> {
        let mut state = self.shared.state();
        state.bias_on = on;
        state.bias_history.push(on);
        tracing::trace!(on, "sim bias supply");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{AdcPath, AnalogFrontEnd};

    #[test]
    fn test_plug_drives_line_and_status() {
        let sim = SimBoard::new();
        let board = sim.board();
        let afe = AnalogFrontEnd::new(board.registers.clone().unwrap());
        let detect = board.detect_line.clone().unwrap();

        assert!(!detect.read_level().unwrap());
        assert!(!afe.plug_status_present().unwrap());

        sim.plug(true);
        assert!(detect.read_level().unwrap());
        assert!(afe.plug_status_present().unwrap());

        sim.set_button(true);
        assert!(afe.button_status_down().unwrap());

        sim.plug(false);
        assert!(!afe.button_status_down().unwrap());
    }

    #[test]
    fn test_adc_follows_routing_bit() {
        let sim = SimBoard::new();
        let board = sim.board();
        let afe = AnalogFrontEnd::new(board.registers.clone().unwrap());
        let adc = board.adc.clone().unwrap();
        sim.set_adc(3000, 500);

        afe.route_adc(AdcPath::Mic).unwrap();
        assert_eq!(adc.read_raw(5).unwrap(), 3000);
        afe.route_adc(AdcPath::Ground).unwrap();
        assert_eq!(adc.read_raw(5).unwrap(), 500);
        assert_eq!(sim.adc_reads(), 2);
    }

    #[test]
    fn test_scripted_samples_come_first() {
        let sim = SimBoard::new();
        let adc = sim.board().adc.unwrap();
        sim.set_adc(7, 7);
        sim.script_adc([1, 2]);

        assert_eq!(adc.read_raw(5).unwrap(), 1);
        assert_eq!(adc.read_raw(5).unwrap(), 2);
        assert_eq!(adc.read_raw(5).unwrap(), 7);
    }

    #[test]
    fn test_injected_faults() {
        let sim = SimBoard::new();
        let board = sim.board();
        sim.set_fault(SimFault::Adc, true);
        sim.set_fault(SimFault::DetectLine, true);

        assert!(matches!(
            board.adc.as_ref().unwrap().read_raw(5),
            Err(HalError::Adc { channel: 5, .. })
        ));
        assert!(matches!(
            board.detect_line.as_ref().unwrap().read_level(),
            Err(HalError::Gpio { .. })
        ));
        // Only the detect line is affected.
        assert!(board.button_line.as_ref().unwrap().read_level().is_ok());

        sim.set_fault(SimFault::Adc, false);
        assert!(board.adc.as_ref().unwrap().read_raw(5).is_ok());
    }

    #[test]
    fn test_line_history_is_recorded() {
        let sim = SimBoard::new();
        let button = sim.board().button_line.unwrap();
        button.set_trigger_polarity(TriggerLevel::High).unwrap();
        button.set_trigger_polarity(TriggerLevel::Low).unwrap();
        button.enable(false).unwrap();

        let state = sim.button_line();
        assert_eq!(state.polarity, Some(TriggerLevel::Low));
        assert_eq!(
            state.polarity_history,
            vec![TriggerLevel::High, TriggerLevel::Low]
        );
        assert_eq!(state.enable_history, vec![false]);
    }
}
