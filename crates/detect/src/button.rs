//! Button debounce and key mapping.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use headset_events::{KeyCode, KeyEventSinkRef};
use headset_hal::{AdcPath, AnalogFrontEnd, DigitalLineRef, HalError};

use crate::classifier::AnalogClassifier;
use crate::error::DetectError;
use crate::irq::IrqShared;

/// One button: a half-open mic ADC range mapped to a key code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonDefinition {
    pub adc_min: i32,
    pub adc_max: i32,
    pub code: KeyCode,
    #[serde(skip)]
    pub pressed: bool,
}

impl ButtonDefinition {
    pub fn new(adc_min: i32, adc_max: i32, code: KeyCode) -> Self {
        Self {
            adc_min,
            adc_max,
            code,
            pressed: false,
        }
    }

    pub fn contains(&self, adc: i32) -> bool {
        adc >= self.adc_min && adc < self.adc_max
    }
}

/// Reject empty lists, empty ranges and duplicate codes. Overlapping
/// ranges are allowed; the first match wins.
pub fn validate_buttons(buttons: &[ButtonDefinition]) -> Result<(), DetectError> {
    if buttons.is_empty() {
        return Err(DetectError::NoButtons);
    }
    let mut seen = HashSet::new();
    for button in buttons {
        if button.adc_min >= button.adc_max {
            return Err(DetectError::EmptyRange {
                code: button.code,
                adc_min: button.adc_min,
                adc_max: button.adc_max,
            });
        }
        if !seen.insert(button.code) {
            return Err(DetectError::DuplicateKeyCode(button.code));
        }
    }
    Ok(())
}

/// Result of one button work pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonOutcome {
    /// Samples look like detect noise; the caller re-arms detection.
    FalseTrigger,
    /// Accessory is gone or has no mic; nothing emitted.
    Unplugged,
    Pressed(KeyCode),
    Released(KeyCode),
    /// A hardware read failed; nothing emitted this cycle.
    Fault,
}

pub struct ButtonStateMachine {
    buttons: Vec<ButtonDefinition>,
    last_code: KeyCode,
    key_sink: KeyEventSinkRef,
    afe: AnalogFrontEnd,
    detect_line: DigitalLineRef,
    shared: Arc<IrqShared>,
    settle: Duration,
}

impl ButtonStateMachine {
    pub fn new(
        buttons: Vec<ButtonDefinition>,
        key_sink: KeyEventSinkRef,
        afe: AnalogFrontEnd,
        detect_line: DigitalLineRef,
        shared: Arc<IrqShared>,
        settle: Duration,
    ) -> Result<Self, DetectError> {
        validate_buttons(&buttons)?;
        let buttons = buttons
            .into_iter()
            .map(|b| ButtonDefinition {
                pressed: false,
                ..b
            })
            .collect();
        Ok(Self {
            buttons,
            last_code: KeyCode::RESERVED,
            key_sink,
            afe,
            detect_line,
            shared,
            settle,
        })
    }

    pub fn buttons(&self) -> &[ButtonDefinition] {
        &self.buttons
    }

    /// Code of the entry currently held down.
    pub fn pressed(&self) -> Option<KeyCode> {
        self.buttons.iter().find(|b| b.pressed).map(|b| b.code)
    }

    /// Last code reported down. Starts as [`KeyCode::RESERVED`] and is not
    /// cleared by a release.
    pub fn last_code(&self) -> KeyCode {
        self.last_code
    }

    pub fn run(&mut self, classifier: &AnalogClassifier) -> ButtonOutcome {
        match self.try_run(classifier) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "button work skipped, hardware read failed");
                ButtonOutcome::Fault
            }
        }
    }

    fn try_run(&mut self, classifier: &AnalogClassifier) -> Result<ButtonOutcome, HalError> {
        if !classifier.is_plausible_button()? {
            tracing::info!("ignoring implausible button edge, re-checking plug");
            return Ok(ButtonOutcome::FalseTrigger);
        }

        if !self.plugged_with_mic()? {
            tracing::info!("ignoring button edge, accessory unplugged");
            return Ok(ButtonOutcome::Unplugged);
        }

        let first = self.afe.button_status_down()?;
        let adc_mic = classifier.read_filtered(AdcPath::Mic)?;
        thread::sleep(self.settle);
        let down = first && self.afe.button_status_down()?;
        tracing::debug!(adc_mic, down, "button sampled");

        if down {
            Ok(ButtonOutcome::Pressed(self.press(adc_mic)))
        } else {
            Ok(ButtonOutcome::Released(self.release_last()))
        }
    }

    fn plugged_with_mic(&self) -> Result<bool, HalError> {
        if !self.shared.status.accepts_buttons() {
            return Ok(false);
        }
        Ok(self.afe.plug_status_present()? && self.detect_line.read_level()?)
    }

    fn press(&mut self, adc_mic: i32) -> KeyCode {
        // No match still reports a press, on the reserved code.
        let code = self
            .buttons
            .iter()
            .find(|b| b.contains(adc_mic))
            .map_or(KeyCode::RESERVED, |b| b.code);

        if let Some(held) = self.pressed().filter(|held| *held != code) {
            self.emit(held, false);
            self.mark(held, false);
        }

        self.last_code = code;
        self.emit(code, true);
        self.mark(code, true);
        code
    }

    fn release_last(&mut self) -> KeyCode {
        let code = self.last_code;
        self.emit(code, false);
        self.mark(code, false);
        code
    }

    /// Key-up for every held entry, in definition order.
    pub fn release_all(&mut self) -> Vec<KeyCode> {
        let held: Vec<KeyCode> = self
            .buttons
            .iter()
            .filter(|b| b.pressed)
            .map(|b| b.code)
            .collect();
        for &code in &held {
            self.emit(code, false);
            self.mark(code, false);
        }
        held
    }

    fn mark(&mut self, code: KeyCode, pressed: bool) {
        if let Some(button) = self.buttons.iter_mut().find(|b| b.code == code) {
            button.pressed = pressed;
        }
    }

    fn emit(&self, code: KeyCode, down: bool) {
        tracing::info!(%code, down, "key event");
        self.key_sink.emit(code, down);
    }
}

impl std::fmt::Debug for ButtonStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ButtonStateMachine")
            .field("buttons", &self.buttons)
            .field("last_code", &self.last_code)
            .finish_non_exhaustive()
    }
}
