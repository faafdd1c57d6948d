//! Plug detection work: runs on the worker after the debounce timer fires.

use std::sync::Arc;
use std::thread;

use headset_events::{HeadsetType, NotificationHub, PlugSinkRef, PlugSnapshot, PlugState, SwitchState};
use headset_hal::{
    AnalogFrontEnd, BiasSupplyRef, DigitalLineRef, HalError, MicLevel, OutputLineRef, TriggerLevel,
};

use crate::button::ButtonStateMachine;
use crate::classifier::AnalogClassifier;
use crate::config::Tunables;
use crate::irq::IrqShared;

/// Hardware the detection machine drives.
#[derive(Clone)]
pub struct DetectionHardware {
    pub detect_line: DigitalLineRef,
    pub switch_line: OutputLineRef,
    pub button_line: Option<DigitalLineRef>,
    pub afe: AnalogFrontEnd,
    pub bias: BiasSupplyRef,
}

/// Bias power that only reaches the supply on transitions. Starts off.
struct BiasControl {
    supply: BiasSupplyRef,
    on: bool,
}

impl BiasControl {
    fn set(&mut self, on: bool) -> Result<(), HalError> {
        if self.on == on {
            return Ok(());
        }
        self.supply.set_power(on)?;
        self.on = on;
        tracing::debug!(on, "mic bias");
        Ok(())
    }
}

/// Result of one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectOutcome {
    Inserted(HeadsetType),
    Removed,
    /// A hardware read failed; state left as it was.
    Unknown,
}

pub struct DetectionStateMachine {
    detect_line: DigitalLineRef,
    switch_line: OutputLineRef,
    button_line: Option<DigitalLineRef>,
    afe: AnalogFrontEnd,
    bias: BiasControl,
    plug_sink: PlugSinkRef,
    hub: Arc<NotificationHub>,
    shared: Arc<IrqShared>,
    tunables: Arc<Tunables>,
    headphone: bool,
}

impl DetectionStateMachine {
    pub fn new(
        hw: DetectionHardware,
        plug_sink: PlugSinkRef,
        hub: Arc<NotificationHub>,
        shared: Arc<IrqShared>,
        tunables: Arc<Tunables>,
    ) -> Self {
        Self {
            detect_line: hw.detect_line,
            switch_line: hw.switch_line,
            button_line: hw.button_line,
            afe: hw.afe,
            bias: BiasControl {
                supply: hw.bias,
                on: false,
            },
            plug_sink,
            hub,
            shared,
            tunables,
            headphone: false,
        }
    }

    /// Whether the last insertion was a headphone without mic.
    pub fn is_headphone(&self) -> bool {
        self.headphone
    }

    pub fn run(
        &mut self,
        classifier: &AnalogClassifier,
        button: Option<&mut ButtonStateMachine>,
    ) -> DetectOutcome {
        if let Err(err) = self.bias.set(true) {
            tracing::warn!(error = %err, "mic bias power-on failed");
        }

        let level = match self.detect_line.read_level() {
            Ok(level) => level,
            Err(err) => {
                tracing::warn!(error = %err, "detect line unreadable, waiting for next edge");
                return DetectOutcome::Unknown;
            }
        };

        let snapshot = PlugSnapshot {
            raw_level: level,
            plug_state: self.shared.status.plug_state(),
            headset_type: self.shared.status.headset_type(),
        };
        self.hub.notify(level, &snapshot);

        if level {
            match self.inserted(classifier) {
                Ok(headset_type) => DetectOutcome::Inserted(headset_type),
                Err(err) => {
                    tracing::warn!(error = %err, "classification failed, waiting for next edge");
                    DetectOutcome::Unknown
                }
            }
        } else {
            self.removed(button);
            DetectOutcome::Removed
        }
    }

    fn inserted(&mut self, classifier: &AnalogClassifier) -> Result<HeadsetType, HalError> {
        self.afe.set_mic_level(MicLevel::Detect)?;
        self.switch_line.set_level(false)?;
        thread::sleep(self.tunables.switch_gpio_delay());

        let headset_type = classifier.classify()?;

        match headset_type {
            HeadsetType::NorthAmerica => {
                self.switch_line.set_level(true)?;
                self.arm_button(TriggerLevel::High)?;
                thread::sleep(self.tunables.switch_gpio_delay());
            }
            HeadsetType::Normal => self.arm_button(TriggerLevel::High)?,
            HeadsetType::NoMic => {
                self.arm_button(TriggerLevel::Low)?;
                self.afe.set_mic_level(MicLevel::Idle)?;
                self.bias.set(false)?;
            }
            HeadsetType::Apple => {}
        }

        self.shared
            .status
            .store(PlugState::Inserted, Some(headset_type));

        if headset_type.has_mic() {
            self.headphone = false;
            self.plug_sink.publish(SwitchState::HeadsetMic);
            if let Err(err) = self.shared.button_gate.set_enabled(true) {
                tracing::warn!(error = %err, "button interrupt enable failed");
            }
            tracing::info!(?headset_type, "headset plug in");
        } else {
            self.headphone = true;
            self.plug_sink.publish(SwitchState::HeadsetNoMic);
            tracing::info!("headphone plug in");
        }
        Ok(headset_type)
    }

    fn removed(&mut self, button: Option<&mut ButtonStateMachine>) {
        if let Err(err) = self.bias.set(false) {
            tracing::warn!(error = %err, "mic bias power-off failed");
        }

        if self.headphone {
            tracing::info!("headphone plug out");
        } else {
            tracing::info!("headset plug out");
        }

        self.shared.status.store(PlugState::Removed, None);
        self.plug_sink.publish(SwitchState::Removed);

        if let Some(button) = button {
            let released = button.release_all();
            if !released.is_empty() {
                tracing::info!(?released, "released held buttons on unplug");
            }
        }
    }

    fn arm_button(&self, level: TriggerLevel) -> Result<(), HalError> {
        self.shared.button_polarity.set(level);
        match &self.button_line {
            Some(line) => line.set_trigger_polarity(level),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for DetectionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionStateMachine")
            .field("bias_on", &self.bias.on)
            .field("headphone", &self.headphone)
            .finish_non_exhaustive()
    }
}
