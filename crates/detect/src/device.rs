//! Device handle: wiring, interrupt entry point and lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use headset_events::{
    HeadsetType, KeyEventSinkRef, NotificationHub, PlugCallback, PlugSinkRef, PlugState,
    SubscriptionId,
};
use headset_hal::{AnalogFrontEnd, Board, DigitalLineRef};

use crate::button::{ButtonDefinition, ButtonOutcome, ButtonStateMachine};
use crate::classifier::AnalogClassifier;
use crate::config::{DetectConfig, Tunables};
use crate::detection::{DetectOutcome, DetectionHardware, DetectionStateMachine};
use crate::error::DetectError;
use crate::irq::{IrqEvent, IrqShared};
use crate::scheduler::{PostOutcome, Scheduler, WorkKind, WorkSender};
use crate::timer::{DebounceTimer, TimerHandle};

/// Counters exposed through [`HeadsetDevice::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub detect_runs: u64,
    pub button_runs: u64,
    pub plug_ins: u64,
    pub plug_outs: u64,
    pub key_downs: u64,
    pub key_ups: u64,
    pub false_triggers: u64,
    pub hardware_faults: u64,
    pub discarded_button_irqs: u64,
    pub timer_fires: u64,
}

#[derive(Debug, Default)]
struct Counters {
    detect_runs: AtomicU64,
    button_runs: AtomicU64,
    plug_ins: AtomicU64,
    plug_outs: AtomicU64,
    key_downs: AtomicU64,
    key_ups: AtomicU64,
    false_triggers: AtomicU64,
    hardware_faults: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Worker-owned state. Everything here runs serialized on the worker thread.
struct Engine {
    classifier: AnalogClassifier,
    detection: DetectionStateMachine,
    button: Option<ButtonStateMachine>,
    timer: TimerHandle,
    counters: Arc<Counters>,
}

impl Engine {
    fn handle(&mut self, kind: WorkKind) {
        match kind {
            WorkKind::Detect => {
                let outcome = self
                    .detection
                    .run(&self.classifier, self.button.as_mut());
                match outcome {
                    DetectOutcome::Inserted(_) => bump(&self.counters.plug_ins),
                    DetectOutcome::Removed => bump(&self.counters.plug_outs),
                    DetectOutcome::Unknown => bump(&self.counters.hardware_faults),
                }
                bump(&self.counters.detect_runs);
            }
            WorkKind::Button => {
                let Some(button) = self.button.as_mut() else {
                    tracing::debug!("button work without a button sub-machine");
                    return;
                };
                let outcome = button.run(&self.classifier);
                match outcome {
                    ButtonOutcome::FalseTrigger => {
                        bump(&self.counters.false_triggers);
                        self.timer.arm();
                    }
                    ButtonOutcome::Pressed(_) => bump(&self.counters.key_downs),
                    ButtonOutcome::Released(_) => bump(&self.counters.key_ups),
                    ButtonOutcome::Fault => bump(&self.counters.hardware_faults),
                    ButtonOutcome::Unplugged => {}
                }
                // Run counters trail the outcome counters.
                bump(&self.counters.button_runs);
            }
        }
    }
}

/// Builder for [`HeadsetDevice`].
pub struct DeviceBuilder {
    board: Board,
    config: DetectConfig,
    plug_sink: Option<PlugSinkRef>,
    key_sink: Option<KeyEventSinkRef>,
    buttons: Option<Vec<ButtonDefinition>>,
}

impl DeviceBuilder {
    pub fn config(mut self, config: DetectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn plug_sink(mut self, sink: PlugSinkRef) -> Self {
        self.plug_sink = Some(sink);
        self
    }

    pub fn key_sink(mut self, sink: KeyEventSinkRef) -> Self {
        self.key_sink = Some(sink);
        self
    }

    pub fn buttons(mut self, buttons: Vec<ButtonDefinition>) -> Self {
        self.buttons = Some(buttons);
        self
    }

    /// Wire the device and start its threads.
    ///
    /// Fails if any capability detection needs is missing. Button problems
    /// only detach the button sub-machine; see [`HeadsetDevice::button_fault`].
    pub fn build(self) -> Result<HeadsetDevice, DetectError> {
        let board = self.board;
        let detect_line = board
            .detect_line
            .clone()
            .ok_or(DetectError::MissingCapability("detect line"))?;
        let switch_line = board
            .switch_line
            .clone()
            .ok_or(DetectError::MissingCapability("switch line"))?;
        let registers = board
            .registers
            .clone()
            .ok_or(DetectError::MissingCapability("register bank"))?;
        let adc = board
            .adc
            .clone()
            .ok_or(DetectError::MissingCapability("adc"))?;
        let bias = board
            .bias
            .clone()
            .ok_or(DetectError::MissingCapability("bias supply"))?;
        let plug_sink = self
            .plug_sink
            .ok_or(DetectError::MissingCapability("plug sink"))?;

        let config = self.config;
        let tunables = Arc::new(Tunables::from_config(&config));
        let shared = Arc::new(IrqShared::new(
            config.detect_active_low,
            config.button_active_low,
            board.button_line.clone(),
        ));
        let afe = AnalogFrontEnd::new(registers);

        // Button IRQ stays masked until a mic headset is detected.
        shared.button_gate.set_enabled(false)?;
        if let Some(line) = &board.button_line {
            line.set_trigger_polarity(shared.button_polarity.armed())?;
        }
        detect_line.set_trigger_polarity(shared.detect_polarity.armed())?;
        detect_line.enable(true)?;

        let (button, button_fault) = match build_buttons(
            self.buttons,
            self.key_sink,
            board.button_line.is_some(),
            &afe,
            &detect_line,
            &shared,
            &config,
        ) {
            Ok(machine) => (Some(machine), None),
            Err(err) => {
                tracing::warn!(error = %err, "button sub-machine not started");
                (None, Some(err))
            }
        };
        let button_attached = button.is_some();

        let hub = Arc::new(NotificationHub::new());
        let counters = Arc::new(Counters::default());

        let mut scheduler = Scheduler::new(config.dispatch, Arc::clone(&tunables));
        let sender = scheduler.sender();

        let timer_sender = sender.clone();
        let timer = DebounceTimer::spawn(Arc::clone(&tunables), move || {
            timer_sender.post(WorkKind::Detect);
        })?;

        let mut engine = Engine {
            classifier: AnalogClassifier::new(afe.clone(), adc, Arc::clone(&tunables)),
            detection: DetectionStateMachine::new(
                DetectionHardware {
                    detect_line: Arc::clone(&detect_line),
                    switch_line,
                    button_line: board.button_line.clone(),
                    afe,
                    bias,
                },
                plug_sink,
                Arc::clone(&hub),
                Arc::clone(&shared),
                Arc::clone(&tunables),
            ),
            button,
            timer: timer.handle(),
            counters: Arc::clone(&counters),
        };
        scheduler.start(move |kind| engine.handle(kind))?;

        tracing::info!(
            dispatch = ?config.dispatch,
            button_attached,
            "headset detection started"
        );

        Ok(HeadsetDevice {
            detect_line,
            button_line: board.button_line,
            shared,
            hub,
            tunables,
            timer_handle: timer.handle(),
            timer,
            scheduler,
            sender,
            counters,
            button_attached,
            button_fault,
            shut_down: AtomicBool::new(false),
        })
    }
}

fn build_buttons(
    buttons: Option<Vec<ButtonDefinition>>,
    key_sink: Option<KeyEventSinkRef>,
    has_button_line: bool,
    afe: &AnalogFrontEnd,
    detect_line: &DigitalLineRef,
    shared: &Arc<IrqShared>,
    config: &DetectConfig,
) -> Result<ButtonStateMachine, DetectError> {
    if !has_button_line {
        return Err(DetectError::MissingCapability("button line"));
    }
    let key_sink = key_sink.ok_or(DetectError::MissingCapability("key sink"))?;
    let buttons = buttons.ok_or(DetectError::NoButtons)?;
    ButtonStateMachine::new(
        buttons,
        key_sink,
        afe.clone(),
        Arc::clone(detect_line),
        Arc::clone(shared),
        config.button_settle(),
    )
}

/// One headset jack: owns the worker, the debounce timer and the shared
/// interrupt state.
///
/// Platform interrupt handlers call [`handle_irq`](Self::handle_irq), which
/// never blocks. Dropping the device shuts it down.
pub struct HeadsetDevice {
    detect_line: DigitalLineRef,
    button_line: Option<DigitalLineRef>,
    shared: Arc<IrqShared>,
    hub: Arc<NotificationHub>,
    tunables: Arc<Tunables>,
    timer_handle: TimerHandle,
    timer: DebounceTimer,
    scheduler: Scheduler,
    sender: WorkSender,
    counters: Arc<Counters>,
    button_attached: bool,
    button_fault: Option<DetectError>,
    shut_down: AtomicBool,
}

impl HeadsetDevice {
    pub fn builder(board: Board) -> DeviceBuilder {
        DeviceBuilder {
            board,
            config: DetectConfig::default(),
            plug_sink: None,
            key_sink: None,
            buttons: None,
        }
    }

    /// Interrupt entry point.
    pub fn handle_irq(&self, event: IrqEvent) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        match event {
            IrqEvent::DetectEdge => self.on_detect_edge(),
            IrqEvent::ButtonEdge => self.on_button_edge(),
            IrqEvent::TimerFired => {
                self.sender.post(WorkKind::Detect);
            }
        }
    }

    fn on_detect_edge(&self) {
        let level = self.shared.detect_polarity.flip();
        if let Err(err) = self.detect_line.set_trigger_polarity(level) {
            tracing::warn!(error = %err, "detect re-arm failed");
        }
        if let Err(err) = self.shared.button_gate.set_enabled(false) {
            tracing::warn!(error = %err, "button interrupt mask failed");
        }
        self.timer_handle.arm();
    }

    fn on_button_edge(&self) {
        if !self.button_attached || !self.shared.button_gate.is_enabled() {
            return;
        }
        if !self.shared.status.accepts_buttons() {
            tracing::trace!("button edge with no mic headset inserted");
            return;
        }
        let level = self.shared.button_polarity.flip();
        if let Some(line) = &self.button_line {
            if let Err(err) = line.set_trigger_polarity(level) {
                tracing::warn!(error = %err, "button re-arm failed");
            }
        }
        if self.sender.post(WorkKind::Button) == PostOutcome::Closed {
            tracing::debug!("button edge after shutdown");
        }
    }

    pub fn subscribe(&self, callback: PlugCallback) -> SubscriptionId {
        self.hub.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn plug_state(&self) -> PlugState {
        self.shared.status.plug_state()
    }

    pub fn headset_type(&self) -> Option<HeadsetType> {
        self.shared.status.headset_type()
    }

    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }

    /// Why the button sub-machine is detached, if it is.
    pub fn button_fault(&self) -> Option<&DetectError> {
        self.button_fault.as_ref()
    }

    pub fn button_irq_enabled(&self) -> bool {
        self.shared.button_gate.is_enabled()
    }

    pub fn stats(&self) -> DeviceStats {
        let c = &self.counters;
        DeviceStats {
            detect_runs: c.detect_runs.load(Ordering::Relaxed),
            button_runs: c.button_runs.load(Ordering::Relaxed),
            plug_ins: c.plug_ins.load(Ordering::Relaxed),
            plug_outs: c.plug_outs.load(Ordering::Relaxed),
            key_downs: c.key_downs.load(Ordering::Relaxed),
            key_ups: c.key_ups.load(Ordering::Relaxed),
            false_triggers: c.false_triggers.load(Ordering::Relaxed),
            hardware_faults: c.hardware_faults.load(Ordering::Relaxed),
            discarded_button_irqs: self.tunables.discarded_button_irqs(),
            timer_fires: self.timer.fired_count(),
        }
    }

    /// Work items the worker has completed.
    pub fn processed(&self) -> u64 {
        self.scheduler.processed()
    }

    /// Disable both lines, cancel the timer, drain the worker. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.detect_line.enable(false) {
            tracing::warn!(error = %err, "detect line disable failed");
        }
        if let Err(err) = self.shared.button_gate.close() {
            tracing::warn!(error = %err, "button line disable failed");
        }
        self.timer.shutdown();
        self.scheduler.drain_and_stop();
        tracing::info!("headset detection stopped");
    }
}

impl Drop for HeadsetDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for HeadsetDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadsetDevice")
            .field("plug_state", &self.plug_state())
            .field("headset_type", &self.headset_type())
            .field("button_attached", &self.button_attached)
            .finish_non_exhaustive()
    }
}
