//! Headset jack detection core.
//!
//! Turns bouncy detect/button interrupts and noisy ADC samples into
//! debounced plug, type and key events.
//!
//! ```text
//!  DetectEdge ──► flip polarity, mask button IRQ, arm DebounceTimer
//!                                                    │ (quiet period)
//!                                                    ▼
//!  ButtonEdge ──► flip polarity ──────────────► Scheduler ──► worker thread
//!                                                              │
//!                                  DetectionStateMachine ◄─────┤
//!                                  ButtonStateMachine    ◄─────┘
//!                                        │
//!                       NotificationHub / PlugSink / KeyEventSink
//! ```
//!
//! Interrupt context ([`HeadsetDevice::handle_irq`]) never blocks. All
//! hardware reads, bias control and settle sleeps run on the single worker,
//! so detection and button work never overlap.

mod button;
mod classifier;
mod config;
mod detection;
mod device;
mod error;
mod irq;
mod scheduler;
mod timer;

pub use button::{validate_buttons, ButtonDefinition, ButtonOutcome, ButtonStateMachine};
pub use classifier::{
    classify_samples, plausible_button_samples, AnalogClassifier, ADC_FIFO_COUNT,
    BUTTON_NEAR_ZERO, DISPARITY_THRESHOLD, GND_THRESHOLD,
};
pub use config::{
    DetectConfig, DispatchPolicy, Tunables, DEFAULT_BUTTON_SETTLE_MS, DEFAULT_READ_ADC_DELAY_MS,
    DEFAULT_SWITCH_GPIO_DELAY_MS, DEFAULT_TIMER_PERIOD_MS,
};
pub use detection::{DetectOutcome, DetectionHardware, DetectionStateMachine};
pub use device::{DeviceBuilder, DeviceStats, HeadsetDevice};
pub use error::DetectError;
pub use irq::{ButtonIrqGate, IrqEvent, IrqShared, PlugStatus, Polarity};
pub use scheduler::{PostOutcome, Scheduler, WorkKind, WorkSender};
pub use timer::{DebounceTimer, TimerHandle};

pub use headset_events::{
    new_callback, HeadsetType, KeyCode, PlugCallback, PlugSnapshot, PlugState, SubscriptionId,
    SwitchState,
};
