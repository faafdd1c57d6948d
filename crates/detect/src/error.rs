//! Error types for the detection core.

use headset_events::KeyCode;
use headset_hal::HalError;
use thiserror::Error;

/// Startup and configuration errors.
///
/// Runtime hardware faults never surface here: the state machines log them
/// and wait for the next edge or timer tick.
#[derive(Debug, Error)]
pub enum DetectError {
    /// A capability the sub-machine needs is not wired.
    #[error("required capability missing: {0}")]
    MissingCapability(&'static str),

    /// Button sub-machine started without any button definitions.
    #[error("no button definitions supplied")]
    NoButtons,

    /// A button definition has an empty or inverted ADC range.
    #[error("button {code} has an empty ADC range [{adc_min}, {adc_max})")]
    EmptyRange {
        code: KeyCode,
        adc_min: i32,
        adc_max: i32,
    },

    /// Two button definitions share a key code.
    #[error("key code {0} is defined more than once")]
    DuplicateKeyCode(KeyCode),

    /// Hardware refused the initial configuration.
    #[error("hardware setup failed: {0}")]
    Hal(#[from] HalError),

    /// Worker or timer thread could not be spawned.
    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
