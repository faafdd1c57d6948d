//! Error types for hardware capabilities.

use thiserror::Error;

/// Errors reported by a hardware capability.
///
/// None of these are fatal: callers treat a failed access as "value unknown
/// this cycle" and wait for the next interrupt or timer tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// The capability is not wired on this board.
    #[error("{what} is not wired on this board")]
    Unavailable { what: &'static str },

    /// A register read or write could not be serviced.
    #[error("register access at {addr:#06x} failed: {reason}")]
    Bus { addr: u32, reason: String },

    /// The ADC did not return a sample.
    #[error("ADC channel {channel} read failed: {reason}")]
    Adc { channel: u32, reason: String },

    /// A GPIO line could not be read or reconfigured.
    #[error("GPIO line {line} failed: {reason}")]
    Gpio { line: String, reason: String },

    /// The mic bias supply rejected a power request.
    #[error("bias supply control failed: {0}")]
    Bias(String),
}
