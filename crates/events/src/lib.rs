//! Shared event contracts for headset detection.
//!
//! This crate defines the types that flow from the detection core to the
//! audio and input subsystems, the sink traits those subsystems implement,
//! and the [`NotificationHub`] observer list for raw plug notifications.

mod hub;
mod sink;

pub use hub::{new_callback, NotificationHub, PlugCallback, SubscriptionId};
pub use sink::{
    BroadcastSink, InMemorySink, KeyEventSink, KeyEventSinkRef, NullSink, PlugSink, PlugSinkRef,
};

use serde::{Deserialize, Serialize};

/// Whether an accessory is currently considered inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlugState {
    /// No detection cycle has completed yet.
    #[default]
    Unknown,
    Inserted,
    Removed,
}

/// Accessory classification, computed fresh on every insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadsetType {
    /// Standard headset with mic.
    Normal,
    /// Three-pole headphone.
    NoMic,
    /// Headset with swapped mic/ground (CTIA/OMTP mismatch).
    NorthAmerica,
    /// Reserved. The analog classifier never produces this value.
    Apple,
}

impl HeadsetType {
    pub fn has_mic(self) -> bool {
        !matches!(self, Self::NoMic)
    }
}

/// Switch-class state published on every completed detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchState {
    Removed,
    HeadsetMic,
    HeadsetNoMic,
}

impl SwitchState {
    /// Numeric switch code (`h2w` convention).
    pub fn code(self) -> u32 {
        match self {
            Self::Removed => 0,
            Self::HeadsetMic => 1,
            Self::HeadsetNoMic => 2,
        }
    }
}

/// Input-event key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u16);

impl KeyCode {
    /// "No such key"; emitted when no button range matches a sample.
    pub const RESERVED: KeyCode = KeyCode(0);
    pub const VOLUMEDOWN: KeyCode = KeyCode(114);
    pub const VOLUMEUP: KeyCode = KeyCode(115);
    pub const NEXTSONG: KeyCode = KeyCode(163);
    pub const PLAYPAUSE: KeyCode = KeyCode(164);
    pub const PREVIOUSSONG: KeyCode = KeyCode(165);
    pub const MEDIA: KeyCode = KeyCode(226);
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::RESERVED => write!(f, "KEY_RESERVED"),
            Self::VOLUMEDOWN => write!(f, "KEY_VOLUMEDOWN"),
            Self::VOLUMEUP => write!(f, "KEY_VOLUMEUP"),
            Self::NEXTSONG => write!(f, "KEY_NEXTSONG"),
            Self::PLAYPAUSE => write!(f, "KEY_PLAYPAUSE"),
            Self::PREVIOUSSONG => write!(f, "KEY_PREVIOUSSONG"),
            Self::MEDIA => write!(f, "KEY_MEDIA"),
            KeyCode(code) => write!(f, "KEY_{}", code),
        }
    }
}

/// Context handed to plug observers alongside the raw line level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugSnapshot {
    /// Detect line level read at the start of this cycle.
    pub raw_level: bool,
    /// Plug state before this cycle's classification.
    pub plug_state: PlugState,
    /// Type from the previous insertion, if still inserted.
    pub headset_type: Option<HeadsetType>,
}

/// Everything the core publishes, as one stream.
///
/// Producers: detection and button state machines
/// Consumers: audio routing (plug), input dispatch (key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeadsetEvent {
    Plug { state: SwitchState },
    Key { code: KeyCode, down: bool },
}

impl HeadsetEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Plug { .. } => event_names::PLUG,
            Self::Key { .. } => event_names::KEY,
        }
    }

    /// JSON payload for bridging into a string-topic event bus.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Event names as constants to prevent typos.
pub mod event_names {
    /// Switch-state change.
    pub const PLUG: &str = "headset:plug";
    /// Key down/up.
    pub const KEY: &str = "headset:key";
}
