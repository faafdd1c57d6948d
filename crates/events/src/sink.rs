//! Sinks for switch-state and key events.
//!
//! The detection core publishes through these traits so it can run without
//! any particular input or audio stack:
//! - [`InMemorySink`] records everything for tests
//! - [`NullSink`] discards everything
//! - [`BroadcastSink`] fans events out to async consumers

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::{HeadsetEvent, KeyCode, SwitchState};

/// Receives switch-class plug state changes.
pub trait PlugSink: Send + Sync {
    fn publish(&self, state: SwitchState);
}

/// Receives input key transitions.
pub trait KeyEventSink: Send + Sync {
    /// `down == true` for press, `false` for release.
    fn emit(&self, code: KeyCode, down: bool);
}

pub type PlugSinkRef = Arc<dyn PlugSink>;
pub type KeyEventSinkRef = Arc<dyn KeyEventSink>;

/// Sink that captures all events for later inspection.
#[derive(Default)]
pub struct InMemorySink {
    events: Mutex<Vec<HeadsetEvent>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<HeadsetEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All captured events in arrival order.
    pub fn events(&self) -> Vec<HeadsetEvent> {
        self.guard().clone()
    }

    pub fn plug_states(&self) -> Vec<SwitchState> {
        self.guard()
            .iter()
            .filter_map(|e| match e {
                HeadsetEvent::Plug { state } => Some(*state),
                HeadsetEvent::Key { .. } => None,
            })
            .collect()
    }

    pub fn key_events(&self) -> Vec<(KeyCode, bool)> {
        self.guard()
            .iter()
            .filter_map(|e| match e {
                HeadsetEvent::Key { code, down } => Some((*code, *down)),
                HeadsetEvent::Plug { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

impl PlugSink for InMemorySink {
    fn publish(&self, state: SwitchState) {
        self.guard().push(HeadsetEvent::Plug { state });
    }
}

impl KeyEventSink for InMemorySink {
    fn emit(&self, code: KeyCode, down: bool) {
        self.guard().push(HeadsetEvent::Key { code, down });
    }
}

/// No-op sink.
pub struct NullSink;

impl PlugSink for NullSink {
    fn publish(&self, _state: SwitchState) {}
}

impl KeyEventSink for NullSink {
    fn emit(&self, _code: KeyCode, _down: bool) {}
}

/// Forwards events to any number of async subscribers.
///
/// Slow subscribers lag rather than blocking the publisher.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<HeadsetEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HeadsetEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send(&self, event: HeadsetEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!(topic = event.topic(), "no subscribers for headset event");
        }
    }
}

impl PlugSink for BroadcastSink {
    fn publish(&self, state: SwitchState) {
        self.send(HeadsetEvent::Plug { state });
    }
}

impl KeyEventSink for BroadcastSink {
    fn emit(&self, code: KeyCode, down: bool) {
        self.send(HeadsetEvent::Key { code, down });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink() {
        let sink = InMemorySink::new();
        assert!(sink.is_empty());

        sink.publish(SwitchState::HeadsetMic);
        sink.emit(KeyCode::VOLUMEUP, true);
        sink.emit(KeyCode::VOLUMEUP, false);

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.plug_states(), vec![SwitchState::HeadsetMic]);
        assert_eq!(
            sink.key_events(),
            vec![(KeyCode::VOLUMEUP, true), (KeyCode::VOLUMEUP, false)]
        );

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_null_sink() {
        let sink = NullSink;
        sink.publish(SwitchState::Removed);
        sink.emit(KeyCode::MEDIA, true);
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_fail() {
        let sink = BroadcastSink::new(4);
        assert_eq!(sink.receiver_count(), 0);
        sink.publish(SwitchState::Removed);
    }

    #[tokio::test]
    async fn test_broadcast_sink_fan_out() {
        let sink = BroadcastSink::new(8);
        let mut audio = sink.subscribe();
        let mut input = sink.subscribe();

        sink.publish(SwitchState::HeadsetMic);
        sink.emit(KeyCode::MEDIA, true);

        for rx in [&mut audio, &mut input] {
            assert_eq!(
                rx.recv().await.unwrap(),
                HeadsetEvent::Plug {
                    state: SwitchState::HeadsetMic
                }
            );
            assert_eq!(
                rx.recv().await.unwrap(),
                HeadsetEvent::Key {
                    code: KeyCode::MEDIA,
                    down: true
                }
            );
        }
    }

    #[tokio::test]
    async fn test_broadcast_events_bridge_to_topics() {
        let sink = BroadcastSink::new(4);
        let mut rx = sink.subscribe();

        sink.publish(SwitchState::Removed);
        let event = rx.recv().await.unwrap();

        assert_eq!(event.topic(), crate::event_names::PLUG);
        let payload = event.payload().unwrap();
        assert_eq!(payload["type"], "plug");
        assert_eq!(payload["state"], "removed");
    }
}
