//! Ordered observer list for raw plug notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::PlugSnapshot;

/// Observer invoked with the raw detect line level once per debounce cycle,
/// before classification completes.
///
/// Callbacks run on the detection worker. They must not block and must not
/// call back into the device.
pub type PlugCallback = Arc<dyn Fn(bool, &PlugSnapshot) + Send + Sync + 'static>;

pub fn new_callback<F>(f: F) -> PlugCallback
where
    F: Fn(bool, &PlugSnapshot) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handle returned by [`NotificationHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Subscribers are invoked synchronously, in registration order.
#[derive(Default)]
pub struct NotificationHub {
    subscribers: Mutex<Vec<(SubscriptionId, PlugCallback)>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<(SubscriptionId, PlugCallback)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, callback: PlugCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.guard().push((id, callback));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.guard();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Fan out to every subscriber.
    pub fn notify(&self, raw_level: bool, snapshot: &PlugSnapshot) {
        // Snapshot the list so callbacks run with the lock released.
        let callbacks: Vec<PlugCallback> = self
            .guard()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        tracing::debug!(
            raw_level,
            subscribers = callbacks.len(),
            "notifying plug observers"
        );
        for callback in callbacks {
            callback(raw_level, snapshot);
        }
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("subscribers", &self.len())
            .finish()
    }
}
