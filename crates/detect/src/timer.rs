//! One-shot debounce timer.
//!
//! Arming an armed timer pushes its deadline out; it never fires twice for
//! one arming. The callback runs on the timer thread and must only post
//! work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::config::Tunables;
use crate::error::DetectError;

enum TimerCmd {
    Arm(Instant),
    Cancel,
    Shutdown,
}

/// Cheap handle for arming the timer from interrupt context.
#[derive(Clone)]
pub struct TimerHandle {
    tx: Sender<TimerCmd>,
    tunables: Arc<Tunables>,
}

impl TimerHandle {
    /// (Re)arm for one timer period from now.
    pub fn arm(&self) {
        let deadline = Instant::now() + self.tunables.timer_period();
        if self.tx.send(TimerCmd::Arm(deadline)).is_err() {
            tracing::debug!("debounce timer stopped, arm ignored");
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(TimerCmd::Cancel);
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle").finish_non_exhaustive()
    }
}

pub struct DebounceTimer {
    handle: TimerHandle,
    fired: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DebounceTimer {
    pub fn spawn<F>(tunables: Arc<Tunables>, on_fire: F) -> Result<Self, DetectError>
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let fired = Arc::new(AtomicU64::new(0));
        let fired_clone = Arc::clone(&fired);

        let thread = thread::Builder::new()
            .name("headset-debounce".into())
            .spawn(move || timer_loop(rx, on_fire, fired_clone))
            .map_err(|source| DetectError::Spawn {
                what: "debounce timer",
                source,
            })?;

        Ok(Self {
            handle: TimerHandle { tx, tunables },
            fired,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    /// Number of expiries so far.
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }

    /// Cancel any pending expiry and join the timer thread. Idempotent.
    pub fn shutdown(&self) {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            let _ = self.handle.tx.send(TimerCmd::Shutdown);
            if thread.join().is_err() {
                tracing::error!("debounce timer thread panicked");
            }
        }
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop<F: Fn()>(rx: Receiver<TimerCmd>, on_fire: F, fired: Arc<AtomicU64>) {
    tracing::debug!("debounce timer started");
    let mut deadline: Option<Instant> = None;

    loop {
        let cmd = match deadline {
            Some(at) => match rx.recv_deadline(at) {
                Ok(cmd) => cmd,
                Err(RecvTimeoutError::Timeout) => {
                    deadline = None;
                    fired.fetch_add(1, Ordering::SeqCst);
                    tracing::trace!("debounce timer expired");
                    on_fire();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };

        match cmd {
            TimerCmd::Arm(at) => deadline = Some(at),
            TimerCmd::Cancel => deadline = None,
            TimerCmd::Shutdown => break,
        }
    }

    tracing::debug!("debounce timer stopped");
}
