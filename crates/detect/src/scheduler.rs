//! Hands interrupt-side requests to the single worker thread.
//!
//! [`WorkSender::post`] never blocks, so it is safe from interrupt context
//! and the timer thread. Every state machine runs on the worker, which
//! serializes detection and button work.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::config::{DispatchPolicy, Tunables};
use crate::error::DetectError;

/// Kind of deferred work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    Detect,
    Button,
}

enum Message {
    Work(WorkKind),
    Shutdown,
}

/// What happened to a posted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// A new work item was queued.
    Queued,
    /// An identical request was already pending; this one folds into it.
    Merged,
    /// Dropped because detection is pending (coalescing mode only).
    Discarded,
    /// The scheduler has stopped.
    Closed,
}

#[derive(Debug, Default)]
struct Pending {
    detect: AtomicBool,
    button: AtomicBool,
}

impl Pending {
    fn slot(&self, kind: WorkKind) -> &AtomicBool {
        match kind {
            WorkKind::Detect => &self.detect,
            WorkKind::Button => &self.button,
        }
    }
}

/// Posting side of the scheduler.
#[derive(Clone)]
pub struct WorkSender {
    tx: Sender<Message>,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
    policy: DispatchPolicy,
    tunables: Arc<Tunables>,
}

impl WorkSender {
    pub fn post(&self, kind: WorkKind) -> PostOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return PostOutcome::Closed;
        }

        match self.policy {
            DispatchPolicy::Queued => self.send(kind),
            DispatchPolicy::Coalescing => {
                if kind == WorkKind::Button && self.pending.detect.load(Ordering::SeqCst) {
                    let discarded = self.tunables.record_discarded_button_irq();
                    if discarded % 10 == 1 {
                        tracing::warn!(discarded, "button request dropped, detection pending");
                    }
                    return PostOutcome::Discarded;
                }

                let slot = self.pending.slot(kind);
                if slot.swap(true, Ordering::SeqCst) {
                    tracing::trace!(?kind, "request merged into pending work");
                    return PostOutcome::Merged;
                }
                let outcome = self.send(kind);
                if outcome == PostOutcome::Closed {
                    slot.store(false, Ordering::SeqCst);
                }
                outcome
            }
        }
    }

    fn send(&self, kind: WorkKind) -> PostOutcome {
        match self.tx.send(Message::Work(kind)) {
            Ok(()) => PostOutcome::Queued,
            Err(_) => {
                tracing::debug!(?kind, "worker gone, request dropped");
                PostOutcome::Closed
            }
        }
    }

    /// Whether a coalesced request of `kind` is waiting to run.
    pub fn is_pending(&self, kind: WorkKind) -> bool {
        self.pending.slot(kind).load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }
}

impl std::fmt::Debug for WorkSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkSender")
            .field("policy", &self.policy)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

/// Owner of the worker thread.
pub struct Scheduler {
    sender: WorkSender,
    rx: Option<Receiver<Message>>,
    processed: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(policy: DispatchPolicy, tunables: Arc<Tunables>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            sender: WorkSender {
                tx,
                pending: Arc::new(Pending::default()),
                closed: Arc::new(AtomicBool::new(false)),
                policy,
                tunables,
            },
            rx: Some(rx),
            processed: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    pub fn sender(&self) -> WorkSender {
        self.sender.clone()
    }

    /// Spawn the worker. `handler` runs once per dequeued item.
    ///
    /// Calling `start` twice is a no-op.
    pub fn start<H>(&mut self, mut handler: H) -> Result<(), DetectError>
    where
        H: FnMut(WorkKind) + Send + 'static,
    {
        let Some(rx) = self.rx.take() else {
            tracing::warn!("scheduler already started");
            return Ok(());
        };
        let pending = Arc::clone(&self.sender.pending);
        let processed = Arc::clone(&self.processed);

        let worker = thread::Builder::new()
            .name("headset-worker".into())
            .spawn(move || {
                tracing::debug!("headset worker started");
                while let Ok(Message::Work(kind)) = rx.recv() {
                    // Cleared before running so requests arriving mid-run
                    // schedule a fresh pass.
                    pending.slot(kind).store(false, Ordering::SeqCst);
                    handler(kind);
                    processed.fetch_add(1, Ordering::SeqCst);
                }
                tracing::debug!("headset worker stopped");
            })
            .map_err(|source| DetectError::Spawn {
                what: "headset worker",
                source,
            })?;

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
        Ok(())
    }

    /// Work items the worker has finished.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Refuse new requests, let queued ones finish, join the worker.
    /// Idempotent.
    pub fn drain_and_stop(&self) {
        self.sender.closed.store(true, Ordering::SeqCst);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = self.sender.tx.send(Message::Shutdown);
            if worker.join().is_err() {
                tracing::error!("headset worker panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.drain_and_stop();
    }
}
