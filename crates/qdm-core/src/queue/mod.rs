//! Queues: ordered transfers sharing one save directory, one slot pool,
//! one time-of-day window, one bandwidth cap and one retry ceiling.

mod slots;
mod window;

pub use slots::{SegmentSlots, SlotGuard};
pub use window::{ActiveWindow, TimeOfDay};

use crate::bandwidth::BandwidthLimiter;
use crate::retry::RetryPolicy;
use crate::transfer::Transfer;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// User-editable queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub save_dir: PathBuf,
    pub max_concurrent: usize,
    /// KB/s; None (or 0) = unlimited.
    pub max_bandwidth_kbs: Option<u32>,
    /// "HH:MM"
    pub active_start: String,
    /// "HH:MM"
    pub active_end: String,
    pub max_retries: u32,
    /// Admit a transfer only when every one of its segments can get a slot.
    pub strict_admission: bool,
}

impl QueueSettings {
    /// Unlimited, always active, five slots, three retries.
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            max_concurrent: 5,
            max_bandwidth_kbs: None,
            active_start: "00:00".to_string(),
            active_end: "23:59".to_string(),
            max_retries: 3,
            strict_admission: false,
        }
    }

    /// Cap in force, treating 0 as unlimited.
    pub fn bandwidth_cap(&self) -> Option<u32> {
        self.max_bandwidth_kbs.filter(|&kbs| kbs > 0)
    }

    pub fn validate(&self) -> Result<ActiveWindow, QueueConfigError> {
        if self.max_concurrent == 0 {
            return Err(QueueConfigError::ZeroConcurrency);
        }
        ActiveWindow::parse(&self.active_start, &self.active_end).ok_or_else(|| {
            QueueConfigError::InvalidWindow {
                start: self.active_start.clone(),
                end: self.active_end.clone(),
            }
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueConfigError {
    #[error("invalid active window {start:?}-{end:?} (expected HH:MM)")]
    InvalidWindow { start: String, end: String },
    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,
}

/// Messages to a queue's admission loop.
#[derive(Debug)]
pub enum QueueEvent {
    Add(Arc<Transfer>),
    Pause(u64),
    Resume(u64),
    Retry(u64),
    Remove(u64),
    /// Probe thread finished (successfully or not).
    Initialized(u64),
    /// Every worker of a transfer has been admitted or gave up.
    Admitted(u64),
    /// Supervisor aggregated the run; no worker of the transfer is alive.
    Settled(u64),
    SlotReleased,
    /// Settings changed.
    Reconfigured,
    Shutdown,
}

#[derive(Debug)]
pub struct Queue {
    id: u64,
    settings: RwLock<QueueSettings>,
    window: RwLock<ActiveWindow>,
    slots: Arc<SegmentSlots>,
    limiter: RwLock<Option<Arc<BandwidthLimiter>>>,
    active: AtomicBool,
    removed: AtomicBool,
    events: Sender<QueueEvent>,
}

impl Queue {
    pub fn new(
        id: u64,
        settings: QueueSettings,
        events: Sender<QueueEvent>,
    ) -> Result<Self, QueueConfigError> {
        let window = settings.validate()?;
        let hook_tx = events.clone();
        let slots = SegmentSlots::with_release_hook(settings.max_concurrent, move || {
            let _ = hook_tx.send(QueueEvent::SlotReleased);
        });
        let limiter = settings.bandwidth_cap().map(BandwidthLimiter::start);
        Ok(Self {
            id,
            settings: RwLock::new(settings),
            window: RwLock::new(window),
            slots: Arc::new(slots),
            limiter: RwLock::new(limiter),
            active: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            events,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn settings(&self) -> QueueSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn window(&self) -> ActiveWindow {
        *self.window.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn slots(&self) -> &Arc<SegmentSlots> {
        &self.slots
    }

    /// Current token source (None = unlimited).
    pub fn limiter(&self) -> Option<Arc<BandwidthLimiter>> {
        self.limiter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn retry_policy(&self, backoff: Duration) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.settings().max_retries,
            backoff,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Re-evaluate the window against local time; returns the new state.
    pub(crate) fn refresh_active(&self) -> bool {
        let active = !self.is_removed() && self.window().contains_now();
        let was = self.active.swap(active, Ordering::Relaxed);
        if was != active {
            tracing::info!(queue_id = self.id, active, "queue window state changed");
        }
        active
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Relaxed)
    }

    /// Mark removed and inactive and stop the token clock.
    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
        let limiter = self
            .limiter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(limiter) = limiter {
            limiter.stop();
        }
    }

    /// Apply edited settings: swap the limiter if the cap changed and resize the slots.
    pub(crate) fn apply(&self, settings: QueueSettings) -> Result<(), QueueConfigError> {
        let window = settings.validate()?;
        let old_cap = self.settings().bandwidth_cap();
        let new_cap = settings.bandwidth_cap();
        if old_cap != new_cap {
            let fresh = new_cap.map(BandwidthLimiter::start);
            let old = std::mem::replace(
                &mut *self.limiter.write().unwrap_or_else(PoisonError::into_inner),
                fresh,
            );
            if let Some(old) = old {
                old.stop();
            }
            tracing::info!(queue_id = self.id, ?old_cap, ?new_cap, "bandwidth cap changed");
        }
        self.slots.resize(settings.max_concurrent);
        *self.window.write().unwrap_or_else(PoisonError::into_inner) = window;
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
        self.notify(QueueEvent::Reconfigured);
        Ok(())
    }

    /// Send to the admission loop. Dropped silently once the loop has exited.
    pub(crate) fn notify(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }
}
