//! Per-queue segment slots: a counting semaphore shared by every transfer
//! of one queue, with an RAII guard that releases on drop.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type ReleaseHook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug)]
struct SlotState {
    capacity: usize,
    in_use: usize,
}

/// Caps the number of segments in flight across one queue.
pub struct SegmentSlots {
    state: Mutex<SlotState>,
    freed: Condvar,
    on_release: Option<ReleaseHook>,
}

impl std::fmt::Debug for SegmentSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentSlots")
            .field("state", &*self.lock())
            .finish()
    }
}

impl SegmentSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SlotState {
                capacity: capacity.max(1),
                in_use: 0,
            }),
            freed: Condvar::new(),
            on_release: None,
        }
    }

    /// Like `new`, calling `hook` after every release (used to wake the admission loop).
    pub fn with_release_hook(capacity: usize, hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            on_release: Some(Box::new(hook)),
            ..Self::new(capacity)
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Free slots (may be 0 right after a shrink).
    pub fn available(&self) -> usize {
        let s = self.lock();
        s.capacity.saturating_sub(s.in_use)
    }

    /// Block until a slot is free. Every `poll` the `abort` check runs; if it
    /// returns true the wait ends with None.
    pub fn acquire(
        self: &Arc<Self>,
        poll: Duration,
        mut abort: impl FnMut() -> bool,
    ) -> Option<SlotGuard> {
        let mut state = self.lock();
        loop {
            if state.in_use < state.capacity {
                state.in_use += 1;
                return Some(SlotGuard {
                    slots: Arc::clone(self),
                });
            }
            if abort() {
                return None;
            }
            state = self
                .freed
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Change capacity. Holders above a smaller capacity keep their slots
    /// until they release.
    pub fn resize(&self, capacity: usize) {
        self.lock().capacity = capacity.max(1);
        self.freed.notify_all();
    }

    fn release(&self) {
        {
            let mut s = self.lock();
            s.in_use = s.in_use.saturating_sub(1);
        }
        self.freed.notify_one();
        if let Some(hook) = &self.on_release {
            hook();
        }
    }
}

/// Holds one slot; released on drop.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<SegmentSlots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.release();
    }
}
