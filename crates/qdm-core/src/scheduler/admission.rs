//! Per-queue admission loop.
//!
//! The loop thread owns the queue's transfer list. Everything else talks to
//! it through `QueueEvent`s; a timeout on the receive re-evaluates the
//! active window even when nothing happens.

use super::{execute, init, EngineContext};
use crate::queue::{Queue, QueueEvent};
use crate::transfer::{Transfer, TransferStatus};
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;

pub(super) struct AdmissionLoop {
    ctx: Arc<EngineContext>,
    queue: Arc<Queue>,
    events: Receiver<QueueEvent>,
    transfers: Vec<Arc<Transfer>>,
    /// Resume (false) or retry (true) requests waiting for a run to settle.
    deferred: HashMap<u64, bool>,
}

impl AdmissionLoop {
    pub(super) fn new(ctx: Arc<EngineContext>, queue: Arc<Queue>, events: Receiver<QueueEvent>) -> Self {
        Self {
            ctx,
            queue,
            events,
            transfers: Vec::new(),
            deferred: HashMap::new(),
        }
    }

    pub(super) fn run(mut self) {
        let queue_id = self.queue.id();
        tracing::debug!(queue_id, "admission loop started");
        loop {
            if self.queue.is_removed() {
                break;
            }
            if self.queue.refresh_active() {
                self.admit();
            }

            let event = match self.events.recv_timeout(self.ctx.settings.poll_interval) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if !self.handle(event) {
                break;
            }
            // Drain whatever piled up before the next pass.
            let mut stop = false;
            while let Ok(event) = self.events.try_recv() {
                if !self.handle(event) {
                    stop = true;
                    break;
                }
            }
            if stop {
                break;
            }
        }
        tracing::debug!(queue_id, held = self.transfers.len(), "admission loop exited");
    }

    fn find(&self, id: u64) -> Option<Arc<Transfer>> {
        self.transfers.iter().find(|t| t.id() == id).cloned()
    }

    /// Apply one event. Returns false when the loop must exit.
    fn handle(&mut self, event: QueueEvent) -> bool {
        match event {
            QueueEvent::Add(t) => {
                if !t.is_removed() {
                    init::spawn_init(&self.ctx, &self.queue, &t);
                    self.transfers.push(t);
                }
            }
            QueueEvent::Pause(id) => {
                self.deferred.remove(&id);
                if let Some(t) = self.find(id) {
                    if t.request_pause() {
                        tracing::info!(transfer_id = id, "transfer paused");
                        self.ctx.save_transfer(&t);
                    }
                }
            }
            QueueEvent::Resume(id) => self.restart(id, false),
            QueueEvent::Retry(id) => self.restart(id, true),
            QueueEvent::Remove(id) => {
                self.deferred.remove(&id);
                if let Some(pos) = self.transfers.iter().position(|t| t.id() == id) {
                    let t = self.transfers.remove(pos);
                    execute::spawn_cleanup(&self.ctx, t);
                }
            }
            QueueEvent::Settled(id) => {
                if let Some(reset) = self.deferred.remove(&id) {
                    self.restart(id, reset);
                }
            }
            QueueEvent::Initialized(_)
            | QueueEvent::Admitted(_)
            | QueueEvent::SlotReleased
            | QueueEvent::Reconfigured => {}
            QueueEvent::Shutdown => return false,
        }
        true
    }

    /// Resume or retry. Waits for a running transfer's workers to exit first.
    fn restart(&mut self, id: u64, reset_retries: bool) {
        let Some(t) = self.find(id) else {
            return;
        };
        if t.is_running() {
            tracing::debug!(transfer_id = id, "restart deferred until workers exit");
            let entry = self.deferred.entry(id).or_insert(false);
            *entry |= reset_retries;
            return;
        }
        if t.restart(reset_retries) {
            tracing::info!(transfer_id = id, reset_retries, "transfer restarted");
            self.ctx.save_transfer(&t);
            init::spawn_init(&self.ctx, &self.queue, &t);
        }
    }

    /// Walk the list in order and start what the slot pool allows.
    fn admit(&mut self) {
        let slots = self.queue.slots();
        let strict = self.queue.settings().strict_admission;

        for t in &self.transfers {
            if t.is_removed() {
                continue;
            }
            if t.is_running() {
                if !t.fully_admitted() {
                    break;
                }
                continue;
            }
            match t.status() {
                TransferStatus::Initializing => break,
                TransferStatus::Pending => {}
                _ => continue,
            }

            let needed = if strict {
                // A transfer wider than the pool would never fit.
                t.segment_count().clamp(1, slots.capacity().max(1))
            } else {
                1
            };
            if slots.available() < needed {
                break;
            }

            match execute::start_transfer(&self.ctx, &self.queue, t) {
                Ok(()) => {
                    tracing::info!(
                        transfer_id = t.id(),
                        queue_id = self.queue.id(),
                        segments = t.segment_count(),
                        "transfer admitted"
                    );
                }
                Err(e) => {
                    tracing::warn!(transfer_id = t.id(), error = %e, "failed to start transfer");
                }
            }
            // Its workers still have to claim their slots.
            break;
        }
    }
}
