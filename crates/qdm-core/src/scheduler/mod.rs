//! Queue scheduler.
//!
//! Owns every queue and runs one admission thread per queue. Control
//! operations are turned into `QueueEvent`s for the owning queue's loop;
//! status is read back through snapshots. Every record change is reported
//! to the `Persistence` sink.

mod admission;
mod execute;
mod init;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::merge::MergeError;
use crate::persist::{Persistence, QueueRecord, TransferRecord};
use crate::queue::{Queue, QueueConfigError, QueueEvent, QueueSettings};
use crate::transfer::{Transfer, TransferSnapshot, TransferStatus};
use crate::url_model::{self, UrlError};

use self::admission::AdmissionLoop;

/// Engine-wide knobs (see `QdmConfig::engine_settings`).
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_parts: usize,
    pub part_size_mb: u64,
    /// Scratch directory for segment temp files.
    pub temp_dir: PathBuf,
    /// Safety-net wake-up of admission loops; also the pause before a
    /// request is re-issued after a bandwidth change.
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    /// Delay before a removed transfer's temp files are deleted.
    pub removal_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_parts: 10,
            part_size_mb: 3,
            temp_dir: std::env::temp_dir().join("qdm-tempparts"),
            poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(2),
            removal_grace: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no queue with id {0}")]
    UnknownQueue(u64),
    #[error("no transfer with id {0}")]
    UnknownTransfer(u64),
    #[error(transparent)]
    InvalidQueue(#[from] QueueConfigError),
    #[error(transparent)]
    InvalidUrl(#[from] UrlError),
    #[error("scratch directory {} is not usable: {source}", path.display())]
    ScratchDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),
    #[error("transfer {0} has no pending merge")]
    NothingToMerge(u64),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// State shared with admission loops, supervisors and init threads.
pub(crate) struct EngineContext {
    pub(crate) settings: EngineSettings,
    persistence: Arc<dyn Persistence>,
    /// Set once shutdown has captured the record set; later changes are not reported.
    shutting_down: AtomicBool,
}

impl EngineContext {
    pub(crate) fn save_transfer(&self, t: &Transfer) {
        if !self.shutting_down.load(Ordering::Relaxed) && !t.is_removed() {
            self.persistence.transfer_saved(&t.to_record());
        }
    }
}

struct QueueHandle {
    queue: Arc<Queue>,
    thread: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    ctx: Arc<EngineContext>,
    queues: Mutex<BTreeMap<u64, QueueHandle>>,
    transfers: RwLock<BTreeMap<u64, Arc<Transfer>>>,
    next_queue_id: AtomicU64,
    next_transfer_id: AtomicU64,
    stopped: AtomicBool,
}

impl Scheduler {
    /// Create the scratch directory and check it is writable.
    pub fn new(
        settings: EngineSettings,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self, SchedulerError> {
        check_scratch_dir(&settings.temp_dir)?;
        tracing::info!(temp_dir = %settings.temp_dir.display(), "scheduler ready");
        Ok(Self {
            ctx: Arc::new(EngineContext {
                settings,
                persistence,
                shutting_down: AtomicBool::new(false),
            }),
            queues: Mutex::new(BTreeMap::new()),
            transfers: RwLock::new(BTreeMap::new()),
            next_queue_id: AtomicU64::new(1),
            next_transfer_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.ctx.settings
    }

    fn queues(&self) -> MutexGuard<'_, BTreeMap<u64, QueueHandle>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self, id: u64) -> Result<Arc<Queue>, SchedulerError> {
        self.queues()
            .get(&id)
            .map(|h| Arc::clone(&h.queue))
            .ok_or(SchedulerError::UnknownQueue(id))
    }

    fn transfer(&self, id: u64) -> Result<Arc<Transfer>, SchedulerError> {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::UnknownTransfer(id))
    }

    /// Build the queue and start its admission thread.
    fn spawn_queue(&self, id: u64, settings: QueueSettings) -> Result<Arc<Queue>, SchedulerError> {
        let (tx, rx) = mpsc::channel();
        let queue = Arc::new(Queue::new(id, settings, tx)?);
        queue.refresh_active();
        let admission = AdmissionLoop::new(Arc::clone(&self.ctx), Arc::clone(&queue), rx);
        let thread = thread::Builder::new()
            .name(format!("qdm-queue-{}", id))
            .spawn(move || admission.run())
            .map_err(SchedulerError::Spawn)?;
        self.queues().insert(
            id,
            QueueHandle {
                queue: Arc::clone(&queue),
                thread: Some(thread),
            },
        );
        tracing::info!(queue_id = id, "queue added");
        Ok(queue)
    }

    /// Create a queue and return its id.
    pub fn add_queue(&self, settings: QueueSettings) -> Result<u64, SchedulerError> {
        settings.validate()?;
        let id = self.next_queue_id.fetch_add(1, Ordering::Relaxed);
        self.spawn_queue(id, settings.clone())?;
        self.ctx
            .persistence
            .queue_saved(&QueueRecord { id, settings });
        Ok(id)
    }

    /// Replace a queue's settings. A changed bandwidth cap swaps its token source.
    pub fn update_queue(&self, id: u64, settings: QueueSettings) -> Result<(), SchedulerError> {
        let queue = self.queue(id)?;
        queue.apply(settings.clone())?;
        self.ctx
            .persistence
            .queue_saved(&QueueRecord { id, settings });
        Ok(())
    }

    /// Stop a queue's loop and token source and remove every transfer it holds.
    pub fn remove_queue(&self, id: u64) -> Result<(), SchedulerError> {
        let handle = self
            .queues()
            .remove(&id)
            .ok_or(SchedulerError::UnknownQueue(id))?;
        handle.queue.mark_removed();
        handle.queue.notify(QueueEvent::Shutdown);

        let doomed: Vec<Arc<Transfer>> = {
            let mut transfers = self.transfers.write().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<u64> = transfers
                .values()
                .filter(|t| t.queue_id() == id)
                .map(|t| t.id())
                .collect();
            ids.iter().filter_map(|tid| transfers.remove(tid)).collect()
        };
        for t in &doomed {
            t.mark_removed();
            self.ctx.persistence.transfer_removed(t.id());
            execute::spawn_cleanup(&self.ctx, Arc::clone(t));
        }
        self.ctx.persistence.queue_removed(id);

        if let Some(thread) = handle.thread {
            let _ = thread.join();
        }
        tracing::info!(queue_id = id, transfers = doomed.len(), "queue removed");
        Ok(())
    }

    /// Queue a new transfer. `output_file` defaults to the URL's last path segment.
    pub fn add_transfer(
        &self,
        queue_id: u64,
        url: &str,
        output_file: Option<&str>,
    ) -> Result<u64, SchedulerError> {
        let queue = self.queue(queue_id)?;
        let parsed = url_model::parse_download_url(url)?;
        let output = url_model::output_name(&parsed, output_file);
        let id = self.next_transfer_id.fetch_add(1, Ordering::Relaxed);

        let transfer = Arc::new(Transfer::new(id, queue_id, parsed.as_str(), output));
        self.transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&transfer));
        self.ctx.persistence.transfer_saved(&transfer.to_record());
        tracing::info!(transfer_id = id, queue_id, url = transfer.url(), output = transfer.output_file(), "transfer added");
        queue.notify(QueueEvent::Add(transfer));
        Ok(id)
    }

    fn send_to_owner(&self, id: u64, event: QueueEvent) -> Result<(), SchedulerError> {
        let t = self.transfer(id)?;
        if let Ok(queue) = self.queue(t.queue_id()) {
            queue.notify(event);
        }
        Ok(())
    }

    /// Stop a transfer's workers; its status becomes paused. No-op once finished.
    pub fn pause_transfer(&self, id: u64) -> Result<(), SchedulerError> {
        self.send_to_owner(id, QueueEvent::Pause(id))
    }

    /// Re-queue a paused or failed transfer from its current offsets.
    pub fn resume_transfer(&self, id: u64) -> Result<(), SchedulerError> {
        self.send_to_owner(id, QueueEvent::Resume(id))
    }

    /// Like resume, also clearing the retry counter.
    pub fn retry_transfer(&self, id: u64) -> Result<(), SchedulerError> {
        self.send_to_owner(id, QueueEvent::Retry(id))
    }

    /// Detach a transfer and delete its temp files once its workers are gone.
    pub fn remove_transfer(&self, id: u64) -> Result<(), SchedulerError> {
        let t = self
            .transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(SchedulerError::UnknownTransfer(id))?;
        t.mark_removed();
        self.ctx.persistence.transfer_removed(id);
        tracing::info!(transfer_id = id, "transfer removed");
        match self.queue(t.queue_id()) {
            Ok(queue) => queue.notify(QueueEvent::Remove(id)),
            Err(_) => execute::spawn_cleanup(&self.ctx, t),
        }
        Ok(())
    }

    /// Run the merge again for a finished transfer whose merge failed.
    pub fn retry_merge(&self, id: u64) -> Result<PathBuf, SchedulerError> {
        let t = self.transfer(id)?;
        if t.status() != TransferStatus::Finished || t.merge_error().is_none() || t.is_running() {
            return Err(SchedulerError::NothingToMerge(id));
        }
        let queue = self.queue(t.queue_id())?;
        let path = execute::merge_transfer(&queue, &t)?;
        Ok(path)
    }

    pub fn transfer_snapshot(&self, id: u64) -> Option<TransferSnapshot> {
        self.transfer(id).ok().map(|t| t.snapshot())
    }

    /// Every known transfer, by id.
    pub fn snapshots(&self) -> Vec<TransferSnapshot> {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.snapshot())
            .collect()
    }

    pub fn queue_records(&self) -> Vec<QueueRecord> {
        self.queues()
            .values()
            .map(|h| QueueRecord {
                id: h.queue.id(),
                settings: h.queue.settings(),
            })
            .collect()
    }

    /// Whether the queue is inside its active window right now (as last evaluated by its loop).
    pub fn queue_active(&self, id: u64) -> Option<bool> {
        self.queues().get(&id).map(|h| h.queue.is_active())
    }

    pub fn transfer_records(&self) -> Vec<TransferRecord> {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.to_record())
            .collect()
    }

    /// Load stored records. Finished transfers are kept for display only;
    /// paused and failed keep their status; everything else is probed again.
    pub fn restore(
        &self,
        queues: Vec<QueueRecord>,
        transfers: Vec<TransferRecord>,
    ) -> Result<(), SchedulerError> {
        for rec in queues {
            self.next_queue_id.fetch_max(rec.id + 1, Ordering::Relaxed);
            self.spawn_queue(rec.id, rec.settings)?;
        }

        let mut restored = 0usize;
        for rec in transfers {
            self.next_transfer_id.fetch_max(rec.id + 1, Ordering::Relaxed);
            let queue = match self.queue(rec.queue_id) {
                Ok(q) => q,
                Err(_) => {
                    tracing::warn!(transfer_id = rec.id, queue_id = rec.queue_id, "skipping transfer of unknown queue");
                    continue;
                }
            };
            let t = Arc::new(Transfer::from_record(&rec));
            self.transfers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(t.id(), Arc::clone(&t));
            if t.status() != TransferStatus::Finished {
                queue.notify(QueueEvent::Add(t));
            }
            restored += 1;
        }
        tracing::info!(restored, "records restored");
        Ok(())
    }

    /// True while any transfer is initializing, pending or downloading.
    pub fn has_live_transfers(&self) -> bool {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|t| t.status().is_live() || t.is_running())
    }

    /// Capture the record set, stop every queue, wait (bounded) for running
    /// transfers to wind down, then hand the records to `flush`. Transfers
    /// that were in flight are stored with their live status and get probed
    /// again on the next `restore`.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let queues = self.queue_records();
        let transfers = self.transfer_records();
        self.ctx.shutting_down.store(true, Ordering::Relaxed);

        self.stop_all_queues();

        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline && self.any_running() {
            thread::sleep(Duration::from_millis(20));
        }

        self.ctx.persistence.flush(&queues, &transfers);
        tracing::info!(queues = queues.len(), transfers = transfers.len(), "scheduler shut down");
    }

    fn any_running(&self) -> bool {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|t| t.is_running())
    }

    fn stop_all_queues(&self) {
        let handles: Vec<QueueHandle> = {
            let mut queues = self.queues();
            std::mem::take(&mut *queues).into_values().collect()
        };
        for h in &handles {
            h.queue.mark_removed();
            h.queue.notify(QueueEvent::Shutdown);
        }
        for h in handles {
            if let Some(thread) = h.thread {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.ctx.shutting_down.store(true, Ordering::Relaxed);
            self.stop_all_queues();
        }
    }
}

fn check_scratch_dir(dir: &std::path::Path) -> Result<(), SchedulerError> {
    let err = |source| SchedulerError::ScratchDir {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(err)?;
    let probe = dir.join(".qdm-write-check");
    std::fs::write(&probe, b"").map_err(err)?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{MemoryPersistence, NoPersistence};

    fn settings(dir: &std::path::Path) -> EngineSettings {
        EngineSettings {
            temp_dir: dir.join("scratch"),
            poll_interval: Duration::from_millis(50),
            retry_backoff: Duration::from_millis(10),
            removal_grace: Duration::from_millis(10),
            ..EngineSettings::default()
        }
    }

    #[test]
    fn new_creates_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let s = Scheduler::new(settings(dir.path()), Arc::new(NoPersistence)).unwrap();
        assert!(dir.path().join("scratch").is_dir());
        s.shutdown();
    }

    #[test]
    fn new_fails_on_unusable_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let mut cfg = settings(dir.path());
        cfg.temp_dir = file.join("sub");
        let err = Scheduler::new(cfg, Arc::new(NoPersistence)).err().unwrap();
        assert!(matches!(err, SchedulerError::ScratchDir { .. }));
    }

    #[test]
    fn queue_lifecycle_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryPersistence::new());
        let s = Scheduler::new(settings(dir.path()), store.clone()).unwrap();

        let id = s.add_queue(QueueSettings::new(dir.path())).unwrap();
        assert_eq!(store.queues()[0].id, id);
        assert_eq!(s.queue_active(id), Some(true));

        let mut edited = QueueSettings::new(dir.path());
        edited.max_concurrent = 7;
        s.update_queue(id, edited).unwrap();
        assert_eq!(store.queues()[0].settings.max_concurrent, 7);

        s.remove_queue(id).unwrap();
        assert!(store.queues().is_empty());
        assert!(s.queue_records().is_empty());
        assert!(matches!(s.remove_queue(id), Err(SchedulerError::UnknownQueue(_))));
    }

    #[test]
    fn rejects_invalid_queue_settings() {
        let dir = tempfile::tempdir().unwrap();
        let s = Scheduler::new(settings(dir.path()), Arc::new(NoPersistence)).unwrap();
        let mut bad = QueueSettings::new(dir.path());
        bad.active_start = "7pm".into();
        assert!(matches!(s.add_queue(bad), Err(SchedulerError::InvalidQueue(_))));
        let mut bad = QueueSettings::new(dir.path());
        bad.max_concurrent = 0;
        assert!(matches!(s.add_queue(bad), Err(SchedulerError::InvalidQueue(_))));
    }

    #[test]
    fn unknown_ids_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let s = Scheduler::new(settings(dir.path()), Arc::new(NoPersistence)).unwrap();
        assert!(matches!(
            s.add_transfer(42, "http://example.com/a", None),
            Err(SchedulerError::UnknownQueue(42))
        ));
        assert!(matches!(s.pause_transfer(9), Err(SchedulerError::UnknownTransfer(9))));
        assert!(matches!(s.remove_transfer(9), Err(SchedulerError::UnknownTransfer(9))));
        assert!(s.transfer_snapshot(9).is_none());
    }

    #[test]
    fn add_transfer_rejects_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let s = Scheduler::new(settings(dir.path()), Arc::new(NoPersistence)).unwrap();
        let q = s.add_queue(QueueSettings::new(dir.path())).unwrap();
        assert!(matches!(
            s.add_transfer(q, "ftp://example.com/a", None),
            Err(SchedulerError::InvalidUrl(_))
        ));
    }

    #[test]
    fn restore_continues_numbering_and_keeps_finished_for_display() {
        let dir = tempfile::tempdir().unwrap();
        let s = Scheduler::new(settings(dir.path()), Arc::new(NoPersistence)).unwrap();
        let queues = vec![QueueRecord {
            id: 4,
            settings: QueueSettings::new(dir.path()),
        }];
        let transfers = vec![
            TransferRecord {
                id: 10,
                queue_id: 4,
                url: "http://127.0.0.1:9/done.bin".into(),
                output_file: "done.bin".into(),
                status: TransferStatus::Finished,
                total_size: 100,
                is_partial: true,
                retries: 0,
            },
            TransferRecord {
                id: 11,
                queue_id: 4,
                url: "http://127.0.0.1:9/paused.bin".into(),
                output_file: "paused.bin".into(),
                status: TransferStatus::Paused,
                total_size: 100,
                is_partial: true,
                retries: 1,
            },
            TransferRecord {
                id: 12,
                queue_id: 99,
                url: "http://127.0.0.1:9/orphan.bin".into(),
                output_file: "orphan.bin".into(),
                status: TransferStatus::Pending,
                total_size: 0,
                is_partial: false,
                retries: 0,
            },
        ];
        s.restore(queues, transfers).unwrap();

        assert_eq!(s.snapshots().len(), 2);
        assert_eq!(s.transfer_snapshot(10).unwrap().progress_percent(), 100.0);
        assert_eq!(s.transfer_snapshot(11).unwrap().status, TransferStatus::Paused);
        assert_eq!(s.add_queue(QueueSettings::new(dir.path())).unwrap(), 5);
        let next = s.add_transfer(5, "http://127.0.0.1:9/new.bin", None).unwrap();
        assert_eq!(next, 13);
        s.shutdown();
    }
}
