//! A URL being downloaded: its segments, counters and lifecycle.
//!
//! Shared as `Arc<Transfer>` between the queue's admission loop, the
//! supervisor of the current run and its segment workers. Status changes
//! go through the methods below so that the state machine stays in one
//! place.

mod progress;
mod state;

pub use progress::TransferSnapshot;
pub use state::TransferStatus;

use crate::downloader::{Segment, SegmentOutcome};
use crate::persist::TransferRecord;
use crate::retry::RetryCounter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Counters for the current run, guarded together.
#[derive(Debug, Default)]
struct RunCounters {
    bytes: u64,
    started_at: Option<Instant>,
}

#[derive(Debug)]
pub struct Transfer {
    id: u64,
    queue_id: u64,
    url: String,
    output_file: String,
    status: Mutex<TransferStatus>,
    removed: AtomicBool,
    pause_requested: AtomicBool,
    /// A supervisor owns this transfer's workers.
    running: AtomicBool,
    /// A worker of the current run gave up; its siblings stop.
    run_failed: AtomicBool,
    /// Workers of the current run past their slot wait (holding a slot or gone).
    admitted: AtomicUsize,
    total_size: AtomicU64,
    is_partial: AtomicBool,
    probed: AtomicBool,
    retries: RetryCounter,
    segments: RwLock<Vec<Arc<Segment>>>,
    counters: Mutex<RunCounters>,
    merge_error: Mutex<Option<String>>,
    merged_path: Mutex<Option<PathBuf>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transfer {
    pub fn new(id: u64, queue_id: u64, url: impl Into<String>, output_file: impl Into<String>) -> Self {
        Self {
            id,
            queue_id,
            url: url.into(),
            output_file: output_file.into(),
            status: Mutex::new(TransferStatus::Initializing),
            removed: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            run_failed: AtomicBool::new(false),
            admitted: AtomicUsize::new(0),
            total_size: AtomicU64::new(0),
            is_partial: AtomicBool::new(false),
            probed: AtomicBool::new(false),
            retries: RetryCounter::new(0),
            segments: RwLock::new(Vec::new()),
            counters: Mutex::new(RunCounters::default()),
            merge_error: Mutex::new(None),
            merged_path: Mutex::new(None),
        }
    }

    /// Rebuild from a stored record, applying the startup status mapping.
    pub fn from_record(record: &TransferRecord) -> Self {
        let t = Self::new(record.id, record.queue_id, &record.url, &record.output_file);
        let status = record.status.on_restore();
        *lock(&t.status) = status;
        if status == TransferStatus::Paused {
            t.pause_requested.store(true, Ordering::Relaxed);
        }
        t.total_size.store(record.total_size, Ordering::Relaxed);
        t.is_partial.store(record.is_partial, Ordering::Relaxed);
        t.probed.store(record.total_size > 0, Ordering::Relaxed);
        t.retries.set(record.retries);
        t
    }

    pub fn to_record(&self) -> TransferRecord {
        TransferRecord {
            id: self.id,
            queue_id: self.queue_id,
            url: self.url.clone(),
            output_file: self.output_file.clone(),
            status: self.status(),
            total_size: self.total_size(),
            is_partial: self.is_partial(),
            retries: self.retries.get(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queue_id(&self) -> u64 {
        self.queue_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn output_file(&self) -> &str {
        &self.output_file
    }

    pub fn status(&self) -> TransferStatus {
        *lock(&self.status)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Relaxed);
        self.pause_requested.store(true, Ordering::Relaxed);
    }

    /// Workers of this transfer must stop (pause or removal).
    pub fn stop_requested(&self) -> bool {
        self.pause_requested.load(Ordering::Relaxed) || self.is_removed()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }

    pub fn is_partial(&self) -> bool {
        self.is_partial.load(Ordering::Relaxed)
    }

    /// Size and range support already known; the probe can be skipped.
    pub fn is_probed(&self) -> bool {
        self.probed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_probe_result(&self, total_size: u64, is_partial: bool) {
        self.total_size.store(total_size, Ordering::Relaxed);
        self.is_partial.store(is_partial, Ordering::Relaxed);
        self.probed.store(total_size > 0, Ordering::Relaxed);
    }

    pub fn retries(&self) -> &RetryCounter {
        &self.retries
    }

    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn segment_count(&self) -> usize {
        self.segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn set_segments(&self, segments: Vec<Segment>) {
        let segments = segments.into_iter().map(Arc::new).collect();
        *self.segments.write().unwrap_or_else(PoisonError::into_inner) = segments;
    }

    pub fn temp_paths(&self) -> Vec<PathBuf> {
        self.segments()
            .iter()
            .map(|s| s.temp_path().to_path_buf())
            .collect()
    }

    pub fn downloaded(&self) -> u64 {
        self.segments().iter().map(|s| s.downloaded()).sum()
    }

    pub fn merge_error(&self) -> Option<String> {
        lock(&self.merge_error).clone()
    }

    pub(crate) fn set_merge_error(&self, err: Option<String>) {
        *lock(&self.merge_error) = err;
    }

    pub fn merged_path(&self) -> Option<PathBuf> {
        lock(&self.merged_path).clone()
    }

    pub(crate) fn set_merged_path(&self, path: PathBuf) {
        *lock(&self.merged_path) = Some(path);
    }

    /// Probe and partition done: `initializing → pending`. A pause or
    /// removal that arrived meanwhile wins.
    pub(crate) fn mark_initialized(&self) -> bool {
        let mut status = lock(&self.status);
        if *status == TransferStatus::Initializing && !self.stop_requested() {
            *status = TransferStatus::Pending;
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_setup_failed(&self) {
        let mut status = lock(&self.status);
        if *status == TransferStatus::Initializing {
            *status = TransferStatus::Failed;
        }
    }

    /// Pause request. No-op for finished and failed transfers.
    pub(crate) fn request_pause(&self) -> bool {
        let mut status = lock(&self.status);
        if !status.is_live() {
            return false;
        }
        self.pause_requested.store(true, Ordering::Relaxed);
        *status = TransferStatus::Paused;
        true
    }

    /// `paused/failed → initializing`. Returns false if the transfer is not restartable.
    pub(crate) fn restart(&self, reset_retries: bool) -> bool {
        let mut status = lock(&self.status);
        if !status.is_restartable() {
            return false;
        }
        self.pause_requested.store(false, Ordering::Relaxed);
        if reset_retries {
            self.retries.reset();
        }
        *lock(&self.merge_error) = None;
        *status = TransferStatus::Initializing;
        true
    }

    /// A supervisor takes ownership of this transfer's workers.
    pub(crate) fn begin_run(&self) {
        self.admitted.store(0, Ordering::Relaxed);
        self.run_failed.store(false, Ordering::Relaxed);
        *lock(&self.counters) = RunCounters::default();
        for seg in self.segments() {
            seg.set_outcome(None);
        }
        self.running.store(true, Ordering::Release);
    }

    /// A worker exceeded the retry ceiling in this run.
    pub(crate) fn mark_run_failed(&self) {
        self.run_failed.store(true, Ordering::Release);
    }

    pub fn run_failed(&self) -> bool {
        self.run_failed.load(Ordering::Acquire)
    }

    /// A worker got its slot. The first one of a run stamps the start time and
    /// moves `pending → downloading`.
    pub(crate) fn segment_admitted(&self) {
        {
            let mut counters = lock(&self.counters);
            if counters.started_at.is_none() {
                counters.started_at = Some(Instant::now());
                let mut status = lock(&self.status);
                if *status == TransferStatus::Pending {
                    *status = TransferStatus::Downloading;
                }
            }
        }
        self.admitted.fetch_add(1, Ordering::AcqRel);
    }

    /// A worker gave up waiting for its slot.
    pub(crate) fn segment_skipped(&self) {
        self.admitted.fetch_add(1, Ordering::AcqRel);
    }

    /// Every worker of the current run is past its slot wait.
    pub fn fully_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire) >= self.segment_count()
    }

    pub(crate) fn record_bytes(&self, n: u64) {
        lock(&self.counters).bytes += n;
    }

    /// Bytes fetched and elapsed time in the current (or last) run.
    pub fn run_stats(&self) -> (u64, Option<Duration>) {
        let c = lock(&self.counters);
        (c.bytes, c.started_at.map(|t| t.elapsed()))
    }

    /// Fold worker outcomes into the final status: any failure fails the
    /// transfer, else any pause pauses it, else it is finished.
    pub(crate) fn settle(&self, outcomes: &[SegmentOutcome]) -> TransferStatus {
        let failed = outcomes
            .iter()
            .any(|o| matches!(o, SegmentOutcome::Failed(_)));
        let paused = outcomes.iter().any(|o| *o == SegmentOutcome::Paused);
        let next = if failed {
            TransferStatus::Failed
        } else if paused {
            TransferStatus::Paused
        } else {
            TransferStatus::Finished
        };
        for seg in self.segments() {
            seg.set_speed_bps(0);
        }
        *lock(&self.status) = next;
        next
    }

    pub(crate) fn end_run(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let segments: Vec<_> = self.segments().iter().map(|s| s.snapshot()).collect();
        let status = self.status();
        let downloaded = if status == TransferStatus::Finished && segments.is_empty() {
            self.total_size()
        } else {
            segments.iter().map(|s| s.downloaded).sum()
        };
        TransferSnapshot {
            id: self.id,
            queue_id: self.queue_id,
            url: self.url.clone(),
            output_file: self.output_file.clone(),
            status,
            removed: self.is_removed(),
            running: self.is_running(),
            total_size: self.total_size(),
            downloaded,
            speed_kbs: segments.iter().map(|s| s.speed_kbs).sum(),
            retries: self.retries.get(),
            merge_error: self.merge_error(),
            merged_path: self.merged_path(),
            segments,
        }
    }
}
