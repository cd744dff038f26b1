//! Per-segment state shared between a worker and status readers.

use crate::segmenter::ByteRange;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// How a segment worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Completed,
    /// Stopped early without error (pause, removal, inactive queue, a sibling failed).
    Paused,
    /// Retry ceiling exceeded; holds the last error.
    Failed(String),
}

/// One byte range of a transfer and its temp file.
#[derive(Debug)]
pub struct Segment {
    index: usize,
    /// None = unsplit (no Range header, whole body).
    range: Option<ByteRange>,
    temp_path: PathBuf,
    downloaded: AtomicU64,
    speed_bps: AtomicU64,
    outcome: Mutex<Option<SegmentOutcome>>,
}

/// Read-only view of a segment for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSnapshot {
    pub index: usize,
    pub downloaded: u64,
    /// None for an unsplit segment.
    pub length: Option<u64>,
    pub speed_kbs: f64,
    pub outcome: Option<SegmentOutcome>,
}

impl Segment {
    /// `existing` is the current temp file size; anything beyond the range
    /// length counts as the whole range.
    pub fn new(index: usize, range: Option<ByteRange>, temp_path: PathBuf, existing: u64) -> Self {
        let downloaded = match range {
            Some(r) => existing.min(r.len()),
            None => 0,
        };
        Self {
            index,
            range,
            temp_path,
            downloaded: AtomicU64::new(downloaded),
            speed_bps: AtomicU64::new(0),
            outcome: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub(crate) fn add_downloaded(&self, n: u64) {
        self.downloaded.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn reset_downloaded(&self) {
        self.downloaded.store(0, Ordering::Relaxed);
    }

    /// Absolute offset of the next byte to fetch.
    pub fn next_offset(&self) -> u64 {
        self.range.map(|r| r.start).unwrap_or(0) + self.downloaded()
    }

    /// A ranged segment is complete once its temp file covers the range.
    /// Unsplit segments are only complete through a finished fetch.
    pub fn is_complete(&self) -> bool {
        match self.range {
            Some(r) => self.downloaded() >= r.len(),
            None => matches!(self.outcome(), Some(SegmentOutcome::Completed)),
        }
    }

    pub fn speed_bps(&self) -> u64 {
        self.speed_bps.load(Ordering::Relaxed)
    }

    pub(crate) fn set_speed_bps(&self, bps: u64) {
        self.speed_bps.store(bps, Ordering::Relaxed);
    }

    pub fn outcome(&self) -> Option<SegmentOutcome> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_outcome(&self, outcome: Option<SegmentOutcome>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
    }

    pub fn snapshot(&self) -> SegmentSnapshot {
        SegmentSnapshot {
            index: self.index,
            downloaded: self.downloaded(),
            length: self.range.map(|r| r.len()),
            speed_kbs: self.speed_bps() as f64 / 1024.0,
            outcome: self.outcome(),
        }
    }
}

/// `{output}-d{id}-part-{index}.tmp`
pub fn temp_file_name(output_file: &str, transfer_id: u64, index: usize) -> String {
    format!("{}-d{}-part-{}.tmp", output_file, transfer_id, index)
}
