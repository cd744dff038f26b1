//! Status snapshots for front-ends.

use super::TransferStatus;
use crate::downloader::SegmentSnapshot;
use std::path::PathBuf;

/// Point-in-time view of one transfer.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub id: u64,
    pub queue_id: u64,
    pub url: String,
    pub output_file: String,
    pub status: TransferStatus,
    pub removed: bool,
    /// Workers (or the merge) of a run are still active.
    pub running: bool,
    /// 0 until probed (or when the server sent no length).
    pub total_size: u64,
    pub downloaded: u64,
    /// Sum of segment speeds.
    pub speed_kbs: f64,
    pub retries: u32,
    pub merge_error: Option<String>,
    pub merged_path: Option<PathBuf>,
    pub segments: Vec<SegmentSnapshot>,
}

impl TransferSnapshot {
    /// Percentage in [0, 100]. A finished transfer is 100 even when its size is unknown.
    pub fn progress_percent(&self) -> f64 {
        if self.status == TransferStatus::Finished {
            return 100.0;
        }
        if self.total_size == 0 {
            return 0.0;
        }
        (self.downloaded as f64 * 100.0 / self.total_size as f64).min(100.0)
    }

    /// Seconds remaining at the current speed (None when stalled).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total_size.saturating_sub(self.downloaded);
        if remaining == 0 {
            return Some(0.0);
        }
        if self.speed_kbs <= 0.0 {
            return None;
        }
        Some(remaining as f64 / (self.speed_kbs * 1024.0))
    }
}
