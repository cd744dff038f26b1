//! Transfer initialization: probe (when needed) and segment planning.

use super::{EngineContext, EngineSettings};
use crate::downloader::{temp_file_name, Segment};
use crate::probe;
use crate::queue::{Queue, QueueEvent};
use crate::segmenter::{plan_segments, segment_count};
use crate::transfer::{Transfer, TransferStatus};
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// Initialize `t` on its own thread; the queue gets `Initialized` when done.
pub(super) fn spawn_init(ctx: &Arc<EngineContext>, queue: &Arc<Queue>, t: &Arc<Transfer>) {
    let (c, q, transfer) = (Arc::clone(ctx), Arc::clone(queue), Arc::clone(t));
    let spawned = thread::Builder::new()
        .name(format!("qdm-init-{}", t.id()))
        .spawn(move || initialize(&c, &q, &transfer));
    if let Err(e) = spawned {
        tracing::warn!(transfer_id = t.id(), error = %e, "failed to spawn init thread");
        t.mark_setup_failed();
        ctx.save_transfer(t);
        queue.notify(QueueEvent::Initialized(t.id()));
    }
}

/// Probe if size and range support are unknown, then plan segments from the
/// temp files already on disk.
///
/// Transfers restored as paused or failed are only planned (so their
/// progress shows), never probed; their status is left alone.
fn initialize(ctx: &EngineContext, queue: &Queue, t: &Transfer) {
    let id = t.id();
    let fresh = t.status() == TransferStatus::Initializing;

    if fresh && !t.is_probed() {
        match probe::probe(t.url()) {
            Ok(found) => {
                tracing::info!(
                    transfer_id = id,
                    total_size = found.total_size,
                    is_partial = found.is_partial,
                    "probed"
                );
                t.set_probe_result(found.total_size, found.is_partial);
            }
            Err(e) => {
                tracing::warn!(transfer_id = id, error = %e, "probe failed");
                t.mark_setup_failed();
                ctx.save_transfer(t);
                queue.notify(QueueEvent::Initialized(id));
                return;
            }
        }
    }

    if !t.is_removed() {
        let segments = plan_transfer(&ctx.settings, t);
        let resumed: u64 = segments.iter().map(|s| s.downloaded()).sum();
        tracing::debug!(transfer_id = id, segments = segments.len(), resumed, "segments planned");
        t.set_segments(segments);
        if fresh && t.mark_initialized() {
            ctx.save_transfer(t);
        }
    }
    queue.notify(QueueEvent::Initialized(id));
}

/// One segment per planned range when the server honours ranges and the size
/// is known; otherwise a single unsplit segment.
pub(crate) fn plan_transfer(settings: &EngineSettings, t: &Transfer) -> Vec<Segment> {
    let temp_path = |index| {
        settings
            .temp_dir
            .join(temp_file_name(t.output_file(), t.id(), index))
    };
    let total = t.total_size();
    if !t.is_partial() || total == 0 {
        return vec![Segment::new(0, None, temp_path(0), 0)];
    }
    let count = segment_count(total, settings.max_parts, settings.part_size_mb);
    plan_segments(total, count)
        .into_iter()
        .enumerate()
        .map(|(i, range)| {
            let path = temp_path(i);
            let existing = file_len(&path);
            Segment::new(i, Some(range), path, existing)
        })
        .collect()
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
