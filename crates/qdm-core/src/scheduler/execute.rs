//! Running an admitted transfer: one supervisor thread fanning out one
//! worker per segment, then aggregation and merge.

use super::{EngineContext, SchedulerError};
use crate::downloader::{run_segment, SegmentOutcome, WorkerContext};
use crate::merge::{merge_segments, MergeError};
use crate::queue::{Queue, QueueEvent};
use crate::transfer::{Transfer, TransferStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Spawn the supervisor for `t`. The transfer counts as running from here
/// until its supervisor has settled it.
pub(super) fn start_transfer(
    ctx: &Arc<EngineContext>,
    queue: &Arc<Queue>,
    t: &Arc<Transfer>,
) -> Result<(), SchedulerError> {
    t.begin_run();
    let (c, q, transfer) = (Arc::clone(ctx), Arc::clone(queue), Arc::clone(t));
    thread::Builder::new()
        .name(format!("qdm-transfer-{}", t.id()))
        .spawn(move || supervise(&c, &q, &transfer))
        .map_err(|e| {
            t.end_run();
            SchedulerError::Spawn(e)
        })?;
    Ok(())
}

fn supervise(ctx: &EngineContext, queue: &Queue, t: &Transfer) {
    let id = t.id();
    let segments = t.segments();

    let outcomes: Vec<SegmentOutcome> = thread::scope(|scope| {
        let workers: Vec<_> = segments
            .iter()
            .map(|seg| {
                let worker = WorkerContext {
                    queue,
                    transfer: t,
                    segment: seg,
                    poll_interval: ctx.settings.poll_interval,
                    retry_backoff: ctx.settings.retry_backoff,
                };
                thread::Builder::new()
                    .name(format!("qdm-seg-{}-{}", id, seg.index()))
                    .spawn_scoped(scope, move || run_segment(&worker))
            })
            .collect();

        workers
            .into_iter()
            .map(|spawned| match spawned {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| SegmentOutcome::Failed("segment worker panicked".into())),
                Err(e) => {
                    t.segment_skipped();
                    SegmentOutcome::Failed(format!("spawning segment worker: {}", e))
                }
            })
            .collect()
    });

    let status = t.settle(&outcomes);
    match status {
        TransferStatus::Finished => {
            let (bytes, elapsed) = t.run_stats();
            tracing::info!(transfer_id = id, bytes, ?elapsed, "transfer finished");
            if !t.is_removed() {
                let _ = merge_transfer(queue, t);
            }
        }
        TransferStatus::Failed => {
            let reason = outcomes.iter().find_map(|o| match o {
                SegmentOutcome::Failed(msg) => Some(msg.as_str()),
                _ => None,
            });
            tracing::warn!(transfer_id = id, retries = t.retries().get(), reason, "transfer failed");
        }
        _ => {
            tracing::info!(transfer_id = id, downloaded = t.downloaded(), "transfer paused");
        }
    }

    ctx.save_transfer(t);
    t.end_run();
    queue.notify(QueueEvent::Settled(id));
}

/// Merge a finished transfer into its queue's save directory. Failure is
/// recorded on the transfer and the temp files stay.
pub(super) fn merge_transfer(queue: &Queue, t: &Transfer) -> Result<PathBuf, MergeError> {
    let save_dir = queue.settings().save_dir;
    match merge_segments(&save_dir, t.output_file(), &t.temp_paths()) {
        Ok(path) => {
            tracing::info!(transfer_id = t.id(), path = %path.display(), "merged");
            t.set_merge_error(None);
            t.set_merged_path(path.clone());
            Ok(path)
        }
        Err(e) => {
            tracing::warn!(transfer_id = t.id(), error = %e, "merge failed, segment files kept");
            t.set_merge_error(Some(e.to_string()));
            Err(e)
        }
    }
}

/// After the grace delay and once no worker of `t` runs, delete its temp files.
pub(super) fn spawn_cleanup(ctx: &EngineContext, t: Arc<Transfer>) {
    let grace = ctx.settings.removal_grace;
    let id = t.id();
    let spawned = thread::Builder::new()
        .name(format!("qdm-cleanup-{}", id))
        .spawn(move || {
            thread::sleep(grace);
            while t.is_running() {
                thread::sleep(Duration::from_millis(50));
            }
            for path in t.temp_paths() {
                match std::fs::remove_file(&path) {
                    Ok(()) => tracing::debug!(transfer_id = id, path = %path.display(), "temp file deleted"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(transfer_id = id, path = %path.display(), error = %e, "failed to delete temp file")
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(transfer_id = id, error = %e, "failed to spawn cleanup thread");
    }
}
