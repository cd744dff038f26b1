//! Segment worker: slot wait, retry loop and the single-request curl fetch.

use super::part::{Segment, SegmentOutcome};
use crate::bandwidth::{BandwidthLimiter, CAPPED_READ_SIZE, UNCAPPED_READ_SIZE};
use crate::probe::parse_status_line;
use crate::queue::{Queue, QueueEvent};
use crate::retry::{RetryDecision, SegmentError};
use crate::transfer::Transfer;
use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::str;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity of stop checks during slot, token and backoff waits.
const STOP_TICK: Duration = Duration::from_millis(50);
/// Minimum window for the instantaneous speed estimate.
const SPEED_WINDOW: Duration = Duration::from_millis(250);

/// Everything one segment worker needs.
pub struct WorkerContext<'a> {
    pub queue: &'a Queue,
    pub transfer: &'a Transfer,
    pub segment: &'a Segment,
    /// Wait after a bandwidth cap change before re-issuing the request.
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
}

/// How one request ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum FetchEnd {
    /// Body fully received.
    Done,
    /// A stop condition was seen mid-body.
    Stopped,
    /// The queue's bandwidth cap changed mid-body.
    LimiterChanged,
}

impl WorkerContext<'_> {
    /// Why this worker should stop early, if it should.
    fn stop_reason(&self) -> Option<&'static str> {
        if self.queue.is_removed() {
            Some("queue removed")
        } else if !self.queue.is_active() {
            Some("queue inactive")
        } else if self.transfer.is_removed() {
            Some("transfer removed")
        } else if self.transfer.stop_requested() {
            Some("paused")
        } else if self.transfer.run_failed() {
            Some("sibling segment failed")
        } else {
            None
        }
    }

    /// Sleep `total`, waking early on a stop condition.
    fn sleep_unless_stopped(&self, total: Duration) {
        let deadline = Instant::now() + total;
        loop {
            let now = Instant::now();
            if now >= deadline || self.stop_reason().is_some() {
                return;
            }
            std::thread::sleep(STOP_TICK.min(deadline - now));
        }
    }

    fn limiter_changed(&self, current: &Option<Arc<BandwidthLimiter>>) -> bool {
        match (current, self.queue.limiter()) {
            (None, None) => false,
            (Some(a), Some(b)) => !Arc::ptr_eq(a, &b),
            _ => true,
        }
    }
}

/// Run one segment to a terminal outcome. Holds a queue slot while fetching.
pub fn run_segment(ctx: &WorkerContext<'_>) -> SegmentOutcome {
    let seg = ctx.segment;
    let transfer_id = ctx.transfer.id();
    let policy = ctx.queue.retry_policy(ctx.retry_backoff);

    let slot = ctx
        .queue
        .slots()
        .acquire(STOP_TICK, || ctx.stop_reason().is_some());
    let _slot = match slot {
        Some(guard) => {
            ctx.transfer.segment_admitted();
            guard
        }
        None => {
            ctx.transfer.segment_skipped();
            notify_if_admitted(ctx);
            tracing::debug!(transfer_id, segment = seg.index(), "gave up waiting for a slot");
            seg.set_outcome(Some(SegmentOutcome::Paused));
            return SegmentOutcome::Paused;
        }
    };
    notify_if_admitted(ctx);
    tracing::debug!(
        transfer_id,
        segment = seg.index(),
        offset = seg.next_offset(),
        "segment started"
    );

    let outcome = loop {
        if seg.range().is_some() && seg.is_complete() {
            break SegmentOutcome::Completed;
        }
        if let Some(reason) = ctx.stop_reason() {
            tracing::debug!(transfer_id, segment = seg.index(), reason, "segment stopping");
            break SegmentOutcome::Paused;
        }

        let limiter = ctx.queue.limiter();
        match fetch_once(ctx, limiter) {
            Ok(FetchEnd::Done) => {
                if seg.range().is_none() {
                    break SegmentOutcome::Completed;
                }
            }
            Ok(FetchEnd::Stopped) => {}
            Ok(FetchEnd::LimiterChanged) => {
                tracing::debug!(transfer_id, segment = seg.index(), "bandwidth cap changed, re-issuing request");
                ctx.sleep_unless_stopped(ctx.poll_interval);
            }
            Err(e) => {
                let failures = ctx.transfer.retries().increment();
                match policy.decide(failures) {
                    RetryDecision::GiveUp => {
                        ctx.transfer.mark_run_failed();
                        tracing::warn!(transfer_id, segment = seg.index(), failures, error = %e, "segment failed, retry ceiling exceeded");
                        break SegmentOutcome::Failed(e.to_string());
                    }
                    RetryDecision::RetryAfter(delay) => {
                        tracing::warn!(transfer_id, segment = seg.index(), failures, error = %e, ?delay, "segment read failed, retrying");
                        ctx.sleep_unless_stopped(delay);
                    }
                }
            }
        }
    };

    seg.set_speed_bps(0);
    seg.set_outcome(Some(outcome.clone()));
    tracing::debug!(transfer_id, segment = seg.index(), ?outcome, downloaded = seg.downloaded(), "segment exited");
    outcome
}

fn notify_if_admitted(ctx: &WorkerContext<'_>) {
    if ctx.transfer.fully_admitted() {
        ctx.queue.notify(QueueEvent::Admitted(ctx.transfer.id()));
    }
}

/// Ranged requests must get 206; unranged ones any 2xx.
fn status_ok(code: u32, ranged: bool) -> bool {
    if ranged {
        code == 206
    } else {
        (200..300).contains(&code)
    }
}

fn open_temp(seg: &Segment) -> std::io::Result<File> {
    if let Some(parent) = seg.temp_path().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut opts = OpenOptions::new();
    opts.create(true);
    if seg.range().is_some() {
        opts.append(true);
    } else {
        // A body without Range cannot be resumed; start the file over.
        opts.write(true).truncate(true);
        seg.reset_downloaded();
    }
    opts.open(seg.temp_path())
}

/// Bytes/sec over windows of at least `SPEED_WINDOW`.
struct SpeedMeter {
    window_start: Instant,
    window_bytes: u64,
}

impl SpeedMeter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    fn record(&mut self, n: u64) -> Option<u64> {
        self.window_bytes += n;
        let elapsed = self.window_start.elapsed();
        if elapsed < SPEED_WINDOW {
            return None;
        }
        let bps = (self.window_bytes as f64 / elapsed.as_secs_f64()) as u64;
        self.window_start = Instant::now();
        self.window_bytes = 0;
        Some(bps)
    }
}

/// One GET from the segment's current offset to the end of its range,
/// appending to the temp file and taking one token per read when capped.
fn fetch_once(
    ctx: &WorkerContext<'_>,
    limiter: Option<Arc<BandwidthLimiter>>,
) -> Result<FetchEnd, SegmentError> {
    let seg = ctx.segment;
    let range = seg.range();
    let ranged = range.is_some();

    let mut file = open_temp(seg)?;

    let expected = match range {
        Some(r) => match r.remaining_from(seg.next_offset()) {
            Some(value) => Some((value, r.end - seg.next_offset())),
            None => return Ok(FetchEnd::Done),
        },
        None => None,
    };

    let status: Cell<Option<u32>> = Cell::new(None);
    let stopped = Cell::new(false);
    let rebuffer = Cell::new(false);
    let io_error: RefCell<Option<std::io::Error>> = RefCell::new(None);
    let received = Cell::new(0u64);
    let mut meter = SpeedMeter::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(ctx.transfer.url()).map_err(SegmentError::Curl)?;
    easy.follow_location(true).map_err(SegmentError::Curl)?;
    easy.connect_timeout(Duration::from_secs(30))
        .map_err(SegmentError::Curl)?;
    let read_size = if limiter.is_some() {
        CAPPED_READ_SIZE
    } else {
        // Abort if throughput drops below 1 KiB/s for 60s; a capped queue
        // can legitimately run slower than that.
        easy.low_speed_limit(1024).map_err(SegmentError::Curl)?;
        easy.low_speed_time(Duration::from_secs(60))
            .map_err(SegmentError::Curl)?;
        UNCAPPED_READ_SIZE
    };
    easy.buffer_size(read_size).map_err(SegmentError::Curl)?;
    if let Some((value, _)) = &expected {
        easy.range(value).map_err(SegmentError::Curl)?;
    }

    let perform_result = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Some(code) = str::from_utf8(data).ok().and_then(parse_status_line) {
                    status.set(Some(code));
                }
                true
            })
            .map_err(SegmentError::Curl)?;
        transfer
            .write_function(|data| {
                if !status_ok(status.get().unwrap_or(0), ranged) {
                    return Ok(0);
                }
                if ctx.stop_reason().is_some() {
                    stopped.set(true);
                    return Ok(0);
                }
                if ctx.limiter_changed(&limiter) {
                    rebuffer.set(true);
                    return Ok(0);
                }
                if let Some(l) = &limiter {
                    while !l.acquire(STOP_TICK) {
                        if ctx.stop_reason().is_some() {
                            stopped.set(true);
                            return Ok(0);
                        }
                        if ctx.limiter_changed(&limiter) {
                            rebuffer.set(true);
                            return Ok(0);
                        }
                    }
                }
                if let Err(e) = file.write_all(data) {
                    *io_error.borrow_mut() = Some(e);
                    return Ok(0);
                }
                let n = data.len() as u64;
                seg.add_downloaded(n);
                ctx.transfer.record_bytes(n);
                received.set(received.get() + n);
                if let Some(bps) = meter.record(n) {
                    seg.set_speed_bps(bps);
                }
                Ok(data.len())
            })
            .map_err(SegmentError::Curl)?;
        transfer.perform()
    };

    if stopped.get() {
        return Ok(FetchEnd::Stopped);
    }
    if rebuffer.get() {
        return Ok(FetchEnd::LimiterChanged);
    }
    if let Err(e) = perform_result {
        if e.is_write_error() {
            if let Some(io_err) = io_error.borrow_mut().take() {
                return Err(SegmentError::Storage(io_err));
            }
            if let Some(code) = status.get().filter(|&c| !status_ok(c, ranged)) {
                return Err(SegmentError::Http(code));
            }
        }
        return Err(SegmentError::Curl(e));
    }

    let code = easy.response_code().map_err(SegmentError::Curl)?;
    if !status_ok(code, ranged) {
        return Err(SegmentError::Http(code));
    }

    let expected_len = match &expected {
        Some((_, len)) => *len,
        None => ctx.transfer.total_size(),
    };
    if received.get() < expected_len {
        return Err(SegmentError::PartialTransfer {
            expected: expected_len,
            received: received.get(),
        });
    }

    Ok(FetchEnd::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_rules() {
        assert!(status_ok(206, true));
        assert!(!status_ok(200, true));
        assert!(status_ok(200, false));
        assert!(status_ok(204, false));
        assert!(!status_ok(404, false));
        assert!(!status_ok(0, false));
    }

    #[test]
    fn speed_meter_waits_for_window() {
        let mut m = SpeedMeter::new();
        assert_eq!(m.record(100), None);
        std::thread::sleep(SPEED_WINDOW + Duration::from_millis(10));
        let bps = m.record(100).unwrap();
        assert!(bps > 0 && bps <= 800, "bps = {}", bps);
    }

    #[test]
    fn unsplit_temp_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x-d1-part-0.tmp");
        std::fs::write(&path, b"stale bytes").unwrap();
        let seg = Segment::new(0, None, path.clone(), 11);
        drop(open_temp(&seg).unwrap());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn ranged_temp_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x-d1-part-0.tmp");
        std::fs::write(&path, b"abc").unwrap();
        let r = crate::segmenter::ByteRange { start: 0, end: 10 };
        let seg = Segment::new(0, Some(r), path.clone(), 3);
        let mut f = open_temp(&seg).unwrap();
        f.write_all(b"def").unwrap();
        drop(f);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }
}
