//! Per-queue bandwidth cap.
//!
//! A clock thread mints one token per `1_000_000 / cap` microseconds into a
//! bounded channel holding at most `cap` tokens; tokens minted while the
//! bucket is full are dropped. Segment workers take one token per read of
//! at most 1 KiB, so aggregate throughput stays at or under `cap` KB/s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Read size while a cap is in force (one token each).
pub const CAPPED_READ_SIZE: usize = 1024;
/// Read size with no cap.
pub const UNCAPPED_READ_SIZE: usize = 1024 * 1024;

/// Shortest sleep between mint batches of the clock thread.
const MIN_TICK: Duration = Duration::from_millis(1);
/// Longest sleep of a waiting `acquire` between two looks at the bucket.
const MAX_POLL: Duration = Duration::from_millis(5);

/// Token source for one queue. Replaced wholesale when the cap changes.
pub struct BandwidthLimiter {
    cap_kbs: u32,
    period: Duration,
    /// Held only for a `try_recv`, never across a wait.
    tokens: Mutex<Receiver<()>>,
    stop: Arc<AtomicBool>,
    clock: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BandwidthLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandwidthLimiter")
            .field("cap_kbs", &self.cap_kbs)
            .finish()
    }
}

/// Interval between two tokens for `cap_kbs`.
pub fn token_period(cap_kbs: u32) -> Duration {
    Duration::from_micros((1_000_000 / u64::from(cap_kbs.max(1))).max(1))
}

impl BandwidthLimiter {
    /// Start the clock thread for a cap of `cap_kbs` KB/s (clamped to at least 1).
    pub fn start(cap_kbs: u32) -> Arc<Self> {
        let cap_kbs = cap_kbs.max(1);
        let (tx, rx) = mpsc::sync_channel::<()>(cap_kbs as usize);
        let stop = Arc::new(AtomicBool::new(false));
        let clock = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("qdm-bw-{}", cap_kbs))
                .spawn(move || run_clock(tx, token_period(cap_kbs), stop))
                .ok()
        };
        if clock.is_none() {
            tracing::warn!(cap_kbs, "failed to spawn bandwidth clock thread");
        }
        Arc::new(Self {
            cap_kbs,
            period: token_period(cap_kbs),
            tokens: Mutex::new(rx),
            stop,
            clock: Mutex::new(clock),
        })
    }

    pub fn cap_kbs(&self) -> u32 {
        self.cap_kbs
    }

    /// Wait up to `wait` for one token. Returns false on timeout or after `stop`.
    pub fn acquire(&self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        let poll = self.period.clamp(MIN_TICK, MAX_POLL);
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return false;
            }
            let taken = self
                .tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_recv();
            match taken {
                Ok(()) => return true,
                Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Stop the clock thread and wait for it to exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let handle = self
            .clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for BandwidthLimiter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Mints every token that came due since the previous batch. Sleeping at
/// least `MIN_TICK` keeps short periods from spinning the thread.
fn run_clock(tx: SyncSender<()>, period: Duration, stop: Arc<AtomicBool>) {
    let tick = period.max(MIN_TICK);
    let mut last = Instant::now();
    let mut carry = Duration::ZERO;

    while !stop.load(Ordering::Relaxed) {
        thread::sleep(tick);
        let now = Instant::now();
        carry += now.duration_since(last);
        last = now;

        while carry >= period {
            carry -= period;
            match tx.try_send(()) {
                Ok(()) => {}
                Err(TrySendError::Full(())) => {
                    // Bucket full: drop the rest of this batch.
                    carry = Duration::ZERO;
                    break;
                }
                Err(TrySendError::Disconnected(())) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_from_cap() {
        assert_eq!(token_period(1), Duration::from_secs(1));
        assert_eq!(token_period(1000), Duration::from_millis(1));
        assert_eq!(token_period(4_000_000), Duration::from_micros(1));
        assert_eq!(token_period(0), Duration::from_secs(1));
    }

    #[test]
    fn bucket_never_exceeds_cap() {
        let limiter = BandwidthLimiter::start(20);
        // Let the bucket fill well past its capacity.
        thread::sleep(Duration::from_millis(1500));
        let mut taken = 0;
        while limiter.acquire(Duration::from_millis(1)) {
            taken += 1;
            if taken > 100 {
                break;
            }
        }
        assert!(taken <= 21, "took {} tokens from a 20-token bucket", taken);
        limiter.stop();
    }

    #[test]
    fn rate_is_bounded() {
        let limiter = BandwidthLimiter::start(50);
        // Drain whatever accumulated at startup.
        while limiter.acquire(Duration::from_millis(1)) {}
        let start = Instant::now();
        let mut taken = 0;
        while start.elapsed() < Duration::from_millis(1000) {
            if limiter.acquire(Duration::from_millis(50)) {
                taken += 1;
            }
        }
        assert!(taken <= 60, "took {} tokens in 1s at 50/s", taken);
        assert!(taken >= 20, "took only {} tokens in 1s at 50/s", taken);
        limiter.stop();
    }

    #[test]
    fn waiters_do_not_queue_behind_each_other() {
        // One token per second: every waiter times out.
        let limiter = BandwidthLimiter::start(1);
        while limiter.acquire(Duration::from_millis(1)) {}
        let wait = Duration::from_millis(50);
        let slowest = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let mut slowest = Duration::ZERO;
                        for _ in 0..4 {
                            let start = Instant::now();
                            limiter.acquire(wait);
                            slowest = slowest.max(start.elapsed());
                        }
                        slowest
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .max()
                .unwrap()
        });
        assert!(
            slowest < Duration::from_millis(150),
            "a 50ms acquire took {:?}",
            slowest
        );
        limiter.stop();
    }

    #[test]
    fn acquire_fails_after_stop() {
        let limiter = BandwidthLimiter::start(1000);
        limiter.stop();
        assert!(limiter.is_stopped());
        assert!(!limiter.acquire(Duration::from_millis(10)));
    }
}
