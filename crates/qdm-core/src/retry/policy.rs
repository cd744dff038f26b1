use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Ceiling exceeded; the segment fails.
    GiveUp,
    /// Retry from the current offset after the given delay.
    RetryAfter(Duration),
}

/// Fixed-backoff policy with a per-transfer ceiling on failed reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Failures tolerated across all segments of one transfer.
    pub max_retries: u32,
    /// Delay before re-issuing a failed request.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// `failures` is the transfer's retry count after counting this failure.
    pub fn decide(&self, failures: u32) -> RetryDecision {
        if failures > self.max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.backoff)
        }
    }
}

/// Transfer-wide failure count shared by all segment workers.
#[derive(Debug, Default)]
pub struct RetryCounter {
    count: Mutex<u32>,
}

impl RetryCounter {
    pub fn new(initial: u32) -> Self {
        Self {
            count: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> u32 {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one failure and return the new total.
    pub fn increment(&self) -> u32 {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset(&self) {
        self.set(0);
    }

    pub fn set(&self, value: u32) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_until_ceiling_exceeded() {
        let p = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(10),
        };
        assert_eq!(p.decide(1), RetryDecision::RetryAfter(Duration::from_millis(10)));
        assert_eq!(p.decide(2), RetryDecision::RetryAfter(Duration::from_millis(10)));
        assert_eq!(p.decide(3), RetryDecision::GiveUp);
    }

    #[test]
    fn zero_ceiling_fails_first_error() {
        let p = RetryPolicy {
            max_retries: 0,
            backoff: Duration::ZERO,
        };
        assert_eq!(p.decide(1), RetryDecision::GiveUp);
    }

    #[test]
    fn counter_is_shared_across_threads() {
        let counter = std::sync::Arc::new(RetryCounter::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = std::sync::Arc::clone(&counter);
                std::thread::spawn(move || {
                    c.increment();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.get(), 8);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }
}
