//! Retry ceiling and backoff.
//!
//! Every failed segment read bumps a counter shared by the whole transfer.
//! Past the queue's ceiling the segment fails; below it the worker waits a
//! fixed backoff and re-issues the request from its current offset.

mod error;
mod policy;

pub use error::SegmentError;
pub use policy::{RetryCounter, RetryDecision, RetryPolicy};
