//! Range math and segment planning.
//!
//! Splits a transfer into N contiguous byte ranges sized by `part_size_mb`,
//! capped at `max_parts`, with the last range absorbing the remainder.

mod range;

pub use range::{plan_segments, segment_count, ByteRange};
