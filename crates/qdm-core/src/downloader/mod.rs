//! Segment downloader.
//!
//! Each segment runs on its own OS thread with a blocking libcurl handle:
//! wait for a queue slot, then GET `Range: bytes=offset-end` and append the
//! body to a private temp file, retrying from the current offset on failure
//! until the transfer's retry ceiling is exceeded. Pause, removal, an
//! inactive queue or a sibling exhausting the ceiling end the worker as
//! paused.

mod part;
mod segment;

pub use part::{temp_file_name, Segment, SegmentOutcome, SegmentSnapshot};
pub use segment::{run_segment, WorkerContext};
