//! Segment download error type.

/// Error returned by a single segment request (curl failure, bad status,
/// short body, or storage failure). Every variant counts against the
/// transfer's retry ceiling.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Curl reported an error (timeout, connection, etc.).
    #[error("{0}")]
    Curl(curl::Error),
    /// Unexpected HTTP status: not 206 for a ranged request, not 2xx otherwise.
    #[error("HTTP {0}")]
    Http(u32),
    /// The body ended before the requested range was filled.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Temp file open/write failed.
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
}
