pub mod config;
pub mod logging;

// Engine
pub mod bandwidth;
pub mod downloader;
pub mod merge;
pub mod probe;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod segmenter;
pub mod transfer;
pub mod url_model;

// Records
pub mod persist;
pub mod store;
