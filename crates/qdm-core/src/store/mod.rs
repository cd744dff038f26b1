//! SQLite record store for queues and transfers (sqlx).
//!
//! Holds exactly the `persist` records; live progress is recomputed from
//! temp files at startup, so nothing per-segment is stored.

mod db;
mod queues;
mod sink;
mod transfers;


pub use db::{default_db_path, RecordStore};
pub use sink::{run_store_loop, StoreOp, StoreSink};
