//! Persistence boundary: records and the sink the scheduler reports to.
//!
//! The scheduler never reads storage itself. Callers hand it records at
//! startup (`Scheduler::restore`) and receive every change through a
//! `Persistence` implementation.

use crate::queue::QueueSettings;
use crate::transfer::TransferStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: u64,
    #[serde(flatten)]
    pub settings: QueueSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: u64,
    pub queue_id: u64,
    pub url: String,
    pub output_file: String,
    pub status: TransferStatus,
    pub total_size: u64,
    pub is_partial: bool,
    pub retries: u32,
}

/// Receives every record change. Calls come from scheduler threads and must not block for long.
pub trait Persistence: Send + Sync {
    fn queue_saved(&self, record: &QueueRecord);
    fn queue_removed(&self, id: u64);
    fn transfer_saved(&self, record: &TransferRecord);
    fn transfer_removed(&self, id: u64);
    /// Full record set at shutdown.
    fn flush(&self, queues: &[QueueRecord], transfers: &[TransferRecord]);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

impl Persistence for NoPersistence {
    fn queue_saved(&self, _record: &QueueRecord) {}
    fn queue_removed(&self, _id: u64) {}
    fn transfer_saved(&self, _record: &TransferRecord) {}
    fn transfer_removed(&self, _id: u64) {}
    fn flush(&self, _queues: &[QueueRecord], _transfers: &[TransferRecord]) {}
}

/// Keeps the latest record of everything in memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    queues: Mutex<BTreeMap<u64, QueueRecord>>,
    transfers: Mutex<BTreeMap<u64, TransferRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queues(&self) -> Vec<QueueRecord> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn transfer(&self, id: u64) -> Option<TransferRecord> {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

impl Persistence for MemoryPersistence {
    fn queue_saved(&self, record: &QueueRecord) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record.clone());
    }

    fn queue_removed(&self, id: u64) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn transfer_saved(&self, record: &TransferRecord) {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record.clone());
    }

    fn transfer_removed(&self, id: u64) {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn flush(&self, queues: &[QueueRecord], transfers: &[TransferRecord]) {
        let mut q = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        *q = queues.iter().map(|r| (r.id, r.clone())).collect();
        let mut t = self.transfers.lock().unwrap_or_else(PoisonError::into_inner);
        *t = transfers.iter().map(|r| (r.id, r.clone())).collect();
    }
}
