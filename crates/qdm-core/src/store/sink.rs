//! Bridge from the threaded scheduler to the async record store.
//!
//! `StoreSink` implements `Persistence` by pushing ops onto an unbounded
//! tokio channel; `run_store_loop` drains it into SQLite. Spawn the loop
//! with `tokio::spawn`.

use tokio::sync::{mpsc, oneshot};

use super::RecordStore;
use crate::persist::{Persistence, QueueRecord, TransferRecord};

#[derive(Debug)]
pub enum StoreOp {
    QueueSaved(QueueRecord),
    QueueRemoved(u64),
    TransferSaved(TransferRecord),
    TransferRemoved(u64),
    Flush {
        queues: Vec<QueueRecord>,
        transfers: Vec<TransferRecord>,
    },
    /// Answered once every earlier op has been applied.
    Barrier(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct StoreSink {
    tx: mpsc::UnboundedSender<StoreOp>,
}

impl StoreSink {
    pub fn channel() -> (StoreSink, mpsc::UnboundedReceiver<StoreOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StoreSink { tx }, rx)
    }

    fn send(&self, op: StoreOp) {
        if self.tx.send(op).is_err() {
            tracing::warn!("record store loop has stopped; change not persisted");
        }
    }

    /// Resolves after everything sent so far is in the store.
    pub async fn barrier(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(StoreOp::Barrier(done_tx));
        let _ = done_rx.await;
    }
}

impl Persistence for StoreSink {
    fn queue_saved(&self, record: &QueueRecord) {
        self.send(StoreOp::QueueSaved(record.clone()));
    }

    fn queue_removed(&self, id: u64) {
        self.send(StoreOp::QueueRemoved(id));
    }

    fn transfer_saved(&self, record: &TransferRecord) {
        self.send(StoreOp::TransferSaved(record.clone()));
    }

    fn transfer_removed(&self, id: u64) {
        self.send(StoreOp::TransferRemoved(id));
    }

    fn flush(&self, queues: &[QueueRecord], transfers: &[TransferRecord]) {
        self.send(StoreOp::Flush {
            queues: queues.to_vec(),
            transfers: transfers.to_vec(),
        });
    }
}

/// Apply ops until every sender is gone. Failures are logged and skipped.
pub async fn run_store_loop(mut rx: mpsc::UnboundedReceiver<StoreOp>, store: RecordStore) {
    while let Some(op) = rx.recv().await {
        let result = match op {
            StoreOp::QueueSaved(rec) => store.upsert_queue(&rec).await,
            StoreOp::QueueRemoved(id) => store.delete_queue(id).await.map(|_| ()),
            StoreOp::TransferSaved(rec) => store.upsert_transfer(&rec).await,
            StoreOp::TransferRemoved(id) => store.delete_transfer(id).await.map(|_| ()),
            StoreOp::Flush { queues, transfers } => store.replace_all(&queues, &transfers).await,
            StoreOp::Barrier(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "record store update failed");
        }
    }
    tracing::debug!("record store loop finished");
}
