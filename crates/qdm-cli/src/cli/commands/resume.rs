//! `qdm resume <id>` / `qdm retry <id>` – requeue a paused or failed transfer.

use anyhow::{Context, Result};
use qdm_core::store::RecordStore;
use qdm_core::transfer::TransferStatus;

/// `reset_retries` distinguishes retry from resume.
pub async fn run_resume(store: &RecordStore, id: u64, reset_retries: bool) -> Result<()> {
    let t = store
        .get_transfer(id)
        .await?
        .with_context(|| format!("no transfer with id {id}"))?;
    if !t.status.is_restartable() {
        println!("Transfer {id} is {}; only paused or failed transfers can be resumed", t.status);
        return Ok(());
    }
    store
        .set_transfer_status(id, TransferStatus::Initializing, reset_retries)
        .await?;
    let verb = if reset_retries { "Retrying" } else { "Resumed" };
    println!("{verb} transfer {id}; it starts with the next `qdm run`");
    Ok(())
}
