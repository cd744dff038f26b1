//! `qdm pause <id>` – mark a transfer paused so the next `qdm run` skips it.

use anyhow::{Context, Result};
use qdm_core::store::RecordStore;
use qdm_core::transfer::TransferStatus;

pub async fn run_pause(store: &RecordStore, id: u64) -> Result<()> {
    let t = store
        .get_transfer(id)
        .await?
        .with_context(|| format!("no transfer with id {id}"))?;
    if !t.status.is_live() {
        println!("Transfer {id} is {}; nothing to pause", t.status);
        return Ok(());
    }
    store
        .set_transfer_status(id, TransferStatus::Paused, false)
        .await?;
    println!("Paused transfer {id}");
    Ok(())
}
