//! `qdm add <url> --queue <id>` – add a transfer to a queue.

use anyhow::{Context, Result};
use qdm_core::persist::TransferRecord;
use qdm_core::store::RecordStore;
use qdm_core::transfer::TransferStatus;
use qdm_core::url_model;

pub async fn run_add(store: &RecordStore, queue_id: u64, url: &str, output: Option<&str>) -> Result<()> {
    store
        .get_queue(queue_id)
        .await?
        .with_context(|| format!("no queue with id {queue_id}"))?;
    let parsed = url_model::parse_download_url(url)?;
    let output_file = url_model::output_name(&parsed, output);

    let id = store.next_transfer_id().await?;
    let record = TransferRecord {
        id,
        queue_id,
        url: parsed.to_string(),
        output_file,
        status: TransferStatus::Initializing,
        total_size: 0,
        is_partial: false,
        retries: 0,
    };
    store.upsert_transfer(&record).await?;
    println!("Added transfer {id} ({}) to queue {queue_id}", record.output_file);
    Ok(())
}
