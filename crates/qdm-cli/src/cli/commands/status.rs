//! `qdm status` – show all transfers.

use anyhow::Result;
use qdm_core::store::RecordStore;

pub async fn run_status(store: &RecordStore) -> Result<()> {
    let transfers = store.list_transfers().await?;
    if transfers.is_empty() {
        println!("No transfers.");
    } else {
        println!(
            "{:<6} {:<6} {:<13} {:<12} {:<7} {}",
            "ID", "QUEUE", "STATUS", "SIZE", "RETRIES", "OUTPUT"
        );
        for t in transfers {
            let size_str = if t.total_size > 0 {
                t.total_size.to_string()
            } else {
                "-".to_string()
            };
            println!(
                "{:<6} {:<6} {:<13} {:<12} {:<7} {}",
                t.id,
                t.queue_id,
                t.status.as_str(),
                size_str,
                t.retries,
                t.output_file
            );
        }
    }
    Ok(())
}
