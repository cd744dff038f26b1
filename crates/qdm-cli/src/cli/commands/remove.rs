//! `qdm remove <id>` – remove a transfer and delete its segment files.

use anyhow::{bail, Result};
use qdm_core::config::QdmConfig;
use qdm_core::store::RecordStore;
use std::path::Path;

pub async fn run_remove(store: &RecordStore, cfg: &QdmConfig, id: u64) -> Result<()> {
    let Some(t) = store.get_transfer(id).await? else {
        bail!("no transfer with id {id}");
    };
    let temp_dir = cfg.engine_settings()?.temp_dir;
    let deleted = delete_segment_files(&temp_dir, &t.output_file, id);
    store.delete_transfer(id).await?;
    println!("Removed transfer {id} ({deleted} segment file(s) deleted)");
    Ok(())
}

/// Delete `{output}-d{id}-part-*.tmp` under `temp_dir`. Returns how many were deleted.
pub(crate) fn delete_segment_files(temp_dir: &Path, output_file: &str, id: u64) -> usize {
    let prefix = format!("{}-d{}-part-", output_file, id);
    let entries = match std::fs::read_dir(temp_dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut deleted = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(index) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".tmp"))
        else {
            continue;
        };
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "deleted segment file");
                deleted += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), "could not delete segment file: {}", e),
        }
    }
    deleted
}
