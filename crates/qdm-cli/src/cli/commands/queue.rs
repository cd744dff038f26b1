//! `qdm queue add|list|remove|edit` – manage queues.

use anyhow::{bail, Context, Result};
use qdm_core::config::QdmConfig;
use qdm_core::persist::QueueRecord;
use qdm_core::queue::QueueSettings;
use qdm_core::store::RecordStore;

use super::remove::delete_segment_files;
use crate::cli::{QueueCommand, QueueOptions};

pub async fn run_queue(store: &RecordStore, cfg: &QdmConfig, cmd: QueueCommand) -> Result<()> {
    match cmd {
        QueueCommand::Add(options) => {
            let cwd = std::env::current_dir()?;
            let settings = apply_options(cfg.default_queue.queue_settings(cwd), options);
            settings.validate()?;
            let id = store.next_queue_id().await?;
            store.upsert_queue(&QueueRecord { id, settings }).await?;
            println!("Added queue {id}");
        }
        QueueCommand::List => list(store).await?,
        QueueCommand::Remove { id } => {
            let temp_dir = cfg.engine_settings()?.temp_dir;
            let mut removed = 0usize;
            for t in store.list_transfers().await? {
                if t.queue_id == id {
                    delete_segment_files(&temp_dir, &t.output_file, t.id);
                    store.delete_transfer(t.id).await?;
                    removed += 1;
                }
            }
            if !store.delete_queue(id).await? {
                bail!("no queue with id {id}");
            }
            println!("Removed queue {id} ({removed} transfer(s))");
        }
        QueueCommand::Edit { id, options } => {
            let current = store
                .get_queue(id)
                .await?
                .with_context(|| format!("no queue with id {id}"))?;
            let settings = apply_options(current.settings, options);
            settings.validate()?;
            store.upsert_queue(&QueueRecord { id, settings }).await?;
            println!("Updated queue {id}");
        }
    }
    Ok(())
}

/// Overlay the options that were given on `base`.
fn apply_options(mut base: QueueSettings, options: QueueOptions) -> QueueSettings {
    if let Some(dir) = options.save_dir {
        base.save_dir = dir;
    }
    if let Some(n) = options.max_concurrent {
        base.max_concurrent = n;
    }
    if let Some(kbs) = options.bandwidth {
        base.max_bandwidth_kbs = (kbs > 0).then_some(kbs);
    }
    if let Some(start) = options.start {
        base.active_start = start;
    }
    if let Some(end) = options.end {
        base.active_end = end;
    }
    if let Some(n) = options.max_retries {
        base.max_retries = n;
    }
    if let Some(strict) = options.strict {
        base.strict_admission = strict;
    }
    base
}

async fn list(store: &RecordStore) -> Result<()> {
    let queues = store.list_queues().await?;
    if queues.is_empty() {
        println!("No queues. Create one with `qdm queue add`.");
        return Ok(());
    }
    println!(
        "{:<4} {:<6} {:<10} {:<13} {:<7} {}",
        "ID", "SLOTS", "KB/S", "WINDOW", "RETRIES", "SAVE DIR"
    );
    for q in queues {
        let s = &q.settings;
        let bw = s
            .bandwidth_cap()
            .map(|kbs| kbs.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut slots = s.max_concurrent.to_string();
        if s.strict_admission {
            slots.push('*');
        }
        println!(
            "{:<4} {:<6} {:<10} {:<13} {:<7} {}",
            q.id,
            slots,
            bw,
            format!("{}-{}", s.active_start, s.active_end),
            s.max_retries,
            s.save_dir.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_overlay_only_given_fields() {
        let base = QueueSettings::new("/home/u/dl");
        let out = apply_options(
            base.clone(),
            QueueOptions {
                max_concurrent: Some(2),
                start: Some("22:00".into()),
                end: Some("06:00".into()),
                ..QueueOptions::default()
            },
        );
        assert_eq!(out.max_concurrent, 2);
        assert_eq!(out.active_start, "22:00");
        assert_eq!(out.save_dir, base.save_dir);
        assert_eq!(out.max_retries, base.max_retries);
        assert!(out.validate().is_ok());
    }

    #[test]
    fn zero_bandwidth_clears_cap() {
        let mut base = QueueSettings::new("/tmp");
        base.max_bandwidth_kbs = Some(100);
        let out = apply_options(
            base,
            QueueOptions {
                bandwidth: Some(0),
                ..QueueOptions::default()
            },
        );
        assert_eq!(out.max_bandwidth_kbs, None);
    }
}
