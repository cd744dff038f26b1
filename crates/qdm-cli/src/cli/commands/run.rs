//! `qdm run` – load every queue and transfer into the scheduler and drive
//! them until nothing is initializing, pending or downloading.

use anyhow::{Context, Result};
use qdm_core::config::QdmConfig;
use qdm_core::scheduler::Scheduler;
use qdm_core::store::{run_store_loop, RecordStore, StoreSink};
use qdm_core::transfer::TransferSnapshot;
use std::sync::Arc;
use std::time::Duration;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run_scheduler(store: RecordStore, cfg: &QdmConfig) -> Result<()> {
    let queues = store.list_queues().await?;
    let transfers = store.list_transfers().await?;
    if queues.is_empty() {
        println!("No queues. Create one with `qdm queue add`.");
        return Ok(());
    }

    let (sink, rx) = StoreSink::channel();
    let store_loop = tokio::spawn(run_store_loop(rx, store));

    let settings = cfg.engine_settings()?;
    let scheduler = Arc::new(
        Scheduler::new(settings, Arc::new(sink.clone())).context("starting scheduler")?,
    );
    scheduler.restore(queues, transfers)?;

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                print_progress(&scheduler.snapshots());
                if !scheduler.has_live_transfers() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                println!();
                println!("Interrupted; saving state");
                break;
            }
        }
    }

    // Shutdown joins threads and waits for running transfers; keep it off the runtime workers.
    let stopping = Arc::clone(&scheduler);
    tokio::task::spawn_blocking(move || stopping.shutdown())
        .await
        .context("scheduler shutdown panicked")?;
    print_summary(&scheduler.snapshots());

    sink.barrier().await;
    drop(scheduler);
    drop(sink);
    let _ = store_loop.await;
    Ok(())
}

fn print_progress(snapshots: &[TransferSnapshot]) {
    for s in snapshots.iter().filter(|s| s.status.is_live() || s.running) {
        let eta = s
            .eta_secs()
            .map(|secs| format!("{:.0}s", secs))
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  [{}] {:<24} {:<12} {:5.1}%  {:8.1} KB/s  ETA {:<6} retries {}",
            s.id,
            s.output_file,
            s.status.as_str(),
            s.progress_percent(),
            s.speed_kbs,
            eta,
            s.retries
        );
    }
}

fn print_summary(snapshots: &[TransferSnapshot]) {
    for s in snapshots {
        match (&s.merged_path, &s.merge_error) {
            (_, Some(err)) => println!("  [{}] {} finished, merge failed: {}", s.id, s.output_file, err),
            (Some(path), None) => println!("  [{}] saved to {}", s.id, path.display()),
            (None, None) => println!("  [{}] {} {}", s.id, s.output_file, s.status.as_str()),
        }
    }
}
