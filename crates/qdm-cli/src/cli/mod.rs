//! CLI for the QDM queued download manager.
//!
//! Every command except `run` edits the record store directly; `run` loads
//! the records into the scheduler and drives them until nothing is left to do.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use qdm_core::config;
use qdm_core::store::RecordStore;

use commands::{
    run_add, run_pause, run_queue, run_remove, run_resume, run_scheduler, run_status,
};

/// Top-level CLI for the QDM download manager.
#[derive(Debug, Parser)]
#[command(name = "qdm")]
#[command(about = "QDM: queued, segmented, resumable HTTP downloads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Manage download queues.
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Add a URL to a queue.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Queue to add the transfer to.
        #[arg(long, short)]
        queue: u64,
        /// File name in the queue's save directory (default: last URL path segment).
        #[arg(long, short)]
        output: Option<String>,
    },

    /// Run all queues until every transfer is finished, paused or failed (or Ctrl-C).
    Run,

    /// Show all transfers.
    Status,

    /// Pause a transfer by ID.
    Pause {
        /// Transfer identifier.
        id: u64,
    },

    /// Resume a paused or failed transfer by ID.
    Resume {
        /// Transfer identifier.
        id: u64,
    },

    /// Like resume, and clear the transfer's retry count.
    Retry {
        /// Transfer identifier.
        id: u64,
    },

    /// Remove a transfer and its segment files.
    Remove {
        /// Transfer identifier.
        id: u64,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Create a queue. Omitted options come from `[default_queue]` in config.toml.
    Add(QueueOptions),
    /// List queues.
    List,
    /// Remove a queue together with its transfers.
    Remove {
        /// Queue identifier.
        id: u64,
    },
    /// Change settings of an existing queue.
    Edit {
        /// Queue identifier.
        id: u64,
        #[command(flatten)]
        options: QueueOptions,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct QueueOptions {
    /// Directory finished files are written to.
    #[arg(long, value_name = "DIR")]
    pub save_dir: Option<std::path::PathBuf>,
    /// Maximum segments downloading at once across the queue.
    #[arg(long, value_name = "N")]
    pub max_concurrent: Option<usize>,
    /// Bandwidth cap in KB/s (0 = unlimited).
    #[arg(long, value_name = "KBS")]
    pub bandwidth: Option<u32>,
    /// Start of the daily active window.
    #[arg(long, value_name = "HH:MM")]
    pub start: Option<String>,
    /// End of the daily active window (may be earlier than start to span midnight).
    #[arg(long, value_name = "HH:MM")]
    pub end: Option<String>,
    /// Read failures tolerated per transfer.
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,
    /// Admit a transfer only when all of its segments can start at once.
    #[arg(long, value_name = "BOOL")]
    pub strict: Option<bool>,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = RecordStore::open_default().await?;

        match cli.command {
            CliCommand::Queue(cmd) => run_queue(&store, &cfg, cmd).await?,
            CliCommand::Add { url, queue, output } => {
                run_add(&store, queue, &url, output.as_deref()).await?
            }
            CliCommand::Run => run_scheduler(store, &cfg).await?,
            CliCommand::Status => run_status(&store).await?,
            CliCommand::Pause { id } => run_pause(&store, id).await?,
            CliCommand::Resume { id } => run_resume(&store, id, false).await?,
            CliCommand::Retry { id } => run_resume(&store, id, true).await?,
            CliCommand::Remove { id } => run_remove(&store, &cfg, id).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
