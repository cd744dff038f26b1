//! Transfer status tag.

use serde::{Deserialize, Serialize};

/// Lifecycle of a transfer. Removal is tracked separately, see `Transfer::is_removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Initializing,
    Pending,
    Downloading,
    Finished,
    Paused,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Initializing => "initializing",
            TransferStatus::Pending => "pending",
            TransferStatus::Downloading => "downloading",
            TransferStatus::Finished => "finished",
            TransferStatus::Paused => "paused",
            TransferStatus::Failed => "failed",
        }
    }

    /// Unknown strings read back from a record are treated as failed.
    pub fn from_str(s: &str) -> Self {
        match s {
            "initializing" => TransferStatus::Initializing,
            "pending" => TransferStatus::Pending,
            "downloading" => TransferStatus::Downloading,
            "finished" => TransferStatus::Finished,
            "paused" => TransferStatus::Paused,
            _ => TransferStatus::Failed,
        }
    }

    /// Transfer still has work ahead of it without user action.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            TransferStatus::Initializing | TransferStatus::Pending | TransferStatus::Downloading
        )
    }

    /// Resume/retry only apply to these.
    pub fn is_restartable(self) -> bool {
        matches!(self, TransferStatus::Paused | TransferStatus::Failed)
    }

    /// Status a record gets when loaded at startup: finished, failed and
    /// paused stick; anything that was in flight is probed again.
    pub fn on_restore(self) -> Self {
        match self {
            TransferStatus::Finished | TransferStatus::Failed | TransferStatus::Paused => self,
            _ => TransferStatus::Initializing,
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
