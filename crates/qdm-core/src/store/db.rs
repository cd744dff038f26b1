//! SQLite-backed record store: connection and schema.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len() + 16);
    out.push_str("sqlite://");
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    out.push_str("?mode=rwc");
    out
}

/// `~/.local/state/qdm/qdm.db`
pub fn default_db_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("qdm")?;
    Ok(xdg_dirs.get_state_home().join("qdm").join("qdm.db"))
}

/// Handle to the queue and transfer tables. Cheap to clone.
#[derive(Clone)]
pub struct RecordStore {
    pub(crate) pool: Pool<Sqlite>,
}

impl RecordStore {
    /// Open (or create) the store under the XDG state directory.
    pub async fn open_default() -> Result<Self> {
        Self::open_at(default_db_path()?).await
    }

    /// Open (or create) the store at `path`, creating parent directories.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&path_to_sqlite_uri(path))
            .await
            .with_context(|| format!("opening record store {}", path.display()))?;
        let store = RecordStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory store (single connection so every query sees the same database).
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = RecordStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queues (
                id INTEGER PRIMARY KEY,
                save_dir TEXT NOT NULL,
                max_concurrent INTEGER NOT NULL,
                max_bandwidth_kbs INTEGER,
                active_start TEXT NOT NULL,
                active_end TEXT NOT NULL,
                max_retries INTEGER NOT NULL,
                strict_admission INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                id INTEGER PRIMARY KEY,
                queue_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                output_file TEXT NOT NULL,
                status TEXT NOT NULL,
                total_size INTEGER NOT NULL DEFAULT 0,
                is_partial INTEGER NOT NULL DEFAULT 0,
                retries INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds.
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
