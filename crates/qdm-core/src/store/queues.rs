//! Queue rows.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use std::path::PathBuf;

use super::db::{unix_timestamp, RecordStore};
use crate::persist::QueueRecord;
use crate::queue::QueueSettings;

fn queue_from_row(row: &SqliteRow) -> QueueRecord {
    let id: i64 = row.get("id");
    let save_dir: String = row.get("save_dir");
    let max_concurrent: i64 = row.get("max_concurrent");
    let max_bandwidth_kbs: Option<i64> = row.get("max_bandwidth_kbs");
    let max_retries: i64 = row.get("max_retries");
    QueueRecord {
        id: id as u64,
        settings: QueueSettings {
            save_dir: PathBuf::from(save_dir),
            max_concurrent: max_concurrent.max(0) as usize,
            max_bandwidth_kbs: max_bandwidth_kbs
                .filter(|&kbs| kbs > 0)
                .map(|kbs| kbs.min(i64::from(u32::MAX)) as u32),
            active_start: row.get("active_start"),
            active_end: row.get("active_end"),
            max_retries: max_retries.max(0) as u32,
            strict_admission: row.get("strict_admission"),
        },
    }
}

pub(super) async fn write_queue<'e, E>(exec: E, record: &QueueRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let s = &record.settings;
    sqlx::query(
        r#"
        INSERT INTO queues (
            id, save_dir, max_concurrent, max_bandwidth_kbs,
            active_start, active_end, max_retries, strict_admission, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(id) DO UPDATE SET
            save_dir = excluded.save_dir,
            max_concurrent = excluded.max_concurrent,
            max_bandwidth_kbs = excluded.max_bandwidth_kbs,
            active_start = excluded.active_start,
            active_end = excluded.active_end,
            max_retries = excluded.max_retries,
            strict_admission = excluded.strict_admission,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(record.id as i64)
    .bind(s.save_dir.to_string_lossy().into_owned())
    .bind(s.max_concurrent as i64)
    .bind(s.bandwidth_cap().map(i64::from))
    .bind(s.active_start.clone())
    .bind(s.active_end.clone())
    .bind(i64::from(s.max_retries))
    .bind(s.strict_admission)
    .bind(unix_timestamp())
    .execute(exec)
    .await?;
    Ok(())
}

impl RecordStore {
    /// Insert or replace a queue row.
    pub async fn upsert_queue(&self, record: &QueueRecord) -> Result<()> {
        write_queue(&self.pool, record).await
    }

    /// Delete a queue row. Its transfers are left to the caller.
    pub async fn delete_queue(&self, id: u64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM queues WHERE id = ?1")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn get_queue(&self, id: u64) -> Result<Option<QueueRecord>> {
        let row = sqlx::query("SELECT * FROM queues WHERE id = ?1")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(queue_from_row))
    }

    /// All queues, by id.
    pub async fn list_queues(&self) -> Result<Vec<QueueRecord>> {
        let rows = sqlx::query("SELECT * FROM queues ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(queue_from_row).collect())
    }

    /// One past the largest queue id in use.
    pub async fn next_queue_id(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COALESCE(MAX(id), 0) AS max_id FROM queues")
            .fetch_one(&self.pool)
            .await?;
        let max_id: i64 = row.get("max_id");
        Ok(max_id as u64 + 1)
    }
}
