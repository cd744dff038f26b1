//! Transfer rows.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::db::{unix_timestamp, RecordStore};
use super::queues::write_queue;
use crate::persist::{QueueRecord, TransferRecord};
use crate::transfer::TransferStatus;

fn transfer_from_row(row: &SqliteRow) -> TransferRecord {
    let id: i64 = row.get("id");
    let queue_id: i64 = row.get("queue_id");
    let status: String = row.get("status");
    let total_size: i64 = row.get("total_size");
    let retries: i64 = row.get("retries");
    TransferRecord {
        id: id as u64,
        queue_id: queue_id as u64,
        url: row.get("url"),
        output_file: row.get("output_file"),
        status: TransferStatus::from_str(&status),
        total_size: total_size.max(0) as u64,
        is_partial: row.get("is_partial"),
        retries: retries.max(0) as u32,
    }
}

async fn write_transfer<'e, E>(exec: E, record: &TransferRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = unix_timestamp();
    sqlx::query(
        r#"
        INSERT INTO transfers (
            id, queue_id, url, output_file, status,
            total_size, is_partial, retries, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
        ON CONFLICT(id) DO UPDATE SET
            queue_id = excluded.queue_id,
            url = excluded.url,
            output_file = excluded.output_file,
            status = excluded.status,
            total_size = excluded.total_size,
            is_partial = excluded.is_partial,
            retries = excluded.retries,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(record.id as i64)
    .bind(record.queue_id as i64)
    .bind(record.url.clone())
    .bind(record.output_file.clone())
    .bind(record.status.as_str())
    .bind(record.total_size as i64)
    .bind(record.is_partial)
    .bind(i64::from(record.retries))
    .bind(now)
    .execute(exec)
    .await?;
    Ok(())
}

impl RecordStore {
    /// Insert or replace a transfer row, keeping its creation time.
    pub async fn upsert_transfer(&self, record: &TransferRecord) -> Result<()> {
        write_transfer(&self.pool, record).await
    }

    pub async fn delete_transfer(&self, id: u64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM transfers WHERE id = ?1")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn get_transfer(&self, id: u64) -> Result<Option<TransferRecord>> {
        let row = sqlx::query("SELECT * FROM transfers WHERE id = ?1")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(transfer_from_row))
    }

    /// All transfers in insertion (id) order, which is also queue order.
    pub async fn list_transfers(&self) -> Result<Vec<TransferRecord>> {
        let rows = sqlx::query("SELECT * FROM transfers ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(transfer_from_row).collect())
    }

    /// Update only the status (and retries when `reset_retries`). Returns false if no such row.
    pub async fn set_transfer_status(
        &self,
        id: u64,
        status: TransferStatus,
        reset_retries: bool,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE transfers
            SET status = ?1,
                retries = CASE WHEN ?2 THEN 0 ELSE retries END,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(reset_retries)
        .bind(unix_timestamp())
        .bind(id as i64)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn next_transfer_id(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COALESCE(MAX(id), 0) AS max_id FROM transfers")
            .fetch_one(&self.pool)
            .await?;
        let max_id: i64 = row.get("max_id");
        Ok(max_id as u64 + 1)
    }

    /// Replace both tables with the given records in one transaction.
    pub async fn replace_all(&self, queues: &[QueueRecord], transfers: &[TransferRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM queues").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM transfers").execute(&mut *tx).await?;
        for q in queues {
            write_queue(&mut *tx, q).await?;
        }
        for t in transfers {
            write_transfer(&mut *tx, t).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
