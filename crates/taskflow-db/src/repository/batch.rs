//! # Sync Batch Log
//!
//! One row per sync request, opened at the start of the sync transaction
//! and closed with the outcome counts just before commit. `completed_at`
//! is the cursor handed back to the client.
//!
//! ## Change Stamps
//! ```text
//! stamp = max(clock, last_stamp(user) + 1ms)     (taken under the write lock)
//!
//! last_stamp = max(tasks.updated_at, sync_batches.completed_at)
//! ```
//! Stamps only grow in commit order, so a pull with `updated_at > cursor`
//! cannot miss a row committed after that cursor was issued.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::{from_millis, to_millis};
use crate::error::{DbError, DbResult};

/// Outcome counts of one sync batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub applied: i64,
    pub conflicts: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBatchRecord {
    pub id: i64,
    pub user_id: String,
    pub received_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub operation_count: i64,
    pub counts: BatchCounts,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct SyncBatchRow {
    id: i64,
    user_id: String,
    received_at: i64,
    last_sync_at: Option<i64>,
    operation_count: i64,
    applied_count: i64,
    conflict_count: i64,
    failed_count: i64,
    completed_at: Option<i64>,
}

impl From<SyncBatchRow> for SyncBatchRecord {
    fn from(row: SyncBatchRow) -> Self {
        SyncBatchRecord {
            id: row.id,
            user_id: row.user_id,
            received_at: from_millis(row.received_at),
            last_sync_at: row.last_sync_at.map(from_millis),
            operation_count: row.operation_count,
            counts: BatchCounts {
                applied: row.applied_count,
                conflicts: row.conflict_count,
                failed: row.failed_count,
            },
            completed_at: row.completed_at.map(from_millis),
        }
    }
}

#[derive(Debug)]
pub struct SyncBatchLog<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SyncBatchLog<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        SyncBatchLog { conn }
    }

    /// Opens a batch record and returns its id.
    pub async fn open(
        &mut self,
        user_id: &str,
        received_at: DateTime<Utc>,
        last_sync_at: Option<DateTime<Utc>>,
        operation_count: usize,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            "INSERT INTO sync_batches (user_id, received_at, last_sync_at, operation_count) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(to_millis(received_at))
        .bind(last_sync_at.map(to_millis))
        .bind(operation_count as i64)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Records the outcome counts of a batch.
    pub async fn close(&mut self, id: i64, counts: BatchCounts, completed_at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE sync_batches SET applied_count = ?2, conflict_count = ?3, \
             failed_count = ?4, completed_at = ?5 WHERE id = ?1",
        )
        .bind(id)
        .bind(counts.applied)
        .bind(counts.conflicts)
        .bind(counts.failed)
        .bind(to_millis(completed_at))
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sync batch", id));
        }
        Ok(())
    }

    /// Highest stamp already issued to a user, on a task row or as a
    /// batch cursor. `None` for a user with no history.
    pub async fn last_stamp(&mut self, user_id: &str) -> DbResult<Option<DateTime<Utc>>> {
        let stamp = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(stamp) FROM ( \
                 SELECT MAX(updated_at) AS stamp FROM tasks WHERE user_id = ?1 \
                 UNION ALL \
                 SELECT MAX(completed_at) AS stamp FROM sync_batches WHERE user_id = ?1 \
             )",
        )
        .bind(user_id)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(stamp.map(from_millis))
    }

    /// Most recent batches of a user, newest first.
    pub async fn recent_for_user(&mut self, user_id: &str, limit: i64) -> DbResult<Vec<SyncBatchRecord>> {
        let rows = sqlx::query_as::<_, SyncBatchRow>(
            "SELECT id, user_id, received_at, last_sync_at, operation_count, applied_count, \
             conflict_count, failed_count, completed_at \
             FROM sync_batches WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.into_iter().map(SyncBatchRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::task::{NewTask, TaskRepository};
    use crate::repository::test_support::{at, db, fields};

    #[tokio::test]
    async fn test_open_then_close() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();
        let mut log = SyncBatchLog::new(&mut conn);

        let id = log.open("u1", at(0), None, 5).await.unwrap();
        let counts = BatchCounts {
            applied: 4,
            conflicts: 1,
            failed: 1,
        };
        log.close(id, counts, at(1)).await.unwrap();

        let recent = log.recent_for_user("u1", 5).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].operation_count, 5);
        assert_eq!(recent[0].counts, counts);
        assert_eq!(recent[0].completed_at, Some(at(1)));

        assert!(log.close(id + 100, counts, at(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_last_stamp_covers_tasks_and_cursors() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();

        assert_eq!(SyncBatchLog::new(&mut conn).last_stamp("u1").await.unwrap(), None);

        TaskRepository::new(&mut conn)
            .insert(
                NewTask {
                    user_id: "u1",
                    local_id: "a",
                    fields: &fields("a"),
                },
                at(10),
            )
            .await
            .unwrap();
        assert_eq!(
            SyncBatchLog::new(&mut conn).last_stamp("u1").await.unwrap(),
            Some(at(10))
        );

        // An empty pull hands out a cursor without touching any task.
        let mut log = SyncBatchLog::new(&mut conn);
        let id = log.open("u1", at(20), None, 0).await.unwrap();
        log.close(id, BatchCounts::default(), at(25)).await.unwrap();
        assert_eq!(log.last_stamp("u1").await.unwrap(), Some(at(25)));

        // Open batches have no cursor yet, and other users do not count.
        log.open("u1", at(40), None, 0).await.unwrap();
        assert_eq!(log.last_stamp("u1").await.unwrap(), Some(at(25)));
        assert_eq!(log.last_stamp("u2").await.unwrap(), None);
    }
}
