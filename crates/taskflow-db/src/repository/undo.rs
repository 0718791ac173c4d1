//! # Undo Ledger
//!
//! Snapshots taken right before a batch soft-delete.
//!
//! ## Snapshot Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record()  ──► restorable = 1                                           │
//! │     │                                                                   │
//! │     ├── restore within window ──► consume() ──► restorable = 0,         │
//! │     │                                           consumed_at set         │
//! │     ├── restore after window  ──► expire()  ──► restorable = 0          │
//! │     ├── task deleted again    ──► older snapshot superseded (0)         │
//! │     │                                                                   │
//! │     └── older than retention  ──► purge_older_than() removes the row    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A partial unique index guarantees at most one restorable snapshot per
//! task.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use taskflow_core::{Task, TaskFields, UndoSnapshot};

use super::{from_millis, to_millis};
use crate::error::{DbError, DbResult};

macro_rules! undo_columns {
    () => {
        "id, task_id, user_id, snapshot, restorable, created_at, consumed_at"
    };
}

#[derive(Debug, sqlx::FromRow)]
struct UndoRow {
    id: i64,
    task_id: i64,
    user_id: String,
    snapshot: String,
    restorable: bool,
    created_at: i64,
    consumed_at: Option<i64>,
}

impl TryFrom<UndoRow> for UndoSnapshot {
    type Error = serde_json::Error;

    fn try_from(row: UndoRow) -> Result<Self, Self::Error> {
        Ok(UndoSnapshot {
            id: row.id,
            task_id: row.task_id,
            user_id: row.user_id,
            fields: serde_json::from_str::<TaskFields>(&row.snapshot)?,
            restorable: row.restorable,
            created_at: from_millis(row.created_at),
            consumed_at: row.consumed_at.map(from_millis),
        })
    }
}

#[derive(Debug)]
pub struct UndoLedger<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> UndoLedger<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        UndoLedger { conn }
    }

    /// Snapshots `task` as it is now. Any older live snapshot of the same
    /// task stops being restorable.
    pub async fn record(&mut self, task: &Task, now: DateTime<Utc>) -> DbResult<UndoSnapshot> {
        let superseded = sqlx::query(
            "UPDATE undo_snapshots SET restorable = 0 WHERE task_id = ?1 AND restorable = 1",
        )
        .bind(task.id)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        if superseded > 0 {
            debug!(task_id = task.id, "Superseded previous undo snapshot");
        }

        let blob = serde_json::to_string(&task.fields())?;

        let row = sqlx::query_as::<_, UndoRow>(concat!(
            "INSERT INTO undo_snapshots (task_id, user_id, snapshot, restorable, created_at) \
             VALUES (?1, ?2, ?3, 1, ?4) RETURNING ",
            undo_columns!()
        ))
        .bind(task.id)
        .bind(&task.user_id)
        .bind(blob)
        .bind(to_millis(now))
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(UndoSnapshot::try_from(row)?)
    }

    /// The restorable snapshot of `task_id`, if `user_id` owns one.
    pub async fn latest_restorable(&mut self, user_id: &str, task_id: i64) -> DbResult<Option<UndoSnapshot>> {
        let row = sqlx::query_as::<_, UndoRow>(concat!(
            "SELECT ",
            undo_columns!(),
            " FROM undo_snapshots WHERE task_id = ?1 AND user_id = ?2 AND restorable = 1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(task_id)
        .bind(user_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(UndoSnapshot::try_from)
            .transpose()
            .map_err(DbError::from)
    }

    /// Marks a snapshot non-restorable because its window passed.
    pub async fn expire(&mut self, snapshot_id: i64) -> DbResult<()> {
        sqlx::query("UPDATE undo_snapshots SET restorable = 0 WHERE id = ?1")
            .bind(snapshot_id)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Marks a snapshot used by a successful restore.
    pub async fn consume(&mut self, snapshot_id: i64, now: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE undo_snapshots SET restorable = 0, consumed_at = ?2 \
             WHERE id = ?1 AND restorable = 1",
        )
        .bind(snapshot_id)
        .bind(to_millis(now))
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Undo snapshot", snapshot_id));
        }
        Ok(())
    }

    /// Permanently deletes snapshots created before `cutoff`, whatever their
    /// state.
    ///
    /// ## Returns
    /// Number of deleted snapshots.
    pub async fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM undo_snapshots WHERE created_at < ?1")
            .bind(to_millis(cutoff))
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::task::{NewTask, TaskRepository};
    use crate::repository::test_support::{at, db, fields};
    use chrono::Duration;

    async fn seed_task(conn: &mut SqliteConnection, local_id: &str) -> Task {
        TaskRepository::new(conn)
            .insert(
                NewTask {
                    user_id: "u1",
                    local_id,
                    fields: &fields("Original"),
                },
                at(0),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_and_consume() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();
        let task = seed_task(&mut conn, "a").await;
        let mut ledger = UndoLedger::new(&mut conn);

        let snapshot = ledger.record(&task, at(1)).await.unwrap();
        assert!(snapshot.restorable);
        assert_eq!(snapshot.fields.title, "Original");

        let found = ledger.latest_restorable("u1", task.id).await.unwrap().unwrap();
        assert_eq!(found.id, snapshot.id);
        assert!(ledger.latest_restorable("u2", task.id).await.unwrap().is_none());

        ledger.consume(snapshot.id, at(2)).await.unwrap();
        assert!(ledger.latest_restorable("u1", task.id).await.unwrap().is_none());
        assert!(ledger.consume(snapshot.id, at(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_only_one_live_snapshot_per_task() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();
        let task = seed_task(&mut conn, "a").await;
        let mut ledger = UndoLedger::new(&mut conn);

        let first = ledger.record(&task, at(1)).await.unwrap();
        let second = ledger.record(&task, at(2)).await.unwrap();

        let live = ledger.latest_restorable("u1", task.id).await.unwrap().unwrap();
        assert_eq!(live.id, second.id);
        assert_ne!(live.id, first.id);
    }

    #[tokio::test]
    async fn test_expire_and_purge() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();
        let old_task = seed_task(&mut conn, "old").await;
        let new_task = seed_task(&mut conn, "new").await;
        let mut ledger = UndoLedger::new(&mut conn);

        let old = ledger.record(&old_task, at(0)).await.unwrap();
        ledger.record(&new_task, at(0) + Duration::days(40)).await.unwrap();

        ledger.expire(old.id).await.unwrap();
        assert!(ledger.latest_restorable("u1", old_task.id).await.unwrap().is_none());

        let purged = ledger
            .purge_older_than(at(0) + Duration::days(10))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(ledger.latest_restorable("u1", new_task.id).await.unwrap().is_some());
    }
}
