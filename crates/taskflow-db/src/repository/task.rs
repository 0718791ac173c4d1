//! # Task Repository
//!
//! Reads and versioned writes of task rows.
//!
//! ## Versioning
//! Every write goes through `WHERE server_version = ?expected` and sets
//! `server_version = server_version + 1`, so a write based on an outdated
//! read matches no row and fails with [`DbError::VersionMismatch`] instead
//! of overwriting.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use taskflow_core::{Task, TaskFields, TaskPriority, TaskStatus};

use super::{from_millis, to_millis};
use crate::error::{DbError, DbResult};

macro_rules! task_columns {
    () => {
        "id, user_id, local_id, title, description, status, priority, due_at, \
         server_version, is_deleted, created_at, updated_at"
    };
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: i64,
    user_id: String,
    local_id: String,
    title: String,
    description: String,
    status: TaskStatus,
    priority: TaskPriority,
    due_at: Option<i64>,
    server_version: i64,
    is_deleted: bool,
    created_at: i64,
    updated_at: i64,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            user_id: row.user_id,
            local_id: row.local_id,
            title: row.title,
            description: row.description,
            status: row.status,
            priority: row.priority,
            due_at: row.due_at.map(from_millis),
            server_version: row.server_version,
            is_deleted: row.is_deleted,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

/// A task about to be inserted.
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub user_id: &'a str,
    pub local_id: &'a str,
    pub fields: &'a TaskFields,
}

/// Repository for task rows, borrowed over a connection or transaction.
#[derive(Debug)]
pub struct TaskRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> TaskRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        TaskRepository { conn }
    }

    /// Finds a task by server id, if `user_id` owns it. Deleted tasks are
    /// returned too.
    pub async fn find_owned(&mut self, user_id: &str, id: i64) -> DbResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(concat!(
            "SELECT ",
            task_columns!(),
            " FROM tasks WHERE id = ?1 AND user_id = ?2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(row.map(Task::from))
    }

    /// Finds the user's task holding `local_id`, deleted or not.
    pub async fn find_by_local_id(&mut self, user_id: &str, local_id: &str) -> DbResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(concat!(
            "SELECT ",
            task_columns!(),
            " FROM tasks WHERE user_id = ?1 AND local_id = ?2"
        ))
        .bind(user_id)
        .bind(local_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(row.map(Task::from))
    }

    /// Inserts a task at version 1.
    ///
    /// ## Returns
    /// * `Ok(Task)` - The stored row with its server id
    /// * `Err(DbError::UniqueViolation)` - `(user_id, local_id)` already taken
    pub async fn insert(&mut self, task: NewTask<'_>, now: DateTime<Utc>) -> DbResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(concat!(
            "INSERT INTO tasks (user_id, local_id, title, description, status, priority, \
             due_at, server_version, is_deleted, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, 0, ?8, ?8) RETURNING ",
            task_columns!()
        ))
        .bind(task.user_id)
        .bind(task.local_id)
        .bind(&task.fields.title)
        .bind(&task.fields.description)
        .bind(task.fields.status)
        .bind(task.fields.priority)
        .bind(task.fields.due_at.map(to_millis))
        .bind(to_millis(now))
        .fetch_one(&mut *self.conn)
        .await?;

        debug!(id = row.id, local_id = %row.local_id, "Inserted task");
        Ok(row.into())
    }

    /// Overwrites the mutable fields and bumps the version by one.
    ///
    /// ## Arguments
    /// * `expected_version` - Version the caller read; the write fails if it moved
    pub async fn update_fields(
        &mut self,
        id: i64,
        expected_version: i64,
        fields: &TaskFields,
        now: DateTime<Utc>,
    ) -> DbResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(concat!(
            "UPDATE tasks SET title = ?3, description = ?4, status = ?5, priority = ?6, \
             due_at = ?7, server_version = server_version + 1, updated_at = ?8 \
             WHERE id = ?1 AND server_version = ?2 RETURNING ",
            task_columns!()
        ))
        .bind(id)
        .bind(expected_version)
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.status)
        .bind(fields.priority)
        .bind(fields.due_at.map(to_millis))
        .bind(to_millis(now))
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(Task::from)
            .ok_or_else(|| version_mismatch(id, expected_version))
    }

    /// Marks a live task deleted and bumps the version by one.
    pub async fn soft_delete(
        &mut self,
        id: i64,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> DbResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(concat!(
            "UPDATE tasks SET is_deleted = 1, server_version = server_version + 1, \
             updated_at = ?3 \
             WHERE id = ?1 AND server_version = ?2 AND is_deleted = 0 RETURNING ",
            task_columns!()
        ))
        .bind(id)
        .bind(expected_version)
        .bind(to_millis(now))
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(Task::from)
            .ok_or_else(|| version_mismatch(id, expected_version))
    }

    /// Un-deletes a task and writes back `fields`, bumping the version.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - The task is not currently deleted
    pub async fn restore(
        &mut self,
        id: i64,
        fields: &TaskFields,
        now: DateTime<Utc>,
    ) -> DbResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(concat!(
            "UPDATE tasks SET title = ?2, description = ?3, status = ?4, priority = ?5, \
             due_at = ?6, is_deleted = 0, server_version = server_version + 1, updated_at = ?7 \
             WHERE id = ?1 AND is_deleted = 1 RETURNING ",
            task_columns!()
        ))
        .bind(id)
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.status)
        .bind(fields.priority)
        .bind(fields.due_at.map(to_millis))
        .bind(to_millis(now))
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(Task::from)
            .ok_or_else(|| DbError::not_found("Deleted task", id))
    }

    /// Returns the user's tasks modified after `since` (all of them when
    /// `None`), deleted ones included, oldest change first.
    pub async fn changed_since(
        &mut self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(concat!(
            "SELECT ",
            task_columns!(),
            " FROM tasks WHERE user_id = ?1 AND (?2 IS NULL OR updated_at > ?2) \
             ORDER BY updated_at ASC, id ASC"
        ))
        .bind(user_id)
        .bind(since.map(to_millis))
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.into_iter().map(Task::from).collect())
    }

    /// Lists the user's live tasks, newest change first.
    pub async fn list_active(&mut self, user_id: &str, limit: i64) -> DbResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(concat!(
            "SELECT ",
            task_columns!(),
            " FROM tasks WHERE user_id = ?1 AND is_deleted = 0 \
             ORDER BY updated_at DESC, id DESC LIMIT ?2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.into_iter().map(Task::from).collect())
    }
}

fn version_mismatch(id: i64, expected: i64) -> DbError {
    DbError::VersionMismatch {
        entity: "Task".to_string(),
        id,
        expected,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{at, db, fields};

    #[tokio::test]
    async fn test_insert_starts_at_version_one() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = TaskRepository::new(&mut conn);

        let task = repo
            .insert(
                NewTask {
                    user_id: "u1",
                    local_id: "a",
                    fields: &fields("Buy milk"),
                },
                at(0),
            )
            .await
            .unwrap();

        assert_eq!(task.server_version, 1);
        assert!(!task.is_deleted);
        assert_eq!(task.created_at, at(0));

        let found = repo.find_by_local_id("u1", "a").await.unwrap().unwrap();
        assert_eq!(found, task);
        assert!(repo.find_owned("someone-else", task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_local_id_is_unique_violation() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let new = NewTask {
            user_id: "u1",
            local_id: "a",
            fields: &fields("one"),
        };

        repo.insert(new.clone(), at(0)).await.unwrap();
        let err = repo.insert(new, at(1)).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_each_write_bumps_version_by_one() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let task = repo
            .insert(
                NewTask {
                    user_id: "u1",
                    local_id: "a",
                    fields: &fields("v1"),
                },
                at(0),
            )
            .await
            .unwrap();

        let v2 = repo.update_fields(task.id, 1, &fields("v2"), at(1)).await.unwrap();
        assert_eq!(v2.server_version, 2);
        assert_eq!(v2.title, "v2");

        let v3 = repo.soft_delete(task.id, 2, at(2)).await.unwrap();
        assert_eq!(v3.server_version, 3);
        assert!(v3.is_deleted);

        let v4 = repo.restore(task.id, &fields("back"), at(3)).await.unwrap();
        assert_eq!(v4.server_version, 4);
        assert!(!v4.is_deleted);
        assert_eq!(v4.title, "back");
    }

    #[tokio::test]
    async fn test_stale_expected_version_is_rejected() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let task = repo
            .insert(
                NewTask {
                    user_id: "u1",
                    local_id: "a",
                    fields: &fields("v1"),
                },
                at(0),
            )
            .await
            .unwrap();

        let err = repo
            .update_fields(task.id, 7, &fields("nope"), at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::VersionMismatch { expected: 7, .. }));

        let err = repo.restore(task.id, &fields("live"), at(1)).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_changed_since_includes_deleted_and_orders_by_time() {
        let db = db().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let old = repo
            .insert(
                NewTask {
                    user_id: "u1",
                    local_id: "old",
                    fields: &fields("old"),
                },
                at(0),
            )
            .await
            .unwrap();
        let gone = repo
            .insert(
                NewTask {
                    user_id: "u1",
                    local_id: "gone",
                    fields: &fields("gone"),
                },
                at(10),
            )
            .await
            .unwrap();
        repo.soft_delete(gone.id, 1, at(20)).await.unwrap();
        repo.insert(
            NewTask {
                user_id: "u2",
                local_id: "other",
                fields: &fields("other"),
            },
            at(30),
        )
        .await
        .unwrap();

        let all = repo.changed_since("u1", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, old.id);

        let recent = repo.changed_since("u1", Some(at(5))).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, gone.id);
        assert!(recent[0].is_deleted);

        let active = repo.list_active("u1", 10).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, old.id);
    }
}
