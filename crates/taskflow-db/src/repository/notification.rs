//! # Notification Inbox
//!
//! Durable store behind the notification dispatcher. Written outside any
//! sync transaction, so it holds the pool itself.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use taskflow_core::{Notification, NotificationKind, NotificationPriority, StoredNotification};

use super::{from_millis, to_millis};
use crate::error::DbResult;

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    user_id: String,
    kind: NotificationKind,
    title: String,
    content: String,
    priority: NotificationPriority,
    created_at: i64,
}

impl From<NotificationRow> for StoredNotification {
    fn from(row: NotificationRow) -> Self {
        StoredNotification {
            id: row.id,
            notification: Notification {
                user_id: row.user_id,
                kind: row.kind,
                title: row.title,
                content: row.content,
                priority: row.priority,
            },
            created_at: from_millis(row.created_at),
        }
    }
}

/// Repository for the notification inbox.
#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        NotificationRepository { pool }
    }

    pub async fn insert(&self, notification: &Notification, now: DateTime<Utc>) -> DbResult<StoredNotification> {
        let row = sqlx::query_as::<_, NotificationRow>(
            "INSERT INTO notifications (user_id, kind, title, content, priority, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             RETURNING id, user_id, kind, title, content, priority, created_at",
        )
        .bind(&notification.user_id)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.content)
        .bind(notification.priority)
        .bind(to_millis(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Most recent notifications of a user, newest first.
    pub async fn recent_for_user(&self, user_id: &str, limit: i64) -> DbResult<Vec<StoredNotification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            "SELECT id, user_id, kind, title, content, priority, created_at \
             FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredNotification::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{at, db};

    #[tokio::test]
    async fn test_insert_and_list() {
        let db = db().await;
        let repo = db.notifications();

        let notification = Notification {
            user_id: "u1".into(),
            kind: NotificationKind::SyncConflict,
            title: "Sync completed with conflicts".into(),
            content: "1 conflict was resolved automatically".into(),
            priority: NotificationPriority::High,
        };
        let stored = repo.insert(&notification, at(0)).await.unwrap();
        assert_eq!(stored.notification, notification);

        let listed = repo.recent_for_user("u1", 10).await.unwrap();
        assert_eq!(listed, vec![stored]);
        assert!(repo.recent_for_user("u2", 10).await.unwrap().is_empty());
    }
}
