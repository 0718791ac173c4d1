//! # Repository Module
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  taskflow-sync                                                          │
//! │     │  let mut tx = db.begin_immediate().await?;                        │
//! │     │  let mut sp = Connection::begin(&mut *tx).await?;  (savepoint)    │
//! │     ▼                                                                   │
//! │  TaskRepository::new(&mut sp)  ConflictLog::new(&mut sp)  ...           │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  &mut SqliteConnection  ──►  SQL                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`TaskRepository`](task::TaskRepository) - Task reads and versioned writes
//! - [`ConflictLog`](conflict::ConflictLog) - Append-only conflict records
//! - [`UndoLedger`](undo::UndoLedger) - Snapshots for batch soft-deletes
//! - [`SyncBatchLog`](batch::SyncBatchLog) - One row per sync request
//! - [`NotificationRepository`](notification::NotificationRepository) - Inbox

use chrono::{DateTime, Utc};

pub mod batch;
pub mod conflict;
pub mod notification;
pub mod task;
pub mod undo;

/// Timestamps are stored as Unix milliseconds.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};
    use taskflow_core::{TaskFields, TaskPriority, TaskStatus};

    use crate::pool::{Database, DbConfig};

    pub async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000 + secs, 0).unwrap()
    }

    pub fn fields(title: &str) -> TaskFields {
        TaskFields {
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip_keeps_millisecond_precision() {
        let at = DateTime::from_timestamp_millis(1_750_000_000_123).unwrap();
        assert_eq!(from_millis(to_millis(at)), at);
    }
}
