//! # Domain Types
//!
//! Task records, their mutable field set, conflict records, undo snapshots
//! and notifications.
//!
//! ## Task Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  insert ──► v1 ──► update ──► v2 ──► delete ──► v3 (is_deleted)          │
//! │                                          │                              │
//! │                                          └── restore ──► v4 (live)      │
//! │                                                                         │
//! │  Every accepted mutation bumps server_version by exactly one.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Task Status
// =============================================================================

/// Workflow state of a task.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Archived,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                ValidationError::not_allowed("status", &["todo", "in_progress", "done", "archived"])
            })
    }
}

// =============================================================================
// Task Priority
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            _ => Err(ValidationError::not_allowed(
                "priority",
                &["low", "medium", "high"],
            )),
        }
    }
}

// =============================================================================
// Task
// =============================================================================

/// The mutable field set of a task.
///
/// This is what merges produce, what undo snapshots capture and what
/// `merged_data` carries in a conflict record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaskFields {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[ts(as = "Option<String>")]
    pub due_at: Option<DateTime<Utc>>,
}

/// A task as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Task {
    /// Server-assigned identity (authoritative).
    pub id: i64,
    pub user_id: String,
    /// Client-assigned identity, unique per user.
    pub local_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[ts(as = "Option<String>")]
    pub due_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token. Starts at 1.
    pub server_version: i64,
    pub is_deleted: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Returns a copy of the mutable fields.
    pub fn fields(&self) -> TaskFields {
        TaskFields {
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            priority: self.priority,
            due_at: self.due_at,
        }
    }
}

// =============================================================================
// Operation Kind
// =============================================================================

/// Kind of a queued client mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Insert,
    Update,
    Delete,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Conflicts
// =============================================================================

/// Why a conflict record was written.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// An insert reused a local id that already maps to a server task.
    DuplicateInsert,
    /// An update arrived with a stale version and was merged field by field.
    IntelligentMerge,
    /// A delete arrived with a stale version; the delete still won.
    DeleteWhileModified,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::DuplicateInsert => "duplicate_insert",
            ConflictReason::IntelligentMerge => "intelligent_merge",
            ConflictReason::DeleteWhileModified => "delete_while_modified",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conflict about to be appended to the conflict log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict {
    pub user_id: String,
    pub local_id: String,
    pub server_id: i64,
    pub reason: ConflictReason,
    pub resolution: String,
    pub merged_data: Option<TaskFields>,
    pub client_version: Option<i64>,
    pub server_version: Option<i64>,
}

/// A persisted conflict-log entry. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConflictRecord {
    pub id: i64,
    pub user_id: String,
    pub local_id: String,
    pub server_id: i64,
    pub reason: ConflictReason,
    pub resolution: String,
    pub merged_data: Option<TaskFields>,
    pub client_version: Option<i64>,
    pub server_version: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Undo Snapshots
// =============================================================================

/// Pre-delete state of a batch-deleted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoSnapshot {
    pub id: i64,
    pub task_id: i64,
    pub user_id: String,
    pub fields: TaskFields,
    pub restorable: bool,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Notifications
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SyncSuccess,
    SyncConflict,
    SyncFailed,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Normal,
    High,
}

/// A user-facing message about the outcome of a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Notification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub content: String,
    pub priority: NotificationPriority,
}

/// A notification as stored in the user's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StoredNotification {
    pub id: i64,
    #[serde(flatten)]
    pub notification: Notification,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("finished".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_priority_rejects_unknown() {
        assert_eq!("high".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        let err = "urgent".parse::<TaskPriority>().unwrap_err();
        assert!(matches!(err, ValidationError::NotAllowed { .. }));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_task_fields_copy() {
        let now = Utc::now();
        let task = Task {
            id: 7,
            user_id: "u1".into(),
            local_id: "a".into(),
            title: "Buy milk".into(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: TaskPriority::High,
            due_at: None,
            server_version: 3,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        let fields = task.fields();
        assert_eq!(fields.title, "Buy milk");
        assert_eq!(fields.priority, TaskPriority::High);
    }
}
