//! # Sync Protocol
//!
//! JSON shapes exchanged with clients. These are exported to TypeScript
//! (`ts-rs`) so the browser client compiles against the same definitions.
//!
//! ## Request / Response
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SyncRequest                          SyncResponse                      │
//! │  ───────────                          ────────────                      │
//! │  last_sync_at?                        server_changes  (broadcast set)   │
//! │  changes: [SyncChange]   ──sync──►    client_changes  (local→server id) │
//! │     local_id                          conflicts       (resolved ones)   │
//! │     op                                failed          (retry later)     │
//! │     payload (raw fields)              last_sync_at    (next cursor)     │
//! │     client_version                                                      │
//! │     server_id?                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payload fields arrive as raw strings and are validated into a
//! [`crate::delta::DeltaOperation`] before anything touches storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;

use crate::types::{
    ConflictReason, ConflictRecord, OpKind, Task, TaskFields, TaskPriority, TaskStatus,
};

// =============================================================================
// Sync Request
// =============================================================================

/// Body of `POST /v1/sync`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncRequest {
    /// Cursor returned by the previous sync. Absent on a first sync.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Queued operations, in the order the client produced them.
    #[serde(default)]
    pub changes: Vec<SyncChange>,
}

/// One queued client mutation as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncChange {
    pub local_id: String,
    pub op: OpKind,
    #[serde(default)]
    pub payload: TaskPayload,
    /// Server version the client last saw. 0 for inserts.
    #[serde(default)]
    pub client_version: i64,
    /// Server id, when the client already knows it.
    #[serde(default)]
    pub server_id: Option<i64>,
}

/// Raw field values of a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaskPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Absent: unchanged. `null`: cleared. Timestamp: set.
    #[serde(default, deserialize_with = "deserialize_present")]
    #[ts(type = "string | null | undefined")]
    pub due_at: Option<Option<DateTime<Utc>>>,
}

/// Maps a present field (including `null`) to `Some`, so a missing field
/// stays distinguishable from an explicit `null`.
fn deserialize_present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// =============================================================================
// Sync Response
// =============================================================================

/// Body returned by `POST /v1/sync`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncResponse {
    pub server_changes: Vec<ServerChange>,
    pub client_changes: Vec<ClientChange>,
    #[ts(as = "String")]
    pub last_sync_at: DateTime<Utc>,
    pub conflicts: Vec<ConflictEntry>,
    pub failed: Vec<FailedChange>,
}

/// Server-side state of a task the client must apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ServerChange {
    pub id: i64,
    pub local_id: String,
    pub server_version: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[ts(as = "Option<String>")]
    pub due_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl From<Task> for ServerChange {
    fn from(task: Task) -> Self {
        ServerChange {
            id: task.id,
            local_id: task.local_id,
            server_version: task.server_version,
            title: task.title,
            description: task.description,
            status: task.status,
            priority: task.priority,
            due_at: task.due_at,
            updated_at: task.updated_at,
            is_deleted: task.is_deleted,
        }
    }
}

/// Acknowledges one applied client operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ClientChange {
    pub local_id: String,
    pub server_id: i64,
    pub op: OpKind,
}

/// A conflict detected and resolved while applying the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConflictEntry {
    pub local_id: String,
    pub server_id: i64,
    pub reason: ConflictReason,
    pub resolution: Option<String>,
    pub merged_data: Option<TaskFields>,
}

impl From<ConflictRecord> for ConflictEntry {
    fn from(record: ConflictRecord) -> Self {
        ConflictEntry {
            local_id: record.local_id,
            server_id: record.server_id,
            reason: record.reason,
            resolution: Some(record.resolution),
            merged_data: record.merged_data,
        }
    }
}

/// An operation that could not be applied. The client keeps it queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FailedChange {
    pub local_id: String,
    pub op: OpKind,
    pub error: String,
}

// =============================================================================
// Batch Delete / Restore
// =============================================================================

/// Body of `POST /v1/tasks/batch-delete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BatchDeleteRequest {
    pub task_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BatchDeleteResponse {
    /// Tasks actually deleted (unknown and already-deleted ids are skipped).
    pub count: u64,
    pub can_undo: bool,
    pub undo_window_seconds: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_at_absent_null_and_set_are_distinct() {
        let absent: TaskPayload = serde_json::from_str(r#"{"title":"a"}"#).unwrap();
        assert_eq!(absent.due_at, None);

        let cleared: TaskPayload = serde_json::from_str(r#"{"due_at":null}"#).unwrap();
        assert_eq!(cleared.due_at, Some(None));

        let set: TaskPayload =
            serde_json::from_str(r#"{"due_at":"2026-01-02T03:04:05Z"}"#).unwrap();
        assert!(matches!(set.due_at, Some(Some(_))));
    }

    #[test]
    fn test_sync_request_defaults() {
        let request: SyncRequest = serde_json::from_str("{}").unwrap();
        assert!(request.last_sync_at.is_none());
        assert!(request.changes.is_empty());
    }

    #[test]
    fn test_change_parses_op_and_versions() {
        let json = r#"{
            "local_id": "a",
            "op": "update",
            "payload": {"description": "Y"},
            "client_version": 3,
            "server_id": 7
        }"#;
        let change: SyncChange = serde_json::from_str(json).unwrap();
        assert_eq!(change.op, OpKind::Update);
        assert_eq!(change.client_version, 3);
        assert_eq!(change.server_id, Some(7));
        assert_eq!(change.payload.description.as_deref(), Some("Y"));
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let json = r#"{"local_id": "a", "op": "upsert"}"#;
        assert!(serde_json::from_str::<SyncChange>(json).is_err());
    }
}
