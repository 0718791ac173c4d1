//! # Delta Operations
//!
//! Typed form of a client's queued mutations. A [`SyncRequest`] is parsed
//! into a [`ValidatedBatch`] exactly once, at ingress; from then on the
//! engine only sees closed, validated values.
//!
//! ```text
//! SyncChange { op: "update", payload: { status: "done" } }
//!        │  DeltaOperation::try_from
//!        ▼
//! DeltaOperation::Update { patch: TaskPatch { status: Some(Done), .. } }
//! ```

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::protocol::{SyncChange, SyncRequest, TaskPayload};
use crate::types::{OpKind, TaskFields, TaskPriority, TaskStatus};
use crate::validation::{
    validate_client_version, validate_description, validate_local_id, validate_server_id,
    validate_title, ValidationResult,
};

// =============================================================================
// Task Patch
// =============================================================================

/// The fields an update supplies. `None` means "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// `Some(None)` clears the due date.
    pub due_at: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_at.is_none()
    }

    /// Overwrites every supplied field of `current`.
    pub fn apply_to(&self, current: &TaskFields) -> TaskFields {
        TaskFields {
            title: self.title.clone().unwrap_or_else(|| current.title.clone()),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| current.description.clone()),
            status: self.status.unwrap_or(current.status),
            priority: self.priority.unwrap_or(current.priority),
            due_at: self.due_at.unwrap_or(current.due_at),
        }
    }

    fn from_payload(payload: TaskPayload) -> ValidationResult<Self> {
        Ok(TaskPatch {
            title: payload.title.as_deref().map(validate_title).transpose()?,
            description: payload
                .description
                .as_deref()
                .map(validate_description)
                .transpose()?,
            status: payload.status.as_deref().map(str::parse).transpose()?,
            priority: payload.priority.as_deref().map(str::parse).transpose()?,
            due_at: payload.due_at,
        })
    }
}

// =============================================================================
// Delta Operation
// =============================================================================

/// A validated client mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOperation {
    Insert {
        local_id: String,
        fields: TaskFields,
    },
    Update {
        local_id: String,
        server_id: Option<i64>,
        client_version: i64,
        patch: TaskPatch,
    },
    Delete {
        local_id: String,
        server_id: Option<i64>,
        client_version: i64,
    },
}

impl DeltaOperation {
    pub fn local_id(&self) -> &str {
        match self {
            DeltaOperation::Insert { local_id, .. }
            | DeltaOperation::Update { local_id, .. }
            | DeltaOperation::Delete { local_id, .. } => local_id,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            DeltaOperation::Insert { .. } => OpKind::Insert,
            DeltaOperation::Update { .. } => OpKind::Update,
            DeltaOperation::Delete { .. } => OpKind::Delete,
        }
    }
}

impl TryFrom<SyncChange> for DeltaOperation {
    type Error = ValidationError;

    /// Validates one wire change.
    ///
    /// ## Rules
    /// - Every change needs a valid `local_id`
    /// - Inserts need a title; other fields fall back to defaults
    /// - Updates must supply at least one field
    /// - Deletes ignore the payload
    fn try_from(change: SyncChange) -> Result<Self, Self::Error> {
        validate_local_id(&change.local_id)?;
        let client_version = validate_client_version(change.client_version)?;
        let server_id = change.server_id.map(validate_server_id).transpose()?;

        match change.op {
            OpKind::Insert => {
                let patch = TaskPatch::from_payload(change.payload)?;
                let title = patch.title.ok_or_else(|| ValidationError::required("title"))?;
                Ok(DeltaOperation::Insert {
                    local_id: change.local_id,
                    fields: TaskFields {
                        title,
                        description: patch.description.unwrap_or_default(),
                        status: patch.status.unwrap_or_default(),
                        priority: patch.priority.unwrap_or_default(),
                        due_at: patch.due_at.flatten(),
                    },
                })
            }
            OpKind::Update => {
                let patch = TaskPatch::from_payload(change.payload)?;
                if patch.is_empty() {
                    return Err(ValidationError::required("payload"));
                }
                Ok(DeltaOperation::Update {
                    local_id: change.local_id,
                    server_id,
                    client_version,
                    patch,
                })
            }
            OpKind::Delete => Ok(DeltaOperation::Delete {
                local_id: change.local_id,
                server_id,
                client_version,
            }),
        }
    }
}

// =============================================================================
// Validated Batch
// =============================================================================

/// A sync request whose every change passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub operations: Vec<DeltaOperation>,
}

impl ValidatedBatch {
    /// Validates a whole request. Any invalid change rejects the batch.
    ///
    /// ## Arguments
    /// * `request` - The decoded request body
    /// * `max_batch_size` - Upper bound on `request.changes.len()`
    ///
    /// ## Returns
    /// * `Err(CoreError::BatchTooLarge)` - Too many changes
    /// * `Err(CoreError::InvalidChange)` - First invalid change, with its index
    pub fn parse(request: SyncRequest, max_batch_size: usize) -> CoreResult<Self> {
        if request.changes.len() > max_batch_size {
            return Err(CoreError::BatchTooLarge {
                max: max_batch_size,
                actual: request.changes.len(),
            });
        }

        let operations = request
            .changes
            .into_iter()
            .enumerate()
            .map(|(index, change)| {
                DeltaOperation::try_from(change)
                    .map_err(|source| CoreError::InvalidChange { index, source })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(ValidatedBatch {
            last_sync_at: request.last_sync_at,
            operations,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
