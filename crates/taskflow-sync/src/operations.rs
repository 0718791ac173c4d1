//! # Operation Appliers
//!
//! One function per delta kind. Each runs against the connection it is
//! given, which the coordinator opens as a savepoint, so an error here rolls
//! back only the operation that raised it.
//!
//! ## Outcomes
//! ```text
//! ┌──────────┬──────────────────────────────┬──────────────────────────────┐
//! │ op       │ no conflict                  │ conflict                     │
//! ├──────────┼──────────────────────────────┼──────────────────────────────┤
//! │ insert   │ new task at v1               │ local id taken: new task     │
//! │          │                              │ with suffixed local id,      │
//! │          │                              │ duplicate_insert logged      │
//! │ update   │ versions equal: overwrite    │ versions differ: merge,      │
//! │          │ supplied fields, v+1         │ v+1, intelligent_merge       │
//! │ delete   │ versions equal: soft-delete, │ versions differ: delete      │
//! │          │ v+1                          │ anyway, delete_while_modified│
//! │          │ already deleted: no-op       │                              │
//! └──────────┴──────────────────────────────┴──────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use taskflow_core::conflict::{DeleteDecision, DuplicateNames, VersionCheck};
use taskflow_core::delta::{DeltaOperation, TaskPatch};
use taskflow_core::merge::MergeResolver;
use taskflow_core::protocol::ClientChange;
use taskflow_core::{ConflictReason, ConflictRecord, NewConflict, OpKind, Task, TaskFields};
use taskflow_db::{ConflictLog, NewTask, TaskRepository};

use crate::error::{SyncError, SyncResult};

/// Hex characters taken from a fresh UUIDv4 for a duplicate's local id.
const DUPLICATE_SUFFIX_LEN: usize = 8;

/// Per-batch inputs shared by every operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OpContext<'a> {
    pub user_id: &'a str,
    pub now: DateTime<Utc>,
    pub resolver: &'a MergeResolver,
}

/// Result of one successfully applied operation.
#[derive(Debug)]
pub(crate) struct Applied {
    pub change: ClientChange,
    pub task: Task,
    pub conflict: Option<ConflictRecord>,
}

pub(crate) async fn apply(
    conn: &mut SqliteConnection,
    ctx: &OpContext<'_>,
    op: &DeltaOperation,
) -> SyncResult<Applied> {
    match op {
        DeltaOperation::Insert { local_id, fields } => apply_insert(conn, ctx, local_id, fields).await,
        DeltaOperation::Update {
            local_id,
            server_id,
            client_version,
            patch,
        } => apply_update(conn, ctx, local_id, *server_id, *client_version, patch).await,
        DeltaOperation::Delete {
            local_id,
            server_id,
            client_version,
        } => apply_delete(conn, ctx, local_id, *server_id, *client_version).await,
    }
}

// =============================================================================
// Insert
// =============================================================================

async fn apply_insert(
    conn: &mut SqliteConnection,
    ctx: &OpContext<'_>,
    local_id: &str,
    fields: &TaskFields,
) -> SyncResult<Applied> {
    let existing = TaskRepository::new(&mut *conn)
        .find_by_local_id(ctx.user_id, local_id)
        .await?;

    let Some(existing) = existing else {
        let task = TaskRepository::new(&mut *conn)
            .insert(
                NewTask {
                    user_id: ctx.user_id,
                    local_id,
                    fields,
                },
                ctx.now,
            )
            .await?;
        return Ok(Applied {
            change: acknowledge(local_id, task.id, OpKind::Insert),
            task,
            conflict: None,
        });
    };

    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(DUPLICATE_SUFFIX_LEN)
        .collect();
    let names = DuplicateNames::derive(local_id, &fields.title, existing.id, &suffix);
    let duplicate_fields = TaskFields {
        title: names.title,
        ..fields.clone()
    };

    let task = TaskRepository::new(&mut *conn)
        .insert(
            NewTask {
                user_id: ctx.user_id,
                local_id: &names.local_id,
                fields: &duplicate_fields,
            },
            ctx.now,
        )
        .await?;

    info!(
        user_id = ctx.user_id,
        local_id,
        existing_id = existing.id,
        duplicate_id = task.id,
        "Duplicate insert stored as new task"
    );

    let conflict = ConflictLog::new(&mut *conn)
        .append(
            &NewConflict {
                user_id: ctx.user_id.to_string(),
                local_id: local_id.to_string(),
                server_id: task.id,
                reason: ConflictReason::DuplicateInsert,
                resolution: format!(
                    "local id already used by #{}; stored as #{} with local id {}",
                    existing.id, task.id, names.local_id
                ),
                merged_data: None,
                client_version: None,
                server_version: Some(existing.server_version),
            },
            ctx.now,
        )
        .await?;

    Ok(Applied {
        change: acknowledge(local_id, task.id, OpKind::Insert),
        task,
        conflict: Some(conflict),
    })
}

// =============================================================================
// Update
// =============================================================================

async fn apply_update(
    conn: &mut SqliteConnection,
    ctx: &OpContext<'_>,
    local_id: &str,
    server_id: Option<i64>,
    client_version: i64,
    patch: &TaskPatch,
) -> SyncResult<Applied> {
    let current = resolve_target(conn, ctx.user_id, local_id, server_id).await?;
    if current.is_deleted {
        return Err(SyncError::TaskDeleted { task_id: current.id });
    }

    match VersionCheck::compare(client_version, current.server_version) {
        VersionCheck::Current => {
            let fields = patch.apply_to(&current.fields());
            let task = TaskRepository::new(&mut *conn)
                .update_fields(current.id, current.server_version, &fields, ctx.now)
                .await?;
            debug!(task_id = task.id, version = task.server_version, "Update applied");
            Ok(Applied {
                change: acknowledge(local_id, task.id, OpKind::Update),
                task,
                conflict: None,
            })
        }
        VersionCheck::Stale {
            client_version,
            server_version,
        } => {
            let outcome = ctx.resolver.merge(&current.fields(), patch);
            let task = TaskRepository::new(&mut *conn)
                .update_fields(current.id, server_version, &outcome.fields, ctx.now)
                .await?;

            info!(
                task_id = task.id,
                client_version,
                server_version,
                "Stale update merged"
            );

            let conflict = ConflictLog::new(&mut *conn)
                .append(
                    &NewConflict {
                        user_id: ctx.user_id.to_string(),
                        local_id: local_id.to_string(),
                        server_id: task.id,
                        reason: ConflictReason::IntelligentMerge,
                        resolution: outcome.resolution,
                        merged_data: Some(outcome.fields),
                        client_version: Some(client_version),
                        server_version: Some(server_version),
                    },
                    ctx.now,
                )
                .await?;

            Ok(Applied {
                change: acknowledge(local_id, task.id, OpKind::Update),
                task,
                conflict: Some(conflict),
            })
        }
    }
}

// =============================================================================
// Delete
// =============================================================================

async fn apply_delete(
    conn: &mut SqliteConnection,
    ctx: &OpContext<'_>,
    local_id: &str,
    server_id: Option<i64>,
    client_version: i64,
) -> SyncResult<Applied> {
    let current = resolve_target(conn, ctx.user_id, local_id, server_id).await?;

    match DeleteDecision::decide(&current, client_version) {
        DeleteDecision::AlreadyDeleted => {
            debug!(task_id = current.id, "Delete of deleted task ignored");
            Ok(Applied {
                change: acknowledge(local_id, current.id, OpKind::Delete),
                task: current,
                conflict: None,
            })
        }
        DeleteDecision::Delete => {
            let task = TaskRepository::new(&mut *conn)
                .soft_delete(current.id, current.server_version, ctx.now)
                .await?;
            Ok(Applied {
                change: acknowledge(local_id, task.id, OpKind::Delete),
                task,
                conflict: None,
            })
        }
        DeleteDecision::DeleteOverConcurrentEdit {
            client_version,
            server_version,
        } => {
            let task = TaskRepository::new(&mut *conn)
                .soft_delete(current.id, server_version, ctx.now)
                .await?;

            info!(
                task_id = task.id,
                client_version,
                server_version,
                "Delete wins over concurrent edit"
            );

            let conflict = ConflictLog::new(&mut *conn)
                .append(
                    &NewConflict {
                        user_id: ctx.user_id.to_string(),
                        local_id: local_id.to_string(),
                        server_id: task.id,
                        reason: ConflictReason::DeleteWhileModified,
                        resolution: format!(
                            "deleted over server version {} (client held {})",
                            server_version, client_version
                        ),
                        merged_data: None,
                        client_version: Some(client_version),
                        server_version: Some(server_version),
                    },
                    ctx.now,
                )
                .await?;

            Ok(Applied {
                change: acknowledge(local_id, task.id, OpKind::Delete),
                task,
                conflict: Some(conflict),
            })
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Finds the task an update or delete targets: the explicit server id when
/// given, else the user's task holding `local_id`.
async fn resolve_target(
    conn: &mut SqliteConnection,
    user_id: &str,
    local_id: &str,
    server_id: Option<i64>,
) -> SyncResult<Task> {
    let mut tasks = TaskRepository::new(conn);
    match server_id {
        Some(id) => tasks
            .find_owned(user_id, id)
            .await?
            .ok_or_else(|| SyncError::not_found("Task", id)),
        None => tasks
            .find_by_local_id(user_id, local_id)
            .await?
            .ok_or_else(|| SyncError::UnknownLocalId {
                local_id: local_id.to_string(),
            }),
    }
}

fn acknowledge(local_id: &str, server_id: i64, op: OpKind) -> ClientChange {
    ClientChange {
        local_id: local_id.to_string(),
        server_id,
        op,
    }
}
