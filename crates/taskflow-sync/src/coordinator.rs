//! # Sync Transaction Coordinator
//!
//! Applies one client batch inside one SQLite transaction.
//!
//! ## Batch Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SyncRequest                                                            │
//! │     │  ValidatedBatch::parse   (any invalid change rejects the batch)   │
//! │     ▼                                                                   │
//! │  BEGIN IMMEDIATE           (write lock held from the first statement)   │
//! │     │  stamp = commit_stamp(clock, last_stamp(user))                    │
//! │     │  sync_batches INSERT                                              │
//! │     │                                                                   │
//! │     │  for each op, in order:                                           │
//! │     │     SAVEPOINT ── apply ──┬── ok  ──► RELEASE                      │
//! │     │                          └── err ──► ROLLBACK TO, report failed   │
//! │     │                                                                   │
//! │     │  changed_since(last_sync_at) ∪ touched tasks                      │
//! │     │  sync_batches UPDATE     (outcome counts, cursor = stamp)         │
//! │     ▼                                                                   │
//! │  COMMIT ──► one outcome notification (non-blocking)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation of a batch carries the same stamp, which is also the
//! `last_sync_at` handed back to the client. Stamps of one user strictly
//! increase in commit order, so the next pull sees every later write no
//! matter which device made it or what the wall clock said.

use std::collections::BTreeMap;
use std::sync::Arc;

use sqlx::Connection;
use tracing::{debug, error, info, warn};

use taskflow_core::delta::ValidatedBatch;
use taskflow_core::merge::MergeResolver;
use taskflow_core::protocol::{FailedChange, ServerChange, SyncRequest, SyncResponse};
use taskflow_core::{ConflictRecord, StoredNotification, Task};
use taskflow_db::{BatchCounts, ConflictLog, Database, DbError, SyncBatchLog, TaskRepository};

use crate::clock::{commit_stamp, Clock};
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::notify::{batch_outcome, Notifier};
use crate::operations::{self, OpContext};

pub struct SyncCoordinator {
    db: Database,
    settings: Arc<SyncSettings>,
    resolver: MergeResolver,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl SyncCoordinator {
    pub fn new(
        db: Database,
        settings: Arc<SyncSettings>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let resolver = MergeResolver::new(settings.status_ranking.clone());
        SyncCoordinator {
            db,
            settings,
            resolver,
            clock,
            notifier,
        }
    }

    /// Reconciles a client batch with the server state.
    ///
    /// ## Returns
    /// * `Ok(SyncResponse)` - Committed; per-operation failures are listed in `failed`
    /// * `Err(SyncError::InvalidRequest)` - Nothing was written
    /// * `Err(SyncError::Transaction)` - Nothing was written; resend the batch
    pub async fn sync(&self, user_id: &str, request: SyncRequest) -> SyncResult<SyncResponse> {
        let batch = ValidatedBatch::parse(request, self.settings.max_batch_size)?;

        debug!(user_id, operations = batch.operations.len(), "Sync batch received");

        let mut tx = self
            .db
            .begin_immediate()
            .await
            .map_err(SyncError::transaction("begin"))?;

        let received_at = self.clock.now_millis();
        let mut batches = SyncBatchLog::new(&mut tx);
        let last_stamp = batches
            .last_stamp(user_id)
            .await
            .map_err(SyncError::transaction("read stamp"))?;
        let stamp = commit_stamp(received_at, last_stamp);
        let batch_id = batches
            .open(user_id, received_at, batch.last_sync_at, batch.operations.len())
            .await
            .map_err(SyncError::transaction("open batch"))?;

        let ctx = OpContext {
            user_id,
            now: stamp,
            resolver: &self.resolver,
        };

        let mut client_changes = Vec::with_capacity(batch.operations.len());
        let mut conflicts = Vec::new();
        let mut failed = Vec::new();
        let mut touched = BTreeMap::new();

        for (index, op) in batch.operations.iter().enumerate() {
            let mut savepoint = Connection::begin(&mut *tx)
                .await
                .map_err(DbError::from)
                .map_err(SyncError::transaction("savepoint"))?;

            match operations::apply(&mut savepoint, &ctx, op).await {
                Ok(applied) => {
                    savepoint
                        .commit()
                        .await
                        .map_err(DbError::from)
                        .map_err(SyncError::transaction("release savepoint"))?;

                    client_changes.push(applied.change);
                    if let Some(conflict) = applied.conflict {
                        conflicts.push(conflict.into());
                    }
                    touched.insert(applied.task.id, applied.task);
                }
                Err(err) => {
                    savepoint
                        .rollback()
                        .await
                        .map_err(DbError::from)
                        .map_err(SyncError::transaction("rollback savepoint"))?;

                    let message = match &err {
                        SyncError::Database(db_err) => {
                            error!(user_id, index, local_id = op.local_id(), error = %db_err, "Operation hit a storage error");
                            "storage error; retry this change later".to_string()
                        }
                        other => {
                            warn!(user_id, index, local_id = op.local_id(), error = %other, "Operation skipped");
                            other.to_string()
                        }
                    };
                    failed.push(FailedChange {
                        local_id: op.local_id().to_string(),
                        op: op.kind(),
                        error: message,
                    });
                }
            }
        }

        let changed = TaskRepository::new(&mut tx)
            .changed_since(user_id, batch.last_sync_at)
            .await
            .map_err(SyncError::transaction("read changes"))?;
        let server_changes = merge_server_changes(touched, changed);

        let counts = BatchCounts {
            applied: client_changes.len() as i64,
            conflicts: conflicts.len() as i64,
            failed: failed.len() as i64,
        };
        SyncBatchLog::new(&mut tx)
            .close(batch_id, counts, stamp)
            .await
            .map_err(SyncError::transaction("close batch"))?;

        tx.commit()
            .await
            .map_err(DbError::from)
            .map_err(SyncError::transaction("commit"))?;

        info!(
            user_id,
            batch_id,
            applied = counts.applied,
            conflicts = counts.conflicts,
            failed = counts.failed,
            server_changes = server_changes.len(),
            "Sync batch committed"
        );

        if !batch.operations.is_empty() {
            let outcome = batch_outcome(user_id, client_changes.len(), conflicts.len(), failed.len());
            if let Err(e) = self.notifier.notify(outcome) {
                warn!(user_id, error = %e, "Sync outcome notification dropped");
            }
        }

        Ok(SyncResponse {
            server_changes,
            client_changes,
            last_sync_at: stamp,
            conflicts,
            failed,
        })
    }

    /// Most recent conflict records of a user, newest first.
    pub async fn recent_conflicts(&self, user_id: &str, limit: i64) -> SyncResult<Vec<ConflictRecord>> {
        let mut conn = self.db.acquire().await?;
        Ok(ConflictLog::new(&mut conn).recent_for_user(user_id, limit).await?)
    }

    /// The user's live tasks, most recently changed first. Soft-deleted
    /// tasks are left out.
    pub async fn active_tasks(&self, user_id: &str, limit: i64) -> SyncResult<Vec<ServerChange>> {
        let mut conn = self.db.acquire().await?;
        let tasks = TaskRepository::new(&mut conn).list_active(user_id, limit).await?;
        Ok(tasks.into_iter().map(ServerChange::from).collect())
    }

    /// Conflict history of one task, oldest first.
    ///
    /// ## Returns
    /// * `Err(SyncError::NotFound)` - The user owns no task with this id
    pub async fn task_conflicts(&self, user_id: &str, task_id: i64) -> SyncResult<Vec<ConflictRecord>> {
        let mut conn = self.db.acquire().await?;
        if TaskRepository::new(&mut conn)
            .find_owned(user_id, task_id)
            .await?
            .is_none()
        {
            return Err(SyncError::not_found("Task", task_id));
        }
        Ok(ConflictLog::new(&mut conn).for_task(user_id, task_id).await?)
    }

    /// Most recent notifications of a user, newest first.
    pub async fn recent_notifications(&self, user_id: &str, limit: i64) -> SyncResult<Vec<StoredNotification>> {
        Ok(self.db.notifications().recent_for_user(user_id, limit).await?)
    }
}

/// Tasks changed since the cursor plus every task the batch touched, each
/// once in its latest state, ordered by `updated_at` then `id`.
fn merge_server_changes(mut touched: BTreeMap<i64, Task>, changed: Vec<Task>) -> Vec<ServerChange> {
    for task in changed {
        touched.insert(task.id, task);
    }
    let mut tasks: Vec<Task> = touched.into_values().collect();
    tasks.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
    tasks.into_iter().map(ServerChange::from).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
