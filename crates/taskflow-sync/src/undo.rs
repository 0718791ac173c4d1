//! # Batch Delete & Restore
//!
//! ## Undo Window
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  T0  batch_delete([10, 11])  ── snapshot + soft-delete, one tx          │
//! │                                                                         │
//! │  T0 + 29s   restore(10)  ──► fields from snapshot, live again, v+1      │
//! │  T0 + 30s   restore(..)  ──► still allowed (window is inclusive)        │
//! │  T0 + 31s   restore(11)  ──► snapshot expired, UndoExpired              │
//! │                                                                         │
//! │  T0 + 30d   UndoSweeper  ──► snapshot rows purged                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The window is measured on the wall clock. The task rows themselves get a
//! commit stamp, like a sync batch, so other devices pull the change.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use taskflow_core::protocol::BatchDeleteResponse;
use taskflow_core::Task;
use taskflow_db::{Database, DbError, SyncBatchLog, TaskRepository, UndoLedger};

use crate::clock::{commit_stamp, Clock};
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};

pub struct UndoService {
    db: Database,
    settings: Arc<SyncSettings>,
    clock: Arc<dyn Clock>,
}

impl UndoService {
    pub fn new(db: Database, settings: Arc<SyncSettings>, clock: Arc<dyn Clock>) -> Self {
        UndoService { db, settings, clock }
    }

    /// Soft-deletes the user's live tasks among `task_ids`, keeping a
    /// restorable snapshot of each.
    ///
    /// Duplicate, unknown, foreign and already-deleted ids are skipped.
    ///
    /// ## Returns
    /// The number of tasks actually deleted.
    pub async fn batch_delete(&self, user_id: &str, task_ids: &[i64]) -> SyncResult<BatchDeleteResponse> {
        let ids: BTreeSet<i64> = task_ids.iter().copied().collect();

        let mut tx = self
            .db
            .begin_immediate()
            .await
            .map_err(SyncError::transaction("begin"))?;
        let now = self.clock.now_millis();
        let stamp = commit_stamp(now, SyncBatchLog::new(&mut tx).last_stamp(user_id).await?);
        let mut count = 0u64;

        for id in ids {
            let live = TaskRepository::new(&mut tx)
                .find_owned(user_id, id)
                .await?
                .filter(|task| !task.is_deleted);
            let Some(task) = live else {
                debug!(user_id, task_id = id, "Batch delete skipped task");
                continue;
            };

            UndoLedger::new(&mut tx).record(&task, now).await?;
            TaskRepository::new(&mut tx)
                .soft_delete(task.id, task.server_version, stamp)
                .await?;
            count += 1;
        }

        tx.commit()
            .await
            .map_err(DbError::from)
            .map_err(SyncError::transaction("commit"))?;

        info!(user_id, requested = task_ids.len(), deleted = count, "Batch delete committed");

        Ok(BatchDeleteResponse {
            count,
            can_undo: true,
            undo_window_seconds: self.settings.undo_window_secs,
        })
    }

    /// Reverts a batch delete of `task_id` if its snapshot is still inside
    /// the undo window.
    ///
    /// ## Returns
    /// * `Ok(Task)` - The restored task, one version higher
    /// * `Err(SyncError::NotFound)` - No restorable snapshot, or task not deleted
    /// * `Err(SyncError::UndoExpired)` - Window closed; the snapshot is retired
    pub async fn restore(&self, user_id: &str, task_id: i64) -> SyncResult<Task> {
        let mut tx = self
            .db
            .begin_immediate()
            .await
            .map_err(SyncError::transaction("begin"))?;
        let now = self.clock.now_millis();

        let snapshot = UndoLedger::new(&mut tx)
            .latest_restorable(user_id, task_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Undo snapshot", task_id))?;

        if now - snapshot.created_at > self.settings.undo_window() {
            UndoLedger::new(&mut tx).expire(snapshot.id).await?;
            tx.commit()
                .await
                .map_err(DbError::from)
                .map_err(SyncError::transaction("commit"))?;

            info!(user_id, task_id, deleted_at = %snapshot.created_at, "Undo window expired");
            return Err(SyncError::UndoExpired {
                task_id,
                window_secs: self.settings.undo_window_secs,
            });
        }

        let stamp = commit_stamp(now, SyncBatchLog::new(&mut tx).last_stamp(user_id).await?);
        let task = match TaskRepository::new(&mut tx)
            .restore(task_id, &snapshot.fields, stamp)
            .await
        {
            Ok(task) => task,
            Err(DbError::NotFound { .. }) => return Err(SyncError::not_found("Deleted task", task_id)),
            Err(e) => return Err(e.into()),
        };
        UndoLedger::new(&mut tx).consume(snapshot.id, now).await?;

        tx.commit()
            .await
            .map_err(DbError::from)
            .map_err(SyncError::transaction("commit"))?;

        info!(user_id, task_id, version = task.server_version, "Task restored");
        Ok(task)
    }

    /// Permanently removes snapshots older than the retention period.
    pub async fn purge_expired(&self) -> SyncResult<u64> {
        let cutoff = self.clock.now_millis() - self.settings.undo_retention();
        let mut conn = self.db.acquire().await?;
        let purged = UndoLedger::new(&mut conn).purge_older_than(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "Purged undo snapshots");
        }
        Ok(purged)
    }
}

// =============================================================================
// Background Sweep
// =============================================================================

/// Periodically purges old undo snapshots.
pub struct UndoSweeper {
    service: Arc<UndoService>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running sweeper.
#[derive(Clone)]
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SweeperHandle {
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal("Sweeper shutdown channel closed".into()))
    }
}

impl UndoSweeper {
    pub fn new(service: Arc<UndoService>, interval: Duration) -> (Self, SweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sweeper = UndoSweeper {
            service,
            interval,
            shutdown_rx,
        };
        (sweeper, SweeperHandle { shutdown_tx })
    }

    /// Runs the sweep loop. The first sweep happens immediately.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Undo sweeper starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.service.purge_expired().await {
                        error!(?e, "Failed to purge undo snapshots");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Undo sweeper shutting down");
                    break;
                }
            }
        }

        info!("Undo sweeper stopped");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{file_harness, harness, insert, Harness};
    use chrono::Duration as ChronoDuration;
    use taskflow_core::protocol::SyncRequest;

    async fn seed(h: &Harness, titles: &[&str]) -> Vec<i64> {
        let changes = titles
            .iter()
            .enumerate()
            .map(|(i, title)| insert(&format!("t{}", i), title))
            .collect();
        let response = h
            .coordinator
            .sync(
                "u1",
                SyncRequest {
                    last_sync_at: None,
                    changes,
                },
            )
            .await
            .unwrap();
        response.client_changes.iter().map(|c| c.server_id).collect()
    }

    async fn task(h: &Harness, id: i64) -> Task {
        let mut conn = h.db.acquire().await.unwrap();
        TaskRepository::new(&mut conn)
            .find_owned("u1", id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_batch_delete_counts_only_live_owned_tasks() {
        let h = harness().await;
        let ids = seed(&h, &["a", "b"]).await;

        let response = h
            .undo
            .batch_delete("u1", &[ids[0], ids[0], ids[1], 9_999])
            .await
            .unwrap();
        assert_eq!(response.count, 2);
        assert!(response.can_undo);
        assert_eq!(response.undo_window_seconds, 30);

        assert!(task(&h, ids[0]).await.is_deleted);
        assert_eq!(task(&h, ids[0]).await.server_version, 2);

        let again = h.undo.batch_delete("u1", &ids).await.unwrap();
        assert_eq!(again.count, 0);
        assert_eq!(h.undo.batch_delete("u2", &ids).await.unwrap().count, 0);
        assert_eq!(h.undo.batch_delete("u1", &[]).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_restore_inside_window_and_expiry_after() {
        let h = harness().await;
        let ids = seed(&h, &["Ten", "Eleven"]).await;
        h.undo.batch_delete("u1", &ids).await.unwrap();

        h.clock.advance(ChronoDuration::seconds(29));
        let restored = h.undo.restore("u1", ids[0]).await.unwrap();
        assert_eq!(restored.title, "Ten");
        assert!(!restored.is_deleted);
        assert_eq!(restored.server_version, 3);

        h.clock.advance(ChronoDuration::seconds(2));
        let err = h.undo.restore("u1", ids[1]).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::UndoExpired {
                window_secs: 30,
                ..
            }
        ));
        assert!(task(&h, ids[1]).await.is_deleted);

        // the expired snapshot was retired
        let err = h.undo.restore("u1", ids[1]).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_window_edge_has_millisecond_precision() {
        let h = harness().await;
        let ids = seed(&h, &["early", "late"]).await;
        h.undo.batch_delete("u1", &ids).await.unwrap();

        h.clock.advance(ChronoDuration::milliseconds(29_900));
        assert!(h.undo.restore("u1", ids[0]).await.is_ok());

        h.clock.advance(ChronoDuration::milliseconds(200));
        assert!(matches!(
            h.undo.restore("u1", ids[1]).await,
            Err(SyncError::UndoExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_restore_requires_owner_and_snapshot() {
        let h = harness().await;
        let ids = seed(&h, &["mine"]).await;

        assert!(matches!(
            h.undo.restore("u1", ids[0]).await,
            Err(SyncError::NotFound { .. })
        ));

        h.undo.batch_delete("u1", &ids).await.unwrap();
        assert!(matches!(
            h.undo.restore("u2", ids[0]).await,
            Err(SyncError::NotFound { .. })
        ));

        h.undo.restore("u1", ids[0]).await.unwrap();
        assert!(matches!(
            h.undo.restore("u1", ids[0]).await,
            Err(SyncError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_delete_restores_latest_snapshot() {
        let h = harness().await;
        let ids = seed(&h, &["first"]).await;

        h.undo.batch_delete("u1", &ids).await.unwrap();
        h.undo.restore("u1", ids[0]).await.unwrap();

        h.clock.advance(ChronoDuration::seconds(10));
        h.undo.batch_delete("u1", &ids).await.unwrap();
        h.clock.advance(ChronoDuration::seconds(25));

        let restored = h.undo.restore("u1", ids[0]).await.unwrap();
        assert_eq!(restored.server_version, 5);
    }

    #[tokio::test]
    async fn test_concurrent_batch_deletes_both_commit() {
        let dir = tempfile::tempdir().unwrap();
        let h = file_harness(&dir).await;
        let ids = seed(&h, &["a", "b"]).await;

        let (first, second) = tokio::join!(
            h.undo.batch_delete("u1", &ids[..1]),
            h.undo.batch_delete("u1", &ids[1..]),
        );
        assert_eq!(first.unwrap().count, 1);
        assert_eq!(second.unwrap().count, 1);

        let (first, second) = tokio::join!(h.undo.restore("u1", ids[0]), h.undo.restore("u1", ids[1]));
        assert_eq!(first.unwrap().server_version, 3);
        assert_eq!(second.unwrap().server_version, 3);
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let h = harness().await;
        let ids = seed(&h, &["old"]).await;
        h.undo.batch_delete("u1", &ids).await.unwrap();

        h.clock.advance(ChronoDuration::days(29));
        assert_eq!(h.undo.purge_expired().await.unwrap(), 0);

        h.clock.advance(ChronoDuration::days(2));
        assert_eq!(h.undo.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let h = harness().await;
        let (sweeper, handle) = UndoSweeper::new(Arc::new(h.undo), Duration::from_secs(3600));
        let join = tokio::spawn(sweeper.run());

        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
    }
}
