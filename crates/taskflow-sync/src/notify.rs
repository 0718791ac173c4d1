//! # Outcome Notifications
//!
//! ## Delivery Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SyncCoordinator (after commit)                                         │
//! │       │  notifier.notify(..)   never awaits, never blocks               │
//! │       ▼                                                                 │
//! │  ChannelNotifier ── try_send ──► bounded mpsc queue                     │
//! │                                        │                                │
//! │                                        ▼                                │
//! │  NotificationDispatcher (spawned) ──► notifications table               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A full or closed queue drops the notification. The sync outcome is
//! already committed at that point; the caller only logs the failure.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use taskflow_core::{Notification, NotificationKind, NotificationPriority};
use taskflow_db::NotificationRepository;

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification queue is full")]
    QueueFull,

    #[error("notification queue is closed")]
    Closed,
}

/// Fire-and-forget delivery of a user notification.
pub trait Notifier: Send + Sync + fmt::Debug {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

// =============================================================================
// Outcome Notifications
// =============================================================================

/// Builds the single notification that summarizes one sync batch.
///
/// Failure outranks conflicts, which outrank success.
pub fn batch_outcome(user_id: &str, applied: usize, conflicts: usize, failed: usize) -> Notification {
    let (kind, title, content, priority) = if failed > 0 {
        (
            NotificationKind::SyncFailed,
            "Sync partially failed",
            format!(
                "{} of {} changes could not be applied and will be retried",
                failed,
                applied + failed
            ),
            NotificationPriority::High,
        )
    } else if conflicts > 0 {
        (
            NotificationKind::SyncConflict,
            "Sync completed with conflicts",
            format!(
                "{} conflicts were resolved automatically across {} changes",
                conflicts, applied
            ),
            NotificationPriority::High,
        )
    } else {
        (
            NotificationKind::SyncSuccess,
            "Sync completed",
            format!("{} changes applied", applied),
            NotificationPriority::Normal,
        )
    };

    Notification {
        user_id: user_id.to_string(),
        kind,
        title: title.to_string(),
        content,
        priority,
    }
}

// =============================================================================
// Channel Notifier
// =============================================================================

#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    /// Creates a notifier and the receiving end for a dispatcher.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChannelNotifier { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Drains the notification queue into the inbox table.
pub struct NotificationDispatcher {
    rx: mpsc::Receiver<Notification>,
    inbox: NotificationRepository,
    clock: Arc<dyn Clock>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl DispatcherHandle {
    /// Triggers graceful shutdown. Queued notifications are still stored.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal("Dispatcher shutdown channel closed".into()))
    }
}

impl NotificationDispatcher {
    pub fn new(
        rx: mpsc::Receiver<Notification>,
        inbox: NotificationRepository,
        clock: Arc<dyn Clock>,
    ) -> (Self, DispatcherHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let dispatcher = NotificationDispatcher {
            rx,
            inbox,
            clock,
            shutdown_rx,
        };
        (dispatcher, DispatcherHandle { shutdown_tx })
    }

    /// Runs until shutdown or until every notifier is dropped.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!("Notification dispatcher starting");

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(notification) => self.store(notification).await,
                    None => {
                        debug!("All notifiers dropped");
                        break;
                    }
                },

                _ = self.shutdown_rx.recv() => {
                    info!("Notification dispatcher shutting down");
                    self.rx.close();
                    while let Some(notification) = self.rx.recv().await {
                        self.store(notification).await;
                    }
                    break;
                }
            }
        }

        info!("Notification dispatcher stopped");
    }

    async fn store(&self, notification: Notification) {
        match self.inbox.insert(&notification, self.clock.now_millis()).await {
            Ok(stored) => debug!(
                id = stored.id,
                user_id = %notification.user_id,
                kind = ?notification.kind,
                "Notification stored"
            ),
            Err(e) => {
                if e.is_transient() {
                    warn!(?e, user_id = %notification.user_id, "Notification dropped");
                } else {
                    error!(?e, user_id = %notification.user_id, "Failed to store notification");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::DateTime;
    use taskflow_db::{Database, DbConfig};

    #[test]
    fn test_outcome_precedence() {
        assert_eq!(batch_outcome("u", 3, 0, 0).kind, NotificationKind::SyncSuccess);
        assert_eq!(batch_outcome("u", 3, 0, 0).priority, NotificationPriority::Normal);
        assert_eq!(batch_outcome("u", 3, 2, 0).kind, NotificationKind::SyncConflict);
        assert_eq!(batch_outcome("u", 3, 2, 0).priority, NotificationPriority::High);

        let failed = batch_outcome("u", 4, 2, 1);
        assert_eq!(failed.kind, NotificationKind::SyncFailed);
        assert!(failed.content.starts_with("1 of 5"));
    }

    #[test]
    fn test_full_queue_is_reported() {
        let (notifier, _rx) = ChannelNotifier::channel(1);
        assert!(notifier.notify(batch_outcome("u", 1, 0, 0)).is_ok());
        assert_eq!(
            notifier.notify(batch_outcome("u", 1, 0, 0)),
            Err(NotifyError::QueueFull)
        );
    }

    #[test]
    fn test_closed_queue_is_reported() {
        let (notifier, rx) = ChannelNotifier::channel(1);
        drop(rx);
        assert_eq!(
            notifier.notify(batch_outcome("u", 1, 0, 0)),
            Err(NotifyError::Closed)
        );
    }

    #[tokio::test]
    async fn test_dispatcher_stores_until_notifiers_drop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_750_000_000, 0).unwrap(),
        ));
        let (notifier, rx) = ChannelNotifier::channel(8);
        let (dispatcher, _handle) = NotificationDispatcher::new(rx, db.notifications(), clock);

        notifier.notify(batch_outcome("u1", 2, 0, 0)).unwrap();
        notifier.notify(batch_outcome("u1", 2, 1, 0)).unwrap();
        drop(notifier);

        dispatcher.run().await;

        let stored = db.notifications().recent_for_user("u1", 10).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_750_000_000, 0).unwrap(),
        ));
        let (notifier, rx) = ChannelNotifier::channel(8);
        let (dispatcher, handle) = NotificationDispatcher::new(rx, db.notifications(), clock);

        notifier.notify(batch_outcome("u1", 1, 0, 1)).unwrap();
        handle.shutdown().await.unwrap();
        dispatcher.run().await;

        let stored = db.notifications().recent_for_user("u1", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].notification.kind, NotificationKind::SyncFailed);
        assert_eq!(notifier.notify(batch_outcome("u1", 1, 0, 0)), Err(NotifyError::Closed));
    }
}
