//! # Sync Settings
//!
//! Engine tunables. Every field has a serde default, so an empty table (or
//! no table at all) yields the stock behavior.
//!
//! ## Configuration File Format
//! ```toml
//! [sync]
//! max_batch_size = 500
//! undo_window_secs = 30
//! undo_retention_days = 30
//! sweep_interval_secs = 3600
//! notification_queue = 1024
//! status_ranking = ["todo", "in_progress", "done", "archived"]
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use taskflow_core::merge::StatusRanking;
use taskflow_core::{DEFAULT_MAX_BATCH_SIZE, UNDO_RETENTION_DAYS, UNDO_WINDOW_SECS};

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Largest accepted number of changes per sync request.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// How long a batch delete stays restorable.
    #[serde(default = "default_undo_window")]
    pub undo_window_secs: i64,

    /// Age after which undo snapshots are purged, whatever their state.
    #[serde(default = "default_undo_retention")]
    pub undo_retention_days: i64,

    /// Period of the background snapshot sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Capacity of the outcome notification queue.
    #[serde(default = "default_notification_queue")]
    pub notification_queue: usize,

    /// Lowest to highest. Decides status during an intelligent merge.
    #[serde(default)]
    pub status_ranking: StatusRanking,
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_undo_window() -> i64 {
    UNDO_WINDOW_SECS
}

fn default_undo_retention() -> i64 {
    UNDO_RETENTION_DAYS
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_notification_queue() -> usize {
    1024
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            max_batch_size: default_max_batch_size(),
            undo_window_secs: default_undo_window(),
            undo_retention_days: default_undo_retention(),
            sweep_interval_secs: default_sweep_interval(),
            notification_queue: default_notification_queue(),
            status_ranking: StatusRanking::default(),
        }
    }
}

impl SyncSettings {
    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "max_batch_size must be at least 1".into(),
            ));
        }
        if self.undo_window_secs <= 0 {
            return Err(SyncError::InvalidConfig(
                "undo_window_secs must be positive".into(),
            ));
        }
        if self.undo_retention_days * 86_400 < self.undo_window_secs {
            return Err(SyncError::InvalidConfig(
                "undo_retention_days must cover the undo window".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        if self.notification_queue == 0 {
            return Err(SyncError::InvalidConfig(
                "notification_queue must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn undo_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.undo_window_secs)
    }

    pub fn undo_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.undo_retention_days)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_core::TaskStatus;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.max_batch_size, 500);
        assert_eq!(settings.undo_window_secs, 30);
        assert_eq!(settings.undo_retention_days, 30);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{"max_batch_size": 50}"#).unwrap();
        assert_eq!(settings.max_batch_size, 50);
        assert_eq!(settings.undo_window_secs, 30);
        assert_eq!(settings.status_ranking, StatusRanking::default());
    }

    #[test]
    fn test_custom_ranking_must_be_complete() {
        let ok: SyncSettings = serde_json::from_str(
            r#"{"status_ranking": ["archived", "todo", "in_progress", "done"]}"#,
        )
        .unwrap();
        assert_eq!(
            ok.status_ranking.higher(TaskStatus::Archived, TaskStatus::Todo),
            TaskStatus::Todo
        );

        let partial = serde_json::from_str::<SyncSettings>(r#"{"status_ranking": ["todo", "done"]}"#);
        assert!(partial.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let settings = SyncSettings {
            undo_window_secs: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(SyncError::InvalidConfig(_))));
    }
}
