//! # Sync Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Rejected before any write        Reported to the caller               │
//! │  ─────────────────────────        ─────────────────────                 │
//! │  InvalidRequest (400)             NotFound (404)                        │
//! │                                   UndoExpired (410)                     │
//! │                                                                         │
//! │  Whole call discarded             Never surfaced as errors              │
//! │  ────────────────────             ────────────────────────              │
//! │  Transaction (503, retry batch)   conflicts, per-operation failures     │
//! │  Database (503 if transient)      (both live in SyncResponse)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use taskflow_core::CoreError;
use taskflow_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Request Errors
    // =========================================================================
    /// The batch failed validation. Nothing was written.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] CoreError),

    /// Target missing or owned by another user.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: i64 },

    /// Neither a server id nor a known local id was supplied.
    #[error("No task with local id {local_id}")]
    UnknownLocalId { local_id: String },

    /// Updates never revive a soft-deleted task.
    #[error("Task {task_id} is deleted")]
    TaskDeleted { task_id: i64 },

    /// The restore came after the undo window closed.
    #[error("Undo window of {window_secs}s expired for task {task_id}")]
    UndoExpired { task_id: i64, window_secs: i64 },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// The enclosing transaction could not begin or commit. Every effect
    /// of the call was discarded.
    #[error("Transaction failed during {stage}: {source}")]
    Transaction {
        stage: &'static str,
        #[source]
        source: DbError,
    },

    /// A storage call failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn not_found(entity: impl Into<String>, id: i64) -> Self {
        SyncError::NotFound {
            entity: entity.into(),
            id,
        }
    }

    pub(crate) fn transaction(stage: &'static str) -> impl FnOnce(DbError) -> SyncError {
        move |source| SyncError::Transaction { stage, source }
    }

    /// Returns true if the caller should resend the whole request.
    ///
    /// ## Retryable Errors
    /// - Transaction begin/commit failures
    /// - Transient storage errors (busy, pool exhausted, lost connection)
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transaction { .. } => true,
            SyncError::Database(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Transaction {
            stage: "commit",
            source: DbError::Internal("disk full".into()),
        }
        .is_retryable());
        assert!(SyncError::Database(DbError::Busy("locked".into())).is_retryable());

        assert!(!SyncError::Database(DbError::Internal("bad".into())).is_retryable());
        assert!(!SyncError::not_found("Task", 7).is_retryable());
        assert!(!SyncError::UndoExpired {
            task_id: 7,
            window_secs: 30
        }
        .is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::UndoExpired {
            task_id: 11,
            window_secs: 30,
        };
        assert!(err.to_string().contains("11"));
        assert!(err.to_string().contains("30s"));
    }
}
