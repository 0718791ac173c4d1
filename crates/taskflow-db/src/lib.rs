//! # taskflow-db: Database Layer for Taskflow
//!
//! SQLite storage for tasks, the conflict log, the undo ledger, sync batch
//! records and the notification inbox.
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repositories over a borrowed connection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use taskflow_db::{Database, DbConfig, TaskRepository};
//!
//! let db = Database::new(DbConfig::new("taskflow.db")).await?;
//!
//! let mut tx = db.begin_immediate().await?;
//! let changed = TaskRepository::new(&mut tx).changed_since("user-1", None).await?;
//! tx.commit().await?;
//! ```
//!
//! Repositories borrow a `&mut SqliteConnection`, so the same code runs on
//! a plain pooled connection, a transaction or a savepoint. The caller
//! decides the transaction boundary.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::batch::{BatchCounts, SyncBatchLog, SyncBatchRecord};
pub use repository::conflict::ConflictLog;
pub use repository::notification::NotificationRepository;
pub use repository::task::{NewTask, TaskRepository};
pub use repository::undo::UndoLedger;
