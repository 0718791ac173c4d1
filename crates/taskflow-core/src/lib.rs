//! # taskflow-core: Pure Domain Logic for Taskflow
//!
//! Everything the sync engine decides without touching storage lives here:
//! task types, the sync wire format, ingress validation, the version-based
//! conflict detector and the field-level merge policy.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Taskflow Architecture                            │
//! │                                                                         │
//! │  Browser / mobile clients (offline queues of delta operations)          │
//! │                                │ POST /v1/sync                          │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    apps/sync-server (axum)                      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    taskflow-sync (coordinator)                  │   │
//! │  └───────────────┬─────────────────────────────┬───────────────────┘   │
//! │  ┌───────────────▼───────────────┐   ┌─────────▼───────────────────┐   │
//! │  │  ★ taskflow-core (THIS) ★     │   │  taskflow-db (SQLite)       │   │
//! │  │  types · delta · conflict     │   │                             │   │
//! │  │  merge · validation           │   │                             │   │
//! │  └───────────────────────────────┘   └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use taskflow_core::conflict::VersionCheck;
//!
//! assert_eq!(VersionCheck::compare(3, 3), VersionCheck::Current);
//! assert!(VersionCheck::compare(3, 4).is_stale());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod delta;
pub mod error;
pub mod merge;
pub mod protocol;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Seconds during which a batch-deleted task can be restored.
pub const UNDO_WINDOW_SECS: i64 = 30;

/// Days an undo snapshot is retained before the sweeper removes it.
pub const UNDO_RETENTION_DAYS: i64 = 30;

/// Maximum operations accepted in one sync request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 255;

/// Maximum description length in characters.
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

/// Maximum client-chosen local identifier length.
pub const MAX_LOCAL_ID_LEN: usize = 128;
