//! # taskflow-sync: Delta Sync Engine
//!
//! Reconciles batches of offline task edits with the server copy.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                 SyncCoordinator (one tx per batch)               │   │
//! │  │                                                                  │   │
//! │  │  validate ──► savepoint per op ──► server changes ──► commit     │   │
//! │  └───────────────────────────┬──────────────────────────────────────┘   │
//! │                              │                                          │
//! │         ┌────────────────────┼─────────────────────┐                    │
//! │         ▼                    ▼                     ▼                    │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐     │
//! │  │ operations     │  │ MergeResolver  │  │ Notifier               │     │
//! │  │                │  │ (core)         │  │                        │     │
//! │  │ insert/update/ │  │ title: server  │  │ ChannelNotifier ──►    │     │
//! │  │ delete against │  │ description:   │  │ NotificationDispatcher │     │
//! │  │ a savepoint    │  │ concatenated   │  │ ──► inbox table        │     │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘     │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐                                 │
//! │  │ UndoService    │  │ UndoSweeper    │                                 │
//! │  │ batch delete / │  │ purges old     │                                 │
//! │  │ restore (30s)  │  │ snapshots      │                                 │
//! │  └────────────────┘  └────────────────┘                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`coordinator`] - `SyncCoordinator`, the batch entry point
//! - [`operations`] - Per-operation appliers (crate-private)
//! - [`undo`] - Batch delete, restore and the retention sweep
//! - [`notify`] - Outcome notifications
//! - [`clock`] - Injectable time source
//! - [`config`] - Engine settings
//! - [`error`] - Sync error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notify;
mod operations;
pub mod undo;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncSettings;
pub use coordinator::SyncCoordinator;
pub use error::{SyncError, SyncResult};
pub use notify::{ChannelNotifier, DispatcherHandle, NotificationDispatcher, Notifier, NotifyError};
pub use undo::{SweeperHandle, UndoService, UndoSweeper};
