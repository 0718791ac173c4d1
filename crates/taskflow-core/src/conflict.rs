//! # Conflict Detection
//!
//! Optimistic concurrency: a client's change carries the `server_version`
//! it last saw. If that still equals the stored version nobody else wrote in
//! between and the change applies as-is; otherwise it is a conflict and a
//! resolution path is taken.
//!
//! ```text
//!                   client_version == server_version ?
//!                         │                 │
//!                        yes                no
//!                         ▼                 ▼
//!  update:          normal-apply      intelligent merge
//!  delete:          soft-delete       soft-delete + delete_while_modified
//!  delete (already deleted):   no-op, regardless of versions
//! ```

use crate::types::Task;
use crate::MAX_TITLE_LEN;

/// Outcome of comparing a client version with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// The client saw the latest version.
    Current,
    /// Someone else wrote since the client last synced.
    Stale { client_version: i64, server_version: i64 },
}

impl VersionCheck {
    pub fn compare(client_version: i64, server_version: i64) -> Self {
        if client_version == server_version {
            VersionCheck::Current
        } else {
            VersionCheck::Stale {
                client_version,
                server_version,
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, VersionCheck::Stale { .. })
    }
}

/// What a delete operation should do to a stored task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDecision {
    /// Already soft-deleted: nothing changes and no conflict is logged.
    AlreadyDeleted,
    /// Versions match: plain soft-delete.
    Delete,
    /// Versions differ: the delete still wins, and the conflict is logged.
    DeleteOverConcurrentEdit { client_version: i64, server_version: i64 },
}

impl DeleteDecision {
    pub fn decide(task: &Task, client_version: i64) -> Self {
        if task.is_deleted {
            return DeleteDecision::AlreadyDeleted;
        }
        match VersionCheck::compare(client_version, task.server_version) {
            VersionCheck::Current => DeleteDecision::Delete,
            VersionCheck::Stale {
                client_version,
                server_version,
            } => DeleteDecision::DeleteOverConcurrentEdit {
                client_version,
                server_version,
            },
        }
    }
}

/// Naming for the record created when an insert collides on `local_id`.
///
/// Both records survive: the existing one untouched, the new one under a
/// derived local id and a title that points at the record it collided with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateNames {
    pub local_id: String,
    pub title: String,
}

impl DuplicateNames {
    /// ## Arguments
    /// * `local_id` - The colliding client local id
    /// * `title` - The title the client sent
    /// * `existing_id` - Server id of the task already holding `local_id`
    /// * `suffix` - Random disambiguator (from a CSPRNG)
    pub fn derive(local_id: &str, title: &str, existing_id: i64, suffix: &str) -> Self {
        let marker = format!(" (duplicate of #{})", existing_id);
        let room = MAX_TITLE_LEN.saturating_sub(marker.chars().count());
        let base: String = title.chars().take(room).collect();
        DuplicateNames {
            local_id: format!("{}-{}", local_id, suffix),
            title: format!("{}{}", base, marker),
        }
    }
}
