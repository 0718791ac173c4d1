//! # Field-Level Merge
//!
//! When an update arrives with a stale version the server does not pick a
//! whole-record winner. Each field has its own rule:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────────────────┐
//! │ field        │ rule                                                     │
//! ├──────────────┼──────────────────────────────────────────────────────────┤
//! │ title        │ server value always wins                                 │
//! │ description  │ both non-empty and different → both kept, labelled       │
//! │              │ otherwise the non-empty one                              │
//! │ status       │ higher rank under StatusRanking wins                     │
//! │ priority     │ client value if supplied, else server                    │
//! │ due_at       │ client value if supplied, else server                    │
//! └──────────────┴──────────────────────────────────────────────────────────┘
//! ```
//!
//! The merge is deterministic: the same inputs always give the same record.

use serde::{Deserialize, Serialize};

use crate::delta::TaskPatch;
use crate::error::CoreError;
use crate::types::{TaskFields, TaskStatus};

/// Label prefixed to the server's text when descriptions are combined.
pub const SERVER_LABEL: &str = "server update";
/// Label prefixed to the client's text when descriptions are combined.
pub const CLIENT_LABEL: &str = "client update";

// =============================================================================
// Status Ranking
// =============================================================================

/// Total order over task statuses, lowest first.
///
/// The default order is `todo < in_progress < done < archived`: a status
/// further along the workflow beats one behind it.
///
/// ## Example
/// ```rust
/// use taskflow_core::merge::StatusRanking;
/// use taskflow_core::TaskStatus;
///
/// let ranking = StatusRanking::default();
/// assert_eq!(ranking.higher(TaskStatus::Done, TaskStatus::Todo), TaskStatus::Done);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TaskStatus>", into = "Vec<TaskStatus>")]
pub struct StatusRanking {
    order: Vec<TaskStatus>,
}

impl StatusRanking {
    /// Builds a ranking from lowest to highest. Every status must appear
    /// exactly once.
    pub fn new(order: Vec<TaskStatus>) -> Result<Self, CoreError> {
        let complete = order.len() == TaskStatus::ALL.len()
            && TaskStatus::ALL.iter().all(|status| order.contains(status));
        if !complete {
            let listed: Vec<&str> = order.iter().map(TaskStatus::as_str).collect();
            return Err(CoreError::InvalidRanking(listed.join(", ")));
        }
        Ok(StatusRanking { order })
    }

    pub fn rank(&self, status: TaskStatus) -> usize {
        self.order
            .iter()
            .position(|s| *s == status)
            .unwrap_or_default()
    }

    /// Returns whichever status ranks higher. Ties return `a`.
    pub fn higher(&self, a: TaskStatus, b: TaskStatus) -> TaskStatus {
        if self.rank(b) > self.rank(a) {
            b
        } else {
            a
        }
    }
}

impl Default for StatusRanking {
    fn default() -> Self {
        StatusRanking {
            order: TaskStatus::ALL.to_vec(),
        }
    }
}

impl TryFrom<Vec<TaskStatus>> for StatusRanking {
    type Error = CoreError;

    fn try_from(order: Vec<TaskStatus>) -> Result<Self, Self::Error> {
        StatusRanking::new(order)
    }
}

impl From<StatusRanking> for Vec<TaskStatus> {
    fn from(ranking: StatusRanking) -> Self {
        ranking.order
    }
}

// =============================================================================
// Merge Resolver
// =============================================================================

/// Result of merging a stale update into the stored fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub fields: TaskFields,
    /// Human-readable summary stored in the conflict log.
    pub resolution: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeResolver {
    ranking: StatusRanking,
}

impl MergeResolver {
    pub fn new(ranking: StatusRanking) -> Self {
        MergeResolver { ranking }
    }

    pub fn ranking(&self) -> &StatusRanking {
        &self.ranking
    }

    /// Merges a stale client patch into the server's current fields.
    ///
    /// ## Arguments
    /// * `server` - Fields currently stored
    /// * `client` - Fields the client supplied
    ///
    /// ## Example
    /// ```rust
    /// use taskflow_core::delta::TaskPatch;
    /// use taskflow_core::merge::MergeResolver;
    /// use taskflow_core::{TaskFields, TaskPriority, TaskStatus};
    ///
    /// let server = TaskFields {
    ///     title: "X".into(),
    ///     description: String::new(),
    ///     status: TaskStatus::Todo,
    ///     priority: TaskPriority::Medium,
    ///     due_at: None,
    /// };
    /// let client = TaskPatch { description: Some("Y".into()), ..Default::default() };
    ///
    /// let merged = MergeResolver::default().merge(&server, &client);
    /// assert_eq!(merged.fields.title, "X");
    /// assert_eq!(merged.fields.description, "Y");
    /// ```
    pub fn merge(&self, server: &TaskFields, client: &TaskPatch) -> MergeOutcome {
        let mut notes = vec!["title kept from server".to_string()];

        let client_description = client.description.as_deref().unwrap_or_default();
        let (description, note) = merge_description(&server.description, client_description);
        notes.push(note.to_string());

        let status = match client.status {
            Some(client_status) => {
                let winner = self.ranking.higher(server.status, client_status);
                if client_status != server.status {
                    notes.push(format!("status resolved to {} by rank", winner));
                }
                winner
            }
            None => server.status,
        };

        let priority = match client.priority {
            Some(priority) => {
                if priority != server.priority {
                    notes.push(format!("priority {} taken from client", priority));
                }
                priority
            }
            None => server.priority,
        };

        let due_at = client.due_at.unwrap_or(server.due_at);

        MergeOutcome {
            fields: TaskFields {
                title: server.title.clone(),
                description,
                status,
                priority,
                due_at,
            },
            resolution: notes.join("; "),
        }
    }
}

/// Combines two descriptions without losing either text.
///
/// Returns the merged text and a short note describing what happened.
pub fn merge_description(server: &str, client: &str) -> (String, &'static str) {
    match (server.is_empty(), client.is_empty()) {
        (true, true) => (String::new(), "descriptions empty"),
        (false, true) => (server.to_string(), "server description kept"),
        (true, false) => (client.to_string(), "client description used"),
        (false, false) if server == client => (server.to_string(), "descriptions identical"),
        (false, false) => (
            format!(
                "{}: {}\n\n{}: {}",
                SERVER_LABEL, server, CLIENT_LABEL, client
            ),
            "descriptions combined",
        ),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskPriority;

    fn server_fields() -> TaskFields {
        TaskFields {
            title: "X".into(),
            description: "server text".into(),
            status: TaskStatus::InProgress,
            priority: TaskPriority::Low,
            due_at: None,
        }
    }

    #[test]
    fn test_title_server_always_wins() {
        let client = TaskPatch {
            title: Some("client title".into()),
            ..Default::default()
        };
        let merged = MergeResolver::default().merge(&server_fields(), &client);
        assert_eq!(merged.fields.title, "X");
    }

    #[test]
    fn test_both_descriptions_survive() {
        let client = TaskPatch {
            description: Some("client text".into()),
            ..Default::default()
        };
        let merged = MergeResolver::default().merge(&server_fields(), &client);
        assert!(merged.fields.description.contains("server text"));
        assert!(merged.fields.description.contains("client text"));
        assert!(merged.fields.description.contains(SERVER_LABEL));
        assert!(merged.fields.description.contains(CLIENT_LABEL));
        assert!(merged.resolution.contains("descriptions combined"));
    }

    #[test]
    fn test_description_single_side() {
        assert_eq!(merge_description("", "Y").0, "Y");
        assert_eq!(merge_description("S", "").0, "S");
        assert_eq!(merge_description("same", "same").0, "same");
    }

    #[test]
    fn test_status_higher_rank_wins_either_direction() {
        let resolver = MergeResolver::default();

        let behind = TaskPatch {
            status: Some(TaskStatus::Todo),
            ..Default::default()
        };
        assert_eq!(
            resolver.merge(&server_fields(), &behind).fields.status,
            TaskStatus::InProgress
        );

        let ahead = TaskPatch {
            status: Some(TaskStatus::Done),
            ..Default::default()
        };
        assert_eq!(
            resolver.merge(&server_fields(), &ahead).fields.status,
            TaskStatus::Done
        );
    }

    #[test]
    fn test_custom_ranking() {
        let ranking = StatusRanking::new(vec![
            TaskStatus::Archived,
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Done,
        ])
        .unwrap();
        assert_eq!(
            ranking.higher(TaskStatus::Archived, TaskStatus::Todo),
            TaskStatus::Todo
        );
    }

    #[test]
    fn test_incomplete_ranking_is_rejected() {
        assert!(StatusRanking::new(vec![TaskStatus::Todo, TaskStatus::Done]).is_err());
        assert!(StatusRanking::new(vec![
            TaskStatus::Todo,
            TaskStatus::Todo,
            TaskStatus::Done,
            TaskStatus::Archived
        ])
        .is_err());
    }

    #[test]
    fn test_ranking_deserializes_from_list() {
        let ranking: StatusRanking =
            serde_json::from_str(r#"["archived","todo","in_progress","done"]"#).unwrap();
        assert_eq!(ranking.rank(TaskStatus::Done), 3);
        assert!(serde_json::from_str::<StatusRanking>(r#"["todo"]"#).is_err());
    }

    #[test]
    fn test_priority_passes_through_from_client() {
        let client = TaskPatch {
            priority: Some(TaskPriority::High),
            ..Default::default()
        };
        let merged = MergeResolver::default().merge(&server_fields(), &client);
        assert_eq!(merged.fields.priority, TaskPriority::High);

        let merged = MergeResolver::default().merge(&server_fields(), &TaskPatch::default());
        assert_eq!(merged.fields.priority, TaskPriority::Low);
    }
}
