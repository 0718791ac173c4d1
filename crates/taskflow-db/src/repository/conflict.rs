//! # Conflict Log
//!
//! Append-only audit of detected conflicts. The schema rejects UPDATE and
//! DELETE on the table, so this repository only appends and reads.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use taskflow_core::{ConflictReason, ConflictRecord, NewConflict, TaskFields};

use super::{from_millis, to_millis};
use crate::error::DbResult;

macro_rules! conflict_columns {
    () => {
        "id, user_id, local_id, server_id, reason, resolution, merged_data, \
         client_version, server_version, created_at"
    };
}

#[derive(Debug, sqlx::FromRow)]
struct ConflictRow {
    id: i64,
    user_id: String,
    local_id: String,
    server_id: i64,
    reason: ConflictReason,
    resolution: String,
    merged_data: Option<String>,
    client_version: Option<i64>,
    server_version: Option<i64>,
    created_at: i64,
}

impl TryFrom<ConflictRow> for ConflictRecord {
    type Error = serde_json::Error;

    fn try_from(row: ConflictRow) -> Result<Self, Self::Error> {
        let merged_data = row
            .merged_data
            .as_deref()
            .map(serde_json::from_str::<TaskFields>)
            .transpose()?;

        Ok(ConflictRecord {
            id: row.id,
            user_id: row.user_id,
            local_id: row.local_id,
            server_id: row.server_id,
            reason: row.reason,
            resolution: row.resolution,
            merged_data,
            client_version: row.client_version,
            server_version: row.server_version,
            created_at: from_millis(row.created_at),
        })
    }
}

#[derive(Debug)]
pub struct ConflictLog<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ConflictLog<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ConflictLog { conn }
    }

    /// Appends one conflict record.
    pub async fn append(&mut self, conflict: &NewConflict, now: DateTime<Utc>) -> DbResult<ConflictRecord> {
        let merged_data = conflict
            .merged_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row = sqlx::query_as::<_, ConflictRow>(concat!(
            "INSERT INTO conflicts (user_id, local_id, server_id, reason, resolution, \
             merged_data, client_version, server_version, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING ",
            conflict_columns!()
        ))
        .bind(&conflict.user_id)
        .bind(&conflict.local_id)
        .bind(conflict.server_id)
        .bind(conflict.reason)
        .bind(&conflict.resolution)
        .bind(merged_data)
        .bind(conflict.client_version)
        .bind(conflict.server_version)
        .bind(to_millis(now))
        .fetch_one(&mut *self.conn)
        .await?;

        debug!(
            server_id = conflict.server_id,
            reason = %conflict.reason,
            "Conflict recorded"
        );
        Ok(ConflictRecord::try_from(row)?)
    }

    /// Most recent conflicts of a user, newest first.
    pub async fn recent_for_user(&mut self, user_id: &str, limit: i64) -> DbResult<Vec<ConflictRecord>> {
        let rows = sqlx::query_as::<_, ConflictRow>(concat!(
            "SELECT ",
            conflict_columns!(),
            " FROM conflicts WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter()
            .map(|row| ConflictRecord::try_from(row).map_err(Into::into))
            .collect()
    }

    /// All conflicts recorded against one task, oldest first.
    pub async fn for_task(&mut self, user_id: &str, server_id: i64) -> DbResult<Vec<ConflictRecord>> {
        let rows = sqlx::query_as::<_, ConflictRow>(concat!(
            "SELECT ",
            conflict_columns!(),
            " FROM conflicts WHERE user_id = ?1 AND server_id = ?2 ORDER BY id ASC"
        ))
        .bind(user_id)
        .bind(server_id)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter()
            .map(|row| ConflictRecord::try_from(row).map_err(Into::into))
            .collect()
    }
}
