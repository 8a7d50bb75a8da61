//! Message repository.
//!
//! Status is stored as an integer rank so every transition can be written as
//! a forward-only conditional update (`status < target`). No query in this
//! module ever lowers a status.

use super::{DbError, from_millis};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Storage rank. Higher ranks are later in the lifecycle.
    pub fn rank(self) -> i64 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Self::Sent),
            1 => Some(Self::Delivered),
            2 => Some(Self::Read),
            _ => None,
        }
    }
}

/// A persisted message, as pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

type MessageRow = (i64, String, String, String, i64, i64);

fn into_message(row: MessageRow) -> Result<StoredMessage, DbError> {
    let (id, from, to, body, status, created_at) = row;
    let status = DeliveryStatus::from_rank(status)
        .ok_or_else(|| DbError::Corrupt(format!("message {} has status rank {}", id, status)))?;
    Ok(StoredMessage {
        id,
        from,
        to,
        body,
        status,
        created_at: from_millis(created_at)?,
    })
}

/// Repository for message operations.
pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    /// Create a new message repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new message in the `sent` state.
    pub async fn insert(&self, from: &str, to: &str, body: &str) -> Result<StoredMessage, DbError> {
        let created_at = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO messages (from_name, to_name, body, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(body)
        .bind(DeliveryStatus::Sent.rank())
        .bind(created_at)
        .execute(self.pool)
        .await?;

        Ok(StoredMessage {
            id: result.last_insert_rowid(),
            from: from.to_string(),
            to: to.to_string(),
            body: body.to_string(),
            status: DeliveryStatus::Sent,
            created_at: from_millis(created_at)?,
        })
    }

    /// Fetch a single message by id.
    pub async fn get(&self, id: i64) -> Result<Option<StoredMessage>, DbError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, from_name, to_name, body, status, created_at
            FROM messages
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(into_message).transpose()
    }

    /// Move one message forward to `target`.
    ///
    /// Returns `true` only for the caller whose update actually changed the
    /// row; a message already at or past `target` is left untouched.
    pub async fn advance(&self, id: i64, target: DeliveryStatus) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE messages SET status = ? WHERE id = ? AND status < ?")
            .bind(target.rank())
            .bind(id)
            .bind(target.rank())
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark every `sent` message addressed to `recipient` as delivered.
    ///
    /// Returns `(message id, sender)` pairs for the messages this call moved,
    /// in creation order.
    pub async fn deliver_pending(&self, recipient: &str) -> Result<Vec<(i64, String)>, DbError> {
        let mut moved = sqlx::query_as::<_, (i64, String, i64)>(
            r#"
            UPDATE messages SET status = ?
            WHERE to_name = ? AND status = ?
            RETURNING id, from_name, created_at
            "#,
        )
        .bind(DeliveryStatus::Delivered.rank())
        .bind(recipient)
        .bind(DeliveryStatus::Sent.rank())
        .fetch_all(self.pool)
        .await?;

        // RETURNING order is unspecified.
        moved.sort_by_key(|(id, _, created_at)| (*created_at, *id));
        Ok(moved.into_iter().map(|(id, from, _)| (id, from)).collect())
    }

    /// Mark every unread message from `from` to `to` as read.
    ///
    /// Returns the ids this call moved, in creation order. Empty when there
    /// was nothing left to mark.
    pub async fn mark_read(&self, from: &str, to: &str) -> Result<Vec<i64>, DbError> {
        let mut moved = sqlx::query_as::<_, (i64, i64)>(
            r#"
            UPDATE messages SET status = ?
            WHERE from_name = ? AND to_name = ? AND status < ?
            RETURNING id, created_at
            "#,
        )
        .bind(DeliveryStatus::Read.rank())
        .bind(from)
        .bind(to)
        .bind(DeliveryStatus::Read.rank())
        .fetch_all(self.pool)
        .await?;

        moved.sort_by_key(|(id, created_at)| (*created_at, *id));
        Ok(moved.into_iter().map(|(id, _)| id).collect())
    }

    /// Every message `name` sent or received, oldest first.
    pub async fn history(&self, name: &str) -> Result<Vec<StoredMessage>, DbError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, from_name, to_name, body, status, created_at
            FROM messages
            WHERE from_name = ? OR to_name = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(name)
        .bind(name)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(into_message).collect()
    }
}
