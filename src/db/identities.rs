//! Identity repository.
//!
//! Handles identity creation, legacy credential backfill and the durable
//! mirror of presence (online flag and last-seen time).

use super::{DbError, from_millis};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// A registered identity.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    /// Argon2 PHC string. `None` for legacy accounts that predate credentials.
    pub password_hash: Option<String>,
    #[allow(dead_code)] // DB mirror - live presence is read from the session registry
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    #[allow(dead_code)] // DB field
    pub created_at: DateTime<Utc>,
}

type IdentityRow = (String, Option<String>, bool, Option<i64>, i64);

fn into_identity(row: IdentityRow) -> Result<Identity, DbError> {
    let (name, password_hash, online, last_seen_at, created_at) = row;
    Ok(Identity {
        name,
        password_hash,
        online,
        last_seen_at: last_seen_at.map(from_millis).transpose()?,
        created_at: from_millis(created_at)?,
    })
}

/// Repository for identity operations.
pub struct IdentityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> IdentityRepository<'a> {
    /// Create a new identity repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Find an identity by its exact (case-sensitive) name.
    pub async fn find(&self, name: &str) -> Result<Option<Identity>, DbError> {
        let row = sqlx::query_as::<_, IdentityRow>(
            r#"
            SELECT name, password_hash, online, last_seen_at, created_at
            FROM identities
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?;

        row.map(into_identity).transpose()
    }

    /// Create a new, offline identity.
    ///
    /// Passing `None` for the hash creates a legacy record that will adopt the
    /// credential supplied on its next join.
    pub async fn create(
        &self,
        name: &str,
        password_hash: Option<&str>,
    ) -> Result<Identity, DbError> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO identities (name, password_hash, online, last_seen_at, created_at)
            VALUES (?, ?, 0, NULL, ?)
            "#,
        )
        .bind(name)
        .bind(password_hash)
        .bind(now.timestamp_millis())
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return DbError::IdentityExists(name.to_string());
            }
            DbError::from(e)
        })?;

        Ok(Identity {
            name: name.to_string(),
            password_hash: password_hash.map(String::from),
            online: false,
            last_seen_at: None,
            created_at: from_millis(now.timestamp_millis())?,
        })
    }

    /// Store a credential on a legacy identity that has none.
    ///
    /// Returns `false` if the identity already had a credential (the backfill
    /// happens at most once).
    pub async fn backfill_credential(
        &self,
        name: &str,
        password_hash: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE identities SET password_hash = ? WHERE name = ? AND password_hash IS NULL",
        )
        .bind(password_hash)
        .bind(name)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record that the identity now has a live session.
    pub async fn mark_online(&self, name: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE identities SET online = 1, last_seen_at = NULL WHERE name = ?")
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Record that the identity went offline at `at`.
    pub async fn mark_offline(&self, name: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        sqlx::query("UPDATE identities SET online = 0, last_seen_at = ? WHERE name = ?")
            .bind(at.timestamp_millis())
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// All known identities in registration order.
    pub async fn list(&self) -> Result<Vec<Identity>, DbError> {
        let rows = sqlx::query_as::<_, IdentityRow>(
            r#"
            SELECT name, password_hash, online, last_seen_at, created_at
            FROM identities
            ORDER BY rowid ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(into_identity).collect()
    }

    /// Mark every identity still flagged online as offline at `at`.
    ///
    /// Run once at startup: the session registry starts empty, so any online
    /// flag left behind by an unclean shutdown is stale.
    pub async fn reset_presence(&self, at: DateTime<Utc>) -> Result<u64, DbError> {
        let result =
            sqlx::query("UPDATE identities SET online = 0, last_seen_at = ? WHERE online = 1")
                .bind(at.timestamp_millis())
                .execute(self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
