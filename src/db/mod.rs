//! Durable storage on SQLite.
//!
//! Two repositories borrow the pool: [`IdentityRepository`] for names,
//! credentials and the presence mirror, [`MessageRepository`] for messages
//! and their delivery status.

mod identities;
mod messages;

pub use identities::{Identity, IdentityRepository};
pub use messages::{DeliveryStatus, MessageRepository, StoredMessage};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),
    #[error("identity already exists: {0}")]
    IdentityExists(String),
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

/// Shared handle to the identity and message stores.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

impl Database {
    /// Open (or create) the store at `path` and bring its schema up to date.
    ///
    /// `:memory:` yields a private in-memory store.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            open_memory().await?
        } else {
            open_file(path).await?
        };
        info!(path = %path, "Database connected");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::Migration)?;
        debug!("Migrations applied");

        tune(&pool).await?;
        Ok(Self { pool })
    }

    /// Cheap connectivity probe for health checks.
    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Close every pooled connection. Used on shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get identity repository.
    pub fn identities(&self) -> IdentityRepository<'_> {
        IdentityRepository::new(&self.pool)
    }

    /// Get message repository.
    pub fn messages(&self) -> MessageRepository<'_> {
        MessageRepository::new(&self.pool)
    }
}

/// A uniquely named shared-cache database living as long as its pool.
async fn open_memory() -> Result<SqlitePool, DbError> {
    let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
    let uri = format!(
        "file:parley-memdb-{}-{}?mode=memory&cache=shared",
        std::process::id(),
        id
    );
    let options = SqliteConnectOptions::new()
        .filename(&uri)
        .shared_cache(true)
        .create_if_missing(true);

    // SQLite drops a memory database with its last connection, so the single
    // connection is never reaped.
    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(None)
        .connect_with(options)
        .await?)
}

async fn open_file(path: &str) -> Result<SqlitePool, DbError> {
    if let Some(dir) = Path::new(path).parent()
        && !dir.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        warn!(path = %dir.display(), error = %e, "Cannot create database directory");
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    Ok(SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .test_before_acquire(true)
        .connect_with(options)
        .await?)
}

/// Journal settings plus a startup integrity check.
async fn tune(pool: &SqlitePool) -> Result<(), DbError> {
    // Readers (history, roster) keep going while status updates commit.
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;

    let verdict: String = sqlx::query_scalar("PRAGMA integrity_check")
        .fetch_one(pool)
        .await?;
    if verdict != "ok" {
        error!(verdict = %verdict, "Database integrity check failed");
        return Err(DbError::Corrupt(format!("integrity check: {}", verdict)));
    }
    Ok(())
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Sqlx(err)
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err)
    }
}

/// Convert stored unix milliseconds back into a UTC timestamp.
pub(crate) fn from_millis(ms: i64) -> Result<chrono::DateTime<chrono::Utc>, DbError> {
    chrono::DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Corrupt(format!("timestamp out of range: {}", ms)))
}
