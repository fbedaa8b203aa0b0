//! SQLite pool for the checkpoint database.
//!
//! File-backed databases run in WAL mode with a busy timeout, so a reader
//! (for example `sqlite3` inspecting progress) never blocks a save. The schema
//! lives in `migrations/` and is embedded at compile time.
//!
//! ```no_run
//! use harvester_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("state/progress.db")).await?;
//! assert_eq!(db.journal_mode().await?, "wal");
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Saves come from one task at a time; a few connections cover readers.
const MAX_CONNECTIONS: u32 = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors opening the checkpoint database.
#[derive(Error, Debug)]
pub enum DbError {
    /// Connecting or configuring the connection failed.
    #[error("failed to open checkpoint database: {0}")]
    Connection(#[from] sqlx::Error),

    /// The embedded schema could not be applied.
    #[error("failed to apply checkpoint schema: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The parent directory of the database file could not be created.
    #[error("failed to create database directory {path}: {source}")]
    Directory {
        /// Directory that could not be created.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Pooled connection to the checkpoint database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database file at `db_path`, creating it and its parent
    /// directory when missing, then applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Directory`] if the parent directory cannot be
    /// created, [`DbError::Connection`] if the file cannot be opened, or
    /// [`DbError::Migration`] if the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DbError::Directory {
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        Self::migrated(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// The pool holds a single connection: every `:memory:` connection
    /// would otherwise see its own empty database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] or [`DbError::Migration`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("checkpoint schema up to date");
        Ok(Self { pool })
    }

    /// Returns the connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the active journal mode in lowercase (`wal`, `memory`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the pragma query fails.
    pub async fn journal_mode(&self) -> Result<String, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.to_ascii_lowercase())
    }

    /// Closes every connection in the pool.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
