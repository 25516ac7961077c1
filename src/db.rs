//! Database connection and schema management.
//!
//! This module provides SQLite database connectivity with:
//! - Connection pool management
//! - WAL mode for concurrent reads
//! - Automatic migration execution
//! - An additive column pass for databases created before the migration
//!   baseline
//!
//! # Example
//!
//! ```no_run
//! use scholarpipe::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("data/cache/scholarpipe.db")).await?;
//! // Use db for queries...
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout. Connections wait this long before SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Columns added after the original schema shipped. Databases created by
/// older builds lack them; the additive pass patches those in place without
/// touching existing rows. CHECK constraints are only applied at table
/// creation, so migrated tables rely on write-side enforcement in the store.
const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("research_articles", "abstract_no_retrieval_reason", "TEXT"),
    ("pdf_downloads", "file_size_bytes", "INTEGER"),
    ("docx_versions", "file_size_bytes", "INTEGER"),
    ("markdown_versions", "file_size_bytes", "INTEGER"),
    ("markdown_versions", "html_version_id", "INTEGER"),
    ("markdown_versions", "source_type", "TEXT DEFAULT 'docx'"),
];

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Database connection wrapper with connection pool.
///
/// Handles SQLite connection pooling, WAL mode configuration,
/// and automatic migration execution.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Creates a new database connection to the specified path.
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode and foreign-key enforcement
    /// 3. Run any pending migrations, then the additive column pass
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        ensure_additive_columns(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// The database exists only for the lifetime of the connection. WAL mode
    /// provides no benefit in memory and is not enabled.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        ensure_additive_columns(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Introspects each known table and adds any missing late-addition column.
///
/// Idempotent: a second run finds every column present and issues nothing.
/// Additions default to NULL so existing rows are preserved as-is.
///
/// # Errors
///
/// Returns `DbError::Connection` when introspection or an ALTER fails.
#[instrument(skip(pool))]
pub async fn ensure_additive_columns(pool: &SqlitePool) -> Result<(), DbError> {
    for (table, column, decl) in ADDITIVE_COLUMNS {
        let columns = table_columns(pool, table).await?;
        if columns.is_empty() {
            // Table absent: migrations create it with the full modern schema.
            continue;
        }
        if !columns.iter().any(|name| name.eq_ignore_ascii_case(column)) {
            debug!(table, column, "adding missing column");
            sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>, DbError> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
}
