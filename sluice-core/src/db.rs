//! SQLite handles for the two logical databases.
//!
//! The service keeps video records and the transcoding task journal in
//! separate database files so either can be wiped or inspected on its own.
//! Each module owning a table exports its initial migration; `Db::migrate_up`
//! applies it idempotently at startup.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Pooled connection to one SQLite database file.
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Opens (and creates, if missing) the database at `path`.
    ///
    /// # Errors
    ///
    /// - `sqlx::Error` - file cannot be created or opened
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!(path = %path.display(), "opened database");
        Ok(Self { pool })
    }

    /// Applies a migration script. Scripts are written to be re-runnable,
    /// so startup can always call this.
    ///
    /// # Errors
    ///
    /// - `sqlx::Error` - a statement in the script failed
    pub async fn migrate_up(&self, sql: &str) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Connection pool for query execution.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
