//! Persistent transcoding task journal.
//!
//! The dispatcher distributes work in memory; this journal is what
//! survives a restart. A row per stream records whether its transcoding
//! is pending, running, finished or failed. Admission goes through
//! `journal`, which doubles as the dedup gate: a stream with a live row
//! is not admitted again.

use sqlx::sqlite::SqlitePool;

use crate::db::Db;

/// Schema for the queue database, applied at startup.
pub const INITIAL_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    sd_hash TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    started_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
"#;

/// Lifecycle states of a journaled task.
pub mod status {
    /// Admitted, waiting for a worker.
    pub const PENDING: &str = "pending";
    /// A worker has picked the task up.
    pub const STARTED: &str = "started";
    /// Transcoding finished and the video was registered.
    pub const DONE: &str = "done";
    /// Transcoding failed; eligible for re-admission.
    pub const FAILED: &str = "failed";
}

/// One journaled task.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    /// Row id.
    pub id: i64,
    /// Source identifier of the stream.
    pub url: String,
    /// Canonical stream identifier.
    pub sd_hash: String,
    /// One of the `status` constants.
    pub status: String,
    /// Admission time, epoch milliseconds.
    pub created_at: i64,
    /// Pickup time, epoch milliseconds; unset while pending.
    pub started_at: Option<i64>,
}

/// Journal over the queue database.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
}

impl TaskQueue {
    /// Builds a journal over an already-migrated queue database.
    pub fn new(db: &Db) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Admits a stream for transcoding.
    ///
    /// Returns `true` when a new row was created or a finished/failed row
    /// was reset to pending; `false` when the stream already has a live
    /// row and nothing should be dispatched.
    ///
    /// # Errors
    ///
    /// - `sqlx::Error` - journal write failed
    pub async fn journal(&self, url: &str, sd_hash: &str) -> Result<bool, sqlx::Error> {
        let affected = sqlx::query(
            r#"
            INSERT INTO tasks (url, sd_hash, status, created_at)
            VALUES (?, ?, 'pending', ?)
            ON CONFLICT(sd_hash) DO UPDATE
                SET status = 'pending', created_at = excluded.created_at, started_at = NULL
                WHERE tasks.status IN ('done', 'failed')
            "#,
        )
        .bind(url)
        .bind(sd_hash)
        .bind(now_ms())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    /// True when the stream has a pending or started row.
    ///
    /// # Errors
    ///
    /// - `sqlx::Error` - lookup failed
    pub async fn is_live(&self, sd_hash: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE sd_hash = ? AND status IN ('pending', 'started')",
        )
        .bind(sd_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Marks a task as picked up by a worker.
    ///
    /// # Errors
    ///
    /// - `sqlx::Error` - update failed
    pub async fn mark_started(&self, sd_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET status = 'started', started_at = ? WHERE sd_hash = ?")
            .bind(now_ms())
            .bind(sd_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Marks a task as finished.
    ///
    /// # Errors
    ///
    /// - `sqlx::Error` - update failed
    pub async fn mark_done(&self, sd_hash: &str) -> Result<(), sqlx::Error> {
        self.set_status(sd_hash, status::DONE).await
    }

    /// Marks a task as failed, making it eligible for re-admission.
    ///
    /// # Errors
    ///
    /// - `sqlx::Error` - update failed
    pub async fn mark_failed(&self, sd_hash: &str) -> Result<(), sqlx::Error> {
        self.set_status(sd_hash, status::FAILED).await
    }

    /// Rows that were admitted but not finished, oldest first. Startup
    /// re-dispatches these; a `started` row here means the previous
    /// process died mid-task.
    ///
    /// # Errors
    ///
    /// - `sqlx::Error` - lookup failed
    pub async fn unfinished(&self) -> Result<Vec<TaskRow>, sqlx::Error> {
        sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status IN ('pending', 'started') ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn set_status(&self, sd_hash: &str, status: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET status = ? WHERE sd_hash = ?")
            .bind(status)
            .bind(sd_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_queue(tmp: &std::path::Path) -> TaskQueue {
        let db = Db::open(tmp.join("queue.sqlite")).await.expect("open");
        db.migrate_up(INITIAL_MIGRATION).await.expect("migrate");
        TaskQueue::new(&db)
    }

    #[tokio::test]
    async fn journal_dedups_live_tasks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let queue = test_queue(tmp.path()).await;

        assert!(queue.journal("lbry://a", "hash1").await.expect("journal"));
        assert!(!queue.journal("lbry://a", "hash1").await.expect("journal"));

        queue.mark_started("hash1").await.expect("start");
        assert!(!queue.journal("lbry://a", "hash1").await.expect("journal"));
        assert!(queue.is_live("hash1").await.expect("live"));
    }

    #[tokio::test]
    async fn failed_tasks_can_be_readmitted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let queue = test_queue(tmp.path()).await;

        queue.journal("lbry://a", "hash1").await.expect("journal");
        queue.mark_started("hash1").await.expect("start");
        queue.mark_failed("hash1").await.expect("fail");
        assert!(!queue.is_live("hash1").await.expect("live"));

        assert!(queue.journal("lbry://a", "hash1").await.expect("journal"));
        assert!(queue.is_live("hash1").await.expect("live"));
    }

    #[tokio::test]
    async fn unfinished_lists_pending_and_started() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let queue = test_queue(tmp.path()).await;

        queue.journal("lbry://a", "hash1").await.expect("journal");
        queue.journal("lbry://b", "hash2").await.expect("journal");
        queue.journal("lbry://c", "hash3").await.expect("journal");
        queue.mark_started("hash2").await.expect("start");
        queue.mark_done("hash3").await.expect("done");

        let rows = queue.unfinished().await.expect("unfinished");
        let hashes: Vec<_> = rows.iter().map(|r| r.sd_hash.as_str()).collect();
        assert_eq!(vec!["hash1", "hash2"], hashes);
        assert_eq!(status::STARTED, rows[1].status);
    }
}
