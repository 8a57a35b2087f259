//! SQL layer for video records.

use sqlx::sqlite::SqlitePool;

use super::{AddParams, Video};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Query helpers over the video database. Row ordering encodes the
/// eviction policies: local listings come back oldest-accessed first,
/// remote-only listings fewest-views first.
#[derive(Debug, Clone)]
pub(super) struct Queries {
    pool: SqlitePool,
}

impl Queries {
    pub(super) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(super) async fn add(&self, params: AddParams) -> Result<Video, sqlx::Error> {
        let now = now_ms();
        let video = Video {
            sd_hash: params.sd_hash,
            url: params.url,
            local_path: params.local_path,
            remote_url: params.remote_url,
            size: params.size,
            views: 0,
            created_at: now,
            last_accessed: now,
        };
        sqlx::query(
            r#"
            INSERT INTO videos (sd_hash, url, local_path, remote_url, size, views, created_at, last_accessed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&video.sd_hash)
        .bind(&video.url)
        .bind(&video.local_path)
        .bind(&video.remote_url)
        .bind(video.size)
        .bind(video.views)
        .bind(video.created_at)
        .bind(video.last_accessed)
        .execute(&self.pool)
        .await?;
        Ok(video)
    }

    pub(super) async fn get(&self, sd_hash: &str) -> Result<Option<Video>, sqlx::Error> {
        sqlx::query_as::<_, Video>("SELECT * FROM videos WHERE sd_hash = ?")
            .bind(sd_hash)
            .fetch_optional(&self.pool)
            .await
    }

    pub(super) async fn update_path(&self, sd_hash: &str, path: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE videos SET local_path = ? WHERE sd_hash = ?")
            .bind(path)
            .bind(sd_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(super) async fn update_remote_path(
        &self,
        sd_hash: &str,
        url: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE videos SET remote_url = ? WHERE sd_hash = ?")
            .bind(url)
            .bind(sd_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(super) async fn update_access(&self, sd_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE videos SET last_accessed = ? WHERE sd_hash = ?")
            .bind(now_ms())
            .bind(sd_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(super) async fn add_views(&self, sd_hash: &str, views: u64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE videos SET views = views + ? WHERE sd_hash = ?")
            .bind(views as i64)
            .bind(sd_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(super) async fn delete(&self, sd_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM videos WHERE sd_hash = ?")
            .bind(sd_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(super) async fn list_local(&self) -> Result<Vec<Video>, sqlx::Error> {
        sqlx::query_as::<_, Video>(
            "SELECT * FROM videos WHERE local_path != '' ORDER BY last_accessed ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub(super) async fn list_local_only(&self) -> Result<Vec<Video>, sqlx::Error> {
        sqlx::query_as::<_, Video>(
            "SELECT * FROM videos WHERE local_path != '' AND remote_url = '' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub(super) async fn list_remote_only(&self) -> Result<Vec<Video>, sqlx::Error> {
        sqlx::query_as::<_, Video>(
            "SELECT * FROM videos WHERE remote_url != '' AND local_path = '' ORDER BY views ASC, last_accessed ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub(super) async fn tier_size(&self, tier: Tier) -> Result<u64, sqlx::Error> {
        let filter = match tier {
            Tier::Local => "local_path != ''",
            Tier::Remote => "remote_url != ''",
        };
        let sql = format!("SELECT COALESCE(SUM(size), 0) FROM videos WHERE {filter}");
        let total: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }
}

/// Storage tier selector for size queries.
#[derive(Debug, Clone, Copy)]
pub(super) enum Tier {
    Local,
    Remote,
}
