use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use stampcast_core::{models::Channel, AppError};

use super::{from_epoch, to_epoch};

const CHANNEL_COLUMNS: &str = "channel_id, title, is_admin, created_at, updated_at";

/// Registry of destination channels and the bot's admin status in each.
#[derive(Clone)]
pub struct ChannelRepository {
    pool: SqlitePool,
}

fn channel_from_row(row: &SqliteRow) -> Result<Channel, AppError> {
    Ok(Channel {
        channel_id: row.try_get("channel_id")?,
        title: row.try_get("title")?,
        is_admin: row.try_get("is_admin")?,
        created_at: from_epoch(row.try_get("created_at")?)?,
        updated_at: from_epoch(row.try_get("updated_at")?)?,
    })
}

impl ChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a channel or overwrite the title and admin flag of an existing one.
    #[tracing::instrument(skip(self), fields(db.table = "channels", db.operation = "upsert"))]
    pub async fn upsert(
        &self,
        channel_id: i64,
        title: &str,
        is_admin: bool,
    ) -> Result<Channel, AppError> {
        let now = to_epoch(Utc::now());
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO channels (channel_id, title, is_admin, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (channel_id) DO UPDATE SET
                title = excluded.title,
                is_admin = excluded.is_admin,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            CHANNEL_COLUMNS
        ))
        .bind(channel_id)
        .bind(title)
        .bind(is_admin)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        channel_from_row(&row)
    }

    #[tracing::instrument(skip(self), fields(db.table = "channels", db.operation = "select"))]
    pub async fn get(&self, channel_id: i64) -> Result<Option<Channel>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM channels WHERE channel_id = ?",
            CHANNEL_COLUMNS
        ))
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(channel_from_row).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.table = "channels", db.operation = "select"))]
    pub async fn list(&self) -> Result<Vec<Channel>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM channels ORDER BY title ASC, channel_id ASC",
            CHANNEL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(channel_from_row).collect()
    }

    /// Returns whether a channel was removed.
    #[tracing::instrument(skip(self), fields(db.table = "channels", db.operation = "delete"))]
    pub async fn remove(&self, channel_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM channels WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "channels", db.operation = "update"))]
    pub async fn refresh_title(&self, channel_id: i64, title: &str) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE channels SET title = ?, updated_at = ? WHERE channel_id = ?")
                .bind(title)
                .bind(to_epoch(Utc::now()))
                .bind(channel_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "channels", db.operation = "update"))]
    pub async fn set_admin(&self, channel_id: i64, is_admin: bool) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE channels SET is_admin = ?, updated_at = ? WHERE channel_id = ?")
                .bind(is_admin)
                .bind(to_epoch(Utc::now()))
                .bind(channel_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Unknown channels are never treated as administered.
    #[tracing::instrument(skip(self), fields(db.table = "channels", db.operation = "select"))]
    pub async fn is_admin(&self, channel_id: i64) -> Result<bool, AppError> {
        let is_admin: Option<bool> =
            sqlx::query_scalar("SELECT is_admin FROM channels WHERE channel_id = ?")
                .bind(channel_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(is_admin.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    async fn repo() -> ChannelRepository {
        ChannelRepository::new(connect_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repo = repo().await;
        let created = repo.upsert(-1001, "News", true).await.unwrap();
        assert_eq!(created.title, "News");
        assert!(created.is_admin);

        let updated = repo.upsert(-1001, "News Daily", false).await.unwrap();
        assert_eq!(updated.title, "News Daily");
        assert!(!updated.is_admin);
        assert_eq!(updated.created_at, created.created_at);

        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_is_admin_unknown_channel_false() {
        let repo = repo().await;
        assert!(!repo.is_admin(42).await.unwrap());

        repo.upsert(42, "Ops", false).await.unwrap();
        assert!(!repo.is_admin(42).await.unwrap());

        assert!(repo.set_admin(42, true).await.unwrap());
        assert!(repo.is_admin(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_title_and_remove() {
        let repo = repo().await;
        assert!(!repo.refresh_title(7, "Ghost").await.unwrap());

        repo.upsert(7, "Old", true).await.unwrap();
        assert!(repo.refresh_title(7, "New").await.unwrap());
        assert_eq!(repo.get(7).await.unwrap().unwrap().title, "New");

        assert!(repo.remove(7).await.unwrap());
        assert!(!repo.remove(7).await.unwrap());
        assert!(repo.get(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sorted_by_title() {
        let repo = repo().await;
        repo.upsert(2, "Beta", true).await.unwrap();
        repo.upsert(1, "Alpha", false).await.unwrap();
        let titles: Vec<_> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["Alpha", "Beta"]);
    }
}
