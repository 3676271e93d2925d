use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row};
use stampcast_core::models::{
    ChannelDelivery, DeliveryOutcome, MediaKind, PostContent, PostListQuery, PostStatus,
    ScheduledPost,
};
use stampcast_core::AppError;
use uuid::Uuid;

use super::{from_epoch, to_epoch};

const POST_COLUMNS: &str = "id, content_kind, body, caption, scheduled_at, owner, status, \
     failure_reason, claimed_until, created_at, updated_at, completed_at";

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 1000;

/// Durable store of scheduled posts, their ordered targets and per-channel
/// delivery markers.
#[derive(Clone)]
pub struct PostRepository {
    pool: SqlitePool,
}

fn content_columns(content: &PostContent) -> (&'static str, &str, Option<&str>) {
    match content {
        PostContent::Text { text } => ("text", text.as_str(), None),
        PostContent::Media {
            media_kind,
            media_ref,
            caption,
        } => {
            let kind = match media_kind {
                MediaKind::Photo => "photo",
                MediaKind::Video => "video",
            };
            (kind, media_ref.as_str(), caption.as_deref())
        }
    }
}

fn content_from_columns(
    kind: &str,
    body: String,
    caption: Option<String>,
) -> Result<PostContent, AppError> {
    match kind {
        "text" => Ok(PostContent::Text { text: body }),
        "photo" | "video" => Ok(PostContent::Media {
            media_kind: kind.parse()?,
            media_ref: body,
            caption,
        }),
        other => Err(AppError::Internal(format!(
            "Unknown stored content kind: {}",
            other
        ))),
    }
}

fn parse_post_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|e| AppError::Internal(format!("Stored post id '{}' is invalid: {}", raw, e)))
}

fn optional_epoch(secs: Option<i64>) -> Result<Option<DateTime<Utc>>, AppError> {
    secs.map(from_epoch).transpose()
}

/// Map a `scheduled_posts` row; targets are loaded separately.
fn post_from_row(row: &SqliteRow, targets: Vec<i64>) -> Result<ScheduledPost, AppError> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("content_kind")?;
    let status: String = row.try_get("status")?;

    Ok(ScheduledPost {
        id: parse_post_id(&id)?,
        content: content_from_columns(&kind, row.try_get("body")?, row.try_get("caption")?)?,
        targets,
        scheduled_at: from_epoch(row.try_get("scheduled_at")?)?,
        owner: row.try_get("owner")?,
        status: status.parse()?,
        failure_reason: row.try_get("failure_reason")?,
        claimed_until: optional_epoch(row.try_get("claimed_until")?)?,
        created_at: from_epoch(row.try_get("created_at")?)?,
        updated_at: from_epoch(row.try_get("updated_at")?)?,
        completed_at: optional_epoch(row.try_get("completed_at")?)?,
    })
}

fn validate_targets(targets: &[i64]) -> Result<(), AppError> {
    if targets.is_empty() {
        return Err(AppError::Validation(
            "At least one target channel is required".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(targets.len());
    for channel_id in targets {
        if !seen.insert(*channel_id) {
            return Err(AppError::Validation(format!(
                "Channel {} is listed more than once",
                channel_id
            )));
        }
    }
    Ok(())
}

/// Fail with a validation error naming every target missing from the channel registry.
async fn reject_unknown_targets(conn: &mut SqliteConnection, targets: &[i64]) -> Result<(), AppError> {
    let mut unknown = Vec::new();
    for channel_id in targets {
        let registered = sqlx::query_scalar::<Sqlite, i64>(
            "SELECT COUNT(*) FROM channels WHERE channel_id = ?",
        )
        .bind(*channel_id)
        .fetch_one(&mut *conn)
        .await?;
        if registered == 0 {
            unknown.push(channel_id.to_string());
        }
    }
    if !unknown.is_empty() {
        return Err(AppError::Validation(format!(
            "Unknown target channel(s): {}",
            unknown.join(", ")
        )));
    }
    Ok(())
}

/// Result of [`PostRepository::purge_finished`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgedPosts {
    pub count: u64,
    /// Staged media that belonged to the removed posts.
    pub media_refs: Vec<String>,
}

impl PostRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Check a target list the way [`create`](Self::create) does, without writing.
    pub async fn check_targets(&self, targets: &[i64]) -> Result<(), AppError> {
        validate_targets(targets)?;
        let mut conn = self.pool.acquire().await?;
        reject_unknown_targets(&mut conn, targets).await
    }

    /// Create a pending post. Nothing is written when validation fails.
    ///
    /// Every target must be registered in the channel registry.
    #[tracing::instrument(skip(self, content), fields(db.table = "scheduled_posts", db.operation = "insert", content_kind = content.kind_name()))]
    pub async fn create(
        &self,
        content: PostContent,
        targets: &[i64],
        scheduled_at: DateTime<Utc>,
        owner: i64,
    ) -> Result<Uuid, AppError> {
        let now = Utc::now();
        if scheduled_at <= now {
            return Err(AppError::Validation(
                "Scheduled time must be in the future".to_string(),
            ));
        }
        validate_targets(targets)?;
        content.validate()?;

        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let (kind, body, caption) = content_columns(&content);

        let mut tx = self.pool.begin().await?;

        reject_unknown_targets(&mut tx, targets).await?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_posts (
                id, content_kind, body, caption, scheduled_at, owner, status,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id_str)
        .bind(kind)
        .bind(body)
        .bind(caption)
        .bind(to_epoch(scheduled_at))
        .bind(owner)
        .bind(to_epoch(now))
        .bind(to_epoch(now))
        .execute(&mut *tx)
        .await?;

        for (position, channel_id) in targets.iter().enumerate() {
            sqlx::query("INSERT INTO post_targets (post_id, position, channel_id) VALUES (?, ?, ?)")
                .bind(&id_str)
                .bind(position as i64)
                .bind(*channel_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            post_id = %id,
            scheduled_at = %scheduled_at,
            target_count = targets.len(),
            "Scheduled post created"
        );

        Ok(id)
    }

    async fn load_targets(&self, post_id: &str) -> Result<Vec<i64>, AppError> {
        let targets = sqlx::query_scalar::<Sqlite, i64>(
            "SELECT channel_id FROM post_targets WHERE post_id = ? ORDER BY position ASC",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(targets)
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<ScheduledPost>, AppError> {
        let mut posts = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let targets = self.load_targets(&id).await?;
            posts.push(post_from_row(&row, targets)?);
        }
        Ok(posts)
    }

    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "select", db.record_id = %id))]
    pub async fn get(&self, id: Uuid) -> Result<Option<ScheduledPost>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduled_posts WHERE id = ?",
            POST_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// List posts, newest schedule first.
    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "select"))]
    pub async fn list(&self, query: PostListQuery) -> Result<Vec<ScheduledPost>, AppError> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM scheduled_posts WHERE 1 = 1",
            POST_COLUMNS
        ));
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.to_string());
        }
        if let Some(owner) = query.owner {
            builder.push(" AND owner = ").push_bind(owner);
        }
        builder
            .push(" ORDER BY scheduled_at DESC, created_at DESC LIMIT ")
            .push_bind(limit);

        let rows = builder.build().fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    /// Pending posts scheduled at or before `deadline`, earliest first.
    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "select"))]
    pub async fn pending_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<ScheduledPost>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE status = 'pending' AND scheduled_at <= ?
            ORDER BY scheduled_at ASC, created_at ASC
            "#,
            POST_COLUMNS
        ))
        .bind(to_epoch(deadline))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    /// Pending posts whose scheduled time has arrived.
    pub async fn due_for_delivery(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>, AppError> {
        self.pending_before(now).await
    }

    /// Take a delivery lease on a pending post.
    ///
    /// Returns `false` when the post is unknown, terminal, or already leased
    /// by a lease that has not yet expired.
    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "update", db.record_id = %id))]
    pub async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET claimed_until = ?, updated_at = ?
            WHERE id = ?
                AND status = 'pending'
                AND (claimed_until IS NULL OR claimed_until <= ?)
            "#,
        )
        .bind(to_epoch(now + lease))
        .bind(to_epoch(now))
        .bind(id.to_string())
        .bind(to_epoch(now))
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        tracing::debug!(post_id = %id, claimed = claimed, "Claim attempted");
        Ok(claimed)
    }

    /// Push an active lease out to `now + lease`. Never shortens it.
    ///
    /// Returns `false` once the post is terminal or unknown.
    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "update", db.record_id = %id))]
    pub async fn renew_claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET claimed_until = MAX(COALESCE(claimed_until, 0), ?)
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(to_epoch(now + lease))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "update", db.record_id = %id))]
    pub async fn release_claim(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE scheduled_posts SET claimed_until = NULL, updated_at = ? WHERE id = ?")
            .bind(to_epoch(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn finish(
        &self,
        id: Uuid,
        status: PostStatus,
        reason: Option<&str>,
    ) -> Result<bool, AppError> {
        let now = to_epoch(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = ?,
                failure_reason = ?,
                claimed_until = NULL,
                completed_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(status.to_string())
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        let transitioned = result.rows_affected() == 1;
        if transitioned {
            tracing::info!(post_id = %id, status = %status, "Post finished");
        }
        Ok(transitioned)
    }

    /// Idempotent; returns whether the post moved to `sent`.
    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "update", db.record_id = %id))]
    pub async fn mark_sent(&self, id: Uuid) -> Result<bool, AppError> {
        self.finish(id, PostStatus::Sent, None).await
    }

    /// Idempotent; returns whether the post moved to `failed`.
    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "update", db.record_id = %id))]
    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, AppError> {
        self.finish(id, PostStatus::Failed, Some(reason)).await
    }

    /// Idempotent; returns whether the post moved to `cancelled`.
    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "update", db.record_id = %id))]
    pub async fn cancel(&self, id: Uuid) -> Result<bool, AppError> {
        self.finish(id, PostStatus::Cancelled, None).await
    }

    /// Record the outcome of one send. A `delivered` marker is never downgraded.
    #[tracing::instrument(skip(self, error), fields(db.table = "post_deliveries", db.operation = "upsert", db.record_id = %post_id))]
    pub async fn record_delivery(
        &self,
        post_id: Uuid,
        channel_id: i64,
        outcome: DeliveryOutcome,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO post_deliveries (post_id, channel_id, outcome, error, attempted_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (post_id, channel_id) DO UPDATE SET
                outcome = excluded.outcome,
                error = excluded.error,
                attempted_at = excluded.attempted_at
            WHERE post_deliveries.outcome != 'delivered'
            "#,
        )
        .bind(post_id.to_string())
        .bind(channel_id)
        .bind(outcome.to_string())
        .bind(error)
        .bind(to_epoch(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "post_deliveries", db.operation = "select", db.record_id = %post_id))]
    pub async fn deliveries(&self, post_id: Uuid) -> Result<Vec<ChannelDelivery>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT d.channel_id, d.outcome, d.error, d.attempted_at
            FROM post_deliveries d
            LEFT JOIN post_targets t
                ON t.post_id = d.post_id AND t.channel_id = d.channel_id
            WHERE d.post_id = ?
            ORDER BY t.position ASC, d.channel_id ASC
            "#,
        )
        .bind(post_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ChannelDelivery, AppError> {
                let outcome: String = row.try_get("outcome")?;
                Ok(ChannelDelivery {
                    post_id,
                    channel_id: row.try_get("channel_id")?,
                    outcome: outcome.parse()?,
                    error: row.try_get("error")?,
                    attempted_at: from_epoch(row.try_get("attempted_at")?)?,
                })
            })
            .collect()
    }

    /// Channels that already received this post.
    #[tracing::instrument(skip(self), fields(db.table = "post_deliveries", db.operation = "select", db.record_id = %post_id))]
    pub async fn delivered_channels(&self, post_id: Uuid) -> Result<HashSet<i64>, AppError> {
        let channels = sqlx::query_scalar::<Sqlite, i64>(
            "SELECT channel_id FROM post_deliveries WHERE post_id = ? AND outcome = 'delivered'",
        )
        .bind(post_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(channels.into_iter().collect())
    }

    /// Delete terminal posts finished before `older_than`.
    ///
    /// The caller owns releasing the returned media refs.
    #[tracing::instrument(skip(self), fields(db.table = "scheduled_posts", db.operation = "delete"))]
    pub async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<PurgedPosts, AppError> {
        let cutoff = to_epoch(older_than);
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, content_kind, body FROM scheduled_posts
            WHERE status IN ('sent', 'failed', 'cancelled')
                AND COALESCE(completed_at, updated_at) < ?
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut purged = PurgedPosts::default();
        for row in rows {
            let id: String = row.try_get("id")?;
            let kind: String = row.try_get("content_kind")?;
            if kind != "text" {
                purged.media_refs.push(row.try_get("body")?);
            }

            sqlx::query("DELETE FROM post_deliveries WHERE post_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM post_targets WHERE post_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM scheduled_posts WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            purged.count += 1;
        }

        tx.commit().await?;

        if purged.count > 0 {
            tracing::info!(
                count = purged.count,
                media_count = purged.media_refs.len(),
                older_than = %older_than,
                "Purged finished posts"
            );
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_in_memory, ChannelRepository};

    const REGISTERED: [i64; 7] = [1, 2, 5, 6, 10, 20, 30];

    async fn repo() -> PostRepository {
        let pool = connect_in_memory().await.unwrap();
        let channels = ChannelRepository::new(pool.clone());
        for channel_id in REGISTERED {
            channels
                .upsert(channel_id, &format!("Channel {}", channel_id), true)
                .await
                .unwrap();
        }
        PostRepository::new(pool)
    }

    fn text(body: &str) -> PostContent {
        PostContent::Text {
            text: body.to_string(),
        }
    }

    fn in_an_hour() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    #[tokio::test]
    async fn test_create_and_get_preserves_target_order() {
        let repo = repo().await;
        let at = in_an_hour();
        let id = repo
            .create(text("hello"), &[30, 10, 20], at, 7)
            .await
            .unwrap();

        let post = repo.get(id).await.unwrap().unwrap();
        assert_eq!(post.targets, vec![30, 10, 20]);
        assert_eq!(post.status, PostStatus::Pending);
        assert_eq!(post.owner, 7);
        assert_eq!(post.scheduled_at.timestamp(), at.timestamp());
        assert_eq!(post.content, text("hello"));
    }

    #[tokio::test]
    async fn test_create_media_round_trips_caption() {
        let repo = repo().await;
        let content = PostContent::Media {
            media_kind: MediaKind::Video,
            media_ref: "abc.mp4".to_string(),
            caption: Some("launch".to_string()),
        };
        let id = repo
            .create(content.clone(), &[1], in_an_hour(), 1)
            .await
            .unwrap();
        assert_eq!(repo.get(id).await.unwrap().unwrap().content, content);
    }

    #[tokio::test]
    async fn test_create_rejects_past_time_without_writing() {
        let repo = repo().await;
        let err = repo
            .create(text("late"), &[1], Utc::now() - Duration::seconds(1), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(repo.list(PostListQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_targets_and_content() {
        let repo = repo().await;
        assert!(matches!(
            repo.create(text("x"), &[], in_an_hour(), 1).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            repo.create(text("x"), &[5, 6, 5], in_an_hour(), 1).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            repo.create(text("   "), &[5], in_an_hour(), 1).await,
            Err(AppError::Validation(_))
        ));
        assert!(repo.list(PostListQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_unregistered_channel() {
        let repo = repo().await;
        let err = repo
            .create(text("x"), &[1, -999], in_an_hour(), 1)
            .await
            .unwrap_err();
        match err {
            AppError::Validation(message) => {
                assert!(message.contains("-999"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(repo.list(PostListQuery::default()).await.unwrap().is_empty());
        assert!(repo.due_for_delivery(in_an_hour()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_targets_matches_create() {
        let repo = repo().await;
        repo.check_targets(&[1, 2]).await.unwrap();
        assert!(matches!(
            repo.check_targets(&[1, 1]).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            repo.check_targets(&[-999]).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(repo.check_targets(&[]).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_due_for_delivery_around_scheduled_time() {
        let repo = repo().await;
        let now = Utc::now();
        let id = repo
            .create(text("x"), &[1], now + Duration::seconds(60), 1)
            .await
            .unwrap();

        let early = repo
            .due_for_delivery(now + Duration::seconds(30))
            .await
            .unwrap();
        assert!(early.is_empty());

        let late = repo
            .due_for_delivery(now + Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(late.iter().map(|p| p.id).collect::<Vec<_>>(), vec![id]);
    }

    #[tokio::test]
    async fn test_due_for_delivery_includes_exact_scheduled_time() {
        let repo = repo().await;
        let at = in_an_hour();
        let id = repo.create(text("x"), &[1], at, 1).await.unwrap();

        let due = repo.due_for_delivery(at).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert!(repo
            .due_for_delivery(at - Duration::seconds(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_renew_claim_extends_lease() {
        let repo = repo().await;
        let at = in_an_hour();
        let id = repo.create(text("x"), &[1], at, 1).await.unwrap();
        let lease = Duration::seconds(60);

        assert!(repo.claim(id, at, lease).await.unwrap());
        assert!(repo
            .renew_claim(id, at + Duration::seconds(50), lease)
            .await
            .unwrap());
        // The original lease would have expired here.
        assert!(!repo.claim(id, at + Duration::seconds(61), lease).await.unwrap());
        assert!(repo.claim(id, at + Duration::seconds(110), lease).await.unwrap());

        // An earlier renewal never shortens the lease.
        repo.renew_claim(id, at, lease).await.unwrap();
        assert!(!repo.claim(id, at + Duration::seconds(150), lease).await.unwrap());

        repo.mark_sent(id).await.unwrap();
        assert!(!repo.renew_claim(id, at, lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_due_for_delivery_ordering() {
        let repo = repo().await;
        let base = in_an_hour();
        let later = repo
            .create(text("b"), &[1], base + Duration::minutes(5), 1)
            .await
            .unwrap();
        let earlier = repo.create(text("a"), &[1], base, 1).await.unwrap();
        let future = repo
            .create(text("c"), &[1], base + Duration::hours(2), 1)
            .await
            .unwrap();

        let due = repo
            .due_for_delivery(base + Duration::minutes(10))
            .await
            .unwrap();
        let ids: Vec<_> = due.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![earlier, later]);
        assert!(!ids.contains(&future));

        assert!(repo.due_for_delivery(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_lease_expires() {
        let repo = repo().await;
        let at = in_an_hour();
        let id = repo.create(text("x"), &[1], at, 1).await.unwrap();
        let lease = Duration::seconds(600);

        assert!(repo.claim(id, at, lease).await.unwrap());
        assert!(!repo.claim(id, at + Duration::seconds(1), lease).await.unwrap());
        // Expired lease can be taken over.
        assert!(repo.claim(id, at + Duration::seconds(601), lease).await.unwrap());

        repo.release_claim(id).await.unwrap();
        assert!(repo.claim(id, at, lease).await.unwrap());

        assert!(!repo.claim(Uuid::new_v4(), at, lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_terminal_transitions_are_idempotent() {
        let repo = repo().await;
        let at = in_an_hour();
        let id = repo.create(text("x"), &[1], at, 1).await.unwrap();

        assert!(repo.mark_sent(id).await.unwrap());
        assert!(!repo.mark_sent(id).await.unwrap());
        assert!(!repo.mark_failed(id, "late").await.unwrap());
        assert!(!repo.cancel(id).await.unwrap());
        assert!(!repo.claim(id, at, Duration::seconds(60)).await.unwrap());

        let post = repo.get(id).await.unwrap().unwrap();
        assert_eq!(post.status, PostStatus::Sent);
        assert!(post.completed_at.is_some());
        assert!(post.claimed_until.is_none());

        let other = repo.create(text("y"), &[1], at, 1).await.unwrap();
        assert!(repo.cancel(other).await.unwrap());
        assert!(!repo.cancel(other).await.unwrap());
        assert_eq!(
            repo.get(other).await.unwrap().unwrap().status,
            PostStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_reason() {
        let repo = repo().await;
        let id = repo.create(text("x"), &[1], in_an_hour(), 1).await.unwrap();
        assert!(repo.mark_failed(id, "media missing").await.unwrap());
        let post = repo.get(id).await.unwrap().unwrap();
        assert_eq!(post.status, PostStatus::Failed);
        assert_eq!(post.failure_reason.as_deref(), Some("media missing"));
    }

    #[tokio::test]
    async fn test_delivered_marker_is_never_downgraded() {
        let repo = repo().await;
        let id = repo
            .create(text("x"), &[1, 2], in_an_hour(), 1)
            .await
            .unwrap();

        repo.record_delivery(id, 1, DeliveryOutcome::Delivered, None)
            .await
            .unwrap();
        repo.record_delivery(id, 2, DeliveryOutcome::Failed, Some("forbidden"))
            .await
            .unwrap();
        repo.record_delivery(id, 1, DeliveryOutcome::Failed, Some("late retry"))
            .await
            .unwrap();

        let delivered = repo.delivered_channels(id).await.unwrap();
        assert_eq!(delivered, HashSet::from([1]));

        let deliveries = repo.deliveries(id).await.unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].channel_id, 1);
        assert_eq!(deliveries[0].outcome, DeliveryOutcome::Delivered);
        assert_eq!(deliveries[1].error.as_deref(), Some("forbidden"));

        // A failed marker may be upgraded after a successful retry.
        repo.record_delivery(id, 2, DeliveryOutcome::Delivered, None)
            .await
            .unwrap();
        assert_eq!(
            repo.delivered_channels(id).await.unwrap(),
            HashSet::from([1, 2])
        );
    }

    #[tokio::test]
    async fn test_list_filters() {
        let repo = repo().await;
        let a = repo.create(text("a"), &[1], in_an_hour(), 1).await.unwrap();
        repo.create(text("b"), &[1], in_an_hour(), 2).await.unwrap();
        repo.cancel(a).await.unwrap();

        let by_owner = repo
            .list(PostListQuery {
                owner: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_owner.len(), 1);
        assert_eq!(by_owner[0].owner, 2);

        let cancelled = repo
            .list(PostListQuery {
                status: Some(PostStatus::Cancelled),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, a);

        let limited = repo
            .list(PostListQuery {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_only_removes_old_terminal_posts() {
        let repo = repo().await;
        let done = repo.create(text("a"), &[1], in_an_hour(), 1).await.unwrap();
        let pending = repo.create(text("b"), &[1], in_an_hour(), 1).await.unwrap();
        repo.record_delivery(done, 1, DeliveryOutcome::Delivered, None)
            .await
            .unwrap();
        repo.mark_sent(done).await.unwrap();

        // Nothing finished before an hour ago.
        assert_eq!(
            repo.purge_finished(Utc::now() - Duration::hours(1))
                .await
                .unwrap(),
            PurgedPosts::default()
        );

        let purged = repo
            .purge_finished(Utc::now() + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(purged.count, 1);
        assert!(purged.media_refs.is_empty());
        assert!(repo.get(done).await.unwrap().is_none());
        assert!(repo.deliveries(done).await.unwrap().is_empty());
        assert!(repo.get(pending).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_returns_media_of_removed_posts() {
        let repo = repo().await;
        let media = PostContent::Media {
            media_kind: MediaKind::Photo,
            media_ref: "staged.png".to_string(),
            caption: None,
        };
        let id = repo.create(media, &[1], in_an_hour(), 1).await.unwrap();
        repo.cancel(id).await.unwrap();
        let kept = PostContent::Media {
            media_kind: MediaKind::Video,
            media_ref: "kept.mp4".to_string(),
            caption: None,
        };
        repo.create(kept, &[1], in_an_hour(), 1).await.unwrap();

        let purged = repo
            .purge_finished(Utc::now() + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(purged.count, 1);
        assert_eq!(purged.media_refs, vec!["staged.png".to_string()]);
    }
}
