//! Broadcast dispatcher: delivers due scheduled posts to their target channels.
//!
//! Two triggers feed the same delivery path. A periodic tick picks up every
//! due post (and anything a previous process left behind), and one-shot timers
//! fire for posts due before the next tick. Every delivery first takes a lease
//! on the post row, so the two triggers never deliver the same post twice.
//!
//! The lease is renewed after every channel, so a long fan-out keeps it.
//!
//! Shutdown stops the tick loop and aborts armed timers without draining them;
//! pending posts stay in the store and are picked up after a restart. A timer
//! aborted between a send and its delivery marker resends to that one channel
//! after restart.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use stampcast_core::models::{DeliveryOutcome, MediaKind, PostContent, ScheduledPost};
use stampcast_core::{AppError, DispatcherConfig};
use stampcast_db::PostRepository;
use stampcast_transport::Transport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Result of one delivery attempt for a single post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// Marked `sent`. Counts cover this attempt only.
    Sent { delivered: usize, failed: usize },
    /// Content can never be delivered; marked `failed`.
    Failed,
    /// Lease released after a transient error; retried on a later tick.
    Released,
    /// Not due, already terminal, or leased by someone else.
    Skipped,
}

/// Summary of a dispatcher tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub released: usize,
    pub skipped: usize,
    pub errors: usize,
    pub deliveries: usize,
    pub delivery_errors: usize,
    pub timers_armed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: PostOutcome) {
        match outcome {
            PostOutcome::Sent { delivered, failed } => {
                self.sent += 1;
                self.deliveries += delivered;
                self.delivery_errors += failed;
            }
            PostOutcome::Failed => self.failed += 1,
            PostOutcome::Released => self.released += 1,
            PostOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// What a post sends, resolved once per delivery attempt.
enum Payload<'a> {
    Text(&'a str),
    Media {
        kind: MediaKind,
        data: Vec<u8>,
        caption: Option<&'a str>,
    },
}

#[derive(Clone)]
pub struct Dispatcher {
    posts: PostRepository,
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    timers: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl Dispatcher {
    pub fn new(
        posts: PostRepository,
        transport: Arc<dyn Transport>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            posts,
            transport,
            config,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.claim_timeout_secs as i64)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_secs)
    }

    /// Deliver every post due at `now`, then arm timers for posts due before
    /// the next tick.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self
            .posts
            .due_for_delivery(now)
            .await
            .context("Failed to fetch due posts")?;

        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };

        for post in due {
            let post_id = post.id;
            match self.deliver_post(post, now).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(post_id = %post_id, error = %e, "Post delivery aborted");
                }
            }
        }

        match self.arm_timers(now).await {
            Ok(armed) => report.timers_armed = armed,
            Err(e) => tracing::error!(error = %e, "Failed to arm post timers"),
        }

        if report.due > 0 || report.timers_armed > 0 {
            tracing::info!(
                due = report.due,
                sent = report.sent,
                failed = report.failed,
                released = report.released,
                deliveries = report.deliveries,
                delivery_errors = report.delivery_errors,
                timers_armed = report.timers_armed,
                "Dispatcher tick completed"
            );
        }

        Ok(report)
    }

    /// Claim `post` and deliver it to every target channel without a
    /// `delivered` marker.
    #[tracing::instrument(skip(self, post), fields(post.id = %post.id, post.kind = post.content.kind_name(), post.targets = post.targets.len()))]
    pub async fn deliver_post(&self, post: ScheduledPost, now: DateTime<Utc>) -> Result<PostOutcome> {
        if !post.is_due(now) {
            return Ok(PostOutcome::Skipped);
        }
        if !self
            .posts
            .claim(post.id, now, self.lease())
            .await
            .context("Failed to claim post")?
        {
            tracing::debug!(post_id = %post.id, "Post is leased elsewhere, skipping");
            return Ok(PostOutcome::Skipped);
        }

        if let Err(e) = post.content.validate() {
            return self.fail(&post, &e.to_string()).await;
        }

        let payload = match &post.content {
            PostContent::Text { text } => Payload::Text(text),
            PostContent::Media {
                media_kind,
                media_ref,
                caption,
            } => match self.transport.download_media(media_ref).await {
                Ok(data) => Payload::Media {
                    kind: *media_kind,
                    data,
                    caption: caption.as_deref(),
                },
                Err(e) if e.is_transient() => {
                    tracing::warn!(post_id = %post.id, error = %e, "Media temporarily unavailable, releasing post");
                    self.posts
                        .release_claim(post.id)
                        .await
                        .context("Failed to release claim")?;
                    return Ok(PostOutcome::Released);
                }
                Err(e) => {
                    return self
                        .fail(&post, &format!("Media {} is unavailable: {}", media_ref, e))
                        .await;
                }
            },
        };

        let already = self
            .posts
            .delivered_channels(post.id)
            .await
            .context("Failed to load delivery markers")?;

        let started = std::time::Instant::now();
        let mut delivered = 0;
        let mut failed = 0;
        for channel_id in post.targets.iter().copied() {
            if already.contains(&channel_id) {
                tracing::debug!(post_id = %post.id, channel_id = channel_id, "Already delivered, skipping channel");
                continue;
            }

            match self.send(channel_id, &payload).await {
                Ok(()) => {
                    delivered += 1;
                    self.posts
                        .record_delivery(post.id, channel_id, DeliveryOutcome::Delivered, None)
                        .await
                        .context("Failed to record delivery")?;
                }
                Err(e) => {
                    failed += 1;
                    e.log("Channel delivery failed");
                    let message = match &e {
                        AppError::Delivery { message, .. } => message.clone(),
                        other => other.to_string(),
                    };
                    self.posts
                        .record_delivery(
                            post.id,
                            channel_id,
                            DeliveryOutcome::Failed,
                            Some(&message),
                        )
                        .await
                        .context("Failed to record delivery")?;
                }
            }

            let elapsed = chrono::Duration::from_std(started.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero());
            if !self
                .posts
                .renew_claim(post.id, now + elapsed, self.lease())
                .await
                .context("Failed to renew claim")?
            {
                tracing::debug!(post_id = %post.id, "Post left pending during delivery");
            }
        }

        // Sent even when every channel failed; per-channel markers hold the detail.
        self.posts
            .mark_sent(post.id)
            .await
            .context("Failed to mark post as sent")?;

        tracing::info!(
            post_id = %post.id,
            delivered = delivered,
            failed = failed,
            skipped = already.len(),
            "Post sent"
        );

        Ok(PostOutcome::Sent { delivered, failed })
    }

    async fn send(&self, channel_id: i64, payload: &Payload<'_>) -> Result<(), AppError> {
        let result = match payload {
            Payload::Text(text) => self.transport.send_text(channel_id, text).await,
            Payload::Media {
                kind,
                data,
                caption,
            } => {
                self.transport
                    .send_media(channel_id, *kind, data.clone(), *caption)
                    .await
            }
        };

        result.map(|_| ()).map_err(|e| AppError::Delivery {
            channel_id,
            message: e.to_string(),
        })
    }

    async fn fail(&self, post: &ScheduledPost, reason: &str) -> Result<PostOutcome> {
        tracing::warn!(post_id = %post.id, reason = %reason, "Post cannot be delivered");
        self.posts
            .mark_failed(post.id, reason)
            .await
            .context("Failed to mark post as failed")?;
        Ok(PostOutcome::Failed)
    }

    /// Arm a one-shot timer for every pending post due after `now` but before
    /// the next tick. Returns the number of new timers.
    pub async fn arm_timers(&self, now: DateTime<Utc>) -> Result<usize> {
        let horizon = chrono::Duration::from_std(self.poll_interval())
            .context("Poll interval out of range")?;
        let upcoming = self
            .posts
            .pending_before(now + horizon)
            .await
            .context("Failed to fetch upcoming posts")?;

        let mut timers = self.timers.lock().await;
        timers.retain(|_, handle| !handle.is_finished());

        let mut armed = 0;
        for post in upcoming {
            if post.scheduled_at <= now || timers.contains_key(&post.id) {
                continue;
            }

            let delay = (post.scheduled_at - Utc::now())
                .to_std()
                .unwrap_or_default();
            let this = self.clone();
            let post_id = post.id;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.fire_timer(post_id).await;
            });

            tracing::debug!(post_id = %post_id, delay_ms = delay.as_millis() as u64, "Post timer armed");
            timers.insert(post_id, handle);
            armed += 1;
        }

        Ok(armed)
    }

    async fn deliver_by_id(&self, post_id: Uuid) -> Result<PostOutcome> {
        match self.posts.get(post_id).await.context("Failed to load post")? {
            Some(post) => self.deliver_post(post, Utc::now()).await,
            None => Ok(PostOutcome::Skipped),
        }
    }

    async fn fire_timer(&self, post_id: Uuid) {
        match self.deliver_by_id(post_id).await {
            Ok(outcome) => tracing::debug!(post_id = %post_id, outcome = ?outcome, "Post timer fired"),
            // The next tick picks the post up again.
            Err(e) => tracing::error!(post_id = %post_id, error = %e, "Post timer delivery failed"),
        }

        self.timers.lock().await.remove(&post_id);
    }

    /// Cancel a pending post, abort its timer and release its staged media.
    /// Returns whether the post was pending.
    #[tracing::instrument(skip(self), fields(post.id = %post_id))]
    pub async fn cancel_post(&self, post_id: Uuid) -> Result<bool, AppError> {
        if let Some(handle) = self.timers.lock().await.remove(&post_id) {
            handle.abort();
            tracing::debug!(post_id = %post_id, "Post timer aborted");
        }

        let post = self.posts.get(post_id).await?;
        let cancelled = self.posts.cancel(post_id).await?;
        tracing::info!(post_id = %post_id, cancelled = cancelled, "Post cancellation requested");

        if let (true, Some(PostContent::Media { media_ref, .. })) = (cancelled, post.map(|p| p.content)) {
            if let Err(e) = self.transport.release_media(&media_ref).await {
                tracing::warn!(post_id = %post_id, media_ref = %media_ref, error = %e, "Failed to release staged media");
            }
        }
        Ok(cancelled)
    }

    /// Ids of posts with a live timer.
    pub async fn armed_timers(&self) -> Vec<Uuid> {
        let timers = self.timers.lock().await;
        timers
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| *id)
            .collect()
    }

    async fn abort_timers(&self) {
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// Run the periodic tick loop in the background. The first tick runs
    /// immediately.
    pub fn start(&self) -> DispatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let this = self.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.poll_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(
                poll_interval_secs = this.config.poll_interval_secs,
                claim_timeout_secs = this.config.claim_timeout_secs,
                "Dispatcher started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Dispatcher shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = this.tick(Utc::now()).await {
                            tracing::error!(error = %e, "Dispatcher tick failed");
                        }
                    }
                }
            }

            tracing::info!("Dispatcher stopped");
        });

        DispatcherHandle {
            dispatcher: self.clone(),
            shutdown_tx,
            handle,
        }
    }
}

/// Handle to a running dispatcher loop.
pub struct DispatcherHandle {
    dispatcher: Dispatcher,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop the loop and abort armed timers. In-flight timers are not drained.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
        self.dispatcher.abort_timers().await;
    }
}
