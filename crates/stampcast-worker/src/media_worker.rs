//! Inbound media worker pool.
//!
//! Every inbound photo or video is handled in its own task. A semaphore bounds
//! how many run at once; once spawned a task runs to completion even if the
//! event receiver closes.

use stampcast_core::models::{MediaAsset, MediaKind, ProcessedMedia};
use stampcast_core::WorkerConfig;
use stampcast_db::ChannelRepository;
use stampcast_processing::{MediaPipeline, ProcessingError};
use stampcast_transport::{ChatKind, InboundEvent, Transport, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

/// Why a media request could not be answered.
#[derive(Debug, Error)]
enum RequestError {
    #[error("download failed: {0}")]
    Download(#[source] TransportError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("reply failed: {0}")]
    Reply(#[source] TransportError),
}

impl RequestError {
    fn user_message(&self, kind: MediaKind) -> String {
        match self {
            RequestError::Download(_) => format!(
                "Sorry, I could not fetch your {}. Please send it again.",
                kind
            ),
            RequestError::Processing(e) => e.user_message(),
            RequestError::Reply(_) => format!(
                "Sorry, I could not send the watermarked {} back. Please try again later.",
                kind
            ),
        }
    }
}

#[derive(Clone)]
pub struct MediaWorker {
    transport: Arc<dyn Transport>,
    pipeline: Arc<MediaPipeline>,
    channels: ChannelRepository,
    max_workers: usize,
    reply_caption: String,
}

impl MediaWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        pipeline: Arc<MediaPipeline>,
        channels: ChannelRepository,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            transport,
            pipeline,
            channels,
            max_workers: config.max_workers.max(1),
            reply_caption: config.reply_caption.clone(),
        }
    }

    /// Consume events until the sender side closes, then wait for in-flight
    /// requests to finish.
    pub async fn run(self, mut events: mpsc::Receiver<InboundEvent>) {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        tracing::info!(max_workers = self.max_workers, "Media worker pool started");

        while let Some(event) = events.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let worker = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.handle(event).await;
            });

            // Reap finished tasks so the set does not grow without bound.
            while tasks.try_join_next().is_some() {}
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Media request task panicked");
            }
        }
        tracing::info!("Media worker pool stopped");
    }

    /// Answer one inbound event.
    #[tracing::instrument(skip(self, event), fields(
        chat.id = event.chat_id,
        chat.kind = ?event.chat,
        message.id = event.message_id,
        media.kind = %event.kind
    ))]
    pub async fn handle(&self, event: InboundEvent) {
        match event.chat {
            ChatKind::Private => self.handle_private(&event).await,
            ChatKind::Channel => self.handle_channel(&event).await,
        }

        // The inbound media is no longer needed, answered or not.
        if let Err(e) = self.transport.release_media(&event.media_ref).await {
            tracing::warn!(media_ref = %event.media_ref, error = %e, "Failed to release inbound media");
        }
    }

    async fn handle_private(&self, event: &InboundEvent) {
        match self.reply_private(event).await {
            Ok(()) => tracing::info!(chat_id = event.chat_id, "Watermarked media sent"),
            Err(e) => {
                tracing::warn!(chat_id = event.chat_id, error = %e, "Media request failed");
                let message = e.user_message(event.kind);
                if let Err(send_err) = self.transport.send_text(event.chat_id, &message).await {
                    tracing::error!(chat_id = event.chat_id, error = %send_err, "Failed to send error reply");
                }
            }
        }
    }

    async fn handle_channel(&self, event: &InboundEvent) {
        match self.channels.is_admin(event.chat_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(channel_id = event.chat_id, "Not an admin of this channel, skipping post");
                return;
            }
            Err(e) => {
                e.log("Failed to check channel admin status");
                return;
            }
        }

        match self.edit_channel_post(event).await {
            Ok(()) => tracing::info!(channel_id = event.chat_id, message_id = event.message_id, "Channel post watermarked"),
            Err(e) => tracing::error!(channel_id = event.chat_id, message_id = event.message_id, error = %e, "Channel post processing failed"),
        }
    }

    async fn reply_private(&self, event: &InboundEvent) -> Result<(), RequestError> {
        let processed = self.process(event).await?;
        self.transport
            .send_media(
                event.chat_id,
                processed.kind,
                processed.data,
                Some(&self.reply_caption),
            )
            .await
            .map_err(RequestError::Reply)?;
        Ok(())
    }

    /// Replace the channel post's media, keeping its caption.
    async fn edit_channel_post(&self, event: &InboundEvent) -> Result<(), RequestError> {
        let processed = self.process(event).await?;
        self.transport
            .edit_message_media(
                event.chat_id,
                event.message_id,
                processed.kind,
                processed.data,
                event.caption.as_deref(),
            )
            .await
            .map_err(RequestError::Reply)
    }

    async fn process(&self, event: &InboundEvent) -> Result<ProcessedMedia, RequestError> {
        let data = self
            .transport
            .download_media(&event.media_ref)
            .await
            .map_err(RequestError::Download)?;

        let asset = MediaAsset::new(
            event.kind,
            data,
            format!("chat:{}/msg:{}", event.chat_id, event.message_id),
        );
        Ok(self.pipeline.process(asset).await?)
    }
}
