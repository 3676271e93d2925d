use anyhow::Context;
use chrono::{DateTime, Utc};
use stampcast_core::models::{MediaAsset, MediaKind, PostContent, ProcessedMedia};
use stampcast_db::PostRepository;
use stampcast_processing::MediaPipeline;
use stampcast_transport::Transport;
use std::path::Path;
use uuid::Uuid;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the CLI. Logs go to stderr so JSON output on stdout
/// stays machine-readable. `LOG_FORMAT=json` switches to JSON log lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stampcast=info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs(std::env::var("LOG_FORMAT").ok().as_deref()) {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn json_logs(format: Option<&str>) -> bool {
    format
        .map(|f| f.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// The explicit kind, or the one implied by the file extension.
pub fn resolve_media_kind(path: &Path, explicit: Option<MediaKind>) -> anyhow::Result<MediaKind> {
    if let Some(kind) = explicit {
        return Ok(kind);
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(MediaKind::from_extension)
        .with_context(|| {
            format!(
                "Cannot tell whether {} is a photo or a video; pass --kind",
                path.display()
            )
        })
}

/// Read `path` and run it through the pipeline.
pub async fn process_file(
    pipeline: &MediaPipeline,
    path: &Path,
    kind: MediaKind,
) -> anyhow::Result<ProcessedMedia> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let asset = MediaAsset::new(kind, data, path.display().to_string());
    pipeline
        .process(asset)
        .await
        .with_context(|| format!("Failed to watermark {}", path.display()))
}

/// A watermarked media post waiting to be staged and scheduled.
pub struct MediaDraft<'a> {
    pub processed: ProcessedMedia,
    pub caption: Option<String>,
    pub targets: &'a [i64],
    pub scheduled_at: DateTime<Utc>,
    pub owner: i64,
}

/// Release staged media, logging instead of failing.
pub async fn release_staged(transport: &dyn Transport, media_ref: &str) {
    if let Err(e) = transport.release_media(media_ref).await {
        tracing::warn!(media_ref = %media_ref, error = %e, "Failed to release staged media");
    }
}

/// Stage the draft's media and create the post. When creation fails the
/// staged media is released again.
pub async fn schedule_media_post(
    posts: &PostRepository,
    transport: &stampcast_transport::LocalTransport,
    draft: MediaDraft<'_>,
) -> anyhow::Result<Uuid> {
    let media_ref = transport
        .stage_media(&draft.processed.data, draft.processed.kind)
        .await
        .context("Failed to stage media")?;

    let content = PostContent::Media {
        media_kind: draft.processed.kind,
        media_ref: media_ref.clone(),
        caption: draft.caption,
    };
    match posts
        .create(content, draft.targets, draft.scheduled_at, draft.owner)
        .await
    {
        Ok(id) => Ok(id),
        Err(e) => {
            release_staged(transport, &media_ref).await;
            Err(e).context("Failed to schedule post")
        }
    }
}
