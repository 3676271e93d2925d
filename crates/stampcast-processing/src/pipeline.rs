//! Media annotation pipeline
//!
//! One entry point, [`MediaPipeline::process`], turns a [`MediaAsset`] into
//! [`ProcessedMedia`]. Failures are wrapped in [`ProcessingError`], which keeps
//! the cause for logging and offers a message that is safe to show users.

use stampcast_core::models::{MediaAsset, MediaKind, ProcessedMedia};
use stampcast_core::{AppError, ErrorMetadata, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;

use crate::image::{ImageCompositor, OverlayRenderer};
use crate::video::VideoCompositor;

#[derive(Debug, Error)]
#[error("Failed to process {kind} from {source_id}: {cause}")]
pub struct ProcessingError {
    pub kind: MediaKind,
    pub source_id: String,
    #[source]
    pub cause: AppError,
}

impl ProcessingError {
    fn new(asset: &MediaAsset, cause: AppError) -> Self {
        Self {
            kind: asset.kind,
            source_id: asset.source_id.clone(),
            cause,
        }
    }

    /// Human-readable explanation without internal detail.
    pub fn user_message(&self) -> String {
        match &self.cause {
            AppError::Decode(_) => format!(
                "Sorry, this {} could not be read. Please send a different file.",
                self.kind
            ),
            AppError::Encode(_) => format!(
                "Sorry, something went wrong while watermarking your {}. Please try again later.",
                self.kind
            ),
            other => other.client_message(),
        }
    }
}

/// Watermarks photos in-process and videos through ffmpeg.
#[derive(Debug, Clone)]
pub struct MediaPipeline {
    renderer: Arc<OverlayRenderer>,
    image: ImageCompositor,
    video: VideoCompositor,
    temp_root: Option<PathBuf>,
}

impl MediaPipeline {
    pub fn new(renderer: Arc<OverlayRenderer>, config: &WorkerConfig) -> Self {
        Self {
            image: ImageCompositor::new(renderer.clone()),
            video: VideoCompositor::new(
                renderer.clone(),
                config.ffmpeg_path.clone(),
                config.ffprobe_path.clone(),
            ),
            renderer,
            temp_root: config.temp_dir.clone(),
        }
    }

    pub fn renderer(&self) -> &Arc<OverlayRenderer> {
        &self.renderer
    }

    #[tracing::instrument(skip(self, asset), fields(
        media.kind = %asset.kind,
        media.source = %asset.source_id,
        media.size = asset.data.len()
    ))]
    pub async fn process(&self, asset: MediaAsset) -> Result<ProcessedMedia, ProcessingError> {
        let start = std::time::Instant::now();

        let result = match asset.kind {
            MediaKind::Photo => self.process_photo(&asset).await,
            MediaKind::Video => self.process_video(&asset).await,
        };

        match result {
            Ok(processed) => {
                tracing::info!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    width = processed.width,
                    height = processed.height,
                    output_bytes = processed.data.len(),
                    spec_version = %processed.spec_version,
                    "Media processed"
                );
                Ok(processed)
            }
            Err(cause) => {
                cause.log("Media processing failed");
                Err(ProcessingError::new(&asset, cause))
            }
        }
    }

    async fn process_photo(&self, asset: &MediaAsset) -> Result<ProcessedMedia, AppError> {
        let compositor = self.image.clone();
        let data = asset.data.clone();

        let composited = tokio::task::spawn_blocking(move || compositor.composite(&data))
            .await
            .map_err(|e| AppError::Internal(format!("Image task failed: {}", e)))??;

        Ok(ProcessedMedia {
            kind: MediaKind::Photo,
            data: composited.data,
            spec_version: self.renderer.fingerprint(),
            width: composited.width,
            height: composited.height,
            sticker_applied: composited.sticker_applied,
        })
    }

    async fn process_video(&self, asset: &MediaAsset) -> Result<ProcessedMedia, AppError> {
        // Removed on drop, whichever way this function returns.
        let workspace = self.create_workspace()?;
        let input = workspace.path().join("source");
        let output = workspace.path().join("output.mp4");

        tokio::fs::write(&input, &asset.data).await?;

        let metadata = self
            .video
            .composite(&input, &output, workspace.path())
            .await?;
        let data = tokio::fs::read(&output).await?;

        Ok(ProcessedMedia {
            kind: MediaKind::Video,
            data,
            spec_version: self.renderer.fingerprint(),
            width: metadata.width,
            height: metadata.height,
            sticker_applied: self.renderer.has_sticker(),
        })
    }

    fn create_workspace(&self) -> Result<TempDir, AppError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stampcast-");
        let dir = match &self.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::overlay::tests::{solid_sticker, sticker_only_spec, system_font};
    use crate::video::compositor::tests::{make_test_video, video_tools_available};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use stampcast_core::models::{Anchor, OverlaySpec};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 200, 200]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn pipeline_in(temp_root: &std::path::Path) -> MediaPipeline {
        let renderer = Arc::new(OverlayRenderer::from_parts(
            sticker_only_spec(Anchor::BottomCenter),
            None,
            Some(solid_sticker(20, 20)),
        ));
        let config = WorkerConfig {
            temp_dir: Some(temp_root.to_path_buf()),
            ..Default::default()
        };
        MediaPipeline::new(renderer, &config)
    }

    fn leftover_entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_photo_is_watermarked() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline_in(root.path());
        let processed = pipeline
            .process(MediaAsset::new(MediaKind::Photo, png(400, 300), "test:photo"))
            .await
            .unwrap();

        assert_eq!(processed.kind, MediaKind::Photo);
        assert_eq!((processed.width, processed.height), (400, 300));
        assert!(processed.sticker_applied);
        assert_eq!(processed.spec_version, pipeline.renderer().fingerprint());
        assert_eq!(
            image::guess_format(&processed.data).unwrap(),
            ImageFormat::Png
        );
    }

    #[tokio::test]
    async fn test_bad_photo_reports_friendly_error() {
        let root = TempDir::new().unwrap();
        let err = pipeline_in(root.path())
            .process(MediaAsset::new(MediaKind::Photo, b"garbage".to_vec(), "chat:1/msg:2"))
            .await
            .unwrap_err();

        assert!(matches!(err.cause, AppError::Decode(_)));
        assert_eq!(err.source_id, "chat:1/msg:2");
        let message = err.user_message();
        assert!(message.contains("photo"));
        assert!(!message.contains("decoding"));
    }

    #[tokio::test]
    async fn test_failed_video_leaves_no_temp_files() {
        let root = TempDir::new().unwrap();
        let err = pipeline_in(root.path())
            .process(MediaAsset::new(
                MediaKind::Video,
                b"not a video".to_vec(),
                "test:video",
            ))
            .await
            .unwrap_err();

        // Missing ffprobe and unreadable input both surface as decode failures.
        assert!(matches!(err.cause, AppError::Decode(_)));
        assert_eq!(leftover_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_video_round_trip_cleans_up() {
        if !video_tools_available().await {
            eprintln!("skipping: ffmpeg/ffprobe with libx264 not available");
            return;
        }
        let source_dir = TempDir::new().unwrap();
        let input = make_test_video(source_dir.path(), 160, 120).await;
        let data = std::fs::read(&input).unwrap();

        let root = TempDir::new().unwrap();
        let processed = pipeline_in(root.path())
            .process(MediaAsset::new(MediaKind::Video, data, "test:video"))
            .await
            .unwrap();

        assert_eq!(processed.kind, MediaKind::Video);
        assert_eq!((processed.width, processed.height), (160, 120));
        assert!(!processed.data.is_empty());
        assert_eq!(leftover_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_specs_are_independent() {
        let Some(font_path) = system_font() else {
            eprintln!("skipping: no system font found");
            return;
        };
        let root = TempDir::new().unwrap();
        let config = WorkerConfig {
            temp_dir: Some(root.path().to_path_buf()),
            ..Default::default()
        };
        let make = |text: &str, anchor| {
            let spec = OverlaySpec {
                text: text.to_string(),
                font_path: Some(font_path.clone()),
                anchor,
                ..Default::default()
            };
            MediaPipeline::new(Arc::new(OverlayRenderer::load(spec).unwrap()), &config)
        };

        let top = make("@Top", Anchor::TopLeft);
        let bottom = make("@Bottom", Anchor::BottomRight);
        let a = top
            .process(MediaAsset::new(MediaKind::Photo, png(300, 200), "a"))
            .await
            .unwrap();
        let b = bottom
            .process(MediaAsset::new(MediaKind::Photo, png(300, 200), "b"))
            .await
            .unwrap();

        assert_ne!(a.spec_version, b.spec_version);
        assert_ne!(a.data, b.data);
    }
}
