use stampcast_core::AppError;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use super::probe::{VideoMetadata, VideoProbe};
use crate::geometry::Size;
use crate::image::OverlayRenderer;

/// Largest accepted difference between input and output duration, in seconds.
const DURATION_TOLERANCE_SECS: f64 = 1.0;

/// Burns the watermark into every frame of a video with ffmpeg.
#[derive(Debug, Clone)]
pub struct VideoCompositor {
    renderer: Arc<OverlayRenderer>,
    probe: VideoProbe,
    ffmpeg_path: String,
}

impl VideoCompositor {
    pub fn new(
        renderer: Arc<OverlayRenderer>,
        ffmpeg_path: impl Into<String>,
        ffprobe_path: impl Into<String>,
    ) -> Self {
        Self {
            renderer,
            probe: VideoProbe::new(ffprobe_path),
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn probe(&self) -> &VideoProbe {
        &self.probe
    }

    /// Watermark `input` into `output` (MP4), using `workdir` for the overlay layer.
    ///
    /// On any failure `output` is removed.
    #[tracing::instrument(skip(self), fields(
        process.executable.name = "ffmpeg",
        ffmpeg.operation = "overlay"
    ))]
    pub async fn composite(
        &self,
        input: &Path,
        output: &Path,
        workdir: &Path,
    ) -> Result<VideoMetadata, AppError> {
        let source = self.probe.probe(input).await?;

        let result = self.encode(&source, input, output, workdir).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(output).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, path = %output.display(), "Failed to remove partial output");
                }
            }
        }
        result
    }

    async fn encode(
        &self,
        source: &VideoMetadata,
        input: &Path,
        output: &Path,
        workdir: &Path,
    ) -> Result<VideoMetadata, AppError> {
        let start = std::time::Instant::now();
        let media = Size::new(source.width, source.height);

        // Rendering and the full-frame layer are CPU and memory heavy.
        let layer_path = workdir.join("overlay.png");
        let renderer = self.renderer.clone();
        let save_path = layer_path.clone();
        let sticker_applied = tokio::task::spawn_blocking(move || -> Result<bool, AppError> {
            let overlay = renderer.render(media)?;
            overlay
                .to_frame_layer(media)
                .save(&save_path)
                .map_err(|e| AppError::Encode(format!("Failed to write overlay layer: {}", e)))?;
            Ok(overlay.sticker_applied())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Overlay render task failed: {}", e)))??;

        let args = build_args(input, &layer_path, output, media);
        let result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AppError::Encode(format!("Failed to execute ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(AppError::Encode(format!("FFmpeg failed: {}", stderr.trim())));
        }

        let produced = self
            .probe
            .probe(output)
            .await
            .map_err(|e| AppError::Encode(format!("Output is not a readable video: {}", e)))?;

        let drift = (produced.duration - source.duration).abs();
        if drift >= DURATION_TOLERANCE_SECS {
            return Err(AppError::Encode(format!(
                "Output duration {:.3}s differs from input {:.3}s",
                produced.duration, source.duration
            )));
        }

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            width = produced.width,
            height = produced.height,
            video_duration = produced.duration,
            has_audio = produced.has_audio,
            sticker_applied,
            "Video composited"
        );

        Ok(produced)
    }
}

/// ffmpeg arguments: overlay the full-frame layer at 0:0, H.264 video, audio copied.
///
/// Frame size is kept as is. yuv420p needs even dimensions, so odd-sized
/// sources are encoded as yuv444p instead of being padded.
fn build_args(input: &Path, layer: &Path, output: &Path, media: Size) -> Vec<String> {
    let pix_fmt = if media.width % 2 == 0 && media.height % 2 == 0 {
        "yuv420p"
    } else {
        "yuv444p"
    };
    let filter = format!("[0:v][1:v]overlay=0:0:format=auto,format={}[v]", pix_fmt);

    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-i".to_string(),
        layer.to_string_lossy().to_string(),
        "-filter_complex".to_string(),
        filter,
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "0:a?".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
        output.to_string_lossy().to_string(),
    ]
}
