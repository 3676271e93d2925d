//! Video metadata via ffprobe

use serde_json::Value;
use stampcast_core::AppError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    /// Seconds.
    pub duration: f64,
    /// Displayed width, after applying `rotation`.
    pub width: u32,
    /// Displayed height, after applying `rotation`.
    pub height: u32,
    /// Clockwise display rotation in degrees, normalized to 0, 90, 180 or 270.
    pub rotation: u32,
    pub codec: String,
    pub has_audio: bool,
    pub framerate: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct VideoProbe {
    ffprobe_path: String,
}

impl VideoProbe {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    #[tracing::instrument(skip(self), fields(
        process.executable.name = "ffprobe",
        process.executable.path = %self.ffprobe_path,
        ffmpeg.operation = "probe"
    ))]
    pub async fn probe(&self, path: &Path) -> Result<VideoMetadata, AppError> {
        let start = std::time::Instant::now();

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AppError::Decode(format!("Failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(AppError::Decode(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let metadata = parse_probe_output(&output.stdout)?;

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            video_duration = metadata.duration,
            width = metadata.width,
            height = metadata.height,
            codec = %metadata.codec,
            has_audio = metadata.has_audio,
            "Video probe completed"
        );

        Ok(metadata)
    }
}

fn parse_framerate(raw: &str) -> Option<f32> {
    let (num, den) = raw.split_once('/')?;
    let num: f32 = num.parse().ok()?;
    let den: f32 = den.parse().ok()?;
    if den != 0.0 {
        Some(num / den)
    } else {
        None
    }
}

/// Rotation from the display matrix side data, or the legacy `rotate` tag.
fn parse_rotation(video: &Value) -> u32 {
    let side_data = video["side_data_list"]
        .as_array()
        .and_then(|list| list.iter().find_map(|entry| entry["rotation"].as_f64()));
    let tag = video["tags"]["rotate"]
        .as_str()
        .and_then(|r| r.trim().parse::<f64>().ok());

    let degrees = side_data.or(tag).unwrap_or(0.0).round() as i64;
    (((degrees % 360) + 360) % 360) as u32
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(stdout: &[u8]) -> Result<VideoMetadata, AppError> {
    let probe: Value = serde_json::from_slice(stdout)
        .map_err(|e| AppError::Decode(format!("Failed to parse ffprobe output: {}", e)))?;

    let streams = probe["streams"].as_array().cloned().unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s["codec_type"] == "video")
        .ok_or_else(|| AppError::Decode("No video stream found".to_string()))?;
    let has_audio = streams.iter().any(|s| s["codec_type"] == "audio");

    let duration = probe["format"]["duration"]
        .as_str()
        .or_else(|| video["duration"].as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| AppError::Decode("Could not parse duration".to_string()))?;

    let width = video["width"]
        .as_u64()
        .filter(|w| *w > 0)
        .ok_or_else(|| AppError::Decode("Could not parse width".to_string()))? as u32;
    let height = video["height"]
        .as_u64()
        .filter(|h| *h > 0)
        .ok_or_else(|| AppError::Decode("Could not parse height".to_string()))? as u32;

    // ffmpeg autorotates its input, so frames arrive in display orientation.
    let rotation = parse_rotation(video);
    let (width, height) = if rotation % 180 == 90 {
        (height, width)
    } else {
        (width, height)
    };

    Ok(VideoMetadata {
        duration,
        width,
        height,
        rotation,
        codec: video["codec_name"]
            .as_str()
            .unwrap_or("unknown")
            .to_string(),
        has_audio,
        framerate: video["r_frame_rate"].as_str().and_then(parse_framerate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720, "r_frame_rate": "30000/1001"},
            {"index": 1, "codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"duration": "12.480000", "bit_rate": "2500000"}
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let meta = parse_probe_output(SAMPLE.as_bytes()).unwrap();
        assert_eq!((meta.width, meta.height), (1280, 720));
        assert_eq!(meta.rotation, 0);
        assert!((meta.duration - 12.48).abs() < 1e-9);
        assert_eq!(meta.codec, "h264");
        assert!(meta.has_audio);
        assert!((meta.framerate.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_probe_without_audio() {
        let json = r#"{"streams": [{"codec_type": "video", "width": 64, "height": 64}], "format": {"duration": "1.0"}}"#;
        let meta = parse_probe_output(json.as_bytes()).unwrap();
        assert!(!meta.has_audio);
        assert_eq!(meta.codec, "unknown");
        assert_eq!(meta.framerate, None);
    }

    #[test]
    fn test_parse_probe_rejects_audio_only() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3.0"}}"#;
        assert!(matches!(
            parse_probe_output(json.as_bytes()),
            Err(AppError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_probe_rejects_garbage() {
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(AppError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_probe_applies_display_rotation() {
        let json = r#"{
            "streams": [{
                "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]
            }],
            "format": {"duration": "4.0"}
        }"#;
        let meta = parse_probe_output(json.as_bytes()).unwrap();
        assert_eq!(meta.rotation, 270);
        assert_eq!((meta.width, meta.height), (1080, 1920));
    }

    #[test]
    fn test_parse_probe_rotate_tag() {
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 360, "tags": {"rotate": "90"}}],
            "format": {"duration": "1.0"}
        }"#;
        let meta = parse_probe_output(json.as_bytes()).unwrap();
        assert_eq!(meta.rotation, 90);
        assert_eq!((meta.width, meta.height), (360, 640));

        let upside_down = r#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 360, "tags": {"rotate": "180"}}],
            "format": {"duration": "1.0"}
        }"#;
        let meta = parse_probe_output(upside_down.as_bytes()).unwrap();
        assert_eq!(meta.rotation, 180);
        assert_eq!((meta.width, meta.height), (640, 360));
    }

    #[test]
    fn test_parse_framerate() {
        assert_eq!(parse_framerate("25/1"), Some(25.0));
        assert_eq!(parse_framerate("0/0"), None);
        assert_eq!(parse_framerate("25"), None);
    }
}
