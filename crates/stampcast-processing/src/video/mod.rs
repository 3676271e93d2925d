//! Video watermarking through ffmpeg/ffprobe child processes

pub mod compositor;
pub mod probe;

pub use compositor::VideoCompositor;
pub use probe::{VideoMetadata, VideoProbe};

use std::process::Stdio;
use tokio::process::Command;

/// Whether `binary -version` runs successfully.
pub async fn check_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
