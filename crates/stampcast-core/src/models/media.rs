use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::AppError;

/// The only two kinds of media Stampcast annotates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// File extension used for produced output of this kind.
    pub fn output_extension(&self) -> &'static str {
        match self {
            MediaKind::Photo => "png",
            MediaKind::Video => "mp4",
        }
    }

    pub fn output_content_type(&self) -> &'static str {
        match self {
            MediaKind::Photo => "image/png",
            MediaKind::Video => "video/mp4",
        }
    }

    /// Guess the kind from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "gif" | "bmp" => Some(MediaKind::Photo),
            "mp4" | "mov" | "mkv" | "webm" | "avi" | "m4v" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaKind::Photo => write!(f, "photo"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "photo" | "image" => Ok(MediaKind::Photo),
            "video" => Ok(MediaKind::Video),
            other => Err(AppError::Validation(format!(
                "Unsupported media kind '{}': expected photo or video",
                other
            ))),
        }
    }
}

/// Raw media handed to the annotation pipeline.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub kind: MediaKind,
    pub data: Vec<u8>,
    /// Where the bytes came from (message reference, file path, ...). Used for logging.
    pub source_id: String,
}

impl MediaAsset {
    pub fn new(kind: MediaKind, data: Vec<u8>, source_id: impl Into<String>) -> Self {
        Self {
            kind,
            data,
            source_id: source_id.into(),
        }
    }
}

/// Output of the annotation pipeline, consumed immediately by a delivery step.
#[derive(Debug, Clone)]
pub struct ProcessedMedia {
    pub kind: MediaKind,
    pub data: Vec<u8>,
    /// Fingerprint of the [`crate::models::OverlaySpec`] used to produce this output.
    pub spec_version: String,
    pub width: u32,
    pub height: u32,
    pub sticker_applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_parse() {
        assert_eq!("photo".parse::<MediaKind>().unwrap(), MediaKind::Photo);
        assert_eq!("Image".parse::<MediaKind>().unwrap(), MediaKind::Photo);
        assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert!(matches!(
            "audio".parse::<MediaKind>(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_media_kind_from_extension() {
        assert_eq!(MediaKind::from_extension("JPG"), Some(MediaKind::Photo));
        assert_eq!(MediaKind::from_extension("mov"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_extension("txt"), None);
    }

    #[test]
    fn test_media_kind_serialization() {
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
        assert_eq!(MediaKind::Photo.output_extension(), "png");
    }
}
