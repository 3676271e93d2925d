use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::MediaKind;
use crate::error::AppError;

/// What a scheduled post delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostContent {
    Text {
        text: String,
    },
    /// Previously uploaded media, referenced by a transport-specific key.
    Media {
        media_kind: MediaKind,
        media_ref: String,
        caption: Option<String>,
    },
}

impl PostContent {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PostContent::Text { .. } => "text",
            PostContent::Media {
                media_kind: MediaKind::Photo,
                ..
            } => "photo",
            PostContent::Media {
                media_kind: MediaKind::Video,
                ..
            } => "video",
        }
    }

    /// Reject content that can never be delivered.
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            PostContent::Text { text } if text.trim().is_empty() => Err(AppError::Validation(
                "Text posts must not be empty".to_string(),
            )),
            PostContent::Media { media_ref, .. } if media_ref.trim().is_empty() => Err(
                AppError::Validation("Media posts need a media reference".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PostStatus::Pending)
    }
}

impl Display for PostStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PostStatus::Pending => write!(f, "pending"),
            PostStatus::Sent => write!(f, "sent"),
            PostStatus::Failed => write!(f, "failed"),
            PostStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for PostStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PostStatus::Pending),
            "sent" => Ok(PostStatus::Sent),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" => Ok(PostStatus::Cancelled),
            _ => Err(AppError::Validation(format!("Invalid post status: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: Uuid,
    pub content: PostContent,
    /// Destination channels in the order they were given.
    pub targets: Vec<i64>,
    pub scheduled_at: DateTime<Utc>,
    pub owner: i64,
    pub status: PostStatus,
    pub failure_reason: Option<String>,
    /// Dispatcher lease; a post with a live lease is being delivered.
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScheduledPost {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Pending && self.scheduled_at <= now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

impl Display for DeliveryOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for DeliveryOutcome {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(DeliveryOutcome::Delivered),
            "failed" => Ok(DeliveryOutcome::Failed),
            _ => Err(AppError::Validation(format!(
                "Invalid delivery outcome: {}",
                s
            ))),
        }
    }
}

/// Per-(post, channel) delivery marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub post_id: Uuid,
    pub channel_id: i64,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Filters for listing scheduled posts.
#[derive(Debug, Clone, Default)]
pub struct PostListQuery {
    pub status: Option<PostStatus>,
    pub owner: Option<i64>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_status_terminal() {
        assert!(!PostStatus::Pending.is_terminal());
        assert!(PostStatus::Sent.is_terminal());
        assert!(PostStatus::Failed.is_terminal());
        assert!(PostStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_post_status_parse() {
        for status in [
            PostStatus::Pending,
            PostStatus::Sent,
            PostStatus::Failed,
            PostStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<PostStatus>().unwrap(), status);
        }
        assert!("running".parse::<PostStatus>().is_err());
    }

    #[test]
    fn test_content_validation() {
        assert!(PostContent::Text {
            text: "  ".to_string()
        }
        .validate()
        .is_err());
        assert!(PostContent::Media {
            media_kind: MediaKind::Photo,
            media_ref: String::new(),
            caption: None,
        }
        .validate()
        .is_err());
        assert!(PostContent::Text {
            text: "hello".to_string()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_content_kind_name() {
        let video = PostContent::Media {
            media_kind: MediaKind::Video,
            media_ref: "media/abc.mp4".to_string(),
            caption: Some("launch".to_string()),
        };
        assert_eq!(video.kind_name(), "video");
        let json = serde_json::to_value(&video).unwrap();
        assert_eq!(json["kind"], "media");
        assert_eq!(json["media_kind"], "video");
    }
}
