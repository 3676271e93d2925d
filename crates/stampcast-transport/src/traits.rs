//! Transport abstraction trait

use async_trait::async_trait;
use stampcast_core::models::MediaKind;
use thiserror::Error;

/// Transport operation errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// The referenced media or message does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The platform refused the operation (no rights, chat gone, ...).
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Invalid media reference: {0}")]
    InvalidRef(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Temporary failure; the same call may succeed later.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Io(_) | TransportError::Unavailable(_))
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-to-one conversation with a user.
    Private,
    /// Post published in a channel.
    Channel,
}

/// A photo or video that arrived through the transport.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: MediaKind,
    pub chat_id: i64,
    pub chat: ChatKind,
    pub message_id: i64,
    pub caption: Option<String>,
    pub sender_id: Option<i64>,
    /// Key accepted by [`Transport::download_media`].
    pub media_ref: String,
}

/// Chat transport abstraction
///
/// Send operations return the platform's id for the new message.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch media bytes by reference.
    async fn download_media(&self, media_ref: &str) -> TransportResult<Vec<u8>>;

    async fn send_text(&self, chat_id: i64, text: &str) -> TransportResult<i64>;

    async fn send_photo(
        &self,
        chat_id: i64,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<i64>;

    async fn send_video(
        &self,
        chat_id: i64,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<i64>;

    /// Replace the media of an existing message.
    async fn edit_message_media(
        &self,
        chat_id: i64,
        message_id: i64,
        kind: MediaKind,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<()>;

    /// Drop any storage the transport holds for `media_ref`.
    ///
    /// Hosted platforms keep nothing on our side, so the default does nothing.
    async fn release_media(&self, _media_ref: &str) -> TransportResult<()> {
        Ok(())
    }

    /// Send a photo or a video depending on `kind`.
    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<i64> {
        match kind {
            MediaKind::Photo => self.send_photo(chat_id, data, caption).await,
            MediaKind::Video => self.send_video(chat_id, data, caption).await,
        }
    }
}
