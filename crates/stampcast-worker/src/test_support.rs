use async_trait::async_trait;
use stampcast_core::models::MediaKind;
use stampcast_transport::{Transport, TransportError, TransportResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Text {
        chat_id: i64,
        text: String,
    },
    Media {
        chat_id: i64,
        kind: MediaKind,
        caption: Option<String>,
    },
    Edit {
        chat_id: i64,
        message_id: i64,
        kind: MediaKind,
        caption: Option<String>,
    },
}

impl Call {
    pub(crate) fn chat_id(&self) -> i64 {
        match self {
            Call::Text { chat_id, .. } | Call::Media { chat_id, .. } | Call::Edit { chat_id, .. } => {
                *chat_id
            }
        }
    }
}

/// In-memory transport recording every call.
#[derive(Default)]
pub(crate) struct MockTransport {
    calls: Mutex<Vec<Call>>,
    media: Mutex<HashMap<String, Vec<u8>>>,
    released: Mutex<Vec<String>>,
    rejecting: Mutex<HashSet<i64>>,
    unavailable: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
    next_id: AtomicI64,
}

impl MockTransport {
    pub(crate) fn put_media(&self, media_ref: &str, data: Vec<u8>) {
        self.media
            .lock()
            .unwrap()
            .insert(media_ref.to_string(), data);
    }

    pub(crate) fn has_media(&self, media_ref: &str) -> bool {
        self.media.lock().unwrap().contains_key(media_ref)
    }

    /// Media refs passed to `release_media`, in call order.
    pub(crate) fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    pub(crate) fn reject(&self, chat_id: i64) {
        self.rejecting.lock().unwrap().insert(chat_id);
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every send take `delay` before it is recorded.
    pub(crate) fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = Some(delay);
    }

    async fn pause(&self) {
        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, chat_id: i64) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.chat_id() == chat_id)
            .collect()
    }

    fn record(&self, chat_id: i64, call: Call) -> TransportResult<i64> {
        if self.rejecting.lock().unwrap().contains(&chat_id) {
            return Err(TransportError::Rejected(format!(
                "bot cannot post to {}",
                chat_id
            )));
        }
        self.calls.lock().unwrap().push(call);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn download_media(&self, media_ref: &str) -> TransportResult<Vec<u8>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("storage offline".to_string()));
        }
        self.media
            .lock()
            .unwrap()
            .get(media_ref)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(media_ref.to_string()))
    }

    async fn release_media(&self, media_ref: &str) -> TransportResult<()> {
        self.media.lock().unwrap().remove(media_ref);
        self.released.lock().unwrap().push(media_ref.to_string());
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> TransportResult<i64> {
        self.pause().await;
        self.record(
            chat_id,
            Call::Text {
                chat_id,
                text: text.to_string(),
            },
        )
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        _data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<i64> {
        self.pause().await;
        self.record(
            chat_id,
            Call::Media {
                chat_id,
                kind: MediaKind::Photo,
                caption: caption.map(str::to_string),
            },
        )
    }

    async fn send_video(
        &self,
        chat_id: i64,
        _data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<i64> {
        self.pause().await;
        self.record(
            chat_id,
            Call::Media {
                chat_id,
                kind: MediaKind::Video,
                caption: caption.map(str::to_string),
            },
        )
    }

    async fn edit_message_media(
        &self,
        chat_id: i64,
        message_id: i64,
        kind: MediaKind,
        _data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<()> {
        self.pause().await;
        self.record(
            chat_id,
            Call::Edit {
                chat_id,
                message_id,
                kind,
                caption: caption.map(str::to_string),
            },
        )
        .map(|_| ())
    }
}
