use crate::traits::{ChatKind, InboundEvent, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use stampcast_core::models::MediaKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const MEDIA_DIR: &str = "media";
const OUTBOX_DIR: &str = "outbox";
const INBOX_DIR: &str = "inbox";
const CHANNEL_PREFIX: &str = "channel-";
const CAPTION_SUFFIX: &str = ".caption";
const BLOCKED_SUFFIX: &str = ".blocked";

/// Local filesystem transport implementation
pub struct LocalTransport {
    root: PathBuf,
    next_message_id: AtomicI64,
}

/// Split an inbox sub-directory name into a chat id and its kind.
fn parse_chat_dir(name: &str) -> Option<(i64, ChatKind)> {
    match name.strip_prefix(CHANNEL_PREFIX) {
        Some(id) => id.parse().ok().map(|id| (id, ChatKind::Channel)),
        None => name.parse().ok().map(|id| (id, ChatKind::Private)),
    }
}

/// Media keys are flat file names inside `media/`.
fn validate_key(key: &str) -> TransportResult<()> {
    if key.is_empty()
        || key.contains("..")
        || key.contains('/')
        || key.contains('\\')
        || key.starts_with('.')
    {
        return Err(TransportError::InvalidRef(key.to_string()));
    }
    Ok(())
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Media files in one inbox chat directory, sorted; caption sidecars excluded.
async fn list_inbox_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_caption = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(CAPTION_SUFFIX));
        if entry.file_type().await?.is_file() && !is_caption {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl LocalTransport {
    /// Create the directory layout under `root` if needed.
    pub async fn new(root: impl Into<PathBuf>) -> TransportResult<Self> {
        let root = root.into();
        for dir in [MEDIA_DIR, OUTBOX_DIR, INBOX_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }

        Ok(Self {
            root,
            next_message_id: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn outbox_dir(&self, chat_id: i64) -> PathBuf {
        self.root.join(OUTBOX_DIR).join(chat_id.to_string())
    }

    fn media_path(&self, key: &str) -> TransportResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(MEDIA_DIR).join(key))
    }

    fn next_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Store media for later delivery and return its reference.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn stage_media(&self, data: &[u8], kind: MediaKind) -> TransportResult<String> {
        let key = format!("{}.{}", Uuid::new_v4(), kind.output_extension());
        fs::write(self.media_path(&key)?, data).await?;
        tracing::debug!(media_ref = %key, "Media staged");
        Ok(key)
    }

    pub async fn media_exists(&self, media_ref: &str) -> bool {
        match self.media_path(media_ref) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Refuse sends to chats carrying an `outbox/<chat_id>.blocked` marker.
    async fn ensure_allowed(&self, chat_id: i64) -> TransportResult<()> {
        let marker = self
            .root
            .join(OUTBOX_DIR)
            .join(format!("{}{}", chat_id, BLOCKED_SUFFIX));
        if fs::try_exists(&marker).await? {
            return Err(TransportError::Rejected(format!(
                "not allowed to post in chat {}",
                chat_id
            )));
        }
        Ok(())
    }

    async fn write_outbox(
        &self,
        chat_id: i64,
        message_id: i64,
        extension: &str,
        data: &[u8],
        caption: Option<&str>,
    ) -> TransportResult<PathBuf> {
        self.ensure_allowed(chat_id).await?;

        let dir = self.outbox_dir(chat_id);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.{}", message_id, extension));
        fs::write(&path, data).await?;
        if let Some(caption) = caption {
            fs::write(dir.join(format!("{}{}", message_id, CAPTION_SUFFIX)), caption).await?;
        }

        tracing::debug!(chat_id = chat_id, message_id = message_id, path = %path.display(), "Outbox written");
        Ok(path)
    }

    /// Turn every media file currently in the inbox into an event.
    ///
    /// Media is moved into `media/`; unsupported files are discarded. A
    /// `<file>.caption` sidecar becomes the event caption. A file or chat
    /// directory that cannot be read is logged and left for the next poll.
    #[tracing::instrument(skip(self))]
    pub async fn poll_inbox(&self) -> TransportResult<Vec<InboundEvent>> {
        let mut events = Vec::new();
        let mut chats = fs::read_dir(self.root.join(INBOX_DIR)).await?;

        loop {
            let chat_entry = match chats.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to list inbox, stopping this poll");
                    break;
                }
            };
            if !chat_entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let dir_name = chat_entry.file_name().to_string_lossy().to_string();
            let Some((chat_id, chat)) = parse_chat_dir(&dir_name) else {
                tracing::debug!(dir = %dir_name, "Ignoring inbox directory with unrecognised name");
                continue;
            };

            let files = match list_inbox_files(&chat_entry.path()).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(dir = %dir_name, error = %e, "Failed to read inbox directory");
                    continue;
                }
            };

            for path in files {
                match self.ingest_file(&path, chat_id, chat).await {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to ingest inbox file")
                    }
                }
            }
        }

        Ok(events)
    }

    async fn ingest_file(
        &self,
        path: &Path,
        chat_id: i64,
        chat: ChatKind,
    ) -> TransportResult<Option<InboundEvent>> {
        let caption_path = PathBuf::from(format!("{}{}", path.display(), CAPTION_SUFFIX));

        let extension = extension_of(path);
        let Some(kind) = extension.as_deref().and_then(MediaKind::from_extension) else {
            tracing::debug!(path = %path.display(), "Discarding unsupported inbox file");
            fs::remove_file(path).await?;
            remove_if_present(&caption_path).await?;
            return Ok(None);
        };

        let key = format!(
            "{}.{}",
            Uuid::new_v4(),
            extension.unwrap_or_else(|| kind.output_extension().to_string())
        );
        // Move first so a failure leaves both the file and its caption in the inbox.
        fs::rename(path, self.media_path(&key)?).await?;

        let caption = match fs::read_to_string(&caption_path).await {
            Ok(text) => {
                if let Err(e) = fs::remove_file(&caption_path).await {
                    tracing::warn!(path = %caption_path.display(), error = %e, "Failed to remove caption sidecar");
                }
                Some(text.trim().to_string()).filter(|c| !c.is_empty())
            }
            Err(_) => None,
        };

        let event = InboundEvent {
            kind,
            chat_id,
            chat,
            message_id: self.next_id(),
            caption,
            sender_id: match chat {
                ChatKind::Private => Some(chat_id),
                ChatKind::Channel => None,
            },
            media_ref: key,
        };
        tracing::info!(
            chat_id = chat_id,
            message_id = event.message_id,
            media_kind = %kind,
            "Inbound media received"
        );
        Ok(Some(event))
    }

    /// Poll the inbox every `interval` and forward events until shut down or
    /// until the receiver is dropped.
    pub fn spawn_inbox_poller(
        self: Arc<Self>,
        interval: Duration,
        events: mpsc::Sender<InboundEvent>,
    ) -> InboxPoller {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_ms = interval.as_millis() as u64, "Inbox poller started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let batch = match self.poll_inbox().await {
                            Ok(batch) => batch,
                            Err(e) => {
                                tracing::error!(error = %e, "Inbox poll failed");
                                continue;
                            }
                        };
                        for event in batch {
                            if events.send(event).await.is_err() {
                                tracing::info!("Event receiver dropped, stopping inbox poller");
                                return;
                            }
                        }
                    }
                }
            }

            tracing::info!("Inbox poller stopped");
        });

        InboxPoller {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle to a running inbox poller.
pub struct InboxPoller {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl InboxPoller {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn download_media(&self, media_ref: &str) -> TransportResult<Vec<u8>> {
        let path = self.media_path(media_ref)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransportError::NotFound(media_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release_media(&self, media_ref: &str) -> TransportResult<()> {
        remove_if_present(&self.media_path(media_ref)?).await?;
        tracing::debug!(media_ref = %media_ref, "Media released");
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> TransportResult<i64> {
        let message_id = self.next_id();
        self.write_outbox(chat_id, message_id, "txt", text.as_bytes(), None)
            .await?;
        Ok(message_id)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<i64> {
        let message_id = self.next_id();
        self.write_outbox(
            chat_id,
            message_id,
            MediaKind::Photo.output_extension(),
            &data,
            caption,
        )
        .await?;
        Ok(message_id)
    }

    async fn send_video(
        &self,
        chat_id: i64,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<i64> {
        let message_id = self.next_id();
        self.write_outbox(
            chat_id,
            message_id,
            MediaKind::Video.output_extension(),
            &data,
            caption,
        )
        .await?;
        Ok(message_id)
    }

    async fn edit_message_media(
        &self,
        chat_id: i64,
        message_id: i64,
        kind: MediaKind,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> TransportResult<()> {
        self.write_outbox(chat_id, message_id, kind.output_extension(), &data, caption)
            .await?;
        Ok(())
    }
}
