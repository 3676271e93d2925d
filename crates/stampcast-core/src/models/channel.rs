use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A destination channel known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: i64,
    pub title: String,
    /// Whether the bot holds admin rights in this channel.
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
