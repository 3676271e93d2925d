//! Database repositories for data access layer
//!
//! Each repository owns one aggregate: [`PostRepository`] the scheduled posts
//! with their targets and delivery markers, [`ChannelRepository`] the known
//! destination channels.

pub mod channel;
pub mod post;

pub use channel::ChannelRepository;
pub use post::{PostRepository, PurgedPosts};

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use stampcast_core::AppError;

/// Embedded schema migrations (workspace `migrations/`).
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

const MAX_CONNECTIONS: u32 = 5;

/// Open the store and apply pending migrations.
#[tracing::instrument]
pub async fn connect(database_url: &str) -> Result<SqlitePool, AppError> {
    if database_url.trim() == "sqlite::memory:" {
        return connect_in_memory().await;
    }

    tracing::info!("Connecting to database...");
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    tracing::info!(
        max_connections = MAX_CONNECTIONS,
        "Database connected and migrations applied"
    );

    Ok(pool)
}

/// Private in-memory database. A single connection that never expires keeps
/// the data alive for the lifetime of the pool.
pub async fn connect_in_memory() -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub(crate) fn to_epoch(instant: DateTime<Utc>) -> i64 {
    instant.timestamp()
}

pub(crate) fn from_epoch(secs: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AppError::Internal(format!("Stored timestamp out of range: {}", secs)))
}
