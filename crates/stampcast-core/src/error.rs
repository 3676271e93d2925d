//! Error types module
//!
//! All failures inside Stampcast are unified under [`AppError`]. Each variant
//! describes how it should be presented through [`ErrorMetadata`]: a stable
//! machine-readable code, a message that is safe to show to an end user, and
//! the level it should be logged at.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like a missing optional asset
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error is reported to users and operators.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "DECODE_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same operation later may succeed
    fn is_recoverable(&self) -> bool;

    /// Human-readable message for the requester. Never contains internal detail.
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Invalid or missing overlay/channel/runtime configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input media could not be decoded or probed.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Output media could not be produced.
    #[error("Encode error: {0}")]
    Encode(String),

    /// An optional asset (e.g. the sticker bitmap) is unavailable.
    #[error("Asset missing: {0}")]
    AssetMissing(String),

    /// Bad scheduling input. No state is mutated when this is returned.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single destination channel rejected or failed a send.
    #[error("Delivery to channel {channel_id} failed: {message}")]
    Delivery { channel_id: i64, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(SqlxError::Migrate(Box::new(err)))
    }
}

/// Static metadata for each variant: (error_code, recoverable, log_level).
fn app_error_static_metadata(err: &AppError) -> (&'static str, bool, LogLevel) {
    match err {
        AppError::Configuration(_) => ("CONFIGURATION_ERROR", false, LogLevel::Error),
        AppError::Decode(_) => ("DECODE_ERROR", false, LogLevel::Warn),
        AppError::Encode(_) => ("ENCODE_ERROR", true, LogLevel::Error),
        AppError::AssetMissing(_) => ("ASSET_MISSING", false, LogLevel::Warn),
        AppError::Validation(_) => ("VALIDATION_ERROR", false, LogLevel::Debug),
        AppError::Delivery { .. } => ("DELIVERY_ERROR", true, LogLevel::Warn),
        AppError::NotFound(_) => ("NOT_FOUND", false, LogLevel::Debug),
        AppError::Database(_) => ("DATABASE_ERROR", true, LogLevel::Error),
        AppError::Io(_) => ("IO_ERROR", true, LogLevel::Error),
        AppError::Internal(_) => ("INTERNAL_ERROR", true, LogLevel::Error),
    }
}

impl AppError {
    /// Get the error type name, used as a structured log field
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "ConfigurationError",
            AppError::Decode(_) => "DecodeError",
            AppError::Encode(_) => "EncodeError",
            AppError::AssetMissing(_) => "AssetMissingError",
            AppError::Validation(_) => "ValidationError",
            AppError::Delivery { .. } => "DeliveryError",
            AppError::NotFound(_) => "NotFound",
            AppError::Database(_) => "Database",
            AppError::Io(_) => "Io",
            AppError::Internal(_) => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }

    /// Emit this error through `tracing` at the level its metadata asks for.
    pub fn log(&self, context: &str) {
        let detail = self.detailed_message();
        match self.log_level() {
            LogLevel::Debug => {
                tracing::debug!(error_type = self.error_type(), error = %detail, "{}", context)
            }
            LogLevel::Warn => {
                tracing::warn!(error_type = self.error_type(), error = %detail, "{}", context)
            }
            LogLevel::Error => {
                tracing::error!(error_type = self.error_type(), error = %detail, "{}", context)
            }
        }
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).1
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).2
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Configuration(_) => {
                "The service is misconfigured, please contact the operator".to_string()
            }
            AppError::Decode(_) => {
                "This file could not be read as a photo or video. Try a different file."
                    .to_string()
            }
            AppError::Encode(_) => {
                "Something went wrong while preparing your media. Please try again later."
                    .to_string()
            }
            AppError::AssetMissing(_) => "Part of the watermark is unavailable".to_string(),
            AppError::Validation(ref msg) => msg.clone(),
            AppError::Delivery { channel_id, .. } => {
                format!("Could not deliver to channel {}", channel_id)
            }
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Database(_) => "Failed to access storage".to_string(),
            AppError::Io(_) | AppError::Internal(_) => "Internal error".to_string(),
        }
    }
}
