//! Configuration module
//!
//! Configuration is read from the process environment (optionally seeded from a
//! `.env` file) exactly once at startup and turned into immutable values that are
//! passed explicitly to the components that need them.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::error::AppError;
use crate::models::{Anchor, Color, OverlaySpec};

// Common constants
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MEDIA_WORKERS: usize = 4;
const DEFAULT_INBOX_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_DATABASE_URL: &str = "sqlite://stampcast.db?mode=rwc";
const DEFAULT_REPLY_CAPTION: &str = "Processed by Stampcast";

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            AppError::Configuration(format!("Invalid value for {}: '{}' ({})", key, raw, e))
        }),
        None => Ok(default),
    }
}

/// Watermark settings, turned into an [`OverlaySpec`].
#[derive(Clone, Debug)]
pub struct OverlayConfig {
    pub spec: OverlaySpec,
}

impl OverlayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = OverlaySpec::default();
        let spec = OverlaySpec {
            text: env_or("WATERMARK_TEXT", ""),
            font_path: env_opt("WATERMARK_FONT_PATH").map(PathBuf::from),
            text_color: env_parse::<Color>("WATERMARK_TEXT_COLOR", defaults.text_color)?,
            outline_color: env_parse::<Color>("WATERMARK_OUTLINE_COLOR", defaults.outline_color)?,
            outline_width: env_parse("WATERMARK_OUTLINE_WIDTH", defaults.outline_width)?,
            text_ratio: env_parse("WATERMARK_TEXT_RATIO", defaults.text_ratio)?,
            sticker_path: env_opt("STICKER_PATH").map(PathBuf::from),
            sticker_ratio: env_parse("STICKER_RATIO", defaults.sticker_ratio)?,
            anchor: env_parse::<Anchor>("WATERMARK_ANCHOR", defaults.anchor)?,
            margin: env_parse("WATERMARK_MARGIN", defaults.margin)?,
        };
        let config = Self { spec };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.spec.validate()
    }
}

/// Broadcast dispatcher settings.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Period of the due-post scan.
    pub poll_interval_secs: u64,
    /// How long a dispatcher holds a post before another tick may reclaim it.
    pub claim_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            claim_timeout_secs: DEFAULT_CLAIM_TIMEOUT_SECS,
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let config = Self {
            poll_interval_secs: env_parse("SCHEDULER_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            claim_timeout_secs: env_parse("DISPATCH_CLAIM_TIMEOUT_SECS", DEFAULT_CLAIM_TIMEOUT_SECS)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.poll_interval_secs == 0 {
            return Err(AppError::Configuration(
                "SCHEDULER_POLL_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }
        if self.claim_timeout_secs == 0 {
            return Err(AppError::Configuration(
                "DISPATCH_CLAIM_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Media processing worker settings.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub max_workers: usize,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Root for per-request scratch directories. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,
    pub reply_caption: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MEDIA_WORKERS,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            temp_dir: None,
            reply_caption: DEFAULT_REPLY_CAPTION.to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let config = Self {
            max_workers: env_parse("MEDIA_WORKERS", DEFAULT_MEDIA_WORKERS)?,
            ffmpeg_path: env_or("FFMPEG_PATH", "ffmpeg"),
            ffprobe_path: env_or("FFPROBE_PATH", "ffprobe"),
            temp_dir: env_opt("TEMP_DIR").map(PathBuf::from),
            reply_caption: env_or("REPLY_CAPTION", DEFAULT_REPLY_CAPTION),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_workers == 0 {
            return Err(AppError::Configuration(
                "MEDIA_WORKERS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub overlay: OverlayConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub bot_token: String,
    pub database_url: String,
    pub timezone: Tz,
    pub transport_dir: PathBuf,
    pub inbox_poll_interval_ms: u64,
}

impl Config {
    /// Load everything. A missing `BOT_TOKEN` is fatal.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let bot_token = env_opt("BOT_TOKEN").ok_or_else(|| {
            AppError::Configuration("BOT_TOKEN environment variable is required".to_string())
        })?;

        let timezone_raw = env_or("TIMEZONE", "UTC");
        let timezone = timezone_raw.parse::<Tz>().map_err(|e| {
            AppError::Configuration(format!("Invalid TIMEZONE '{}': {}", timezone_raw, e))
        })?;

        let config = Self {
            overlay: OverlayConfig::from_env()?,
            dispatcher: DispatcherConfig::from_env()?,
            worker: WorkerConfig::from_env()?,
            bot_token,
            database_url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            timezone,
            transport_dir: PathBuf::from(env_or("TRANSPORT_DIR", "./transport")),
            inbox_poll_interval_ms: env_parse(
                "INBOX_POLL_INTERVAL_MS",
                DEFAULT_INBOX_POLL_INTERVAL_MS,
            )?,
        };

        tracing::debug!(
            database_url = %config.database_url,
            timezone = %config.timezone,
            anchor = %config.overlay.spec.anchor,
            poll_interval_secs = config.dispatcher.poll_interval_secs,
            "Configuration loaded"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.overlay.validate()?;
        self.dispatcher.validate()?;
        self.worker.validate()?;
        if self.bot_token.trim().is_empty() {
            return Err(AppError::Configuration(
                "BOT_TOKEN must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.poll_interval_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dispatcher_rejects_zero_interval() {
        let config = DispatcherConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_worker_rejects_zero_workers() {
        let config = WorkerConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_parse_reports_key() {
        // Unique key so parallel tests never race on it.
        env::set_var("STAMPCAST_TEST_BAD_NUMBER", "abc");
        let err = env_parse::<u32>("STAMPCAST_TEST_BAD_NUMBER", 1).unwrap_err();
        env::remove_var("STAMPCAST_TEST_BAD_NUMBER");
        assert!(err.to_string().contains("STAMPCAST_TEST_BAD_NUMBER"));
    }

    #[test]
    fn test_env_parse_default_when_unset() {
        assert_eq!(env_parse::<u32>("STAMPCAST_TEST_UNSET_NUMBER", 7).unwrap(), 7);
    }
}
