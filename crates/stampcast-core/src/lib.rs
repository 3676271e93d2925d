//! Stampcast Core Library
//!
//! This crate provides the domain models, error types and configuration
//! that are shared across all Stampcast components.

pub mod config;
pub mod error;
pub mod models;
pub mod schedule_time;

// Re-export commonly used types
pub use config::{Config, DispatcherConfig, OverlayConfig, WorkerConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use schedule_time::parse_schedule_time;
