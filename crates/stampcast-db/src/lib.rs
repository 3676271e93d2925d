//! Stampcast Database Layer
//!
//! This crate provides the durable scheduled post store and the channel
//! registry, both backed by SQLite through sqlx.

pub mod db;

pub use db::{connect, connect_in_memory, ChannelRepository, PostRepository, PurgedPosts, MIGRATOR};
