//! Data models for the application
//!
//! Each sub-module represents a specific feature area: media assets flowing
//! through the annotation pipeline, the overlay configuration, scheduled posts
//! and destination channels.

mod channel;
mod media;
mod overlay;
mod post;

pub use channel::*;
pub use media::*;
pub use overlay::*;
pub use post::*;
