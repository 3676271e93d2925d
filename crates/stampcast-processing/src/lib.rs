//! Stampcast media processing
//!
//! Watermark placement ([`geometry`]), the overlay renderer and still-image
//! compositor ([`image`]), the ffmpeg-backed video compositor ([`video`]) and
//! the [`pipeline`] tying them together behind a single `process` call.

pub mod geometry;
pub mod image;
pub mod pipeline;
pub mod video;

pub use geometry::{layout_block, resolve_placement, scale_to_ratio, BlockLayout, Placement, Size};
pub use self::image::{ImageCompositor, OverlayRenderer, RenderedOverlay};
pub use pipeline::{MediaPipeline, ProcessingError};
pub use video::{check_available, VideoCompositor, VideoMetadata, VideoProbe};
