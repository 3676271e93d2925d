//! Still-image watermarking
//!
//! - [`overlay`]: loads the font and sticker once and renders the watermark
//!   elements for a given media size
//! - [`compositor`]: decodes a still image, blends the rendered elements in
//!   and encodes PNG

pub mod compositor;
pub mod overlay;

pub use compositor::{CompositedImage, ImageCompositor};
pub use overlay::{OverlayElement, OverlayRenderer, RenderedOverlay};
