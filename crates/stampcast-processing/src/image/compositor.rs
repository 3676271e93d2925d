use image::{DynamicImage, ImageFormat, ImageReader};
use stampcast_core::AppError;
use std::io::Cursor;
use std::sync::Arc;

use super::overlay::OverlayRenderer;
use crate::geometry::Size;

/// Encoded output of the still-image compositor.
#[derive(Debug, Clone)]
pub struct CompositedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sticker_applied: bool,
}

/// Watermarks still images. CPU-bound; run it on the blocking pool.
#[derive(Debug, Clone)]
pub struct ImageCompositor {
    renderer: Arc<OverlayRenderer>,
}

impl ImageCompositor {
    pub fn new(renderer: Arc<OverlayRenderer>) -> Self {
        Self { renderer }
    }

    /// Decode `data`, apply the watermark and encode the result as PNG.
    ///
    /// Output dimensions equal the input; pixels outside the overlay boxes are
    /// untouched.
    pub fn composite(&self, data: &[u8]) -> Result<CompositedImage, AppError> {
        let img = decode(data)?;
        let (width, height) = (img.width(), img.height());
        let had_alpha = img.color().has_alpha();

        let overlay = self.renderer.render(Size::new(width, height))?;

        let mut canvas = img.into_rgba8();
        overlay.composite_onto(&mut canvas);

        // Blending onto opaque pixels keeps them opaque, so dropping alpha is lossless.
        let output = if had_alpha {
            DynamicImage::ImageRgba8(canvas)
        } else {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
        };

        let mut buffer = Vec::new();
        output
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .map_err(|e| AppError::Encode(format!("PNG encoding failed: {}", e)))?;

        tracing::debug!(
            width = width,
            height = height,
            output_bytes = buffer.len(),
            sticker_applied = overlay.sticker_applied(),
            "Image composited"
        );

        Ok(CompositedImage {
            data: buffer,
            width,
            height,
            sticker_applied: overlay.sticker_applied(),
        })
    }
}

fn decode(data: &[u8]) -> Result<DynamicImage, AppError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AppError::Decode(format!("Cannot read image header: {}", e)))?;
    if reader.format().is_none() {
        return Err(AppError::Decode("Unrecognised image format".to_string()));
    }
    reader
        .decode()
        .map_err(|e| AppError::Decode(format!("Image decoding failed: {}", e)))
}
