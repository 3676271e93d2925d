//! Overlay geometry
//!
//! Pure functions that size overlay elements relative to the media and pin
//! them to an [`Anchor`]. Nothing here touches pixels.

use stampcast_core::models::{Anchor, HorizontalAlign, VerticalAlign};
use stampcast_core::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Top-left corner and extent of an overlay element, in media pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Whether the pixel `(px, py)` falls inside this box.
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x
            && py >= self.y
            && (px as u64) < self.x as u64 + self.width as u64
            && (py as u64) < self.y as u64 + self.height as u64
    }
}

/// Scale `source` so its width is `round(media.width * ratio)`, keeping its aspect ratio.
///
/// A result taller than the media is shrunk to `media.height`, aspect kept.
pub fn scale_to_ratio(media: Size, source: Size, ratio: f32) -> Result<Size, AppError> {
    if !(ratio.is_finite() && ratio > 0.0 && ratio <= 1.0) {
        return Err(AppError::Configuration(format!(
            "Overlay ratio must be in (0, 1], got {}",
            ratio
        )));
    }
    if source.width == 0 || source.height == 0 {
        return Err(AppError::Configuration(format!(
            "Overlay source has a zero dimension: {}x{}",
            source.width, source.height
        )));
    }

    let aspect = source.height as f64 / source.width as f64;
    let width = ((media.width as f64 * ratio as f64).round() as u32).max(1);
    let height = ((width as f64 * aspect).round() as u32).max(1);

    let max_height = media.height.max(1);
    if height > max_height {
        let width = ((max_height as f64 / aspect).round() as u32).clamp(1, width);
        return Ok(Size::new(width, max_height));
    }

    Ok(Size::new(width, height))
}

/// Pin an overlay of `overlay` size to `anchor` inside `media`, `margin` pixels
/// from the anchored edges.
///
/// The result is clamped into `[0, W - w] x [0, H - h]`; an overlay larger than
/// the media sits at 0 on that axis.
pub fn resolve_placement(media: Size, overlay: Size, anchor: Anchor, margin: u32) -> Placement {
    let (media_w, media_h) = (media.width as i64, media.height as i64);
    let (w, h) = (overlay.width as i64, overlay.height as i64);
    let margin = margin as i64;

    let x = match anchor.horizontal() {
        HorizontalAlign::Left => margin,
        HorizontalAlign::Right => media_w - margin - w,
        HorizontalAlign::Center => (media_w - w) / 2,
    };
    let y = match anchor.vertical() {
        VerticalAlign::Top => margin,
        VerticalAlign::Bottom => media_h - margin - h,
    };

    Placement {
        x: x.clamp(0, (media_w - w).max(0)) as u32,
        y: y.clamp(0, (media_h - h).max(0)) as u32,
        width: overlay.width,
        height: overlay.height,
    }
}

/// Resolved boxes for the watermark block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    /// Bounding box of the whole block.
    pub block: Placement,
    pub sticker: Option<Placement>,
    pub text: Option<Placement>,
}

/// Stack the sticker above the text (separated by `margin / 2`), align each
/// element inside the block per the anchor and pin the block to the media.
pub fn layout_block(
    media: Size,
    sticker: Option<Size>,
    text: Option<Size>,
    anchor: Anchor,
    margin: u32,
) -> BlockLayout {
    let gap = if sticker.is_some() && text.is_some() {
        margin / 2
    } else {
        0
    };
    let sticker_size = sticker.unwrap_or(Size::new(0, 0));
    let text_size = text.unwrap_or(Size::new(0, 0));

    let block_size = Size::new(
        sticker_size.width.max(text_size.width),
        sticker_size.height + gap + text_size.height,
    );
    let block = resolve_placement(media, block_size, anchor, margin);

    let align_x = |element_width: u32| -> u32 {
        let slack = block_size.width - element_width;
        match anchor.horizontal() {
            HorizontalAlign::Left => block.x,
            HorizontalAlign::Right => block.x + slack,
            HorizontalAlign::Center => block.x + slack / 2,
        }
    };

    let sticker = sticker.map(|size| Placement {
        x: align_x(size.width),
        y: block.y,
        width: size.width,
        height: size.height,
    });
    let text = text.map(|size| Placement {
        x: align_x(size.width),
        y: block.y + sticker_size.height + gap,
        width: size.width,
        height: size.height,
    });

    BlockLayout {
        block,
        sticker,
        text,
    }
}
