use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{imageops, imageops::FilterType, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use stampcast_core::models::{Color, OverlaySpec};
use stampcast_core::AppError;
use std::path::Path;

use crate::geometry::{layout_block, scale_to_ratio, Placement, Size};

/// A rendered watermark piece and where it goes on the media.
#[derive(Debug, Clone)]
pub struct OverlayElement {
    pub placement: Placement,
    pub image: RgbaImage,
}

/// Watermark elements resolved for one media size.
#[derive(Debug, Clone, Default)]
pub struct RenderedOverlay {
    pub sticker: Option<OverlayElement>,
    pub text: Option<OverlayElement>,
}

impl RenderedOverlay {
    pub fn sticker_applied(&self) -> bool {
        self.sticker.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.sticker.is_none() && self.text.is_none()
    }

    pub fn elements(&self) -> impl Iterator<Item = &OverlayElement> {
        self.sticker.iter().chain(self.text.iter())
    }

    /// Alpha-blend every element onto `canvas` at its placement.
    pub fn composite_onto(&self, canvas: &mut RgbaImage) {
        for element in self.elements() {
            imageops::overlay(
                canvas,
                &element.image,
                element.placement.x as i64,
                element.placement.y as i64,
            );
        }
    }

    /// Full-frame transparent layer carrying the elements, for ffmpeg overlay.
    pub fn to_frame_layer(&self, media: Size) -> RgbaImage {
        let mut layer = RgbaImage::from_pixel(media.width, media.height, Rgba([0, 0, 0, 0]));
        self.composite_onto(&mut layer);
        layer
    }
}

fn to_rgba(color: Color) -> Rgba<u8> {
    Rgba(color.to_array())
}

/// Renders the watermark described by an [`OverlaySpec`].
///
/// The font and sticker are loaded once at construction; rendering itself is
/// pure and can run concurrently from many requests.
pub struct OverlayRenderer {
    spec: OverlaySpec,
    font: Option<FontArc>,
    sticker: Option<RgbaImage>,
}

impl std::fmt::Debug for OverlayRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayRenderer")
            .field("fingerprint", &self.spec.fingerprint())
            .field("font_loaded", &self.font.is_some())
            .field("sticker_loaded", &self.sticker.is_some())
            .finish()
    }
}

impl OverlayRenderer {
    /// Validate the spec and load its assets.
    ///
    /// An unreadable font is a configuration error. An unreadable sticker is
    /// logged and skipped so the text watermark still applies.
    pub fn load(spec: OverlaySpec) -> Result<Self, AppError> {
        spec.validate()?;

        let font = match (&spec.font_path, spec.has_text()) {
            (Some(path), true) => Some(load_font(path)?),
            _ => None,
        };

        let sticker = match &spec.sticker_path {
            Some(path) => match load_sticker(path) {
                Ok(sticker) => Some(sticker),
                Err(e) => {
                    e.log("Sticker unavailable, continuing with text only");
                    None
                }
            },
            None => None,
        };

        tracing::info!(
            fingerprint = %spec.fingerprint(),
            anchor = %spec.anchor,
            text = spec.has_text(),
            sticker = sticker.is_some(),
            "Overlay renderer ready"
        );

        Ok(Self {
            spec,
            font,
            sticker,
        })
    }

    /// Build a renderer from already-loaded assets.
    pub fn from_parts(spec: OverlaySpec, font: Option<FontArc>, sticker: Option<RgbaImage>) -> Self {
        Self {
            spec,
            font,
            sticker,
        }
    }

    pub fn spec(&self) -> &OverlaySpec {
        &self.spec
    }

    pub fn fingerprint(&self) -> String {
        self.spec.fingerprint()
    }

    pub fn has_sticker(&self) -> bool {
        self.sticker.is_some()
    }

    /// Font pixel height for media of the given width.
    pub fn font_px(&self, media_width: u32) -> u32 {
        ((media_width as f64 * self.spec.text_ratio as f64).round() as u32).max(1)
    }

    /// Size of the text element (glyphs plus outline) for the given media width.
    pub fn measure_text(&self, media_width: u32) -> Option<Size> {
        let font = self.font.as_ref().filter(|_| self.spec.has_text())?;
        let scale = PxScale::from(self.font_px(media_width) as f32);
        let (text_w, text_h) = text_size(scale, font, &self.spec.text);

        let scaled = font.as_scaled(scale);
        let line_h = (scaled.ascent() - scaled.descent()).ceil().max(0.0) as u32;
        let pad = self.spec.outline_width * 2;

        Some(Size::new(
            text_w.max(1) + pad,
            text_h.max(line_h).max(1) + pad,
        ))
    }

    /// Resolve and rasterise the watermark for media of size `media`.
    pub fn render(&self, media: Size) -> Result<RenderedOverlay, AppError> {
        if media.width == 0 || media.height == 0 {
            return Err(AppError::Decode(format!(
                "Media has a zero dimension: {}x{}",
                media.width, media.height
            )));
        }

        let sticker_size = match &self.sticker {
            Some(sticker) => Some(scale_to_ratio(
                media,
                Size::new(sticker.width(), sticker.height()),
                self.spec.sticker_ratio,
            )?),
            None => None,
        };
        let text_size = self.measure_text(media.width);

        let layout = layout_block(
            media,
            sticker_size,
            text_size,
            self.spec.anchor,
            self.spec.margin,
        );

        let sticker = match (&self.sticker, layout.sticker) {
            (Some(source), Some(placement)) => Some(OverlayElement {
                image: imageops::resize(
                    source,
                    placement.width,
                    placement.height,
                    FilterType::Lanczos3,
                ),
                placement,
            }),
            _ => None,
        };

        let text = match (&self.font, layout.text) {
            (Some(font), Some(placement)) => Some(OverlayElement {
                image: self.render_text(font, media.width, placement.size()),
                placement,
            }),
            _ => None,
        };

        Ok(RenderedOverlay { sticker, text })
    }

    /// Draw the outline at the eight neighbouring offsets, then the fill on top.
    fn render_text(&self, font: &FontArc, media_width: u32, size: Size) -> RgbaImage {
        let mut layer = RgbaImage::from_pixel(size.width, size.height, Rgba([0, 0, 0, 0]));
        let scale = PxScale::from(self.font_px(media_width) as f32);
        let outline = self.spec.outline_width as i32;
        let text = self.spec.text.as_str();

        if outline > 0 {
            let outline_color = to_rgba(self.spec.outline_color);
            for (dx, dy) in [
                (-1, -1),
                (0, -1),
                (1, -1),
                (-1, 0),
                (1, 0),
                (-1, 1),
                (0, 1),
                (1, 1),
            ] {
                draw_text_mut(
                    &mut layer,
                    outline_color,
                    outline + dx * outline,
                    outline + dy * outline,
                    scale,
                    font,
                    text,
                );
            }
        }

        draw_text_mut(
            &mut layer,
            to_rgba(self.spec.text_color),
            outline,
            outline,
            scale,
            font,
            text,
        );

        layer
    }
}

fn load_font(path: &Path) -> Result<FontArc, AppError> {
    let bytes = std::fs::read(path).map_err(|e| {
        AppError::Configuration(format!("Cannot read font {}: {}", path.display(), e))
    })?;
    FontArc::try_from_vec(bytes).map_err(|e| {
        AppError::Configuration(format!("Invalid font {}: {}", path.display(), e))
    })
}

fn load_sticker(path: &Path) -> Result<RgbaImage, AppError> {
    let sticker = image::open(path).map_err(|e| {
        AppError::AssetMissing(format!("Cannot load sticker {}: {}", path.display(), e))
    })?;
    Ok(sticker.to_rgba8())
}
