use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Named position an overlay block is pinned to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    BottomCenter,
}

/// Horizontal alignment implied by an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalAlign {
    Left,
    Center,
    Right,
}

/// Vertical alignment implied by an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalAlign {
    Top,
    Bottom,
}

impl Anchor {
    pub const ALL: [Anchor; 5] = [
        Anchor::TopLeft,
        Anchor::TopRight,
        Anchor::BottomLeft,
        Anchor::BottomRight,
        Anchor::BottomCenter,
    ];

    pub fn horizontal(&self) -> HorizontalAlign {
        match self {
            Anchor::TopLeft | Anchor::BottomLeft => HorizontalAlign::Left,
            Anchor::TopRight | Anchor::BottomRight => HorizontalAlign::Right,
            Anchor::BottomCenter => HorizontalAlign::Center,
        }
    }

    pub fn vertical(&self) -> VerticalAlign {
        match self {
            Anchor::TopLeft | Anchor::TopRight => VerticalAlign::Top,
            Anchor::BottomLeft | Anchor::BottomRight | Anchor::BottomCenter => {
                VerticalAlign::Bottom
            }
        }
    }
}

impl Display for Anchor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Anchor::TopLeft => write!(f, "top-left"),
            Anchor::TopRight => write!(f, "top-right"),
            Anchor::BottomLeft => write!(f, "bottom-left"),
            Anchor::BottomRight => write!(f, "bottom-right"),
            Anchor::BottomCenter => write!(f, "bottom-center"),
        }
    }
}

impl FromStr for Anchor {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "top-left" => Ok(Anchor::TopLeft),
            "top-right" => Ok(Anchor::TopRight),
            "bottom-left" => Ok(Anchor::BottomLeft),
            "bottom-right" => Ok(Anchor::BottomRight),
            "bottom-center" => Ok(Anchor::BottomCenter),
            other => Err(AppError::Configuration(format!(
                "Unknown anchor '{}': expected one of top-left, top-right, bottom-left, bottom-right, bottom-center",
                other
            ))),
        }
    }
}

/// Straight (non-premultiplied) RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl FromStr for Color {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "white" => return Ok(Color::WHITE),
            "black" => return Ok(Color::BLACK),
            _ => {}
        }

        let invalid = || {
            AppError::Configuration(format!(
                "Invalid color '{}': expected #RRGGBB, #RRGGBBAA, white or black",
                s
            ))
        };

        let hex_digits = value.strip_prefix('#').ok_or_else(invalid)?;
        if hex_digits.len() != 6 && hex_digits.len() != 8 {
            return Err(invalid());
        }
        let bytes = hex::decode(hex_digits).map_err(|_| invalid())?;
        Ok(Color {
            r: bytes[0],
            g: bytes[1],
            b: bytes[2],
            a: bytes.get(3).copied().unwrap_or(255),
        })
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Immutable watermark configuration applied by the compositors.
///
/// Built once at startup (see [`crate::config::OverlayConfig`]) and passed
/// explicitly to every compositor call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlaySpec {
    /// Watermark text. Empty disables the text stage.
    pub text: String,
    pub font_path: Option<PathBuf>,
    pub text_color: Color,
    pub outline_color: Color,
    pub outline_width: u32,
    /// Font pixel height as a fraction of media width.
    pub text_ratio: f32,
    pub sticker_path: Option<PathBuf>,
    /// Sticker width as a fraction of media width.
    pub sticker_ratio: f32,
    pub anchor: Anchor,
    pub margin: u32,
}

impl Default for OverlaySpec {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_path: None,
            text_color: Color::WHITE,
            outline_color: Color::BLACK,
            outline_width: 2,
            text_ratio: 0.05,
            sticker_path: None,
            sticker_ratio: 0.2,
            anchor: Anchor::BottomRight,
            margin: 20,
        }
    }
}

fn validate_ratio(name: &str, ratio: f32) -> Result<(), AppError> {
    if ratio.is_finite() && ratio > 0.0 && ratio <= 1.0 {
        Ok(())
    } else {
        Err(AppError::Configuration(format!(
            "{} must be in (0, 1], got {}",
            name, ratio
        )))
    }
}

impl OverlaySpec {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_ratio("text_ratio", self.text_ratio)?;
        validate_ratio("sticker_ratio", self.sticker_ratio)?;

        if self.has_text() && self.font_path.is_none() {
            return Err(AppError::Configuration(
                "A font path is required when watermark text is set".to_string(),
            ));
        }

        if !self.has_text() && self.sticker_path.is_none() {
            return Err(AppError::Configuration(
                "Overlay has neither text nor a sticker".to_string(),
            ));
        }

        Ok(())
    }

    /// Short stable digest identifying this configuration.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        hex::encode(&digest[..6])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_round_trip_names() {
        for anchor in Anchor::ALL {
            assert_eq!(anchor.to_string().parse::<Anchor>().unwrap(), anchor);
        }
        assert_eq!("BOTTOM_CENTER".parse::<Anchor>().unwrap(), Anchor::BottomCenter);
    }

    #[test]
    fn test_anchor_unknown_is_configuration_error() {
        let err = "center".parse::<Anchor>().unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_anchor_alignment() {
        assert_eq!(Anchor::BottomCenter.horizontal(), HorizontalAlign::Center);
        assert_eq!(Anchor::BottomCenter.vertical(), VerticalAlign::Bottom);
        assert_eq!(Anchor::TopRight.horizontal(), HorizontalAlign::Right);
        assert_eq!(Anchor::TopRight.vertical(), VerticalAlign::Top);
    }

    #[test]
    fn test_color_parse() {
        assert_eq!("#ff0000".parse::<Color>().unwrap(), Color::rgb(255, 0, 0));
        assert_eq!(
            "#00ff0080".parse::<Color>().unwrap(),
            Color {
                r: 0,
                g: 255,
                b: 0,
                a: 128
            }
        );
        assert_eq!("White".parse::<Color>().unwrap(), Color::WHITE);
        assert!("ff0000".parse::<Color>().is_err());
        assert!("#ff00".parse::<Color>().is_err());
        assert!("#gg0000".parse::<Color>().is_err());
    }

    #[test]
    fn test_spec_validation() {
        let spec = OverlaySpec {
            text: "@Chan".to_string(),
            font_path: Some(PathBuf::from("/fonts/a.ttf")),
            ..Default::default()
        };
        assert!(spec.validate().is_ok());

        let no_font = OverlaySpec {
            font_path: None,
            ..spec.clone()
        };
        assert!(matches!(no_font.validate(), Err(AppError::Configuration(_))));

        let bad_ratio = OverlaySpec {
            text_ratio: 1.5,
            ..spec.clone()
        };
        assert!(bad_ratio.validate().is_err());

        let empty = OverlaySpec::default();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let a = OverlaySpec {
            text: "@Chan".to_string(),
            ..Default::default()
        };
        let b = OverlaySpec {
            margin: 10,
            ..a.clone()
        };
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 12);
    }
}
