//! Parameter types for image operations.
//!
//! These structs describe *what* to produce, not *how*. They sit between the
//! high-level [`operations`](super::operations) module (which decides what
//! variants to create and in which encoding order) and the
//! [`backend`](super::backend) (which does the pixel work).
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`Sharpening`]: Unsharp-mask parameters for thumbnail crispness.
//! - [`Encoding`]: An output codec the transcoder may try.
//! - [`EncodingCandidate`]: One entry of a preference-ordered encoding list.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    /// Build from a `0.0..=1.0` fraction, the unit used in config files.
    pub fn from_fraction(fraction: f32) -> Self {
        let fraction = if fraction.is_finite() { fraction } else { 0.0 };
        Self::new((fraction.clamp(0.0, 1.0) * 100.0).round() as u32)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Sharpening parameters for unsharp mask.
///
/// - `sigma`: Standard deviation of the Gaussian blur (higher = more sharpening)
/// - `threshold`: Minimum brightness difference to sharpen (0 = sharpen all pixels)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sharpening {
    pub sigma: f32,
    pub threshold: i32,
}

impl Sharpening {
    /// Light sharpening suitable for thumbnails.
    pub fn light() -> Self {
        Self {
            sigma: 0.5,
            threshold: 0,
        }
    }
}

/// Output encodings the transcoder knows how to ask a backend for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Avif,
    #[serde(rename = "webp")]
    WebP,
    Jpeg,
    Png,
}

impl Encoding {
    pub fn mime_type(self) -> &'static str {
        match self {
            Encoding::Avif => "image/avif",
            Encoding::WebP => "image/webp",
            Encoding::Jpeg => "image/jpeg",
            Encoding::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Avif => "avif",
            Encoding::WebP => "webp",
            Encoding::Jpeg => "jpg",
            Encoding::Png => "png",
        }
    }

    /// Whether the encoding can carry an alpha channel.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Encoding::Jpeg)
    }

    /// Lossless encodings ignore the quality setting.
    pub fn is_lossless(self) -> bool {
        matches!(self, Encoding::Png)
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "image/avif" => Some(Encoding::Avif),
            "image/webp" => Some(Encoding::WebP),
            "image/jpeg" | "image/jpg" => Some(Encoding::Jpeg),
            "image/png" => Some(Encoding::Png),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One entry in a preference-ordered encoding list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodingCandidate {
    pub encoding: Encoding,
    pub quality: Quality,
}

impl EncodingCandidate {
    pub fn new(encoding: Encoding, quality: Quality) -> Self {
        Self { encoding, quality }
    }

    /// A lossless candidate; quality is irrelevant and left at the default.
    pub fn lossless(encoding: Encoding) -> Self {
        Self {
            encoding,
            quality: Quality::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }

    #[test]
    fn quality_from_fraction() {
        assert_eq!(Quality::from_fraction(0.7).value(), 70);
        assert_eq!(Quality::from_fraction(1.0).value(), 100);
        assert_eq!(Quality::from_fraction(0.0).value(), 1);
        assert_eq!(Quality::from_fraction(3.0).value(), 100);
        assert_eq!(Quality::from_fraction(f32::NAN).value(), 1);
    }

    #[test]
    fn sharpening_light_values() {
        let s = Sharpening::light();
        assert_eq!(s.sigma, 0.5);
        assert_eq!(s.threshold, 0);
    }

    #[test]
    fn encoding_mime_and_extension() {
        assert_eq!(Encoding::Avif.mime_type(), "image/avif");
        assert_eq!(Encoding::WebP.extension(), "webp");
        assert_eq!(Encoding::Jpeg.extension(), "jpg");
        assert_eq!(Encoding::from_mime_type("IMAGE/PNG"), Some(Encoding::Png));
        assert_eq!(Encoding::from_mime_type("image/gif"), None);
    }

    #[test]
    fn only_jpeg_drops_alpha() {
        assert!(Encoding::Avif.supports_alpha());
        assert!(Encoding::WebP.supports_alpha());
        assert!(Encoding::Png.supports_alpha());
        assert!(!Encoding::Jpeg.supports_alpha());
    }

    #[test]
    fn encoding_serializes_lowercase() {
        let json = serde_json::to_string(&[Encoding::Avif, Encoding::WebP]).unwrap();
        assert_eq!(json, r#"["avif","webp"]"#);
        let back: Encoding = serde_json::from_str(r#""png""#).unwrap();
        assert_eq!(back, Encoding::Png);
    }
}
