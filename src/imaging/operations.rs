//! High-level image operations.
//!
//! These functions combine calculations with backend execution. They take a
//! [`TranscodeConfig`], compute target sizes, and walk the encoding
//! preference list until one encoder produces output.

use super::backend::{BackendError, Dimensions, ImageBackend, ResizeParams};
use super::calculations::calculate_scaled_dimensions;
use super::params::{Encoding, EncodingCandidate, Quality, Sharpening};
use image::DynamicImage;
use std::fmt;
use thiserror::Error;

/// Which derivative a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Full,
    Thumbnail,
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantKind::Full => f.write_str("full-size image"),
            VariantKind::Thumbnail => f.write_str("thumbnail"),
        }
    }
}

/// One failed encoder attempt.
#[derive(Debug)]
pub struct EncodeAttempt {
    pub encoding: Encoding,
    pub error: BackendError,
}

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Source is not a decodable image: {0}")]
    Decode(#[source] BackendError),
    #[error("Source is {width}x{height}, over the {MAX_SOURCE_PIXELS} pixel limit")]
    TooLarge { width: u32, height: u32 },
    #[error("No encoding succeeded for {kind} (tried {})", format_attempts(.attempts))]
    Encoding {
        kind: VariantKind,
        attempts: Vec<EncodeAttempt>,
    },
    #[error("No candidate encodings configured for {0}")]
    NoCandidates(VariantKind),
    #[error("Resize failed for {kind}: {source}")]
    Resize {
        kind: VariantKind,
        #[source]
        source: BackendError,
    },
}

fn format_attempts(attempts: &[EncodeAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.encoding, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Largest source (in pixels) that will be decoded; bigger uploads are
/// refused from their header alone.
pub const MAX_SOURCE_PIXELS: u64 = 100_000_000;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, TranscodeError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(
    backend: &impl ImageBackend,
    bytes: &[u8],
) -> std::result::Result<(u32, u32), BackendError> {
    let Dimensions { width, height } = backend.identify(bytes)?;
    Ok((width, height))
}

/// An encoded derivative with the encoding that actually succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub bytes: Vec<u8>,
    pub encoding: Encoding,
    pub width: u32,
    pub height: u32,
}

impl Variant {
    pub fn mime_type(&self) -> &'static str {
        self.encoding.mime_type()
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Both derivatives produced from one upload.
#[derive(Debug, Clone)]
pub struct Transcoded {
    pub full: Variant,
    pub thumb: Variant,
}

/// Configuration for transcoding an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeConfig {
    /// Longer-edge limit for the full-size working copy.
    pub max_edge: u32,
    /// Longer-edge limit for the thumbnail.
    pub thumb_max_edge: u32,
    /// Preference order for the full-size encoding.
    pub encodings: Vec<EncodingCandidate>,
    /// Preference order for the thumbnail encoding.
    pub thumb_encodings: Vec<EncodingCandidate>,
    pub thumb_sharpening: Option<Sharpening>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_edge: 1600,
            thumb_max_edge: 320,
            encodings: vec![
                EncodingCandidate::new(Encoding::Avif, Quality::from_fraction(0.7)),
                EncodingCandidate::new(Encoding::WebP, Quality::from_fraction(0.8)),
                EncodingCandidate::lossless(Encoding::Png),
            ],
            thumb_encodings: vec![
                EncodingCandidate::new(Encoding::Avif, Quality::from_fraction(0.6)),
                EncodingCandidate::new(Encoding::WebP, Quality::from_fraction(0.7)),
                EncodingCandidate::lossless(Encoding::Png),
            ],
            thumb_sharpening: Some(Sharpening::light()),
        }
    }
}

/// Try each candidate in order; return the first encoder's output.
///
/// Every failure is collected so the caller can report what was tried.
pub fn encode_with_fallback(
    backend: &impl ImageBackend,
    image: &DynamicImage,
    candidates: &[EncodingCandidate],
) -> std::result::Result<(Vec<u8>, Encoding), Vec<EncodeAttempt>> {
    let mut attempts = Vec::new();
    for candidate in candidates {
        match backend.encode(image, candidate) {
            Ok(bytes) => {
                if !attempts.is_empty() {
                    tracing::debug!(
                        encoding = %candidate.encoding,
                        skipped = attempts.len(),
                        "fell back to later encoding"
                    );
                }
                return Ok((bytes, candidate.encoding));
            }
            Err(error) => {
                tracing::debug!(encoding = %candidate.encoding, %error, "encoder failed");
                attempts.push(EncodeAttempt {
                    encoding: candidate.encoding,
                    error,
                });
            }
        }
    }
    Err(attempts)
}

/// Produce one derivative from an already decoded source.
pub fn create_variant(
    backend: &impl ImageBackend,
    source: &DynamicImage,
    kind: VariantKind,
    max_edge: u32,
    candidates: &[EncodingCandidate],
    sharpening: Option<Sharpening>,
) -> Result<Variant> {
    if candidates.is_empty() {
        return Err(TranscodeError::NoCandidates(kind));
    }

    let (width, height) = calculate_scaled_dimensions((source.width(), source.height()), max_edge);
    let raster = backend
        .resize(
            source,
            &ResizeParams {
                width,
                height,
                sharpening,
            },
        )
        .map_err(|source| TranscodeError::Resize { kind, source })?;

    let (bytes, encoding) = encode_with_fallback(backend, &raster, candidates)
        .map_err(|attempts| TranscodeError::Encoding { kind, attempts })?;

    Ok(Variant {
        bytes,
        encoding,
        width,
        height,
    })
}

/// Decode an upload and produce its full-size and thumbnail variants.
///
/// The header is read first, so non-images and oversized sources are
/// turned away before any pixels are decoded.
/// Both variants are derived independently from the decoded source, so the
/// thumbnail never inherits compression artifacts from the full-size copy.
pub fn transcode(
    backend: &impl ImageBackend,
    input: &[u8],
    config: &TranscodeConfig,
) -> Result<Transcoded> {
    let (width, height) = get_dimensions(backend, input).map_err(TranscodeError::Decode)?;
    if u64::from(width) * u64::from(height) > MAX_SOURCE_PIXELS {
        return Err(TranscodeError::TooLarge { width, height });
    }
    let source = backend.decode(input).map_err(TranscodeError::Decode)?;
    tracing::debug!(
        width = source.width(),
        height = source.height(),
        "decoded upload"
    );

    let full = create_variant(
        backend,
        &source,
        VariantKind::Full,
        config.max_edge,
        &config.encodings,
        None,
    )?;
    let thumb = create_variant(
        backend,
        &source,
        VariantKind::Thumbnail,
        config.thumb_max_edge,
        &config.thumb_encodings,
        config.thumb_sharpening,
    )?;

    Ok(Transcoded { full, thumb })
}
