//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the four operations the transcoder
//! needs: identify, decode, resize, and encode. Everything works on in-memory
//! buffers; uploads arrive as bytes and variants leave as bytes.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend): pure Rust, zero
//! external dependencies.

use super::params::{Encoding, EncodingCandidate, Sharpening};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Encoder not available: {0}")]
    Unsupported(Encoding),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Parameters for a resize operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeParams {
    /// Exact output dimensions; callers compute them so aspect is preserved.
    pub width: u32,
    pub height: u32,
    pub sharpening: Option<Sharpening>,
}

/// Trait for image processing backends.
///
/// Every backend must implement all four operations so the transcoder is
/// backend-agnostic. `Sync` is required because batch saves transcode files
/// in parallel.
pub trait ImageBackend: Sync {
    /// Read pixel dimensions without a full decode where the format allows.
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError>;

    /// Decode an encoded image into a pixel buffer.
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError>;

    /// Render `image` into a new raster at the requested size.
    fn resize(&self, image: &DynamicImage, params: &ResizeParams)
    -> Result<DynamicImage, BackendError>;

    /// Encode `image` with one candidate encoding.
    ///
    /// Returns [`BackendError::Unsupported`] when the encoder is not compiled
    /// in, so the caller can fall through to the next candidate.
    fn encode(
        &self,
        image: &DynamicImage,
        candidate: &EncodingCandidate,
    ) -> Result<Vec<u8>, BackendError>;
}
