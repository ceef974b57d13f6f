//! Image transcoding in pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions`, `avif-parse`; checked before decode |
//! | **Decode** | `image::load_from_memory_with_format`, `rav1d` for AVIF |
//! | **Resize** | Lanczos3, uniform scale, never upscales |
//! | **Encode** | AVIF (rav1e) → WebP → PNG fallback chain, configurable |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing encodings and quality
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: [`transcode`] and the encoding fallback chain

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend, ResizeParams};
pub use calculations::{calculate_scaled_dimensions, scale_factor};
pub use operations::{
    EncodeAttempt, TranscodeConfig, TranscodeError, Transcoded, Variant, VariantKind,
    MAX_SOURCE_PIXELS, encode_with_fallback, get_dimensions, transcode,
};
pub use params::{Encoding, EncodingCandidate, Quality, Sharpening};
pub use rust_backend::{RustBackend, sniff_encoding};
