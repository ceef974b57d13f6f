//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Uniform downscale factor that fits `source` inside a `max_edge` box.
///
/// Capped at `1.0`: images are never upscaled.
pub fn scale_factor(source: (u32, u32), max_edge: u32) -> f64 {
    let longer_edge = source.0.max(source.1);
    if longer_edge == 0 {
        return 1.0;
    }
    (max_edge as f64 / longer_edge as f64).min(1.0)
}

/// Calculate output dimensions for a source bounded by `max_edge` on its longer edge.
///
/// Both axes use the same factor so the aspect ratio is preserved; each axis
/// is rounded to the nearest pixel and never collapses below 1.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `max_edge` - Maximum length of the longer edge in pixels
///
/// # Returns
/// * `(width, height)` - Output dimensions
///
/// # Examples
/// ```
/// # use survey_media::imaging::calculate_scaled_dimensions;
/// // 4000x3000 into a 1600px box → 1600x1200
/// assert_eq!(calculate_scaled_dimensions((4000, 3000), 1600), (1600, 1200));
///
/// // Smaller than the box → unchanged
/// assert_eq!(calculate_scaled_dimensions((640, 480), 1600), (640, 480));
/// ```
pub fn calculate_scaled_dimensions(source: (u32, u32), max_edge: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    let scale = scale_factor(source, max_edge);
    if scale >= 1.0 {
        return (src_w, src_h);
    }

    let w = ((src_w as f64 * scale).round() as u32).max(1);
    let h = ((src_h as f64 * scale).round() as u32).max(1);
    (w, h)
}
