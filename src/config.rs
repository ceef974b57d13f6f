//! Media store configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! serialized to a TOML value and the user's file, if any, is merged on top,
//! so a config file only needs the keys it wants to change.
//!
//! ## Config File Location
//!
//! `config.toml` lives in the storage root, next to the index database:
//!
//! ```text
//! survey-data/
//! ├── config.toml      # optional, overrides stock defaults
//! ├── index.redb
//! ├── form-state.json
//! └── blobs/
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [storage]
//! capacity_tier = true      # Keep full-size images as files under blobs/
//! # quota_bytes = 500000000 # Refuse writes past this total (omit for none)
//!
//! [images]
//! max_edge = 1600           # Longer edge of the stored working copy
//! encodings = [
//!     { format = "avif", quality = 0.7 },
//!     { format = "webp", quality = 0.8 },
//!     { format = "png", quality = 1.0 },
//! ]
//!
//! [thumbnails]
//! max_edge = 320
//! sharpen = true
//! encodings = [
//!     { format = "avif", quality = 0.6 },
//!     { format = "webp", quality = 0.7 },
//!     { format = "png", quality = 1.0 },
//! ]
//!
//! [policy]
//! max_photos = 10           # Photos per parent record
//! max_bytes = 15728640      # Stored bytes per parent record (15 MiB)
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::form_state::PhotoPolicy;
use crate::imaging::{Encoding, EncodingCandidate, Quality, Sharpening, TranscodeConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the config file within the storage root.
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaConfig {
    /// Tier selection and quota.
    pub storage: StorageConfig,
    /// Full-size working copy settings.
    pub images: ImagesConfig,
    /// Thumbnail settings.
    pub thumbnails: ThumbnailsConfig,
    /// Per-parent photo limits.
    pub policy: PhotoPolicy,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl MediaConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.max_edge == 0 {
            return Err(ConfigError::Validation(
                "images.max_edge must be non-zero".into(),
            ));
        }
        if self.thumbnails.max_edge == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.max_edge must be non-zero".into(),
            ));
        }
        validate_encodings("images.encodings", &self.images.encodings)?;
        validate_encodings("thumbnails.encodings", &self.thumbnails.encodings)?;
        if self.storage.quota_bytes == Some(0) {
            return Err(ConfigError::Validation(
                "storage.quota_bytes must be non-zero when set".into(),
            ));
        }
        if self.policy.max_photos == 0 {
            return Err(ConfigError::Validation(
                "policy.max_photos must be non-zero".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be non-zero when set".into(),
            ));
        }
        Ok(())
    }

    /// Transcoder settings described by the `[images]` and `[thumbnails]`
    /// sections.
    pub fn transcode_config(&self) -> TranscodeConfig {
        TranscodeConfig {
            max_edge: self.images.max_edge,
            thumb_max_edge: self.thumbnails.max_edge,
            encodings: candidates(&self.images.encodings),
            thumb_encodings: candidates(&self.thumbnails.encodings),
            thumb_sharpening: self.thumbnails.sharpen.then(Sharpening::light),
        }
    }
}

fn validate_encodings(key: &str, encodings: &[EncodingSetting]) -> Result<(), ConfigError> {
    if encodings.is_empty() {
        return Err(ConfigError::Validation(format!("{key} must not be empty")));
    }
    for setting in encodings {
        if !(0.0..=1.0).contains(&setting.quality) {
            return Err(ConfigError::Validation(format!(
                "{key}: quality for {} must be between 0 and 1",
                setting.format
            )));
        }
    }
    Ok(())
}

fn candidates(settings: &[EncodingSetting]) -> Vec<EncodingCandidate> {
    settings.iter().map(EncodingSetting::candidate).collect()
}

/// Storage tier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Store full-size images as files in the capacity tier when the
    /// directory is usable. When false, everything lives in the index.
    pub capacity_tier: bool,
    /// Upper bound on total stored bytes. `None` means no limit.
    pub quota_bytes: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity_tier: true,
            quota_bytes: None,
        }
    }
}

/// One entry in an encoding preference list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodingSetting {
    pub format: Encoding,
    /// Fraction in `0..=1`. Ignored by lossless encodings.
    #[serde(default = "default_quality")]
    pub quality: f64,
}

fn default_quality() -> f64 {
    0.8
}

impl EncodingSetting {
    pub fn new(format: Encoding, quality: f64) -> Self {
        Self { format, quality }
    }

    pub fn candidate(&self) -> EncodingCandidate {
        if self.format.is_lossless() {
            EncodingCandidate::lossless(self.format)
        } else {
            EncodingCandidate::new(self.format, Quality::from_fraction(self.quality as f32))
        }
    }
}

/// Full-size working copy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Longer-edge limit in pixels. Smaller images are never upscaled.
    pub max_edge: u32,
    /// Encoding preference order; the first encoder that succeeds wins.
    pub encodings: Vec<EncodingSetting>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_edge: 1600,
            encodings: vec![
                EncodingSetting::new(Encoding::Avif, 0.7),
                EncodingSetting::new(Encoding::WebP, 0.8),
                EncodingSetting::new(Encoding::Png, 1.0),
            ],
        }
    }
}

/// Thumbnail settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    pub max_edge: u32,
    pub encodings: Vec<EncodingSetting>,
    /// Apply a light unsharp mask after downscaling.
    pub sharpen: bool,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            max_edge: 320,
            encodings: vec![
                EncodingSetting::new(Encoding::Avif, 0.6),
                EncodingSetting::new(Encoding::WebP, 0.7),
                EncodingSetting::new(Encoding::Png, 1.0),
            ],
            sharpen: true,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel transcoding workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(MediaConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely, so an
///   `encodings` list in the user file replaces the stock list.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `config.toml` from the storage root as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = root.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<MediaConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: MediaConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the storage root.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(root: &Path) -> Result<MediaConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Survey Media Configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Place this file at <storage root>/config.toml.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Storage
# ---------------------------------------------------------------------------
[storage]
# Keep full-size images as individual files under <root>/blobs/.
# When false, or when that directory is unusable, they live in the index.
capacity_tier = true

# Refuse writes once total stored bytes would pass this value.
# Omit for no limit.
# quota_bytes = 500000000

# ---------------------------------------------------------------------------
# Full-size images
# ---------------------------------------------------------------------------
[images]
# Longer edge in pixels. Smaller photos are stored at their own size.
max_edge = 1600

# Encoding preference order. The first encoder that succeeds is used.
# quality is a fraction from 0 to 1; png ignores it.
encodings = [
    { format = "avif", quality = 0.7 },
    { format = "webp", quality = 0.8 },
    { format = "png", quality = 1.0 },
]

# ---------------------------------------------------------------------------
# Thumbnails
# ---------------------------------------------------------------------------
[thumbnails]
max_edge = 320

# Light unsharp mask after downscaling.
sharpen = true

encodings = [
    { format = "avif", quality = 0.6 },
    { format = "webp", quality = 0.7 },
    { format = "png", quality = 1.0 },
]

# ---------------------------------------------------------------------------
# Per-record photo policy
# ---------------------------------------------------------------------------
[policy]
# Photos allowed on one parent record (one surveyed system).
max_photos = 10

# Total stored bytes allowed on one parent record (15 MiB).
max_bytes = 15728640

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel transcoding workers for batch saves.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
