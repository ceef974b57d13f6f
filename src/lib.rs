//! # Survey Media
//!
//! Offline photo storage for building-survey forms. Field staff attach photos
//! to surveyed systems (a boiler, an air handler) on a device that may go days
//! without a connection, so everything has to live locally and stay small.
//!
//! # Architecture: One Save Path
//!
//! Every upload goes through the same four steps, in order:
//!
//! ```text
//! 1. Transcode   raw upload   →  full-size (≤1600px) + thumbnail (≤320px)
//! 2. Hash        full-size    →  SHA-256 hex, the dedup key
//! 3. Dedup       hash         →  existing id, or none
//! 4. Store       variants     →  index tier / capacity tier  →  PhotoMeta
//! ```
//!
//! The caller keeps only the returned [`types::PhotoMeta`] in its form state.
//! Binary data never leaves the store except through
//! [`registry::PhotoRegistry::get_full_image`] and
//! [`registry::PhotoRegistry::get_thumbnail`].
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`registry`] | The public save/get/delete API; orchestrates the save path |
//! | [`imaging`] | Pure-Rust decode, resize, sharpen and encode with fallback |
//! | [`hash`] | SHA-256 content hashing |
//! | [`store`] | Durable two-tier blob store with hash mappings and quota checks |
//! | [`form_state`] | Persisted photo lists per parent record and their limits |
//! | [`display`] | Scoped temporary files for previewing stored images |
//! | [`report`] | HTML photo appendix for exported reports, rendered with Maud |
//! | [`config`] | `config.toml` loading, merging over stock defaults, validation |
//! | [`types`] | `PhotoMeta` and `PhotoUpload` |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Two Tiers, One Behavior
//!
//! Thumbnails, hash mappings and photo records live in a transactional
//! [redb](https://docs.rs/redb) database. Full-size images go to plain files
//! under `blobs/` when that directory is usable, and into the database
//! otherwise. A per-photo locator records which tier holds the full image, so
//! photos written before a fallback stay readable after it. Callers cannot
//! tell the tiers apart.
//!
//! ## Deduplicate on Output Bytes
//!
//! The hash is taken over the transcoded full-size bytes, not the upload. Two
//! copies of the same picture re-saved by different apps still collapse into
//! one stored photo as long as they transcode identically, and the hash mapping
//! is re-checked inside the commit transaction so parallel saves of the same
//! content cannot both win.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding and resizing use the `image` crate; AVIF is encoded with the
//! pure-Rust `rav1e` encoder it bundles. No system libraries are needed, so
//! the binary runs unchanged on whatever machine the survey team carries.

pub mod config;
pub mod display;
pub mod form_state;
pub mod hash;
pub mod imaging;
pub mod output;
pub mod registry;
pub mod report;
pub mod store;
pub mod types;
