//! The photo registry: the API the survey form talks to.
//!
//! A save runs strictly in order: transcode the upload, hash the full-size
//! variant, look the hash up, then either hand back the existing record or
//! commit a new one. Identical pictures therefore share one id and one stored
//! copy, whatever name they were uploaded under.
//!
//! ```text
//! PhotoUpload ──transcode──▶ Transcoded ──hash──▶ content hash
//!                                                     │
//!                          ┌── hit ◀── lookup_hash ◀──┘
//!                          │              │ miss
//!                          ▼              ▼
//!               existing PhotoMeta   commit_photo(full, thumb, mappings)
//!               + new file name               │
//!                                             ▼
//!                                       fresh PhotoMeta
//! ```
//!
//! Batches run in parallel on the rayon pool. Each file gets its own
//! `Result`, so one corrupt upload never takes the rest of the selection down.

use crate::hash::hash_bytes;
use crate::imaging::{
    EncodingCandidate, ImageBackend, TranscodeConfig, TranscodeError, Transcoded, transcode,
};
use crate::store::{
    BlobStore, CommitOutcome, NewPhoto, PersistenceStatus, StorageEstimate, StoreError,
};
use crate::types::{PhotoMeta, PhotoUpload};
use chrono::Utc;
use rayon::prelude::*;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Commits that lose a hash race re-read the winner; give up if the owner
/// keeps vanishing.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Where in a save a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcode,
    Dedup,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Transcode => f.write_str("transcode"),
            Stage::Dedup => f.write_str("dedup"),
            Stage::Store => f.write_str("store"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SaveFailure {
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to save {file_name} ({stage}): {source}")]
    Save {
        file_name: String,
        stage: Stage,
        #[source]
        source: SaveFailure,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    fn save(file_name: &str, stage: Stage, source: impl Into<SaveFailure>) -> Self {
        RegistryError::Save {
            file_name: file_name.to_string(),
            stage,
            source: source.into(),
        }
    }

    fn store_error(&self) -> Option<&StoreError> {
        match self {
            RegistryError::Save {
                source: SaveFailure::Store(e),
                ..
            }
            | RegistryError::Store(e) => Some(e),
            RegistryError::Save { .. } => None,
        }
    }

    /// Short message suitable for showing next to the failed upload.
    pub fn user_message(&self) -> &'static str {
        match self.store_error() {
            Some(StoreError::QuotaExceeded { .. }) => "Storage limit reached",
            Some(StoreError::HashContention { .. }) => "Failed to add photo",
            Some(_) => "Storage unavailable",
            None => "Failed to add photo",
        }
    }

    /// Name of the upload this error belongs to, if any.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            RegistryError::Save { file_name, .. } => Some(file_name),
            RegistryError::Store(_) => None,
        }
    }
}

/// Per-call overrides of the registry's transcode settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    pub max_edge: Option<u32>,
    pub thumb_max_edge: Option<u32>,
    pub encodings: Option<Vec<EncodingCandidate>>,
    pub thumb_encodings: Option<Vec<EncodingCandidate>>,
}

impl SaveOptions {
    fn apply(&self, base: &TranscodeConfig) -> TranscodeConfig {
        TranscodeConfig {
            max_edge: self.max_edge.unwrap_or(base.max_edge),
            thumb_max_edge: self.thumb_max_edge.unwrap_or(base.thumb_max_edge),
            encodings: self
                .encodings
                .clone()
                .unwrap_or_else(|| base.encodings.clone()),
            thumb_encodings: self
                .thumb_encodings
                .clone()
                .unwrap_or_else(|| base.thumb_encodings.clone()),
            thumb_sharpening: base.thumb_sharpening,
        }
    }
}

pub struct PhotoRegistry<B: ImageBackend> {
    store: BlobStore,
    backend: B,
    config: TranscodeConfig,
}

impl<B: ImageBackend> PhotoRegistry<B> {
    pub fn new(store: BlobStore, backend: B, config: TranscodeConfig) -> Self {
        Self {
            store,
            backend,
            config,
        }
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    /// Transcode, deduplicate and persist one upload.
    ///
    /// On a dedup hit nothing is written; the stored record comes back with
    /// this upload's file name.
    pub fn save_photo(
        &self,
        upload: &PhotoUpload,
        options: Option<&SaveOptions>,
    ) -> Result<PhotoMeta, RegistryError> {
        let file_name = upload.file_name.as_str();
        let config = match options {
            Some(options) => Cow::Owned(options.apply(&self.config)),
            None => Cow::Borrowed(&self.config),
        };

        let Transcoded { full, thumb } = transcode(&self.backend, &upload.bytes, &config)
            .map_err(|e| RegistryError::save(file_name, Stage::Transcode, e))?;
        let content_hash = hash_bytes(&full.bytes);
        tracing::debug!(
            file_name,
            encoding = %full.encoding,
            width = full.width,
            height = full.height,
            bytes = full.bytes.len(),
            "transcoded upload"
        );

        if let Some(existing) = self.find_existing(file_name, &content_hash)? {
            return Ok(existing);
        }

        let meta = PhotoMeta {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            size_bytes: full.size_bytes(),
            mime_type: full.mime_type().to_string(),
            width: full.width,
            height: full.height,
            created_at: Utc::now(),
            content_hash,
        };

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let outcome = self
                .store
                .commit_photo(NewPhoto {
                    meta: &meta,
                    full: &full.bytes,
                    thumbnail: &thumb.bytes,
                })
                .map_err(|e| RegistryError::save(file_name, Stage::Store, e))?;
            match outcome {
                CommitOutcome::Stored => return Ok(meta),
                // A concurrent save won the race for this hash
                CommitOutcome::Duplicate(_) => {
                    if let Some(existing) = self.find_existing(file_name, &meta.content_hash)? {
                        return Ok(existing);
                    }
                }
            }
        }
        Err(RegistryError::save(
            file_name,
            Stage::Store,
            StoreError::HashContention {
                content_hash: meta.content_hash,
                attempts: MAX_COMMIT_ATTEMPTS,
            },
        ))
    }

    fn find_existing(
        &self,
        file_name: &str,
        content_hash: &str,
    ) -> Result<Option<PhotoMeta>, RegistryError> {
        let existing = self
            .store
            .lookup_hash(content_hash)
            .map_err(|e| RegistryError::save(file_name, Stage::Dedup, e))?;
        Ok(existing.map(|stored| {
            tracing::info!(id = %stored.id, file_name, "reusing stored photo with identical content");
            PhotoMeta {
                file_name: file_name.to_string(),
                ..stored
            }
        }))
    }

    /// Save several uploads in parallel. Results keep the input order.
    pub fn save_photos(&self, uploads: &[PhotoUpload]) -> Vec<Result<PhotoMeta, RegistryError>> {
        uploads
            .par_iter()
            .map(|upload| self.save_photo(upload, None))
            .collect()
    }

    pub fn get_full_image(&self, id: &str) -> Result<Option<Vec<u8>>, RegistryError> {
        Ok(self.store.get_full(id)?)
    }

    pub fn get_thumbnail(&self, id: &str) -> Result<Option<Vec<u8>>, RegistryError> {
        Ok(self.store.get_thumbnail(id)?)
    }

    /// Stored record for `id`, as returned by the save that created it.
    pub fn photo(&self, id: &str) -> Result<Option<PhotoMeta>, RegistryError> {
        Ok(self.store.photo(id)?)
    }

    /// Remove both blobs and every index record of `id`. Deleting an unknown
    /// id is a no-op.
    pub fn delete_photo(&self, id: &str) -> Result<(), RegistryError> {
        self.store.remove_photo(id)?;
        Ok(())
    }

    pub fn estimate_usage(&self) -> Result<StorageEstimate, RegistryError> {
        Ok(self.store.estimate_usage()?)
    }

    pub fn ensure_persistence(&self) -> PersistenceStatus {
        self.store.ensure_persistence()
    }
}
