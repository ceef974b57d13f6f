//! Durable blob storage over two tiers.
//!
//! | Tier | Type | Holds |
//! |---|---|---|
//! | **Index** (transactional) | [`IndexStore`] on `redb` at `<root>/index.redb` | thumbnails, locators, hash mappings, photo records, full blobs when no capacity tier |
//! | **File** (capacity) | [`FileStore`] on `<root>/blobs/` | full-size blobs |
//!
//! Both tiers implement [`BlobBackend`]. [`BlobStore::open`] is the single
//! factory: it always opens the index tier and checks the capacity tier once
//! at startup. Callers never pick a tier; they call [`BlobStore`] and the
//! locator record written next to every full-size blob routes reads and
//! deletes.
//!
//! # Write ordering
//!
//! A full-size blob is written before its locator. If the blob write fails the
//! locator is never written. If the index transaction fails after a capacity
//! write, the capacity file is removed again. Thumbnails, locators and hash
//! mappings for one photo commit in a single index transaction.
//!
//! # Tier fallback
//!
//! A failed capacity write surfaces [`StoreError::Unavailable`] and switches
//! every later write in this session to the index tier. The failed write is
//! not retried.

pub mod files;
pub mod index;

pub use files::FileStore;
pub use index::{CommitOutcome, IndexCommit, IndexStore, Locator};

use crate::types::PhotoMeta;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Name of the capacity-tier directory within the storage root.
pub const BLOBS_DIR: &str = "blobs";

/// Name of the index database within the storage root.
pub const INDEX_FILENAME: &str = "index.redb";

/// Marker written (and fsynced) by [`BlobStore::ensure_persistence`].
const PERSIST_MARKER: &str = ".persisted";

/// Physical backend holding a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Index,
    File,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Index => f.write_str("index"),
            Tier::File => f.write_str("file"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Index error: {0}")]
    Index(#[from] redb::Error),
    #[error("Record encoding error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("The {tier} storage tier is unavailable: {reason}")]
    Unavailable { tier: Tier, reason: String },
    #[error("Storage limit reached: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },
    #[error("Invalid blob key: {0:?}")]
    InvalidKey(String),
    #[error("Content hash {content_hash} kept changing owner after {attempts} attempts")]
    HashContention { content_hash: String, attempts: usize },
}

macro_rules! index_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    StoreError::Index(e.into())
                }
            }
        )*
    };
}

index_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl StoreError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Key-addressed blob storage on one physical tier.
pub trait BlobBackend: Send + Sync {
    fn tier(&self) -> Tier;

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Idempotent: deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Bytes this tier occupies on disk.
    fn used_bytes(&self) -> Result<u64, StoreError>;
}

/// Best-effort storage consumption across tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEstimate {
    pub used_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_bytes: Option<u64>,
}

/// Outcome of a persistence request. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistenceStatus {
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What the hash mapping says about a piece of content.
#[derive(Debug, Clone, PartialEq)]
pub enum HashLookup {
    Absent,
    /// The mapped photo still resolves to its full blob.
    Live(PhotoMeta),
    /// The mapped id's full blob is missing or unreadable.
    Stale(String),
}

/// Everything needed to persist one new photo.
#[derive(Debug, Clone, Copy)]
pub struct NewPhoto<'a> {
    pub meta: &'a PhotoMeta,
    pub full: &'a [u8],
    pub thumbnail: &'a [u8],
}

/// Capacity-tier key for a full-size blob: `<id>.<ext>`.
pub fn file_key(id: &str, mime_type: &str) -> String {
    let ext = crate::imaging::Encoding::from_mime_type(mime_type)
        .map(|e| e.extension())
        .unwrap_or("bin");
    format!("{id}.{ext}")
}

/// The durable blob store: index tier plus an optional capacity tier.
pub struct BlobStore {
    root: PathBuf,
    index: IndexStore,
    capacity: Option<Arc<dyn BlobBackend>>,
    /// Set after a failed capacity write; later writes go to the index tier.
    capacity_disabled: AtomicBool,
    quota_bytes: Option<u64>,
}

impl BlobStore {
    /// Open the store under `root`, probing the capacity tier when enabled.
    ///
    /// A capacity tier that fails its write check (or is switched off while blobs
    /// still live there) stays attached for reads only; new full-size writes
    /// go to the index tier.
    pub fn open(root: &Path, config: &crate::config::StorageConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root)?;
        let index = IndexStore::open(&root.join(INDEX_FILENAME))?;

        let blobs = root.join(BLOBS_DIR);
        let (capacity, writable) = if config.capacity_tier {
            match FileStore::open_writable(blobs.clone()) {
                Ok(store) => (Some(store), true),
                Err(e) => {
                    tracing::warn!(error = %e, "capacity tier not writable, new writes use the index tier");
                    (Some(FileStore::new(blobs)), false)
                }
            }
        } else if blobs.exists() {
            (Some(FileStore::new(blobs)), false)
        } else {
            (None, false)
        };

        tracing::debug!(
            root = %root.display(),
            capacity = capacity.is_some(),
            writable,
            "opened blob store"
        );
        let capacity = capacity.map(|store| Arc::new(store) as Arc<dyn BlobBackend>);
        let store = Self::with_tiers(root, index, capacity, config.quota_bytes);
        store.capacity_disabled.store(!writable, Ordering::Release);
        Ok(store)
    }

    /// Assemble a store from explicit tiers.
    pub fn with_tiers(
        root: &Path,
        index: IndexStore,
        capacity: Option<Arc<dyn BlobBackend>>,
        quota_bytes: Option<u64>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            index,
            capacity,
            capacity_disabled: AtomicBool::new(false),
            quota_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    /// Tier that the next full-size write will target.
    pub fn active_full_tier(&self) -> Tier {
        match self.writable_capacity() {
            Some(_) => Tier::File,
            None => Tier::Index,
        }
    }

    fn writable_capacity(&self) -> Option<&Arc<dyn BlobBackend>> {
        self.capacity
            .as_ref()
            .filter(|_| !self.capacity_disabled.load(Ordering::Acquire))
    }

    fn disable_capacity(&self, error: &StoreError) {
        if error.is_unavailable() && !self.capacity_disabled.swap(true, Ordering::AcqRel) {
            tracing::warn!(%error, "capacity tier failed, falling back to index tier for new writes");
        }
    }

    /// Write `bytes` to the capacity tier, disabling it on failure.
    fn put_capacity(
        &self,
        capacity: &Arc<dyn BlobBackend>,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        capacity.put(key, bytes).inspect_err(|e| self.disable_capacity(e))
    }

    /// Best-effort removal of a capacity file whose index commit did not land.
    fn discard_capacity_file(&self, locator: &Locator) {
        if let (Some(key), Some(capacity)) = (locator.file_key(), self.capacity.as_ref())
            && let Err(e) = capacity.delete(key)
        {
            tracing::warn!(key, error = %e, "failed to remove orphaned capacity file");
        }
    }

    fn check_quota(&self, requested: u64) -> Result<(), StoreError> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let used = self.used_bytes()?;
        if used.saturating_add(requested) > quota {
            return Err(StoreError::QuotaExceeded {
                requested,
                available: quota.saturating_sub(used),
            });
        }
        Ok(())
    }

    fn used_bytes(&self) -> Result<u64, StoreError> {
        let mut used = self.index.used_bytes()?;
        if let Some(capacity) = &self.capacity {
            used += capacity.used_bytes()?;
        }
        Ok(used)
    }

    /// Read through a locator, whichever tier it names.
    fn read_located(&self, id: &str, locator: &Locator) -> Result<Option<Vec<u8>>, StoreError> {
        match locator.file_key() {
            None => self.index.get(id),
            Some(key) => match &self.capacity {
                Some(capacity) => capacity.get(key),
                None => Err(StoreError::Unavailable {
                    tier: Tier::File,
                    reason: format!("{id} lives on the capacity tier, which is not open"),
                }),
            },
        }
    }

    // =========================================================================
    // Generic full-size blob operations
    // =========================================================================

    /// Store a full-size blob under `key` and record its locator.
    ///
    /// Returns the tier that received the bytes.
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<Tier, StoreError> {
        self.check_quota(bytes.len() as u64)?;
        match self.writable_capacity() {
            Some(capacity) => {
                self.put_capacity(capacity, key, bytes)?;
                let locator = Locator::file(key);
                if let Err(e) = self.index.put_locator(key, &locator) {
                    self.discard_capacity_file(&locator);
                    return Err(e);
                }
                Ok(Tier::File)
            }
            None => {
                self.index.put_with_locator(key, bytes)?;
                Ok(Tier::Index)
            }
        }
    }

    /// Full-size blob for `key`, routed by its locator.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.index.locator(key)? {
            Some(locator) => self.read_located(key, &locator),
            None => Ok(None),
        }
    }

    /// Remove a full-size blob and its locator. Idempotent.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.remove_photo(key).map(|_| ())
    }

    // =========================================================================
    // Photo operations
    // =========================================================================

    pub fn get_full(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.get(id)
    }

    pub fn get_thumbnail(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.index.thumbnail(id)
    }

    pub fn photo(&self, id: &str) -> Result<Option<PhotoMeta>, StoreError> {
        self.index.photo(id)
    }

    /// Existing record for `content_hash`, if its full blob still resolves.
    ///
    /// Mappings whose blob has gone missing are treated as misses, so
    /// re-uploading that content stores a fresh copy.
    pub fn lookup_hash(&self, content_hash: &str) -> Result<Option<PhotoMeta>, StoreError> {
        Ok(match self.resolve_hash(content_hash)? {
            HashLookup::Live(meta) => Some(meta),
            HashLookup::Absent | HashLookup::Stale(_) => None,
        })
    }

    /// Classify the mapping for `content_hash`.
    ///
    /// A blob on a tier that cannot be read counts as missing.
    pub fn resolve_hash(&self, content_hash: &str) -> Result<HashLookup, StoreError> {
        let Some(id) = self.index.id_for_hash(content_hash)? else {
            return Ok(HashLookup::Absent);
        };
        let Some(meta) = self.index.photo(&id)? else {
            tracing::warn!(id = %id, content_hash, "stale hash mapping without photo record");
            return Ok(HashLookup::Stale(id));
        };
        let resolvable = match self.index.locator(&id)? {
            Some(locator) => match locator.file_key() {
                None => self.index.contains(&id)?,
                Some(_) => match self.read_located(&id, &locator) {
                    Ok(found) => found.is_some(),
                    Err(e) if e.is_unavailable() => false,
                    Err(e) => return Err(e),
                },
            },
            None => false,
        };
        if !resolvable {
            tracing::warn!(id = %id, content_hash, "stale hash mapping, full blob missing");
            return Ok(HashLookup::Stale(id));
        }
        Ok(HashLookup::Live(meta))
    }

    /// Persist a new photo: full blob first, then one index transaction.
    ///
    /// When another save claimed the same content hash in the meantime, this
    /// write is discarded and the existing id is returned instead. A mapping
    /// whose blob is gone is taken over by the new photo.
    pub fn commit_photo(&self, photo: NewPhoto<'_>) -> Result<CommitOutcome, StoreError> {
        let NewPhoto {
            meta,
            full,
            thumbnail,
        } = photo;
        let replaces = match self.resolve_hash(&meta.content_hash)? {
            HashLookup::Live(existing) if existing.id != meta.id => {
                return Ok(CommitOutcome::Duplicate(existing.id));
            }
            HashLookup::Stale(stale) if stale != meta.id => Some(stale),
            _ => None,
        };
        self.check_quota((full.len() + thumbnail.len()) as u64)?;

        let (locator, index_full) = match self.writable_capacity() {
            Some(capacity) => {
                let key = file_key(&meta.id, &meta.mime_type);
                self.put_capacity(capacity, &key, full)?;
                (Locator::file(key), None)
            }
            None => (Locator::index(), Some(full)),
        };

        let outcome = self.index.commit(IndexCommit {
            meta,
            full: index_full,
            thumbnail,
            locator: &locator,
            replaces: replaces.as_deref(),
        });
        match outcome {
            Ok(CommitOutcome::Stored) => {
                tracing::info!(
                    id = %meta.id,
                    tier = %locator.tier,
                    bytes = full.len(),
                    "stored photo"
                );
                Ok(CommitOutcome::Stored)
            }
            Ok(duplicate @ CommitOutcome::Duplicate(_)) => {
                self.discard_capacity_file(&locator);
                Ok(duplicate)
            }
            Err(e) => {
                self.discard_capacity_file(&locator);
                Err(e)
            }
        }
    }

    /// Remove every record of `id`. Returns whether anything was stored.
    ///
    /// The capacity file goes first; if that fails the index keeps its
    /// locator so the delete can be repeated.
    pub fn remove_photo(&self, id: &str) -> Result<bool, StoreError> {
        if let Some(locator) = self.index.locator(id)?
            && let Some(key) = locator.file_key()
        {
            match &self.capacity {
                Some(capacity) => capacity.delete(key)?,
                None => {
                    return Err(StoreError::Unavailable {
                        tier: Tier::File,
                        reason: format!("cannot delete {key}: capacity tier is not open"),
                    });
                }
            }
        }
        let removed = self.index.remove(id)?;
        if removed {
            tracing::info!(id, "deleted photo");
        }
        Ok(removed)
    }

    /// Aggregate consumption across both tiers.
    pub fn estimate_usage(&self) -> Result<StorageEstimate, StoreError> {
        Ok(StorageEstimate {
            used_bytes: self.used_bytes()?,
            quota_bytes: self.quota_bytes,
        })
    }

    /// Flush the storage root and report whether it is safe from eviction.
    ///
    /// Never fails: problems are reported through `reason`.
    pub fn ensure_persistence(&self) -> PersistenceStatus {
        let marker = self.root.join(PERSIST_MARKER);
        let synced = std::fs::File::create(&marker).and_then(|f| f.sync_all());
        if let Err(e) = synced {
            return PersistenceStatus {
                persisted: false,
                reason: Some(format!("could not sync storage root: {e}")),
            };
        }

        let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        if canonical(&self.root).starts_with(canonical(&std::env::temp_dir())) {
            return PersistenceStatus {
                persisted: false,
                reason: Some("storage root is inside the system temp directory".into()),
            };
        }

        PersistenceStatus {
            persisted: true,
            reason: None,
        }
    }
}
