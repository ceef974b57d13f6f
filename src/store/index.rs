//! Transactional index tier backed by `redb`.
//!
//! One database file holds every small record plus full-size blobs that have
//! no capacity tier to live on:
//!
//! - `full`: full-size blobs stored on this tier, keyed by id
//! - `thumbnails`: thumbnail blobs, keyed by id (always this tier)
//! - `hashes`: content hash → id
//! - `hash_of`: id → content hash, so a delete can find its mapping
//! - `locators`: id → [`Locator`] (JSON)
//! - `photos`: id → [`PhotoMeta`] (JSON)

use super::{BlobBackend, StoreError, Tier};
use crate::types::PhotoMeta;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const FULL: TableDefinition<&str, &[u8]> = TableDefinition::new("full");
const THUMBNAILS: TableDefinition<&str, &[u8]> = TableDefinition::new("thumbnails");
const HASHES: TableDefinition<&str, &str> = TableDefinition::new("hashes");
const HASH_OF: TableDefinition<&str, &str> = TableDefinition::new("hash_of");
const LOCATORS: TableDefinition<&str, &[u8]> = TableDefinition::new("locators");
const PHOTOS: TableDefinition<&str, &[u8]> = TableDefinition::new("photos");

/// Which tier holds an id's full-size blob, and under what file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Locator {
    pub fn index() -> Self {
        Self {
            tier: Tier::Index,
            file: None,
        }
    }

    pub fn file(key: impl Into<String>) -> Self {
        Self {
            tier: Tier::File,
            file: Some(key.into()),
        }
    }

    /// Capacity-tier key, when the blob lives there.
    pub fn file_key(&self) -> Option<&str> {
        match self.tier {
            Tier::File => self.file.as_deref(),
            Tier::Index => None,
        }
    }
}

/// Records written together when a photo is stored.
#[derive(Debug, Clone, Copy)]
pub struct IndexCommit<'a> {
    pub meta: &'a PhotoMeta,
    /// Full-size bytes when the blob lives on this tier.
    pub full: Option<&'a [u8]>,
    pub thumbnail: &'a [u8],
    pub locator: &'a Locator,
    /// Id whose hash mapping may be taken over because its blob is gone.
    pub replaces: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Stored,
    /// Another photo already owns the content hash; nothing was written.
    Duplicate(String),
}

pub struct IndexStore {
    db: Database,
    path: PathBuf,
}

impl IndexStore {
    /// Open or create the index database, creating every table up front.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            txn.open_table(FULL)?;
            txn.open_table(THUMBNAILS)?;
            txn.open_table(HASHES)?;
            txn.open_table(HASH_OF)?;
            txn.open_table(LOCATORS)?;
            txn.open_table(PHOTOS)?;
        }
        txn.commit()?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_bytes(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FULL)?;
        Ok(table.get(id)?.is_some())
    }

    pub fn thumbnail(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_bytes(THUMBNAILS, id)
    }

    pub fn locator(&self, id: &str) -> Result<Option<Locator>, StoreError> {
        self.read_bytes(LOCATORS, id)?
            .map(|raw| serde_json::from_slice(&raw))
            .transpose()
            .map_err(StoreError::from)
    }

    pub fn photo(&self, id: &str) -> Result<Option<PhotoMeta>, StoreError> {
        self.read_bytes(PHOTOS, id)?
            .map(|raw| serde_json::from_slice(&raw))
            .transpose()
            .map_err(StoreError::from)
    }

    pub fn id_for_hash(&self, content_hash: &str) -> Result<Option<String>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(HASHES)?;
        Ok(table.get(content_hash)?.map(|guard| guard.value().to_string()))
    }

    /// Write a locator on its own (its blob already sits on the capacity tier).
    pub fn put_locator(&self, id: &str, locator: &Locator) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(locator)?;
        let txn = self.db.begin_write()?;
        {
            let mut locators = txn.open_table(LOCATORS)?;
            locators.insert(id, encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Store a full-size blob on this tier together with its locator.
    pub fn put_with_locator(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(&Locator::index())?;
        let txn = self.db.begin_write()?;
        {
            let mut full = txn.open_table(FULL)?;
            full.insert(id, bytes)?;
            let mut locators = txn.open_table(LOCATORS)?;
            locators.insert(id, encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Write every record for one photo in a single transaction.
    ///
    /// The hash mapping is checked again inside the transaction; if another
    /// id claimed the hash first, the transaction is aborted and that id is
    /// returned. A mapping owned by `replaces` is taken over instead.
    pub fn commit(&self, commit: IndexCommit<'_>) -> Result<CommitOutcome, StoreError> {
        let IndexCommit {
            meta,
            full,
            thumbnail,
            locator,
            replaces,
        } = commit;
        let id = meta.id.as_str();
        let hash = meta.content_hash.as_str();
        let encoded_locator = serde_json::to_vec(locator)?;
        let encoded_meta = serde_json::to_vec(meta)?;

        let txn = self.db.begin_write()?;
        {
            let mut hashes = txn.open_table(HASHES)?;
            let claimed = hashes.get(hash)?.map(|guard| guard.value().to_string());
            let stale = match claimed.filter(|existing| existing != id) {
                Some(existing) if Some(existing.as_str()) == replaces => Some(existing),
                Some(existing) => {
                    drop(hashes);
                    txn.abort()?;
                    tracing::debug!(id, %existing, "content hash claimed by a concurrent save");
                    return Ok(CommitOutcome::Duplicate(existing));
                }
                None => None,
            };
            hashes.insert(hash, id)?;

            let mut hash_of = txn.open_table(HASH_OF)?;
            if let Some(stale) = &stale {
                hash_of.remove(stale.as_str())?;
                tracing::info!(id, stale = %stale, "took over hash mapping of a photo whose blob is gone");
            }
            hash_of.insert(id, hash)?;

            if let Some(bytes) = full {
                let mut full_table = txn.open_table(FULL)?;
                full_table.insert(id, bytes)?;
            }

            let mut thumbnails = txn.open_table(THUMBNAILS)?;
            thumbnails.insert(id, thumbnail)?;

            let mut locators = txn.open_table(LOCATORS)?;
            locators.insert(id, encoded_locator.as_slice())?;

            let mut photos = txn.open_table(PHOTOS)?;
            photos.insert(id, encoded_meta.as_slice())?;
        }
        txn.commit()?;
        Ok(CommitOutcome::Stored)
    }

    /// Remove every record for `id`. Returns whether any existed.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let txn = self.db.begin_write()?;
        let mut removed = false;
        {
            let mut hash_of = txn.open_table(HASH_OF)?;
            let hash = hash_of.remove(id)?.map(|guard| guard.value().to_string());
            if let Some(hash) = hash {
                removed = true;
                let mut hashes = txn.open_table(HASHES)?;
                let owner = hashes.get(hash.as_str())?.map(|guard| guard.value() == id);
                if owner == Some(true) {
                    hashes.remove(hash.as_str())?;
                }
            }

            let mut full = txn.open_table(FULL)?;
            removed |= full.remove(id)?.is_some();
            let mut thumbnails = txn.open_table(THUMBNAILS)?;
            removed |= thumbnails.remove(id)?.is_some();
            let mut locators = txn.open_table(LOCATORS)?;
            removed |= locators.remove(id)?.is_some();
            let mut photos = txn.open_table(PHOTOS)?;
            removed |= photos.remove(id)?.is_some();
        }
        txn.commit()?;
        Ok(removed)
    }

    /// Ids of every stored photo record.
    pub fn photo_ids(&self) -> Result<Vec<String>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PHOTOS)?;
        let mut ids = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }
}

impl BlobBackend for IndexStore {
    fn tier(&self) -> Tier {
        Tier::Index
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut full = txn.open_table(FULL)?;
            full.insert(key, bytes)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_bytes(FULL, key)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut full = txn.open_table(FULL)?;
            full.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn used_bytes(&self) -> Result<u64, StoreError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}
