//! File-backed capacity tier: one file per full-size blob.
//!
//! Files live flat under `<root>/blobs/` and are named by their key
//! (`<id>.<ext>`). Writes go to a temporary file in the same directory and
//! are renamed into place after an fsync, so a reader never sees a partial
//! blob.

use super::{BlobBackend, StoreError, Tier};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Attach to `dir` without checking it, for reading blobs already there.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Create the directory if needed and prove it accepts writes.
    pub fn open_writable(dir: PathBuf) -> Result<Self, StoreError> {
        let check = || -> io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut check_file = NamedTempFile::new_in(&dir)?;
            check_file.write_all(b"check")?;
            check_file.as_file().sync_all()?;
            Ok(())
        };
        check().map_err(|e| unavailable(&e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

/// Keys become file names, so they must be a single plain path component.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn unavailable(error: &io::Error) -> StoreError {
    StoreError::Unavailable {
        tier: Tier::File,
        reason: error.to_string(),
    }
}

/// Map a write failure: a full disk is a quota problem, anything else means
/// the tier cannot be used.
fn write_error(error: io::Error, requested: u64) -> StoreError {
    match error.kind() {
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => StoreError::QuotaExceeded {
            requested,
            available: 0,
        },
        _ => unavailable(&error),
    }
}

impl BlobBackend for FileStore {
    fn tier(&self) -> Tier {
        Tier::File
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let requested = bytes.len() as u64;
        let write = || -> io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&self.dir)?;
            tmp.write_all(bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        };
        write().map_err(|e| write_error(e, requested))?;
        tracing::debug!(key, bytes = requested, "wrote capacity blob");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(&e)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&e)),
        }
    }

    fn used_bytes(&self) -> Result<u64, StoreError> {
        let mut total = 0;
        for entry in WalkDir::new(&self.dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file()
                && let Ok(meta) = entry.metadata()
            {
                total += meta.len();
            }
        }
        Ok(total)
    }
}
