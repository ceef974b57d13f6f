//! Scoped display handles for stored images.
//!
//! A preview needs a stored blob somewhere a viewer can open it. A
//! [`DisplayHandle`] writes the blob to a temporary file and removes it when
//! the handle is dropped, on every exit path including early returns and
//! panics. Handles are issued by a [`DisplayScope`], which counts how many
//! are alive so a leaked handle shows up as a non-zero count.

use crate::imaging::{Encoding, ImageBackend};
use crate::registry::{PhotoRegistry, RegistryError};
use crate::store::StoreError;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::NamedTempFile;

/// Issues display handles and tracks how many are live.
#[derive(Debug, Clone, Default)]
pub struct DisplayScope {
    live: Arc<AtomicUsize>,
}

/// A stored image materialized as a temporary file.
#[derive(Debug)]
pub struct DisplayHandle {
    file: NamedTempFile,
    mime_type: &'static str,
    live: Arc<AtomicUsize>,
}

impl DisplayHandle {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl DisplayScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles issued by this scope that have not been dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Materialize `bytes` as a file whose extension matches `mime_type`.
    pub fn open(&self, bytes: &[u8], mime_type: &str) -> io::Result<DisplayHandle> {
        let encoding = Encoding::from_mime_type(mime_type);
        let suffix = encoding.map(|e| format!(".{}", e.extension()));
        let mut file = tempfile::Builder::new()
            .prefix("survey-media-")
            .suffix(suffix.as_deref().unwrap_or(""))
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;

        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(DisplayHandle {
            file,
            mime_type: encoding
                .map(Encoding::mime_type)
                .unwrap_or("application/octet-stream"),
            live: Arc::clone(&self.live),
        })
    }

    /// Handle for a photo's thumbnail, or `None` when it is missing.
    pub fn thumbnail<B: ImageBackend>(
        &self,
        registry: &PhotoRegistry<B>,
        id: &str,
    ) -> Result<Option<DisplayHandle>, RegistryError> {
        let Some(bytes) = registry.get_thumbnail(id)? else {
            return Ok(None);
        };
        self.open_sniffed(&bytes).map(Some)
    }

    /// Handle for a photo's full-size image, or `None` when it is missing.
    pub fn full_image<B: ImageBackend>(
        &self,
        registry: &PhotoRegistry<B>,
        id: &str,
    ) -> Result<Option<DisplayHandle>, RegistryError> {
        let Some(bytes) = registry.get_full_image(id)? else {
            return Ok(None);
        };
        self.open_sniffed(&bytes).map(Some)
    }

    fn open_sniffed(&self, bytes: &[u8]) -> Result<DisplayHandle, RegistryError> {
        let mime_type = crate::imaging::sniff_encoding(bytes)
            .map(Encoding::mime_type)
            .unwrap_or("application/octet-stream");
        self.open(bytes, mime_type)
            .map_err(|e| RegistryError::Store(StoreError::Io(e)))
    }
}
