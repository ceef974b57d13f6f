//! Shared types passed between the registry and its callers.
//!
//! [`PhotoMeta`] is serialized into persisted form state and into the index
//! tier, so its JSON shape (camelCase keys, ISO-8601 timestamps, no binary)
//! must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// Metadata for one stored photo, owned by form state.
///
/// The binary lives only in the blob store; this record is plain data and
/// round-trips through JSON unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoMeta {
    /// Opaque identifier, unique for the lifetime of the install.
    pub id: String,
    /// Original upload name, display only.
    pub file_name: String,
    /// Byte size of the persisted full-size variant.
    pub size_bytes: u64,
    /// Encoding actually chosen for the full-size variant.
    pub mime_type: String,
    /// Full-size variant width, post-resize.
    pub width: u32,
    /// Full-size variant height, post-resize.
    pub height: u32,
    /// When the content was first stored; dedup hits keep the original time.
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the full-size variant's bytes; the dedup key.
    pub content_hash: String,
}

/// A raw file handed to the registry by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl PhotoUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Read an upload from disk, keeping only the file name for display.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { file_name, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> PhotoMeta {
        PhotoMeta {
            id: "7d3c2a9e-0000-4000-8000-000000000001".into(),
            file_name: "boiler-room.jpg".into(),
            size_bytes: 183_552,
            mime_type: "image/avif".into(),
            width: 1600,
            height: 1200,
            created_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap(),
            content_hash: "ab".repeat(32),
        }
    }

    #[test]
    fn photo_meta_uses_camel_case_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["fileName"], "boiler-room.jpg");
        assert_eq!(json["sizeBytes"], 183_552);
        assert_eq!(json["mimeType"], "image/avif");
        assert_eq!(json["contentHash"], "ab".repeat(32));
        assert_eq!(json["createdAt"], "2024-03-09T14:30:00Z");
    }

    #[test]
    fn photo_meta_roundtrips_through_json() {
        let meta = sample();
        let json = serde_json::to_string(&meta).unwrap();
        let back: PhotoMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn photo_meta_accepts_fractional_timestamps() {
        let json = r#"{
            "id": "x", "fileName": "a.png", "sizeBytes": 1, "mimeType": "image/png",
            "width": 1, "height": 1, "createdAt": "2024-03-09T14:30:00.123Z",
            "contentHash": "00"
        }"#;
        let meta: PhotoMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.created_at.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn upload_from_path_keeps_file_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("panel.png");
        std::fs::write(&path, b"bytes").unwrap();

        let upload = PhotoUpload::from_path(&path).unwrap();
        assert_eq!(upload.file_name, "panel.png");
        assert_eq!(upload.bytes, b"bytes".to_vec());
    }
}
