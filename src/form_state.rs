//! Persisted form state: the photo lists attached to each parent record.
//!
//! The survey form keeps its photos as plain [`PhotoMeta`] values grouped by
//! the id of the record they belong to (one surveyed system, for example).
//! The whole state is a single pretty-printed JSON file, `form-state.json`,
//! in the storage root. No binary data ever lands here.
//!
//! The registry has no notion of parents, so per-parent limits are enforced
//! here through [`FormState::check_policy`] before photos are attached.

use crate::types::PhotoMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Name of the form state record within the storage root.
pub const FORM_STATE_FILENAME: &str = "form-state.json";

#[derive(Error, Debug)]
pub enum FormStateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Form state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Policy(#[from] PolicyViolation),
}

/// Limits applied to the photos of one parent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhotoPolicy {
    pub max_photos: usize,
    /// Sum of `sizeBytes` across the parent's photos.
    pub max_bytes: u64,
}

impl Default for PhotoPolicy {
    fn default() -> Self {
        Self {
            max_photos: 10,
            max_bytes: 15 * 1024 * 1024,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("Max {max} photos per system reached.")]
    TooManyPhotos { max: usize },
    #[error(
        "Storage limit for this system reached (~{}). Delete some photos first.",
        format_mib(.max)
    )]
    TooManyBytes { max: u64, used: u64, requested: u64 },
}

fn format_mib(bytes: &u64) -> String {
    format!("{}MB", bytes / (1024 * 1024))
}

/// Form state as persisted between sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormState {
    /// Photos per parent record id, in the order they were attached.
    #[serde(default)]
    pub photos: BTreeMap<String, Vec<PhotoMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl FormState {
    /// Path of the form state record inside `root`.
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(FORM_STATE_FILENAME)
    }

    /// Load form state. A missing file is an empty state; corrupt JSON is an
    /// error.
    pub fn load(path: &Path) -> Result<Self, FormStateError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the state atomically as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), FormStateError> {
        let json = serde_json::to_string_pretty(self)?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn photos(&self, parent: &str) -> &[PhotoMeta] {
        self.photos.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn used_bytes(&self, parent: &str) -> u64 {
        self.photos(parent).iter().map(|p| p.size_bytes).sum()
    }

    /// Check whether `parent` can take one more photo of `incoming_bytes`.
    pub fn check_policy(
        &self,
        parent: &str,
        policy: &PhotoPolicy,
        incoming_bytes: u64,
    ) -> Result<(), PolicyViolation> {
        if self.photos(parent).len() >= policy.max_photos {
            return Err(PolicyViolation::TooManyPhotos {
                max: policy.max_photos,
            });
        }
        let used = self.used_bytes(parent);
        if used.saturating_add(incoming_bytes) > policy.max_bytes {
            return Err(PolicyViolation::TooManyBytes {
                max: policy.max_bytes,
                used,
                requested: incoming_bytes,
            });
        }
        Ok(())
    }

    /// Attach a photo to `parent`, checking the policy first.
    ///
    /// Attaching an id the parent already holds is a no-op and returns
    /// `Ok(false)`; this happens when the same picture is uploaded twice.
    pub fn attach(
        &mut self,
        parent: &str,
        meta: PhotoMeta,
        policy: &PhotoPolicy,
    ) -> Result<bool, FormStateError> {
        if self.photos(parent).iter().any(|p| p.id == meta.id) {
            return Ok(false);
        }
        self.check_policy(parent, policy, meta.size_bytes)?;
        self.photos.entry(parent.to_string()).or_default().push(meta);
        self.touch();
        Ok(true)
    }

    /// Detach a photo from `parent`. Returns whether it was attached.
    pub fn detach(&mut self, parent: &str, id: &str) -> bool {
        let Some(list) = self.photos.get_mut(parent) else {
            return false;
        };
        let before = list.len();
        list.retain(|p| p.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.photos.remove(parent);
        }
        if removed {
            self.touch();
        }
        removed
    }

    /// Detach `id` from every parent. Returns how many parents held it.
    pub fn detach_all(&mut self, id: &str) -> usize {
        let parents: Vec<String> = self
            .photos
            .iter()
            .filter(|(_, list)| list.iter().any(|p| p.id == id))
            .map(|(parent, _)| parent.clone())
            .collect();
        for parent in &parents {
            self.detach(parent, id);
        }
        parents.len()
    }

    /// Whether any parent still references `id`.
    ///
    /// Deduplicated uploads share an id across parents, so the blob may only
    /// be deleted once nothing references it.
    pub fn is_referenced(&self, id: &str) -> bool {
        self.photos.values().flatten().any(|p| p.id == id)
    }

    fn touch(&mut self) {
        self.last_modified = Some(Utc::now());
    }
}

impl fmt::Display for PhotoPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} photos, {} per record",
            self.max_photos,
            format_mib(&self.max_bytes)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(id: &str, size: u64) -> PhotoMeta {
        PhotoMeta {
            id: id.into(),
            file_name: format!("{id}.jpg"),
            size_bytes: size,
            mime_type: "image/avif".into(),
            width: 1600,
            height: 1200,
            created_at: Utc::now(),
            content_hash: format!("hash-{id}"),
        }
    }

    #[test]
    fn load_missing_file_is_empty_state() {
        let tmp = TempDir::new().unwrap();
        let state = FormState::load(&FormState::path_in(tmp.path())).unwrap();
        assert_eq!(state, FormState::default());
    }

    #[test]
    fn load_corrupt_json_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = FormState::path_in(tmp.path());
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FormState::load(&path),
            Err(FormStateError::Json(_))
        ));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = FormState::path_in(tmp.path());
        let policy = PhotoPolicy::default();
        let mut state = FormState::default();
        state.attach("boiler-1", meta("a", 100), &policy).unwrap();
        state.attach("boiler-1", meta("b", 200), &policy).unwrap();
        state.save(&path).unwrap();

        let loaded = FormState::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.photos("boiler-1").len(), 2);
    }

    #[test]
    fn saved_json_holds_plain_photo_meta() {
        let tmp = TempDir::new().unwrap();
        let path = FormState::path_in(tmp.path());
        let mut state = FormState::default();
        state
            .attach("ahu-2", meta("a", 100), &PhotoPolicy::default())
            .unwrap();
        state.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let photo = &json["photos"]["ahu-2"][0];
        assert_eq!(photo["id"], "a");
        assert_eq!(photo["sizeBytes"], 100);
        assert!(json["lastModified"].is_string());
    }

    #[test]
    fn policy_limits_photo_count() {
        let policy = PhotoPolicy {
            max_photos: 2,
            ..PhotoPolicy::default()
        };
        let mut state = FormState::default();
        state.attach("p", meta("a", 1), &policy).unwrap();
        state.attach("p", meta("b", 1), &policy).unwrap();

        let err = state.attach("p", meta("c", 1), &policy).unwrap_err();
        assert!(matches!(
            err,
            FormStateError::Policy(PolicyViolation::TooManyPhotos { max: 2 })
        ));
        assert_eq!(err.to_string(), "Max 2 photos per system reached.");
        // Other parents are unaffected
        state.attach("q", meta("c", 1), &policy).unwrap();
    }

    #[test]
    fn policy_limits_total_bytes() {
        let policy = PhotoPolicy::default();
        let mut state = FormState::default();
        state.attach("p", meta("a", 10 * 1024 * 1024), &policy).unwrap();

        let violation = state
            .check_policy("p", &policy, 6 * 1024 * 1024)
            .unwrap_err();
        assert_eq!(
            violation,
            PolicyViolation::TooManyBytes {
                max: 15 * 1024 * 1024,
                used: 10 * 1024 * 1024,
                requested: 6 * 1024 * 1024,
            }
        );
        assert!(violation.to_string().contains("~15MB"));
        state.check_policy("p", &policy, 5 * 1024 * 1024).unwrap();
    }

    #[test]
    fn attach_same_id_twice_is_noop() {
        let policy = PhotoPolicy::default();
        let mut state = FormState::default();
        assert!(state.attach("p", meta("a", 5), &policy).unwrap());
        assert!(!state.attach("p", meta("a", 5), &policy).unwrap());
        assert_eq!(state.photos("p").len(), 1);
    }

    #[test]
    fn detach_and_references() {
        let policy = PhotoPolicy::default();
        let mut state = FormState::default();
        state.attach("p", meta("shared", 5), &policy).unwrap();
        state.attach("q", meta("shared", 5), &policy).unwrap();

        assert!(state.detach("p", "shared"));
        assert!(!state.detach("p", "shared"));
        assert!(state.is_referenced("shared"));
        assert!(state.photos("p").is_empty());

        assert!(state.detach("q", "shared"));
        assert!(!state.is_referenced("shared"));
        assert!(state.photos.is_empty());
    }

    #[test]
    fn detach_all_clears_every_parent() {
        let policy = PhotoPolicy::default();
        let mut state = FormState::default();
        state.attach("p", meta("shared", 5), &policy).unwrap();
        state.attach("q", meta("shared", 5), &policy).unwrap();
        state.attach("q", meta("other", 5), &policy).unwrap();

        assert_eq!(state.detach_all("shared"), 2);
        assert!(!state.is_referenced("shared"));
        assert_eq!(state.photos("q").len(), 1);
        assert_eq!(state.detach_all("shared"), 0);
    }
}
