//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every photo is shown by its positional index and file name first, with
//! its id, encoding and size as indented context lines. Failures keep the same
//! shape so a batch reads as one inventory of what happened to each file.
//!
//! # Output Format
//!
//! ## Save
//!
//! ```text
//! 001 boiler-room.jpg
//!     Id: 7d3c2a9e-4b1f-4c1e-9a57-0f4f5b2d8e11
//!     Stored: image/avif 1600x1200, 179.3 KB
//! 002 boiler-room-copy.jpg
//!     Id: 7d3c2a9e-4b1f-4c1e-9a57-0f4f5b2d8e11
//!     Reused: identical photo already stored
//! 003 notes.txt
//!     Failed: Failed to add photo
//!     Cause: Failed to save notes.txt (transcode): Source is not a decodable image: ...
//!
//! Saved 2 photos, 1 failed
//! ```
//!
//! ## List
//!
//! ```text
//! 001 boiler-1 (2 photos, 358.6 KB)
//!     001 boiler-room.jpg
//!         Id: 7d3c2a9e-4b1f-4c1e-9a57-0f4f5b2d8e11
//!         image/avif 1600x1200, 179.3 KB
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::form_state::{FormState, PolicyViolation};
use crate::registry::RegistryError;
use crate::store::{PersistenceStatus, StorageEstimate};
use crate::types::PhotoMeta;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count with one decimal (1000-based units).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

/// `image/avif 1600x1200, 179.3 KB`
fn photo_summary(meta: &PhotoMeta) -> String {
    format!(
        "{} {}x{}, {}",
        meta.mime_type,
        meta.width,
        meta.height,
        format_bytes(meta.size_bytes)
    )
}

// ============================================================================
// Save output
// ============================================================================

/// What happened to one file of a `save` invocation.
#[derive(Debug)]
pub enum SaveOutcome {
    /// Newly stored.
    Stored(PhotoMeta),
    /// Identical content was already stored under this id.
    Reused(PhotoMeta),
    /// Saved, but the parent record's photo policy refused it.
    Rejected {
        file_name: String,
        violation: PolicyViolation,
    },
    Failed {
        file_name: String,
        error: RegistryError,
    },
}

pub fn format_save_results(outcomes: &[SaveOutcome]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut saved = 0;
    let mut failed = 0;

    for (i, outcome) in outcomes.iter().enumerate() {
        let index = format_index(i + 1);
        match outcome {
            SaveOutcome::Stored(meta) => {
                saved += 1;
                lines.push(format!("{} {}", index, meta.file_name));
                lines.push(format!("{}Id: {}", indent(1), meta.id));
                lines.push(format!("{}Stored: {}", indent(1), photo_summary(meta)));
            }
            SaveOutcome::Reused(meta) => {
                saved += 1;
                lines.push(format!("{} {}", index, meta.file_name));
                lines.push(format!("{}Id: {}", indent(1), meta.id));
                lines.push(format!(
                    "{}Reused: identical photo already stored",
                    indent(1)
                ));
            }
            SaveOutcome::Rejected {
                file_name,
                violation,
            } => {
                failed += 1;
                lines.push(format!("{} {}", index, file_name));
                lines.push(format!("{}Rejected: {}", indent(1), violation));
            }
            SaveOutcome::Failed { file_name, error } => {
                failed += 1;
                lines.push(format!("{} {}", index, file_name));
                lines.push(format!("{}Failed: {}", indent(1), error.user_message()));
                lines.push(format!("{}Cause: {}", indent(1), error));
            }
        }
    }

    lines.push(String::new());
    if failed == 0 {
        lines.push(format!("Saved {}", plural(saved, "photo")));
    } else {
        lines.push(format!("Saved {}, {} failed", plural(saved, "photo"), failed));
    }
    lines
}

pub fn print_save_results(outcomes: &[SaveOutcome]) {
    for line in format_save_results(outcomes) {
        println!("{}", line);
    }
}

// ============================================================================
// List output
// ============================================================================

/// Photos attached to each parent record, optionally limited to one parent.
pub fn format_photo_list(state: &FormState, parent: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    let parents: Vec<&String> = match parent {
        Some(p) => state.photos.keys().filter(|k| k.as_str() == p).collect(),
        None => state.photos.keys().collect(),
    };

    if parents.is_empty() {
        lines.push(match parent {
            Some(p) => format!("No photos attached to {}", p),
            None => "No photos attached".to_string(),
        });
        return lines;
    }

    for (i, parent_id) in parents.iter().enumerate() {
        let photos = state.photos(parent_id);
        lines.push(format!(
            "{} {} ({}, {})",
            format_index(i + 1),
            parent_id,
            plural(photos.len(), "photo"),
            format_bytes(state.used_bytes(parent_id))
        ));
        for (j, meta) in photos.iter().enumerate() {
            lines.push(format!(
                "{}{} {}",
                indent(1),
                format_index(j + 1),
                meta.file_name
            ));
            lines.push(format!("{}Id: {}", indent(2), meta.id));
            lines.push(format!("{}{}", indent(2), photo_summary(meta)));
        }
    }
    lines
}

pub fn print_photo_list(state: &FormState, parent: Option<&str>) {
    for line in format_photo_list(state, parent) {
        println!("{}", line);
    }
}

// ============================================================================
// Storage introspection
// ============================================================================

pub fn format_usage(estimate: &StorageEstimate) -> Vec<String> {
    match estimate.quota_bytes {
        Some(quota) if quota > 0 => {
            let pct = estimate.used_bytes as f64 / quota as f64 * 100.0;
            vec![format!(
                "Used: {} of {} ({:.1}%)",
                format_bytes(estimate.used_bytes),
                format_bytes(quota),
                pct
            )]
        }
        _ => vec![format!(
            "Used: {} (no quota)",
            format_bytes(estimate.used_bytes)
        )],
    }
}

pub fn print_usage(estimate: &StorageEstimate) {
    for line in format_usage(estimate) {
        println!("{}", line);
    }
}

pub fn format_persistence(status: &PersistenceStatus) -> Vec<String> {
    match (status.persisted, &status.reason) {
        (true, _) => vec!["Storage: Persisted \u{2713}".to_string()],
        (false, Some(reason)) => vec![
            "Storage: Not persisted (device may evict data)".to_string(),
            format!("{}Reason: {}", indent(1), reason),
        ],
        (false, None) => vec!["Storage: Not persisted (device may evict data)".to_string()],
    }
}

pub fn print_persistence(status: &PersistenceStatus) {
    for line in format_persistence(status) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_state::PhotoPolicy;
    use crate::store::StoreError;
    use chrono::Utc;

    fn meta(id: &str, name: &str, size: u64) -> PhotoMeta {
        PhotoMeta {
            id: id.into(),
            file_name: name.into(),
            size_bytes: size,
            mime_type: "image/avif".into(),
            width: 1600,
            height: 1200,
            created_at: Utc::now(),
            content_hash: "ab".into(),
        }
    }

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(999), "999 B");
        assert_eq!(format_bytes(1000), "1.0 KB");
        assert_eq!(format_bytes(179_300), "179.3 KB");
        assert_eq!(format_bytes(15_728_640), "15.7 MB");
        assert_eq!(format_bytes(2_000_000_000), "2.0 GB");
    }

    #[test]
    fn save_results_show_each_outcome() {
        let outcomes = vec![
            SaveOutcome::Stored(meta("id-1", "boiler.jpg", 179_300)),
            SaveOutcome::Reused(meta("id-1", "copy.jpg", 179_300)),
            SaveOutcome::Failed {
                file_name: "big.jpg".into(),
                error: RegistryError::Store(StoreError::QuotaExceeded {
                    requested: 10,
                    available: 0,
                }),
            },
            SaveOutcome::Rejected {
                file_name: "eleventh.jpg".into(),
                violation: PolicyViolation::TooManyPhotos { max: 10 },
            },
        ];

        let lines = format_save_results(&outcomes);

        assert_eq!(lines[0], "001 boiler.jpg");
        assert_eq!(lines[1], "    Id: id-1");
        assert_eq!(lines[2], "    Stored: image/avif 1600x1200, 179.3 KB");
        assert_eq!(lines[3], "002 copy.jpg");
        assert_eq!(lines[5], "    Reused: identical photo already stored");
        assert_eq!(lines[6], "003 big.jpg");
        assert_eq!(lines[7], "    Failed: Storage limit reached");
        assert_eq!(lines[9], "004 eleventh.jpg");
        assert_eq!(lines[10], "    Rejected: Max 10 photos per system reached.");
        assert_eq!(lines.last().unwrap(), "Saved 2 photos, 2 failed");
    }

    #[test]
    fn save_results_summary_without_failures() {
        let lines = format_save_results(&[SaveOutcome::Stored(meta("id-1", "a.jpg", 10))]);
        assert_eq!(lines.last().unwrap(), "Saved 1 photo");
    }

    #[test]
    fn photo_list_groups_by_parent() {
        let policy = PhotoPolicy::default();
        let mut state = FormState::default();
        state.attach("ahu-1", meta("a", "fan.jpg", 1000), &policy).unwrap();
        state.attach("boiler-1", meta("b", "burner.jpg", 2000), &policy).unwrap();
        state.attach("boiler-1", meta("c", "flue.jpg", 3000), &policy).unwrap();

        let lines = format_photo_list(&state, None);
        assert_eq!(lines[0], "001 ahu-1 (1 photo, 1.0 KB)");
        assert_eq!(lines[1], "    001 fan.jpg");
        assert_eq!(lines[2], "        Id: a");
        assert_eq!(lines[4], "002 boiler-1 (2 photos, 5.0 KB)");

        let only = format_photo_list(&state, Some("boiler-1"));
        assert_eq!(only[0], "001 boiler-1 (2 photos, 5.0 KB)");
        assert_eq!(only.len(), 7);
    }

    #[test]
    fn photo_list_empty() {
        let state = FormState::default();
        assert_eq!(format_photo_list(&state, None), vec!["No photos attached"]);
        assert_eq!(
            format_photo_list(&state, Some("x")),
            vec!["No photos attached to x"]
        );
    }

    #[test]
    fn usage_with_and_without_quota() {
        let with_quota = StorageEstimate {
            used_bytes: 25_000_000,
            quota_bytes: Some(100_000_000),
        };
        assert_eq!(
            format_usage(&with_quota),
            vec!["Used: 25.0 MB of 100.0 MB (25.0%)"]
        );
        let without = StorageEstimate {
            used_bytes: 512,
            quota_bytes: None,
        };
        assert_eq!(format_usage(&without), vec!["Used: 512 B (no quota)"]);
    }

    #[test]
    fn persistence_lines() {
        let ok = PersistenceStatus {
            persisted: true,
            reason: None,
        };
        assert_eq!(format_persistence(&ok), vec!["Storage: Persisted \u{2713}"]);

        let not = PersistenceStatus {
            persisted: false,
            reason: Some("inside temp".into()),
        };
        let lines = format_persistence(&not);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "    Reason: inside temp");
    }
}
