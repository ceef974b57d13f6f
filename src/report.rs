//! Photo appendix for exported survey reports.
//!
//! The export embeds thumbnails rather than full-size images. A photo whose
//! thumbnail has gone missing (deleted, or its storage evicted) is drawn as a
//! "No image" placeholder; a photo that cannot be read gets a distinct
//! placeholder. Neither case fails the export.

use crate::imaging::{Encoding, ImageBackend, sniff_encoding};
use crate::registry::PhotoRegistry;
use crate::types::PhotoMeta;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use maud::{DOCTYPE, Markup, PreEscaped, html};

/// Photos shown per record; the rest are left out of the export.
pub const MAX_REPORT_PHOTOS: usize = 6;

const CSS: &str = r#"
body { font-family: Helvetica, Arial, sans-serif; margin: 2rem; color: #111; }
.photos h3 { font-size: 0.9rem; margin-bottom: 0.5rem; }
.photo-grid { display: grid; grid-template-columns: repeat(3, 160px); gap: 8px; }
.photo-grid figure { margin: 0; }
.photo-grid img, .placeholder { width: 160px; height: 120px; object-fit: cover; }
.placeholder { display: flex; align-items: center; justify-content: center;
  background: #f0f0f0; border: 1px solid #969696; color: #646464; font-size: 0.7rem; }
.placeholder.unreadable { background: #faf0f0; border-color: #c86464; }
figcaption { font-size: 0.7rem; color: #666; overflow-wrap: anywhere; }
"#;

/// One photo slot in the report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportPhoto {
    Embedded {
        meta: PhotoMeta,
        mime_type: &'static str,
        data: Vec<u8>,
    },
    Missing {
        meta: PhotoMeta,
    },
    Unreadable {
        meta: PhotoMeta,
        error: String,
    },
}

impl ReportPhoto {
    pub fn meta(&self) -> &PhotoMeta {
        match self {
            ReportPhoto::Embedded { meta, .. }
            | ReportPhoto::Missing { meta }
            | ReportPhoto::Unreadable { meta, .. } => meta,
        }
    }

    fn data_uri(mime_type: &str, data: &[u8]) -> String {
        format!("data:{mime_type};base64,{}", BASE64.encode(data))
    }
}

/// Resolve thumbnails for up to [`MAX_REPORT_PHOTOS`] photos.
pub fn collect_photos<B: ImageBackend>(
    registry: &PhotoRegistry<B>,
    photos: &[PhotoMeta],
) -> Vec<ReportPhoto> {
    photos
        .iter()
        .take(MAX_REPORT_PHOTOS)
        .map(|meta| match registry.get_thumbnail(&meta.id) {
            Ok(Some(data)) => ReportPhoto::Embedded {
                meta: meta.clone(),
                mime_type: sniff_encoding(&data)
                    .unwrap_or(Encoding::Jpeg)
                    .mime_type(),
                data,
            },
            Ok(None) => {
                tracing::debug!(id = %meta.id, "thumbnail missing, using placeholder");
                ReportPhoto::Missing { meta: meta.clone() }
            }
            Err(e) => {
                tracing::warn!(id = %meta.id, error = %e, "failed to embed photo");
                ReportPhoto::Unreadable {
                    meta: meta.clone(),
                    error: e.to_string(),
                }
            }
        })
        .collect()
}

/// The photo grid for one record.
pub fn render_photo_appendix(photos: &[ReportPhoto]) -> Markup {
    if photos.is_empty() {
        return html! {};
    }
    html! {
        section.photos {
            h3 { "Photos:" }
            div.photo-grid {
                @for photo in photos {
                    figure {
                        @match photo {
                            ReportPhoto::Embedded { meta, mime_type, data } => {
                                img src=(ReportPhoto::data_uri(mime_type, data)) alt=(meta.file_name);
                            }
                            ReportPhoto::Missing { .. } => {
                                div.placeholder { "No image" }
                            }
                            ReportPhoto::Unreadable { error, .. } => {
                                div.placeholder.unreadable title=(error) { "Unavailable" }
                            }
                        }
                        figcaption { (photo.meta().file_name) }
                    }
                }
            }
        }
    }
}

/// A standalone HTML page holding the photo appendix of one record.
pub fn render_report(title: &str, photos: &[ReportPhoto]) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                title { (title) }
                style { (PreEscaped(CSS)) }
            }
            body {
                h2 { (title) }
                (render_photo_appendix(photos))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::imaging::backend::tests::MockBackend;
    use crate::imaging::TranscodeConfig;
    use crate::store::BlobStore;
    use crate::types::PhotoUpload;
    use chrono::Utc;
    use tempfile::TempDir;

    fn meta(id: &str, name: &str) -> PhotoMeta {
        PhotoMeta {
            id: id.into(),
            file_name: name.into(),
            size_bytes: 1,
            mime_type: "image/png".into(),
            width: 4,
            height: 3,
            created_at: Utc::now(),
            content_hash: "00".into(),
        }
    }

    fn registry(tmp: &TempDir) -> PhotoRegistry<MockBackend> {
        let store = BlobStore::open(tmp.path(), &StorageConfig::default()).unwrap();
        PhotoRegistry::new(store, MockBackend::new(800, 600), TranscodeConfig::default())
    }

    #[test]
    fn collect_embeds_stored_and_marks_missing() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let stored = reg
            .save_photo(&PhotoUpload::new("pump.jpg", b"img".to_vec()), None)
            .unwrap();
        let gone = meta("deleted-id", "gone.jpg");

        let photos = collect_photos(&reg, &[stored.clone(), gone.clone()]);

        assert_eq!(photos.len(), 2);
        match &photos[0] {
            ReportPhoto::Embedded { meta, data, .. } => {
                assert_eq!(meta, &stored);
                assert_eq!(data, &b"avif:320x240".to_vec());
            }
            other => panic!("expected embedded photo, got {other:?}"),
        }
        assert_eq!(photos[1], ReportPhoto::Missing { meta: gone });
    }

    #[test]
    fn collect_caps_photo_count() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let metas: Vec<_> = (0..9).map(|i| meta(&format!("id-{i}"), "x.jpg")).collect();
        assert_eq!(collect_photos(&reg, &metas).len(), MAX_REPORT_PHOTOS);
    }

    #[test]
    fn appendix_renders_data_uri_and_placeholder() {
        let photos = vec![
            ReportPhoto::Embedded {
                meta: meta("a", "boiler.png"),
                mime_type: "image/png",
                data: vec![1, 2, 3],
            },
            ReportPhoto::Missing {
                meta: meta("b", "meter.png"),
            },
        ];
        let html = render_photo_appendix(&photos).into_string();

        assert!(html.contains("data:image/png;base64,AQID"));
        assert!(html.contains("No image"));
        assert!(html.contains("boiler.png"));
        assert!(html.contains("meter.png"));
    }

    #[test]
    fn appendix_marks_unreadable_photos() {
        let photos = vec![ReportPhoto::Unreadable {
            meta: meta("a", "a.png"),
            error: "Storage unavailable".into(),
        }];
        let html = render_photo_appendix(&photos).into_string();
        assert!(html.contains("placeholder unreadable"));
        assert!(html.contains("Unavailable"));
    }

    #[test]
    fn empty_appendix_renders_nothing() {
        assert_eq!(render_photo_appendix(&[]).into_string(), "");
    }

    #[test]
    fn report_is_a_full_document() {
        let html = render_report("Boiler room", &[]).into_string();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Boiler room</title>"));
    }

    #[test]
    fn file_names_are_escaped() {
        let photos = vec![ReportPhoto::Missing {
            meta: meta("a", "<script>.png"),
        }];
        let html = render_photo_appendix(&photos).into_string();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;.png"));
    }
}
