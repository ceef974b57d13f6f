//! End-to-end tests of the photo registry with the real image backend.
//!
//! Most cases limit encodings to PNG and JPEG, since AVIF encoding is too
//! slow to repeat for every case here. One small upload runs the stock
//! AVIF-first chain end to end.

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;
use survey_media::config::StorageConfig;
use survey_media::form_state::{FormState, PhotoPolicy, PolicyViolation};
use survey_media::imaging::{
    Encoding, EncodingCandidate, ImageBackend, Quality, RustBackend, TranscodeConfig,
};
use survey_media::registry::{PhotoRegistry, RegistryError, SaveFailure, Stage};
use survey_media::report::{ReportPhoto, collect_photos, render_photo_appendix};
use survey_media::store::{BLOBS_DIR, BlobStore, Tier};
use survey_media::types::PhotoUpload;
use tempfile::TempDir;

fn config() -> TranscodeConfig {
    TranscodeConfig {
        encodings: vec![EncodingCandidate::lossless(Encoding::Png)],
        thumb_encodings: vec![EncodingCandidate::new(Encoding::Jpeg, Quality::new(80))],
        ..TranscodeConfig::default()
    }
}

fn open(root: &std::path::Path, storage: &StorageConfig) -> PhotoRegistry<RustBackend> {
    let store = BlobStore::open(root, storage).unwrap();
    PhotoRegistry::new(store, RustBackend::new(), config())
}

fn registry(tmp: &TempDir) -> PhotoRegistry<RustBackend> {
    open(tmp.path(), &StorageConfig::default())
}

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

/// Gradient JPEG; `seed` shifts the colors so different seeds differ.
fn jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x % 256) as u8 ^ seed,
            (y % 256) as u8,
            ((x + y) % 256) as u8,
        ])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

fn png(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([seed, (x % 256) as u8, (y % 256) as u8, 255])
    });
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).unwrap();
    (img.width(), img.height())
}

#[test]
fn large_upload_is_bounded_to_working_and_thumbnail_sizes() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);

    let meta = reg
        .save_photo(&PhotoUpload::new("boiler-room.jpg", jpeg(4000, 3000, 0)), None)
        .unwrap();

    assert_eq!((meta.width, meta.height), (1600, 1200));
    assert_eq!(meta.mime_type, "image/png");
    assert_eq!(meta.content_hash.len(), 64);

    let full = reg.get_full_image(&meta.id).unwrap().unwrap();
    assert_eq!(full.len() as u64, meta.size_bytes);
    assert_eq!(decoded_dimensions(&full), (1600, 1200));

    let thumb = reg.get_thumbnail(&meta.id).unwrap().unwrap();
    assert_eq!(decoded_dimensions(&thumb), (320, 240));
}

#[test]
fn same_picture_under_two_names_shares_one_copy() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);
    let bytes = jpeg(640, 480, 7);

    let first = reg
        .save_photo(&PhotoUpload::new("IMG_0001.jpg", bytes.clone()), None)
        .unwrap();
    let usage = reg.estimate_usage().unwrap().used_bytes;
    let second = reg
        .save_photo(&PhotoUpload::new("meter-reading.jpg", bytes), None)
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.file_name, "meter-reading.jpg");
    assert_eq!(second.content_hash, first.content_hash);
    let blob_files = std::fs::read_dir(tmp.path().join(BLOBS_DIR)).unwrap().count();
    assert_eq!(blob_files, 1);
    assert_eq!(reg.estimate_usage().unwrap().used_bytes, usage);
}

#[test]
fn different_pictures_get_different_ids() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);

    let a = reg
        .save_photo(&PhotoUpload::new("a.png", png(300, 200, 1)), None)
        .unwrap();
    let b = reg
        .save_photo(&PhotoUpload::new("b.png", png(300, 200, 2)), None)
        .unwrap();

    assert_ne!(a.id, b.id);
    assert_ne!(a.content_hash, b.content_hash);
}

#[test]
fn small_images_are_never_upscaled() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);

    let meta = reg
        .save_photo(&PhotoUpload::new("tiny.png", png(200, 100, 3)), None)
        .unwrap();

    assert_eq!((meta.width, meta.height), (200, 100));
    let thumb = reg.get_thumbnail(&meta.id).unwrap().unwrap();
    assert_eq!(decoded_dimensions(&thumb), (200, 100));
}

#[test]
fn portrait_aspect_ratio_is_preserved() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);

    let meta = reg
        .save_photo(&PhotoUpload::new("tall.jpg", jpeg(900, 1800, 4)), None)
        .unwrap();

    assert_eq!((meta.width, meta.height), (800, 1600));
    let thumb = reg.get_thumbnail(&meta.id).unwrap().unwrap();
    assert_eq!(decoded_dimensions(&thumb), (160, 320));
}

#[test]
fn delete_is_idempotent_and_frees_the_hash() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);
    let bytes = png(320, 240, 5);

    let meta = reg
        .save_photo(&PhotoUpload::new("a.png", bytes.clone()), None)
        .unwrap();
    reg.delete_photo(&meta.id).unwrap();
    reg.delete_photo(&meta.id).unwrap();
    reg.delete_photo("00000000-0000-4000-8000-000000000000").unwrap();

    assert_eq!(reg.get_full_image(&meta.id).unwrap(), None);
    assert_eq!(reg.get_thumbnail(&meta.id).unwrap(), None);
    assert_eq!(std::fs::read_dir(tmp.path().join(BLOBS_DIR)).unwrap().count(), 0);

    let again = reg
        .save_photo(&PhotoUpload::new("a.png", bytes), None)
        .unwrap();
    assert_ne!(again.id, meta.id);
    assert!(reg.get_full_image(&again.id).unwrap().is_some());
}

#[test]
fn stock_encoding_chain_stores_avif_that_reads_back() {
    let tmp = TempDir::new().unwrap();
    let store = BlobStore::open(tmp.path(), &StorageConfig::default()).unwrap();
    let reg = PhotoRegistry::new(store, RustBackend::new(), TranscodeConfig::default());

    let meta = reg
        .save_photo(&PhotoUpload::new("valve.jpg", jpeg(64, 48, 20)), None)
        .unwrap();

    assert_eq!(meta.mime_type, "image/avif");
    assert_eq!((meta.width, meta.height), (64, 48));
    assert!(
        tmp.path()
            .join(BLOBS_DIR)
            .join(format!("{}.avif", meta.id))
            .is_file()
    );

    let backend = RustBackend::new();
    let full = reg.get_full_image(&meta.id).unwrap().unwrap();
    let img = backend.decode(&full).unwrap();
    assert_eq!((img.width(), img.height()), (64, 48));
    let thumb = reg.get_thumbnail(&meta.id).unwrap().unwrap();
    let img = backend.decode(&thumb).unwrap();
    assert_eq!((img.width(), img.height()), (64, 48));
}

#[test]
fn resave_after_blob_file_vanished_stores_fresh_copy() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);
    let bytes = png(200, 100, 21);

    let first = reg
        .save_photo(&PhotoUpload::new("a.png", bytes.clone()), None)
        .unwrap();
    std::fs::remove_file(tmp.path().join(BLOBS_DIR).join(format!("{}.png", first.id))).unwrap();

    let second = reg
        .save_photo(&PhotoUpload::new("a.png", bytes), None)
        .unwrap();
    assert_ne!(second.id, first.id);
    let full = reg.get_full_image(&second.id).unwrap().unwrap();
    assert_eq!(decoded_dimensions(&full), (200, 100));
}

#[test]
fn resave_after_blob_directory_breaks_between_sessions() {
    let tmp = TempDir::new().unwrap();
    let bytes = png(120, 90, 22);
    let first = {
        let reg = registry(&tmp);
        reg.save_photo(&PhotoUpload::new("a.png", bytes.clone()), None)
            .unwrap()
    };
    std::fs::remove_dir_all(tmp.path().join(BLOBS_DIR)).unwrap();
    std::fs::write(tmp.path().join(BLOBS_DIR), b"not a directory").unwrap();

    let reg = registry(&tmp);
    assert_eq!(reg.store().active_full_tier(), Tier::Index);
    let second = reg
        .save_photo(&PhotoUpload::new("a.png", bytes), None)
        .unwrap();

    assert_ne!(second.id, first.id);
    let full = reg.get_full_image(&second.id).unwrap().unwrap();
    assert_eq!(decoded_dimensions(&full), (120, 90));
}

#[test]
fn capacity_photos_stay_readable_with_tier_switched_off() {
    let tmp = TempDir::new().unwrap();
    let bytes = jpeg(300, 200, 23);
    let first = {
        let reg = registry(&tmp);
        reg.save_photo(&PhotoUpload::new("a.jpg", bytes.clone()), None)
            .unwrap()
    };

    let storage = StorageConfig {
        capacity_tier: false,
        quota_bytes: None,
    };
    let reg = open(tmp.path(), &storage);
    let full = reg.get_full_image(&first.id).unwrap().unwrap();
    assert_eq!(decoded_dimensions(&full), (300, 200));

    let again = reg
        .save_photo(&PhotoUpload::new("b.jpg", bytes), None)
        .unwrap();
    assert_eq!(again.id, first.id);
}

#[test]
fn non_image_upload_fails_without_touching_storage() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);

    let err = reg
        .save_photo(
            &PhotoUpload::new("notes.txt", b"boiler serial 4411".to_vec()),
            None,
        )
        .unwrap_err();

    assert!(matches!(
        err,
        RegistryError::Save {
            stage: Stage::Transcode,
            source: SaveFailure::Transcode(_),
            ..
        }
    ));
    assert_eq!(err.user_message(), "Failed to add photo");
    assert_eq!(reg.store().index().photo_ids().unwrap().len(), 0);
}

#[test]
fn batch_keeps_order_and_isolates_failures() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);
    let uploads = vec![
        PhotoUpload::new("one.jpg", jpeg(400, 300, 10)),
        PhotoUpload::new("broken.jpg", b"\xFF\xD8\xFF\xE0 truncated".to_vec()),
        PhotoUpload::new("three.png", png(400, 300, 11)),
    ];

    let results = reg.save_photos(&uploads);

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().file_name, "one.jpg");
    assert_eq!(
        results[1].as_ref().unwrap_err().file_name(),
        Some("broken.jpg")
    );
    assert_eq!(results[2].as_ref().unwrap().file_name, "three.png");
}

#[test]
fn index_only_store_behaves_identically() {
    let tmp = TempDir::new().unwrap();
    let storage = StorageConfig {
        capacity_tier: false,
        quota_bytes: None,
    };
    let reg = open(tmp.path(), &storage);
    assert_eq!(reg.store().active_full_tier(), Tier::Index);
    let bytes = jpeg(800, 600, 12);

    let first = reg
        .save_photo(&PhotoUpload::new("a.jpg", bytes.clone()), None)
        .unwrap();
    let second = reg
        .save_photo(&PhotoUpload::new("b.jpg", bytes), None)
        .unwrap();

    assert_eq!(first.id, second.id);
    let full = reg.get_full_image(&first.id).unwrap().unwrap();
    assert_eq!(decoded_dimensions(&full), (800, 600));
    assert!(!tmp.path().join(BLOBS_DIR).exists());
}

#[test]
fn unusable_blob_directory_falls_back_to_index() {
    let tmp = TempDir::new().unwrap();
    // A plain file where the blob directory should be
    std::fs::write(tmp.path().join(BLOBS_DIR), b"not a directory").unwrap();
    let reg = registry(&tmp);
    assert_eq!(reg.store().active_full_tier(), Tier::Index);

    let meta = reg
        .save_photo(&PhotoUpload::new("a.png", png(100, 100, 13)), None)
        .unwrap();
    assert!(reg.get_full_image(&meta.id).unwrap().is_some());
}

#[test]
fn photos_survive_reopening_the_store() {
    let tmp = TempDir::new().unwrap();
    let bytes = png(256, 256, 14);
    let meta = {
        let reg = registry(&tmp);
        reg.save_photo(&PhotoUpload::new("a.png", bytes.clone()), None)
            .unwrap()
    };

    let reg = registry(&tmp);
    assert!(reg.get_full_image(&meta.id).unwrap().is_some());
    assert!(reg.get_thumbnail(&meta.id).unwrap().is_some());
    let again = reg
        .save_photo(&PhotoUpload::new("b.png", bytes), None)
        .unwrap();
    assert_eq!(again.id, meta.id);
}

#[test]
fn quota_rejects_writes_with_storage_limit_message() {
    let tmp = TempDir::new().unwrap();
    let storage = StorageConfig {
        capacity_tier: true,
        quota_bytes: Some(1024),
    };
    let reg = open(tmp.path(), &storage);

    let err = reg
        .save_photo(&PhotoUpload::new("big.jpg", jpeg(1200, 900, 15)), None)
        .unwrap_err();
    assert_eq!(err.user_message(), "Storage limit reached");
}

#[test]
fn form_state_and_report_use_returned_meta() {
    let tmp = TempDir::new().unwrap();
    let reg = registry(&tmp);
    let policy = PhotoPolicy {
        max_photos: 2,
        ..PhotoPolicy::default()
    };
    let mut state = FormState::default();

    for (i, name) in ["a.png", "b.png"].iter().enumerate() {
        let meta = reg
            .save_photo(&PhotoUpload::new(*name, png(120, 90, 20 + i as u8)), None)
            .unwrap();
        state.attach("ahu-1", meta, &policy).unwrap();
    }
    assert_eq!(
        state.check_policy("ahu-1", &policy, 0),
        Err(PolicyViolation::TooManyPhotos { max: 2 })
    );

    let path = FormState::path_in(tmp.path());
    state.save(&path).unwrap();
    let loaded = FormState::load(&path).unwrap();
    let photos = loaded.photos("ahu-1").to_vec();
    reg.delete_photo(&photos[1].id).unwrap();

    let report = collect_photos(&reg, &photos);
    assert!(matches!(
        report[0],
        ReportPhoto::Embedded {
            mime_type: "image/jpeg",
            ..
        }
    ));
    assert!(matches!(report[1], ReportPhoto::Missing { .. }));
    let html = render_photo_appendix(&report).into_string();
    assert!(html.contains("data:image/jpeg;base64,"));
    assert!(html.contains("No image"));
}
