//! Pure Rust image processing backend.
//!
//! No system libraries: every codec is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Decode (AVIF) | `avif-parse` (container) + `rav1d` (AV1) + BT.601 YUV→RGB |
//! | Identify (AVIF) | `avif-parse` (container metadata only) |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Sharpening | `image::imageops::unsharpen` |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless only) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |
//!
//! The `image` crate's `"avif"` feature only ships the encoder, so AVIF
//! uploads are decoded here with `rav1d` instead.

use super::backend::{BackendError, Dimensions, ImageBackend, ResizeParams};
use super::params::{Encoding, EncodingCandidate};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use std::io::Cursor;

/// Input formats whose decoders are compiled in and known to work.
///
/// AVIF is handled separately: `ImageFormat::reading_enabled()` reports
/// `true` for AVIF when the `"avif"` feature is on, even though only the
/// encoder is present.
const DECODABLE_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Tiff,
    ImageFormat::WebP,
];

/// rav1e speed preset; 6 keeps encode times reasonable on phones and laptops.
const AVIF_SPEED: u8 = 6;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// AVIF is an ISO-BMFF container: `ftyp` box with an `avif`/`avis` brand.
fn is_avif(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && matches!(&bytes[8..12], b"avif" | b"avis")
}

/// Which stored encoding `bytes` are in, judged from magic numbers.
pub fn sniff_encoding(bytes: &[u8]) -> Option<Encoding> {
    if is_avif(bytes) {
        return Some(Encoding::Avif);
    }
    match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => Some(Encoding::Jpeg),
        ImageFormat::Png => Some(Encoding::Png),
        ImageFormat::WebP => Some(Encoding::WebP),
        _ => None,
    }
}

fn guess_format(bytes: &[u8]) -> Result<ImageFormat, BackendError> {
    image::guess_format(bytes)
        .map_err(|e| BackendError::Decode(format!("Unrecognized image data: {e}")))
}

/// Extract dimensions from an AVIF container (no full decode needed).
fn identify_avif(bytes: &[u8]) -> Result<Dimensions, BackendError> {
    let avif = avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| BackendError::Decode(format!("Failed to parse AVIF: {e:?}")))?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| BackendError::Decode(format!("Failed to read AVIF metadata: {e:?}")))?;
    Ok(Dimensions {
        width: meta.max_frame_width.get(),
        height: meta.max_frame_height.get(),
    })
}

fn avif_error(what: &str, code: i32) -> BackendError {
    BackendError::Decode(format!("rav1d {what} failed ({code})"))
}

/// Decode an AVIF upload: avif-parse unwraps the container, rav1d decodes
/// the AV1 primary item.
fn decode_avif(bytes: &[u8]) -> Result<DynamicImage, BackendError> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use rav1d::src::lib::{
        dav1d_close, dav1d_data_create, dav1d_data_unref, dav1d_default_settings,
        dav1d_get_picture, dav1d_open, dav1d_picture_unref, dav1d_send_data,
    };
    use std::mem::MaybeUninit;
    use std::ptr::NonNull;

    let avif = avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| BackendError::Decode(format!("Failed to parse AVIF: {e:?}")))?;
    let av1: &[u8] = &avif.primary_item;

    let mut settings = MaybeUninit::<Dav1dSettings>::uninit();
    // SAFETY: dav1d_default_settings fully initializes the struct it is given.
    let mut settings = unsafe {
        dav1d_default_settings(NonNull::from(&mut settings).cast());
        settings.assume_init()
    };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    // SAFETY: both pointers come from live locals.
    let rc = unsafe { dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(avif_error("open", rc.0));
    }

    // Every exit below must close the context, so decoding runs in a block
    // and cleanup happens once afterwards.
    let decoded = (|| {
        let mut data = Dav1dData::default();
        // SAFETY: dav1d_data_create returns a buffer of exactly `av1.len()`
        // bytes (or null), which is filled before use.
        unsafe {
            let buf = dav1d_data_create(NonNull::new(&mut data), av1.len());
            if buf.is_null() {
                return Err(BackendError::Decode("rav1d data_create failed".into()));
            }
            std::ptr::copy_nonoverlapping(av1.as_ptr(), buf, av1.len());
            let rc = dav1d_send_data(ctx, NonNull::new(&mut data));
            if rc.0 != 0 {
                dav1d_data_unref(NonNull::new(&mut data));
                return Err(avif_error("send_data", rc.0));
            }
        }

        // SAFETY: an all-zero Dav1dPicture is the documented empty value.
        let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
        let rc = unsafe { dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
        if rc.0 != 0 {
            return Err(avif_error("get_picture", rc.0));
        }
        let rgb = picture_to_rgb(&pic);
        // SAFETY: pic holds a reference obtained from dav1d_get_picture.
        unsafe { dav1d_picture_unref(NonNull::new(&mut pic)) };
        rgb
    })();

    // SAFETY: ctx was opened above and is not used after this point.
    unsafe { dav1d_close(NonNull::new(&mut ctx)) };
    decoded
}

/// Convert a decoded rav1d picture into an RGB image.
fn picture_to_rgb(
    pic: &rav1d::include::dav1d::picture::Dav1dPicture,
) -> Result<DynamicImage, BackendError> {
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
        DAV1D_PIXEL_LAYOUT_I444,
    };

    let plane = |i: usize| {
        pic.data[i]
            .map(|p| p.as_ptr() as *const u8)
            .ok_or_else(|| BackendError::Decode(format!("AVIF picture is missing plane {i}")))
    };

    let (width, height) = (pic.p.w as u32, pic.p.h as u32);
    let layout = pic.p.layout;
    let y_ptr = plane(0)?;
    let planes = if layout == DAV1D_PIXEL_LAYOUT_I400 {
        YuvPlanes {
            y_ptr,
            u_ptr: y_ptr,
            v_ptr: y_ptr,
            y_stride: pic.stride[0],
            uv_stride: 0,
            width,
            height,
            bpc: pic.p.bpc as u32,
            ss_x: false,
            ss_y: false,
            monochrome: true,
        }
    } else {
        let (ss_x, ss_y) = match layout {
            DAV1D_PIXEL_LAYOUT_I420 => (true, true),
            DAV1D_PIXEL_LAYOUT_I422 => (true, false),
            DAV1D_PIXEL_LAYOUT_I444 => (false, false),
            _ => {
                return Err(BackendError::Decode(format!(
                    "Unsupported AVIF pixel layout: {layout}"
                )));
            }
        };
        YuvPlanes {
            y_ptr,
            u_ptr: plane(1)?,
            v_ptr: plane(2)?,
            y_stride: pic.stride[0],
            uv_stride: pic.stride[1],
            width,
            height,
            bpc: pic.p.bpc as u32,
            ss_x,
            ss_y,
            monochrome: false,
        }
    };

    RgbImage::from_raw(width, height, planes.to_rgb())
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| BackendError::Decode("Decoded AVIF has an inconsistent size".into()))
}

/// Borrowed YUV planes of a decoded picture.
struct YuvPlanes {
    y_ptr: *const u8,
    u_ptr: *const u8,
    v_ptr: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    /// Horizontal and vertical chroma subsampling (I420 is both)
    ss_x: bool,
    ss_y: bool,
    monochrome: bool,
}

impl YuvPlanes {
    /// Interleaved RGB8 via BT.601.
    fn to_rgb(&self) -> Vec<u8> {
        let scale = 255.0 / ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let to_u8 = |v: f32| (v * scale).clamp(0.0, 255.0) as u8;

        let mut rgb = Vec::with_capacity((self.width * self.height * 3) as usize);
        for row in 0..self.height {
            for col in 0..self.width {
                let y = self.sample(self.y_ptr, self.y_stride, col, row);
                if self.monochrome {
                    let v = to_u8(y);
                    rgb.extend_from_slice(&[v, v, v]);
                    continue;
                }
                let cx = if self.ss_x { col / 2 } else { col };
                let cy = if self.ss_y { row / 2 } else { row };
                let cb = self.sample(self.u_ptr, self.uv_stride, cx, cy) - center;
                let cr = self.sample(self.v_ptr, self.uv_stride, cx, cy) - center;
                rgb.extend_from_slice(&[
                    to_u8(y + 1.402 * cr),
                    to_u8(y - 0.344136 * cb - 0.714136 * cr),
                    to_u8(y + 1.772 * cb),
                ]);
            }
        }
        rgb
    }

    /// One sample; depths above 8 bits are stored as u16.
    #[inline]
    fn sample(&self, ptr: *const u8, stride: isize, x: u32, y: u32) -> f32 {
        // SAFETY: x and y stay within the picture, whose planes rav1d keeps
        // alive until the picture is unreferenced.
        unsafe {
            if self.bpc <= 8 {
                *ptr.offset(y as isize * stride + x as isize) as f32
            } else {
                let at = ptr.offset(y as isize * stride + x as isize * 2) as *const u16;
                at.read_unaligned() as f32
            }
        }
    }
}

/// Composite onto white and drop alpha, for encodings without transparency.
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// 8-bit pixels the encoding can carry, flattened when it has no alpha.
fn opaque_for(encoding: Encoding, img: &DynamicImage) -> DynamicImage {
    if encoding.supports_alpha() || !img.color().has_alpha() {
        to_8bit(img)
    } else {
        DynamicImage::ImageRgb8(flatten_onto_white(img))
    }
}

/// Normalize to 8-bit RGB or RGBA, which every encoder here accepts.
fn to_8bit(img: &DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

fn encode_failed(encoding: Encoding, e: image::ImageError) -> BackendError {
    BackendError::ProcessingFailed(format!("{} encode failed: {}", encoding, e))
}

impl ImageBackend for RustBackend {
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError> {
        if is_avif(bytes) {
            return identify_avif(bytes);
        }
        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| BackendError::Decode(format!("Failed to read dimensions: {}", e)))?;
        Ok(Dimensions { width, height })
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, BackendError> {
        if is_avif(bytes) {
            return decode_avif(bytes);
        }
        let format = guess_format(bytes)?;
        if !DECODABLE_FORMATS.contains(&format) || !format.reading_enabled() {
            return Err(BackendError::Decode(format!(
                "No decoder for {:?} input",
                format
            )));
        }
        image::load_from_memory_with_format(bytes, format)
            .map_err(|e| BackendError::Decode(format!("Failed to decode {:?}: {}", format, e)))
    }

    fn resize(
        &self,
        image: &DynamicImage,
        params: &ResizeParams,
    ) -> Result<DynamicImage, BackendError> {
        if params.width == 0 || params.height == 0 {
            return Err(BackendError::ProcessingFailed(format!(
                "Invalid target size {}x{}",
                params.width, params.height
            )));
        }
        let resized = if (image.width(), image.height()) == (params.width, params.height) {
            image.clone()
        } else {
            image.resize_exact(params.width, params.height, FilterType::Lanczos3)
        };

        Ok(match params.sharpening {
            Some(sharpening) => resized.unsharpen(sharpening.sigma, sharpening.threshold),
            None => resized,
        })
    }

    fn encode(
        &self,
        image: &DynamicImage,
        candidate: &EncodingCandidate,
    ) -> Result<Vec<u8>, BackendError> {
        let encoding = candidate.encoding;
        let format = match encoding {
            Encoding::Avif => ImageFormat::Avif,
            Encoding::WebP => ImageFormat::WebP,
            Encoding::Jpeg => ImageFormat::Jpeg,
            Encoding::Png => ImageFormat::Png,
        };
        if !format.writing_enabled() {
            return Err(BackendError::Unsupported(encoding));
        }

        let quality = candidate.quality.value() as u8;
        let mut out = Vec::new();
        match encoding {
            Encoding::Avif => {
                let encoder = AvifEncoder::new_with_speed_quality(&mut out, AVIF_SPEED, quality);
                to_8bit(image).write_with_encoder(encoder)
            }
            Encoding::WebP => {
                let encoder = WebPEncoder::new_lossless(&mut out);
                to_8bit(image).write_with_encoder(encoder)
            }
            Encoding::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut out, quality);
                opaque_for(encoding, image).write_with_encoder(encoder)
            }
            Encoding::Png => {
                let encoder = PngEncoder::new(&mut out);
                to_8bit(image).write_with_encoder(encoder)
            }
        }
        .map_err(|e| encode_failed(encoding, e))?;

        if out.is_empty() {
            return Err(BackendError::ProcessingFailed(format!(
                "{} encoder produced no output",
                encoding
            )));
        }
        Ok(out)
    }
}
