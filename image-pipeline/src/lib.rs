//! Upload validation and normalization.
//!
//! Every accepted upload is decoded once, bounded to [`MAX_DIMENSION`] on
//! its larger side, and re-encoded deterministically, so the same source
//! bytes always produce the same stored bytes.

use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageFormat, RgbaImage};

use deck_error::{DeckError, Result};

/// Largest accepted upload, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// The larger dimension of a normalized bitmap never exceeds this.
pub const MAX_DIMENSION: u32 = 1024;

/// Fixed quality of the deterministic JPEG re-encode.
pub const JPEG_QUALITY: u8 = 90;

/// A normalized upload: bounded geometry, the deterministic re-encode,
/// and the decoded bitmap it was produced from.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f32,
    pub encoded: Vec<u8>,
    pub bitmap: RgbaImage,
}

/// Checks the upload contract without decoding anything.
///
/// The container format is sniffed from the bytes themselves; a
/// caller-supplied MIME string is never trusted. Only the header is
/// inspected, so an invalid file is rejected before any decode work.
pub fn validate_upload(bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(DeckError::Validation(format!(
            "upload is {} bytes, limit is {}",
            bytes.len(),
            MAX_UPLOAD_BYTES
        )));
    }

    let format = image::guess_format(bytes).map_err(|_| {
        DeckError::Validation("unrecognized image container".to_owned())
    })?;
    match format {
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP => Ok(()),
        other => Err(DeckError::Validation(format!(
            "unsupported image format {:?}, expected JPEG, PNG or WebP",
            other
        ))),
    }
}

/// Decodes and normalizes an upload.
///
/// Downscales so the larger dimension fits [`MAX_DIMENSION`] while
/// preserving aspect ratio; images already within bounds are never
/// upscaled. The JPEG re-encode drops any alpha channel.
pub fn normalize(bytes: &[u8]) -> Result<NormalizedImage> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| DeckError::Decode(err.to_string()))?;

    let (source_width, source_height) = (decoded.width(), decoded.height());
    let decoded = if source_width > MAX_DIMENSION || source_height > MAX_DIMENSION
    {
        decoded.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Triangle)
    } else {
        decoded
    };

    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY);
    encoder
        .encode_image(&decoded.to_rgb8())
        .map_err(|err| DeckError::Decode(format!("re-encode failed: {}", err)))?;

    let bitmap = decoded.to_rgba8();
    let (width, height) = (bitmap.width(), bitmap.height());

    log::debug!(
        "normalized {}x{} upload to {}x{} ({} encoded bytes)",
        source_width,
        source_height,
        width,
        height,
        encoded.len()
    );

    Ok(NormalizedImage {
        width,
        height,
        aspect_ratio: width as f32 / height as f32,
        encoded,
        bitmap,
    })
}

/// Validates then normalizes an upload.
pub fn process(bytes: &[u8]) -> Result<NormalizedImage> {
    validate_upload(bytes)?;
    normalize(bytes)
}

/// Reads a file and runs it through [`process`].
pub fn process_path<P: AsRef<Path>>(path: P) -> Result<NormalizedImage> {
    let bytes = std::fs::read(path.as_ref())?;
    process(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let bitmap = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 96])
        });
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(bitmap)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    #[test]
    fn accepts_supported_formats() {
        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            assert!(validate_upload(&encode(32, 32, format)).is_ok());
        }
    }

    #[test]
    fn rejects_oversize_uploads_before_sniffing() {
        let bytes = vec![0u8; MAX_UPLOAD_BYTES + 1];
        assert!(matches!(
            validate_upload(&bytes),
            Err(DeckError::Validation(_))
        ));
    }

    #[test]
    fn rejects_unrecognized_bytes() {
        assert!(matches!(
            validate_upload(b"not an image at all"),
            Err(DeckError::Validation(_))
        ));
    }

    #[test]
    fn rejects_disallowed_container() {
        let bytes = encode(16, 16, ImageFormat::Bmp);
        assert!(matches!(
            validate_upload(&bytes),
            Err(DeckError::Validation(_))
        ));
    }

    #[test]
    fn bounds_large_images_and_keeps_aspect() {
        let bytes = encode(2000, 3500, ImageFormat::Jpeg);
        assert!(bytes.len() <= MAX_UPLOAD_BYTES);

        let normalized = process(&bytes).unwrap();
        assert_eq!(normalized.height, MAX_DIMENSION);
        assert!(normalized.width <= MAX_DIMENSION);

        let source_ratio = 2000.0 / 3500.0;
        assert!((normalized.aspect_ratio - source_ratio).abs() < 0.01);
    }

    #[test]
    fn never_upscales_small_images() {
        let normalized = process(&encode(100, 200, ImageFormat::Png)).unwrap();
        assert_eq!((normalized.width, normalized.height), (100, 200));
    }

    #[test]
    fn encoded_output_round_trips_to_same_geometry() {
        let normalized = process(&encode(1500, 600, ImageFormat::Png)).unwrap();
        let reloaded = image::load_from_memory(&normalized.encoded).unwrap();
        assert_eq!(
            (reloaded.width(), reloaded.height()),
            (normalized.width, normalized.height)
        );
    }

    #[test]
    fn re_encode_is_deterministic() {
        let bytes = encode(640, 480, ImageFormat::Png);
        let first = process(&bytes).unwrap();
        let second = process(&bytes).unwrap();
        assert_eq!(first.encoded, second.encoded);
    }

    #[test]
    fn corrupt_input_is_a_decode_error() {
        let mut bytes = encode(64, 64, ImageFormat::Png);
        bytes.truncate(32);
        assert!(matches!(normalize(&bytes), Err(DeckError::Decode(_))));
    }
}
