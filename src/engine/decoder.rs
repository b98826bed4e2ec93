// src/engine/decoder.rs
//
// Decoder operations: JPEG (mozjpeg), PNG (zune-png), WebP (libwebp)

use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::ImageToolkitError;
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use mozjpeg::Decompress;
use std::io::Cursor;
use tracing::{debug, instrument};
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_core::result::DecodingResult;
use zune_png::PngDecoder;

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(ImageToolkitError::decode_failed(
                "mozjpeg: missing JPEG EOI marker",
            ));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            ImageToolkitError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;

        let mut decompress = decompress.rgb().map_err(|e| {
            ImageToolkitError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
        })?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_DIMENSION as usize || height > MAX_DIMENSION as usize {
            return Err(ImageToolkitError::dimension_exceeds_limit(
                width.max(height).min(u32::MAX as usize) as u32,
                MAX_DIMENSION,
            ));
        }
        let width_u32 = width as u32;
        let height_u32 = height as u32;
        check_dimensions(width_u32, height_u32)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            ImageToolkitError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat_pixels: Vec<u8> = pixels.into_iter().flatten().collect();

        let rgb_image =
            RgbImage::from_raw(width_u32, height_u32, flat_pixels).ok_or_else(|| {
                ImageToolkitError::decode_failed("mozjpeg: truncated scanline data")
            })?;

        Ok(DynamicImage::ImageRgb8(rgb_image))
    })
}

/// Decode using the image crate under the global panic policy.
/// Only used for inputs the dedicated decoders cannot handle (animated WebP).
pub fn decode_with_image_crate(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory(data)
            .map_err(|e| ImageToolkitError::decode_failed(format!("decode failed: {e}")))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
/// The IHDR size is checked before any pixel buffer is allocated.
pub fn decode_png_zune(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        // Size limits are enforced by check_dimensions, not zune's 16384 default
        let options = DecoderOptions::default()
            .png_set_strip_to_8bit(true)
            .set_max_width(u32::MAX as usize)
            .set_max_height(u32::MAX as usize);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        decoder
            .decode_headers()
            .map_err(|e| ImageToolkitError::decode_failed(format!("png: bad header: {e}")))?;

        let (width, height) = decoder
            .dimensions()
            .ok_or_else(|| ImageToolkitError::decode_failed("png: missing IHDR"))?;
        let width = u32::try_from(width).unwrap_or(u32::MAX);
        let height = u32::try_from(height).unwrap_or(u32::MAX);
        check_dimensions(width, height)?;

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| ImageToolkitError::decode_failed("png: missing colorspace"))?;

        let buf = match decoder
            .decode()
            .map_err(|e| ImageToolkitError::decode_failed(format!("png: {e}")))?
        {
            DecodingResult::U8(v) => v,
            _ => return Err(ImageToolkitError::decode_failed("png: expected 8-bit samples")),
        };

        let img = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8),
            ColorSpace::RGBA => {
                RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
            }
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8),
            ColorSpace::LumaA => {
                GrayAlphaImage::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
            }
            other => {
                return Err(ImageToolkitError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };
        img.ok_or_else(|| ImageToolkitError::decode_failed("png: truncated pixel data"))
    })
}

/// Decode WebP using libwebp (via webp crate). Falls back to image crate for animated WebP,
/// which yields the first frame.
pub fn decode_webp_libwebp(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        // Parse header first to avoid allocating huge buffers on malformed files
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            ImageToolkitError::decode_failed("webp: failed to read bitstream features")
        })?;

        let width = features.width();
        let height = features.height();
        check_dimensions(width, height)?;

        if features.has_animation() {
            return image::load_from_memory_with_format(data, ImageFormat::WebP).map_err(|e| {
                ImageToolkitError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| ImageToolkitError::decode_failed("webp: decode failed"))?;

        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Unified decode entrypoint:
/// - Detect format once (magic bytes; the declared MIME type is not trusted)
/// - Route each supported format to its dedicated decoder
/// - Reject everything else
///
/// Returns the decoded image and detected format.
#[instrument(skip_all, fields(bytes = bytes.len()))]
pub fn decode_image(bytes: &[u8]) -> EngineResult<(DynamicImage, ImageFormat)> {
    let detected = detect_format(bytes);
    let (img, format) = match detected {
        Some(ImageFormat::Jpeg) => (decode_jpeg_mozjpeg(bytes)?, ImageFormat::Jpeg),
        Some(ImageFormat::Png) => (decode_png_zune(bytes)?, ImageFormat::Png),
        Some(ImageFormat::WebP) => (decode_webp_libwebp(bytes)?, ImageFormat::WebP),
        Some(other) => {
            return Err(ImageToolkitError::unsupported_format(
                other.to_mime_type().to_string(),
            ))
        }
        None if bytes.is_empty() => {
            return Err(ImageToolkitError::decode_failed("input is empty"));
        }
        None => return Err(ImageToolkitError::unsupported_format("unknown")),
    };
    debug!(
        format = ?format,
        width = img.width(),
        height = img.height(),
        color = ?img.color(),
        "decoded"
    );
    Ok((img, format))
}

/// Check if image dimensions are within safe limits.
/// Returns an error if the image is too large (potential decompression bomb).
pub fn check_dimensions(width: u32, height: u32) -> EngineResult<()> {
    if width == 0 || height == 0 {
        return Err(ImageToolkitError::corrupted_image());
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ImageToolkitError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(ImageToolkitError::pixel_count_exceeds_limit(
            pixels, MAX_PIXELS,
        ));
    }
    Ok(())
}

/// Extract EXIF Orientation tag (1-8). Returns None if missing or invalid.
pub fn detect_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    // exif crate can represent as Short/Long; use get_uint for safety
    let value = field.value.get_uint(0)?;
    let orientation = u16::try_from(value).ok()?;
    (1..=8).contains(&orientation).then_some(orientation)
}

/// Rotate/flip a decoded raster so it displays upright for the given EXIF orientation.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(), // transpose
        6 => img.rotate90(),
        7 => img.rotate270().fliph(), // transverse
        8 => img.rotate270(),
        _ => img,
    }
}
