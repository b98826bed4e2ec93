// src/engine/pipeline.rs
//
// Pipeline operations: output dimension rules, resize, alpha flattening

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::ImageToolkitError;
use crate::ops::{Operation, OutputFormat};
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::{imageops::FilterType, DynamicImage, RgbImage, RgbaImage};
use tracing::{debug, instrument};

type PipelineResult<T> = std::result::Result<T, ImageToolkitError>;

/// Background used when an alpha channel has to be dropped.
pub const WHITE: [u8; 3] = [255, 255, 255];

#[derive(Debug)]
pub struct ResizeError {
    pub source_dims: (u32, u32),
    pub target_dims: (u32, u32),
    pub reason: String,
}

impl ResizeError {
    pub fn new(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_dims,
            target_dims,
            reason: reason.into(),
        }
    }

    pub fn into_toolkit_error(self) -> ImageToolkitError {
        ImageToolkitError::resize_failed(self.source_dims, self.target_dims, self.reason)
    }
}

/// Derive the missing side from the supplied one, keeping the source aspect ratio.
///
/// `supplied_src` is the source length along the supplied axis, `other_src` along
/// the derived axis. The result is rounded and never smaller than 1.
pub fn derive_dimensions(supplied: u32, supplied_src: u32, other_src: u32) -> u32 {
    if supplied_src == 0 {
        return other_src.max(1);
    }
    let derived = (supplied as f64 * other_src as f64 / supplied_src as f64).round();
    (derived.min(u32::MAX as f64) as u32).max(1)
}

/// Final output dimensions for an operation applied to a raster of `src` size.
pub fn resolve_output_dimensions(src: (u32, u32), operation: &Operation) -> PipelineResult<(u32, u32)> {
    let (src_w, src_h) = src;
    let Operation::Resize {
        width,
        height,
        maintain_aspect_ratio,
    } = *operation
    else {
        return Ok(src);
    };

    if width == Some(0) || height == Some(0) {
        return Err(ImageToolkitError::invalid_resize_dimensions(
            width,
            height,
            "dimensions must be positive",
        ));
    }

    let target = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) if maintain_aspect_ratio => (w, derive_dimensions(w, src_w, src_h)),
        (None, Some(h)) if maintain_aspect_ratio => (derive_dimensions(h, src_h, src_w), h),
        (None, None) => {
            return Err(ImageToolkitError::invalid_resize_dimensions(
                None,
                None,
                "at least one dimension is required",
            ))
        }
        _ => {
            return Err(ImageToolkitError::invalid_resize_dimensions(
                width,
                height,
                "both dimensions are required when the aspect ratio is not maintained",
            ))
        }
    };
    check_target_dimensions(target)?;
    Ok(target)
}

/// Output rasters obey the same limits as decoded input.
fn check_target_dimensions((width, height): (u32, u32)) -> PipelineResult<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ImageToolkitError::invalid_resize_dimensions(
            Some(width),
            Some(height),
            format!("output side exceeds the {MAX_DIMENSION} pixel limit"),
        ));
    }
    if width as u64 * height as u64 > MAX_PIXELS {
        return Err(ImageToolkitError::invalid_resize_dimensions(
            Some(width),
            Some(height),
            format!("output exceeds the {MAX_PIXELS} pixel limit"),
        ));
    }
    Ok(())
}

/// Composite an RGBA raster over an opaque background.
pub fn flatten_alpha(img: &RgbaImage, background: [u8; 3]) -> RgbImage {
    let (width, height) = img.dimensions();
    let mut out = Vec::with_capacity(width as usize * height as usize * 3);
    for px in img.pixels() {
        let [r, g, b, a] = px.0;
        let a = a as u32;
        for (c, bg) in [r, g, b].into_iter().zip(background) {
            out.push(((a * c as u32 + (255 - a) * bg as u32 + 127) / 255) as u8);
        }
    }
    // Buffer length matches width * height * 3 by construction
    RgbImage::from_raw(width, height, out).unwrap_or_else(|| RgbImage::new(width, height))
}

/// Draw the decoded raster at `target` size, ready for the encoder of `format`.
///
/// The result is always RGB8 or RGBA8. Transparency is composited onto white
/// when `format` cannot carry an alpha channel.
#[instrument(skip(img), fields(src_w = img.width(), src_h = img.height()))]
pub fn render(img: DynamicImage, target: (u32, u32), format: OutputFormat) -> PipelineResult<DynamicImage> {
    let normalized = match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => img,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };

    let resized = if (normalized.width(), normalized.height()) == target {
        normalized
    } else {
        fast_resize_owned(normalized, target.0, target.1).map_err(ResizeError::into_toolkit_error)?
    };

    let drawn = match resized {
        DynamicImage::ImageRgba8(rgba) if !format.supports_alpha() => {
            debug!(format = %format, "flattening alpha onto white");
            DynamicImage::ImageRgb8(flatten_alpha(&rgba, WHITE))
        }
        other => other,
    };
    Ok(drawn)
}

/// Fast resize with owned DynamicImage (zero-copy for RGB/RGBA)
/// Returns Ok(resized) on success, Err(resize_error) on failure
pub fn fast_resize_owned(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, ResizeError> {
    let src_width = img.width();
    let src_height = img.height();

    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Err(ResizeError::new(
            (src_width, src_height),
            (dst_width, dst_height),
            "invalid dimensions for resize",
        ));
    }

    let (pixel_type, src_pixels) = into_pixel_buffer(img);

    fast_resize_internal_impl(
        src_width,
        src_height,
        src_pixels,
        pixel_type,
        dst_width,
        dst_height,
        default_resize_options(),
    )
    .map_err(|reason| ResizeError::new((src_width, src_height), (dst_width, dst_height), reason))
}

/// Fast resize with reference; clones the pixel buffer.
pub fn fast_resize(
    img: &DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, ResizeError> {
    fast_resize_owned(img.clone(), dst_width, dst_height)
}

fn default_resize_options() -> ResizeOptions {
    ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
}

// Take ownership of the RGB/RGBA buffer; anything else goes through RGBA
fn into_pixel_buffer(img: DynamicImage) -> (PixelType, Vec<u8>) {
    match img {
        DynamicImage::ImageRgb8(rgb) => (PixelType::U8x3, rgb.into_raw()),
        DynamicImage::ImageRgba8(rgba) => (PixelType::U8x4, rgba.into_raw()),
        other => (PixelType::U8x4, other.to_rgba8().into_raw()),
    }
}

#[inline]
fn requires_premultiply(pixel_type: PixelType) -> bool {
    matches!(pixel_type, PixelType::U8x4)
}

fn fast_resize_internal_impl(
    src_width: u32,
    src_height: u32,
    mut src_pixels: Vec<u8>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    options: ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let pixel_count = (src_width as usize)
        .checked_mul(src_height as usize)
        .ok_or_else(|| "image dimensions overflow during resize".to_string())?;
    let required_bytes = pixel_count
        .checked_mul(pixel_type.size())
        .ok_or_else(|| "image buffer size overflow during resize".to_string())?;

    if src_pixels.len() < required_bytes {
        return Err(format!(
            "fir source image invalid buffer size. expected {required_bytes} bytes, got {} bytes",
            src_pixels.len()
        ));
    }

    let primary_result = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        src_pixels.as_mut_slice(),
        pixel_type,
    ) {
        Ok(src_image) => {
            resize_with_source_image(src_image, pixel_type, dst_width, dst_height, &options)
        }
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let aligned_image = copy_pixels_to_aligned_image(
                src_width,
                src_height,
                pixel_type,
                &src_pixels,
                required_bytes,
            )?;
            resize_with_source_image(aligned_image, pixel_type, dst_width, dst_height, &options)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    primary_result.or_else(|err| {
        debug!(%err, "fast_image_resize failed, falling back to image crate");
        resize_with_image_crate_fallback(
            &src_pixels,
            src_width,
            src_height,
            pixel_type,
            dst_width,
            dst_height,
        )
        .map_err(|fallback_err| format!("{err}; image crate fallback failed: {fallback_err}"))
    })
}

fn copy_pixels_to_aligned_image(
    width: u32,
    height: u32,
    pixel_type: PixelType,
    src_pixels: &[u8],
    required_bytes: usize,
) -> std::result::Result<fir::images::Image<'static>, String> {
    let mut aligned_image = fir::images::Image::new(width, height, pixel_type);
    let aligned_buffer = aligned_image.buffer_mut();
    if aligned_buffer.len() != required_bytes {
        return Err(format!(
            "fir alignment fallback buffer mismatch. expected {required_bytes} bytes, got {} bytes",
            aligned_buffer.len()
        ));
    }
    aligned_buffer.copy_from_slice(&src_pixels[..required_bytes]);
    Ok(aligned_image)
}

fn resize_with_image_crate_fallback(
    src_pixels: &[u8],
    src_width: u32,
    src_height: u32,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let filter = FilterType::Lanczos3;
    match pixel_type {
        PixelType::U8x3 => {
            let rgb = RgbImage::from_raw(src_width, src_height, src_pixels.to_vec())
                .ok_or_else(|| "failed to build rgb image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgb8(image::imageops::resize(
                &rgb, dst_width, dst_height, filter,
            )))
        }
        PixelType::U8x4 => {
            let rgba = RgbaImage::from_raw(src_width, src_height, src_pixels.to_vec())
                .ok_or_else(|| "failed to build rgba image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgba8(image::imageops::resize(
                &rgba, dst_width, dst_height, filter,
            )))
        }
        _ => Err("fallback resize supports only U8x3/U8x4 pixel types".to_string()),
    }
}

/// Scan alpha only on images of at least 1MP; below that premultiply is cheaper than the scan.
fn is_fully_opaque(image: &fir::images::Image, pixel_type: PixelType, width: u32, height: u32) -> bool {
    if pixel_type != PixelType::U8x4 {
        return true;
    }

    const THRESHOLD_PIXELS: u64 = 1_000_000;
    if (width as u64).saturating_mul(height as u64) < THRESHOLD_PIXELS {
        return false;
    }

    image.buffer().iter().skip(3).step_by(4).all(|&alpha| alpha == 255)
}

fn resize_with_source_image(
    mut src_image: fir::images::Image<'_>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    options: &ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, pixel_type);

    let src_width = src_image.width();
    let src_height = src_image.height();
    let needs_premultiply = requires_premultiply(pixel_type)
        && !is_fully_opaque(&src_image, pixel_type, src_width, src_height);

    let mul_div = MulDiv::default();
    if needs_premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src_image)
            .map_err(|e| format!("failed to premultiply alpha: {e}"))?;
    }

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, options)
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    if needs_premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst_image)
            .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;
    }

    let dst_pixels = dst_image.into_vec();
    match pixel_type {
        PixelType::U8x3 => {
            let rgb_image = RgbImage::from_raw(dst_width, dst_height, dst_pixels)
                .ok_or("failed to create rgb image from resized data")?;
            Ok(DynamicImage::ImageRgb8(rgb_image))
        }
        PixelType::U8x4 => {
            let rgba_image = RgbaImage::from_raw(dst_width, dst_height, dst_pixels)
                .ok_or("failed to create rgba image from resized data")?;
            Ok(DynamicImage::ImageRgba8(rgba_image))
        }
        _ => Err("unsupported pixel type after resize".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use image::{GenericImageView, LumaA, Rgba};

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn create_test_image_rgba(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        }))
    }

    fn resize_op(width: Option<u32>, height: Option<u32>, maintain: bool) -> Operation {
        Operation::Resize {
            width,
            height,
            maintain_aspect_ratio: maintain,
        }
    }

    mod dimension_tests {
        use super::*;

        #[test]
        fn test_width_only_maintains_aspect_ratio() {
            let dims = resolve_output_dimensions((400, 300), &resize_op(Some(200), None, true));
            assert_eq!(dims.unwrap(), (200, 150));
        }

        #[test]
        fn test_height_only_maintains_aspect_ratio() {
            let dims = resolve_output_dimensions((1000, 500), &resize_op(None, Some(250), true));
            assert_eq!(dims.unwrap(), (500, 250));
        }

        #[test]
        fn test_rounding_behavior() {
            // 51 * 50 / 101 = 25.24
            assert_eq!(derive_dimensions(50, 101, 51), 25);
            // 3 * 5 / 2 = 7.5
            assert_eq!(derive_dimensions(3, 2, 5), 8);
        }

        #[test]
        fn test_derived_dimension_never_zero() {
            let dims = resolve_output_dimensions((1000, 1), &resize_op(Some(10), None, true));
            assert_eq!(dims.unwrap(), (10, 1));
        }

        #[test]
        fn test_both_dimensions_used_verbatim() {
            for maintain in [true, false] {
                let dims =
                    resolve_output_dimensions((1000, 800), &resize_op(Some(300), Some(300), maintain));
                assert_eq!(dims.unwrap(), (300, 300));
            }
        }

        #[test]
        fn test_single_dimension_without_aspect_ratio_is_rejected() {
            let err = resolve_output_dimensions((100, 100), &resize_op(Some(50), None, false))
                .unwrap_err();
            assert_eq!(err.category(), ErrorCategory::InvalidRequest);
        }

        #[test]
        fn test_missing_or_zero_dimensions_rejected() {
            for op in [
                resize_op(None, None, true),
                resize_op(Some(0), None, true),
                resize_op(Some(10), Some(0), false),
            ] {
                let err = resolve_output_dimensions((100, 100), &op).unwrap_err();
                assert_eq!(err.category(), ErrorCategory::InvalidRequest, "{op:?}");
            }
        }

        #[test]
        fn test_oversized_targets_rejected() {
            for op in [
                resize_op(Some(u32::MAX), Some(u32::MAX), false),
                resize_op(Some(MAX_DIMENSION + 1), Some(1), false),
                resize_op(Some(20_000), Some(20_000), false),
            ] {
                let err = resolve_output_dimensions((2, 2), &op).unwrap_err();
                assert_eq!(err.category(), ErrorCategory::InvalidRequest, "{op:?}");
            }
        }

        #[test]
        fn test_oversized_derived_side_rejected() {
            // 1x8 source at width 30000 derives a height of 240000
            let err = resolve_output_dimensions((1, 8), &resize_op(Some(30_000), None, true))
                .unwrap_err();
            assert!(matches!(
                err,
                ImageToolkitError::InvalidResizeDimensions {
                    width: Some(30_000),
                    height: Some(240_000),
                    ..
                }
            ));
        }

        #[test]
        fn test_target_at_limit_accepted() {
            let dims =
                resolve_output_dimensions((100, 1), &resize_op(Some(MAX_DIMENSION), None, true));
            assert_eq!(dims.unwrap(), (MAX_DIMENSION, 328));
        }

        #[test]
        fn test_convert_and_optimize_keep_source_size() {
            assert_eq!(
                resolve_output_dimensions((640, 480), &Operation::Convert).unwrap(),
                (640, 480)
            );
            assert_eq!(
                resolve_output_dimensions((640, 480), &Operation::Optimize).unwrap(),
                (640, 480)
            );
        }
    }

    mod flatten_tests {
        use super::*;

        #[test]
        fn test_transparent_pixels_become_white() {
            let rgba = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
            let flat = flatten_alpha(&rgba, WHITE);
            assert!(flat.pixels().all(|p| p.0 == [255, 255, 255]));
        }

        #[test]
        fn test_opaque_pixels_unchanged() {
            let rgba = RgbaImage::from_pixel(1, 1, Rgba([12, 34, 56, 255]));
            assert_eq!(flatten_alpha(&rgba, WHITE).get_pixel(0, 0).0, [12, 34, 56]);
        }

        #[test]
        fn test_half_transparent_blends() {
            let rgba = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
            let px = flatten_alpha(&rgba, WHITE).get_pixel(0, 0).0;
            assert_eq!(px, [127, 127, 127]);
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn test_render_jpeg_drops_alpha() {
            let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
            let out = render(img, (4, 4), OutputFormat::Jpeg).unwrap();
            assert!(!out.color().has_alpha());
            assert_eq!(out.to_rgb8().get_pixel(1, 1).0, [255, 255, 255]);
        }

        #[test]
        fn test_render_png_and_webp_keep_alpha() {
            for format in [OutputFormat::Png, OutputFormat::WebP] {
                let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
                let out = render(img, (4, 4), format).unwrap();
                assert!(out.color().has_alpha(), "{format}");
            }
        }

        #[test]
        fn test_render_resizes() {
            let out = render(create_test_image(400, 300), (200, 150), OutputFormat::Png).unwrap();
            assert_eq!(out.dimensions(), (200, 150));
        }

        #[test]
        fn test_render_normalizes_luma_alpha() {
            let img = DynamicImage::ImageLumaA8(image::ImageBuffer::from_pixel(2, 2, LumaA([10, 0])));
            let out = render(img, (2, 2), OutputFormat::WebP).unwrap();
            assert!(matches!(out, DynamicImage::ImageRgba8(_)));
        }
    }

    mod fast_resize_tests {
        use super::*;

        #[test]
        fn test_fast_resize_downscale() {
            let resized = fast_resize(&create_test_image(200, 200), 100, 100).unwrap();
            assert_eq!(resized.dimensions(), (100, 100));
        }

        #[test]
        fn test_fast_resize_upscale() {
            let resized = fast_resize(&create_test_image(50, 50), 100, 100).unwrap();
            assert_eq!(resized.dimensions(), (100, 100));
        }

        #[test]
        fn test_fast_resize_aspect_ratio_change() {
            let resized = fast_resize(&create_test_image(200, 100), 100, 200).unwrap();
            assert_eq!(resized.dimensions(), (100, 200));
        }

        #[test]
        fn test_fast_resize_invalid_dimensions() {
            assert!(fast_resize(&create_test_image(100, 100), 0, 100).is_err());
        }

        #[test]
        fn test_fast_resize_rgba() {
            let resized = fast_resize_owned(create_test_image_rgba(100, 100), 50, 50).unwrap();
            assert_eq!(resized.dimensions(), (50, 50));
            assert!(resized.color().has_alpha());
        }

        #[test]
        fn test_requires_premultiply_only_for_rgba() {
            assert!(requires_premultiply(PixelType::U8x4));
            assert!(!requires_premultiply(PixelType::U8x3));
        }

        #[test]
        fn test_fast_resize_rgba_respects_transparency_when_downscaling() {
            // Opaque red next to transparent blue: premultiply keeps blue from bleeding in.
            let mut img = RgbaImage::new(2, 1);
            img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
            img.put_pixel(1, 0, Rgba([0, 0, 255, 0]));

            let resized = fast_resize_owned(DynamicImage::ImageRgba8(img), 1, 1).unwrap();
            let pixel = *resized.to_rgba8().get_pixel(0, 0);
            assert!(pixel[0] > 200, "red channel should dominate, got {}", pixel[0]);
            assert!(pixel[2] < 30, "blue channel should be minimal, got {}", pixel[2]);
            assert!(pixel[3] > 100, "alpha should remain non-zero, got {}", pixel[3]);
        }

        #[test]
        fn test_is_fully_opaque_skips_small_image_scan() {
            let (width, height) = (512, 512);
            let mut pixels = vec![255u8; (width * height * 4) as usize];
            let image =
                fir::images::Image::from_slice_u8(width, height, pixels.as_mut_slice(), PixelType::U8x4)
                    .expect("valid RGBA image");
            assert!(!is_fully_opaque(&image, PixelType::U8x4, width, height));
        }

        #[test]
        fn test_is_fully_opaque_scans_large_image() {
            let (width, height) = (1000, 1000);
            let mut pixels = vec![255u8; (width * height * 4) as usize];
            let image =
                fir::images::Image::from_slice_u8(width, height, pixels.as_mut_slice(), PixelType::U8x4)
                    .expect("valid RGBA image");
            assert!(is_fully_opaque(&image, PixelType::U8x4, width, height));
        }
    }

    #[test]
    fn test_copy_pixels_to_aligned_image_preserves_data() {
        let src_pixels: Vec<u8> = (0..16u8).collect();
        let image = copy_pixels_to_aligned_image(2, 2, PixelType::U8x4, &src_pixels, src_pixels.len())
            .expect("should copy into aligned buffer");
        assert_eq!(image.buffer(), src_pixels.as_slice());
    }

    #[test]
    fn test_fast_resize_internal_impl_errors_on_short_buffer() {
        let res = fast_resize_internal_impl(
            4,
            4,
            vec![0u8; 10],
            PixelType::U8x3,
            2,
            2,
            default_resize_options(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_fast_resize_uses_rayon_pool() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .expect("failed to build test pool");

        pool.install(|| {
            let result = fast_resize_owned(create_test_image_rgba(256, 256), 64, 64);
            let img = result.expect("resize failed inside rayon pool");
            assert_eq!(img.dimensions(), (64, 64));
        });
    }
}
