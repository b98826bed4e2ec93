// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg), PNG (image + oxipng), WebP (libwebp)

use crate::engine::common::run_with_panic_policy;
use crate::engine::MAX_DIMENSION;
use crate::error::ImageToolkitError;
use crate::ops::OutputFormat;
use image::{DynamicImage, ImageFormat};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;
use std::io::Cursor;
use tracing::{debug, instrument};

type EncoderResult<T> = std::result::Result<T, ImageToolkitError>;

/// libwebp effort level (0 fastest, 6 smallest).
const WEBP_METHOD: i32 = 4;

/// Encoder settings derived from a 0-1 quality factor.
///
/// Bands for WebP tuning:
/// - High (>=85)
/// - Balanced (70-84)
/// - Fast (50-69)
/// - Fastest (<50)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySettings {
    quality: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityBand {
    High,
    Balanced,
    Fast,
    Fastest,
}

impl QualitySettings {
    /// From a 0-1 factor. The percent value is rounded and clamped to 1..=100.
    pub fn from_factor(factor: f32) -> Self {
        let factor = if factor.is_finite() { factor } else { 1.0 };
        let percent = (factor * 100.0).round().clamp(1.0, 100.0);
        Self { quality: percent }
    }

    pub fn percent(&self) -> u8 {
        self.quality as u8
    }

    fn band(&self) -> QualityBand {
        if self.quality >= 85.0 {
            QualityBand::High
        } else if self.quality >= 70.0 {
            QualityBand::Balanced
        } else if self.quality >= 50.0 {
            QualityBand::Fast
        } else {
            QualityBand::Fastest
        }
    }

    pub fn jpeg_smoothing(&self) -> u8 {
        match self.band() {
            QualityBand::High => 0,
            QualityBand::Balanced => 5,
            QualityBand::Fast => 10,
            QualityBand::Fastest => 18,
        }
    }

    pub fn webp_sns_strength(&self) -> i32 {
        match self.band() {
            QualityBand::High => 50,
            QualityBand::Balanced => 70,
            QualityBand::Fast | QualityBand::Fastest => 80,
        }
    }

    pub fn webp_filter_strength(&self) -> i32 {
        if self.quality >= 80.0 {
            20
        } else if self.quality >= 60.0 {
            30
        } else {
            40
        }
    }

    pub fn webp_filter_sharpness(&self) -> i32 {
        match self.band() {
            QualityBand::High => 2,
            QualityBand::Balanced | QualityBand::Fast | QualityBand::Fastest => 0,
        }
    }
}

/// Encode a rendered raster. `quality` is the 0-1 factor; PNG ignores it.
#[instrument(skip(img), fields(width = img.width(), height = img.height()))]
pub fn encode(img: &DynamicImage, format: OutputFormat, quality: f32) -> EncoderResult<Vec<u8>> {
    let settings = QualitySettings::from_factor(quality);
    let bytes = match format {
        OutputFormat::Jpeg => encode_jpeg(img, settings)?,
        OutputFormat::Png => encode_png(img)?,
        OutputFormat::WebP => encode_webp(img, settings)?,
    };
    if bytes.is_empty() {
        return Err(ImageToolkitError::empty_output(format.as_str()));
    }
    debug!(bytes = bytes.len(), quality = settings.percent(), "encoded");
    Ok(bytes)
}

/// Encode to progressive JPEG using mozjpeg. Alpha, if any, is discarded.
pub fn encode_jpeg(img: &DynamicImage, settings: QualitySettings) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let rgb: Cow<'_, image::RgbImage> = match img {
            DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
            _ => Cow::Owned(img.to_rgb8()),
        };
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        if w == 0 || h == 0 {
            return Err(ImageToolkitError::encode_failed(
                "jpeg",
                "width or height is zero",
            ));
        }
        if w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(ImageToolkitError::dimension_exceeds_limit(
                w.max(h),
                MAX_DIMENSION,
            ));
        }
        let expected_len = (w as usize) * (h as usize) * 3;
        if pixels.len() != expected_len {
            return Err(ImageToolkitError::corrupted_image());
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.percent() as f32);
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.jpeg_smoothing());

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);

        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                ImageToolkitError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;

            let stride = w as usize * 3;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    ImageToolkitError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                ImageToolkitError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }

        Ok(output)
    })
}

/// Encode to PNG with the image crate, then recompress losslessly with oxipng.
pub fn encode_png(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| ImageToolkitError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(2);
        options.strip = oxipng::StripChunks::Safe;

        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            ImageToolkitError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Encode to lossy WebP. RGBA input keeps its alpha channel.
pub fn encode_webp(img: &DynamicImage, settings: QualitySettings) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let mut config = webp::WebPConfig::new()
            .map_err(|_| ImageToolkitError::internal_panic("failed to create WebPConfig"))?;

        config.lossless = 0;
        config.quality = settings.percent() as f32;
        config.method = WEBP_METHOD;
        config.pass = 1;
        config.preprocessing = 0;
        config.sns_strength = settings.webp_sns_strength();
        config.autofilter = 1;
        config.filter_strength = settings.webp_filter_strength();
        config.filter_sharpness = settings.webp_filter_sharpness();

        let encoded = if img.color().has_alpha() {
            let rgba: Cow<'_, image::RgbaImage> = match img {
                DynamicImage::ImageRgba8(rgba_img) => Cow::Borrowed(rgba_img),
                _ => Cow::Owned(img.to_rgba8()),
            };
            let (w, h) = rgba.dimensions();
            webp::Encoder::from_rgba(&rgba, w, h)
                .encode_advanced(&config)
                .map(|mem| mem.to_vec())
        } else {
            let rgb: Cow<'_, image::RgbImage> = match img {
                DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
                _ => Cow::Owned(img.to_rgb8()),
            };
            let (w, h) = rgb.dimensions();
            webp::Encoder::from_rgb(&rgb, w, h)
                .encode_advanced(&config)
                .map(|mem| mem.to_vec())
        };

        encoded.map_err(|e| {
            ImageToolkitError::encode_failed("webp", format!("WebP encode failed: {e:?}"))
        })
    })
}
