// src/engine/api.rs
//
// The transform entrypoint: decode -> orient -> size -> render -> encode -> name.
// Every page calls this with a fully built request.

use crate::engine::common::EngineResult;
use crate::engine::decoder::{apply_orientation, decode_image, detect_exif_orientation};
use crate::engine::encoder::encode;
use crate::engine::io::{output_filename, OutputImage, SourceImage};
use crate::engine::pipeline::{render, resolve_output_dimensions};
use crate::engine::tasks::CancelToken;
use crate::ops::{OutputFormat, TransformRequest};
use image::ImageFormat;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Timing and size figures for one transform.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformMetrics {
    pub decode_ms: f64,
    pub ops_ms: f64,
    pub encode_ms: f64,
    pub total_ms: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// bytes_out / bytes_in, 0 when the input is empty
    pub compression_ratio: f64,
    pub format_in: Option<OutputFormat>,
    pub format_out: Option<OutputFormat>,
}

/// Measures decode -> process -> encode in milliseconds.
struct MetricsRecorder {
    metrics: TransformMetrics,
    start_total: Instant,
    stage_start: Instant,
}

impl MetricsRecorder {
    fn new(input_size: u64) -> Self {
        let now = Instant::now();
        Self {
            metrics: TransformMetrics {
                bytes_in: input_size,
                ..TransformMetrics::default()
            },
            start_total: now,
            stage_start: now,
        }
    }

    fn lap(&mut self) -> f64 {
        let ms = self.stage_start.elapsed().as_secs_f64() * 1000.0;
        self.stage_start = Instant::now();
        ms
    }

    fn mark_decode_done(&mut self, format_in: Option<OutputFormat>) {
        self.metrics.decode_ms = self.lap();
        self.metrics.format_in = format_in;
    }

    fn mark_process_done(&mut self) {
        self.metrics.ops_ms = self.lap();
    }

    fn finalize(mut self, format_out: OutputFormat, output_len: usize) -> TransformMetrics {
        self.metrics.encode_ms = self.lap();
        self.metrics.total_ms = self.start_total.elapsed().as_secs_f64() * 1000.0;
        self.metrics.bytes_out = output_len as u64;
        self.metrics.compression_ratio = if self.metrics.bytes_in > 0 {
            self.metrics.bytes_out as f64 / self.metrics.bytes_in as f64
        } else {
            0.0
        };
        self.metrics.format_out = Some(format_out);
        self.metrics
    }
}

/// Run one transform to completion on the calling thread.
///
/// ```no_run
/// use image_toolkit::{transform, OutputFormat, SourceImage, TransformRequest};
///
/// let bytes = std::fs::read("photo.png").unwrap();
/// let source = SourceImage::new(bytes, "image/png", "photo.png");
/// let out = transform(&source, &TransformRequest::convert(OutputFormat::Jpeg)).unwrap();
/// assert_eq!(out.filename(), "photo.jpg");
/// ```
pub fn transform(source: &SourceImage, request: &TransformRequest) -> EngineResult<OutputImage> {
    transform_checked(source, request, &CancelToken::new())
}

/// Same as [`transform`], but gives up between stages once `cancel` is set.
#[instrument(
    skip_all,
    fields(
        operation = request.operation.name(),
        format = %request.format,
        filename = source.filename(),
        bytes = source.len()
    )
)]
pub(crate) fn transform_checked(
    source: &SourceImage,
    request: &TransformRequest,
    cancel: &CancelToken,
) -> EngineResult<OutputImage> {
    request.validate()?;
    let mut recorder = MetricsRecorder::new(source.len() as u64);
    let bytes = source.bytes();

    // 1. Decode and orient
    let (decoded, detected) = decode_image(bytes)?;
    let decoded = match detected {
        ImageFormat::Jpeg => match detect_exif_orientation(bytes) {
            Some(orientation) if orientation != 1 => {
                debug!(orientation, "applying EXIF orientation");
                apply_orientation(decoded, orientation)
            }
            _ => decoded,
        },
        _ => decoded,
    };
    recorder.mark_decode_done(OutputFormat::from_image_format(detected));
    cancel.check("decode")?;

    // 2. Size and draw
    let source_dims = (decoded.width(), decoded.height());
    let target_dims = resolve_output_dimensions(source_dims, &request.operation)?;
    let rendered = render(decoded, target_dims, request.format)?;
    recorder.mark_process_done();
    cancel.check("render")?;

    // 3. Encode
    let encoded = encode(&rendered, request.format, request.quality)?;
    cancel.check("encode")?;

    let metrics = recorder.finalize(request.format, encoded.len());
    let filename = output_filename(request.base_name.as_deref(), source, request.format);
    info!(
        filename = %filename,
        width = target_dims.0,
        height = target_dims.1,
        bytes_out = metrics.bytes_out,
        total_ms = metrics.total_ms,
        "transform complete"
    );
    Ok(OutputImage::new(
        encoded,
        request.format,
        filename,
        target_dims,
        metrics,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, ImageToolkitError};
    use image::{DynamicImage, GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_source(width: u32, height: u32, name: &str) -> SourceImage {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([x as u8, y as u8, 90])
        }));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        SourceImage::new(buf, "image/png", name)
    }

    #[test]
    fn transform_converts_and_names_output() {
        let out = transform(&png_source(20, 10, "pic.png"), &TransformRequest::convert(OutputFormat::WebP))
            .unwrap();
        assert_eq!(out.filename(), "pic.webp");
        assert_eq!(out.dimensions(), (20, 10));
        assert_eq!(out.mime_type(), "image/webp");
        let metrics = out.metrics();
        assert_eq!(metrics.format_in, Some(OutputFormat::Png));
        assert_eq!(metrics.format_out, Some(OutputFormat::WebP));
        assert_eq!(metrics.bytes_out, out.len() as u64);
        assert!(metrics.total_ms >= metrics.decode_ms);
    }

    #[test]
    fn transform_resizes_with_aspect_ratio() {
        let request = TransformRequest::resize(OutputFormat::Png, Some(10), None, true);
        let out = transform(&png_source(40, 30, "big.png"), &request).unwrap();
        assert_eq!(out.dimensions(), (10, 8));
        let decoded = image::load_from_memory(out.bytes()).unwrap();
        assert_eq!(decoded.dimensions(), (10, 8));
    }

    #[test]
    fn transform_flattens_transparency_for_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        let source = SourceImage::new(buf, "image/png", "clear.png");

        let out = transform(&source, &TransformRequest::convert(OutputFormat::Jpeg)).unwrap();
        let decoded = image::load_from_memory(out.bytes()).unwrap().to_rgb8();
        assert!(decoded.pixels().all(|p| p.0.iter().all(|&c| c >= 250)));
    }

    #[test]
    fn transform_rejects_invalid_request_before_decoding() {
        let source = SourceImage::new(b"garbage".to_vec(), "image/png", "x.png");
        let err = transform(&source, &TransformRequest::convert(OutputFormat::Png).with_quality(2.0))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidRequest);
    }

    #[test]
    fn transform_reports_decode_errors() {
        let source = SourceImage::new(b"garbage".to_vec(), "image/png", "x.png");
        let err = transform(&source, &TransformRequest::convert(OutputFormat::Png)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::DecodeError);
    }

    #[test]
    fn cancelled_transform_returns_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let err = transform_checked(
            &png_source(4, 4, "a.png"),
            &TransformRequest::convert(OutputFormat::Png),
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, ImageToolkitError::Cancelled { .. }));
    }
}
