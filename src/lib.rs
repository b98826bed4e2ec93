// lib.rs
//
// image-toolkit: convert, resize and optimize JPEG, PNG and WebP images.
//
// Every page of the toolkit is a thin configuration over one pipeline:
// - Intake: 5 MiB cap, JPEG/PNG/WebP only, first file of a selection
// - Transform: decode, size, draw (white behind transparency when needed), encode
// - Session: latest invocation wins, one live output at a time

// jemalloc is not supported on Windows/MSVC
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod engine;
pub mod error;
pub mod ops;

use image::ImageReader;
use std::io::Cursor;

pub use engine::{
    transform, CancelToken, Completion, IntakePolicy, OutputImage, PendingTransform, Session,
    SessionState, SourceImage, Ticket, TransformMetrics,
};
pub use error::{ErrorCategory, ImageToolkitError, INTAKE_REJECTED_MESSAGE};
pub use ops::{
    Operation, OutputFormat, PageConfig, PageKind, RequestOptions, TransformRequest,
    DEFAULT_QUALITY,
};

/// Header-level facts about an encoded image, read without decoding pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<OutputFormat>,
}

/// Read dimensions and format from an image header.
pub fn inspect_header_from_bytes(data: &[u8]) -> Result<InspectMetadata, ImageToolkitError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ImageToolkitError::decode_failed(format!("failed to read image header: {e}")))?;

    let format = reader.format().and_then(OutputFormat::from_image_format);
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ImageToolkitError::decode_failed(format!("failed to read dimensions: {e}")))?;

    Ok(InspectMetadata {
        width,
        height,
        format,
    })
}

/// Get library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// MIME types accepted by the default intake policy
pub fn supported_input_formats() -> Vec<&'static str> {
    OutputFormat::ALL.iter().map(OutputFormat::mime_type).collect()
}

/// Format names accepted when parsing an output format
pub fn supported_output_formats() -> Vec<&'static str> {
    vec!["jpeg", "jpg", "png", "webp"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};

    #[test]
    fn inspect_reads_png_header() {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(7, 3))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        let meta = inspect_header_from_bytes(&buf).unwrap();
        assert_eq!(
            meta,
            InspectMetadata {
                width: 7,
                height: 3,
                format: Some(OutputFormat::Png),
            }
        );
    }

    #[test]
    fn inspect_rejects_garbage() {
        assert!(inspect_header_from_bytes(b"not an image").is_err());
    }

    #[test]
    fn supported_formats() {
        assert_eq!(
            supported_input_formats(),
            vec!["image/jpeg", "image/png", "image/webp"]
        );
        for name in supported_output_formats() {
            assert!(name.parse::<OutputFormat>().is_ok(), "{name}");
        }
        assert!(!version().is_empty());
    }
}
