// src/ops.rs
//
// Transform requests and the page configurations that build them.
// These are cheap to create and store - the expensive work happens in transform().

use crate::engine::MAX_DIMENSION;
use crate::error::{ImageToolkitError, Result};
use image::ImageFormat;
use std::fmt;
use std::str::FromStr;

/// Quality used when a page does not pick one (the browser encoder default).
pub const DEFAULT_QUALITY: f32 = 0.92;

/// Output format for encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Jpeg, OutputFormat::Png, OutputFormat::WebP];

    /// Canonical file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }

    /// Lowercase name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    pub fn supports_alpha(&self) -> bool {
        !matches!(self, Self::Jpeg)
    }

    /// Whether the quality factor has any effect on the encoded output.
    pub fn is_lossy(&self) -> bool {
        !matches!(self, Self::Png)
    }

    /// Parse a MIME type such as `image/jpeg` (case-insensitive, parameters ignored).
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Parse a file extension, with or without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        ext.trim_start_matches('.').parse().ok()
    }

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::WebP => Some(Self::WebP),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ImageToolkitError;

    fn from_str(format: &str) -> Result<Self> {
        match format.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::WebP),
            other => Err(ImageToolkitError::unknown_format(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transform does to the raster before it is re-encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Keep dimensions, change format
    Convert,

    /// Change dimensions. With exactly one side given and `maintain_aspect_ratio`,
    /// the other side is derived from the source aspect ratio.
    Resize {
        width: Option<u32>,
        height: Option<u32>,
        maintain_aspect_ratio: bool,
    },

    /// Keep dimensions, re-encode at a lower quality
    Optimize,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Resize { .. } => "resize",
            Self::Optimize => "optimize",
        }
    }
}

/// One fully specified transform. Built fresh for every invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformRequest {
    pub operation: Operation,
    pub format: OutputFormat,
    /// Lossy-encoder quality in [0, 1]; ignored for PNG.
    pub quality: f32,
    /// Output file name without extension. Falls back to the source name.
    pub base_name: Option<String>,
}

impl TransformRequest {
    pub fn new(operation: Operation, format: OutputFormat) -> Self {
        Self {
            operation,
            format,
            quality: DEFAULT_QUALITY,
            base_name: None,
        }
    }

    pub fn convert(format: OutputFormat) -> Self {
        Self::new(Operation::Convert, format)
    }

    pub fn resize(
        format: OutputFormat,
        width: Option<u32>,
        height: Option<u32>,
        maintain_aspect_ratio: bool,
    ) -> Self {
        Self::new(
            Operation::Resize {
                width,
                height,
                maintain_aspect_ratio,
            },
            format,
        )
    }

    pub fn optimize(format: OutputFormat, quality: f32) -> Self {
        Self::new(Operation::Optimize, format).with_quality(quality)
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = Some(base_name.into());
        self
    }

    /// Checks the parameters that do not depend on the source image.
    pub fn validate(&self) -> Result<()> {
        if !self.quality.is_finite() || !(0.0..=1.0).contains(&self.quality) {
            return Err(ImageToolkitError::invalid_quality(self.quality));
        }
        if let Operation::Resize { width, height, .. } = &self.operation {
            if *width == Some(0) || *height == Some(0) {
                return Err(ImageToolkitError::invalid_resize_dimensions(
                    *width,
                    *height,
                    "dimensions must be positive",
                ));
            }
            if width.is_none() && height.is_none() {
                return Err(ImageToolkitError::invalid_resize_dimensions(
                    None,
                    None,
                    "at least one dimension is required",
                ));
            }
            if [*width, *height].into_iter().flatten().any(|side| side > MAX_DIMENSION) {
                return Err(ImageToolkitError::invalid_resize_dimensions(
                    *width,
                    *height,
                    format!("output side exceeds the {MAX_DIMENSION} pixel limit"),
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// PAGES - The three call sites of the pipeline
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PageKind {
    Convert,
    Resize,
    Optimize,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Resize => "resize",
            Self::Optimize => "optimize",
        }
    }
}

/// User input collected by a page before a transform is triggered.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestOptions {
    /// Target format; only meaningful on pages that let the user choose one
    pub format: Option<OutputFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub maintain_aspect_ratio: bool,
    /// Quality override; only accepted on pages with a quality slider
    pub quality: Option<f32>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            format: None,
            width: None,
            height: None,
            maintain_aspect_ratio: true,
            quality: None,
        }
    }
}

impl RequestOptions {
    pub fn format(format: OutputFormat) -> Self {
        Self {
            format: Some(format),
            ..Self::default()
        }
    }

    pub fn dimensions(width: Option<u32>, height: Option<u32>, maintain_aspect_ratio: bool) -> Self {
        Self {
            width,
            height,
            maintain_aspect_ratio,
            ..Self::default()
        }
    }

    pub fn quality(quality: f32) -> Self {
        Self {
            quality: Some(quality),
            ..Self::default()
        }
    }
}

/// Configuration of one page: which controls it exposes and how it fills
/// in the rest of the request.
#[derive(Clone, Debug, PartialEq)]
pub struct PageConfig {
    pub kind: PageKind,
    /// Formats the user may pick. Empty means the output keeps the source format.
    pub allowed_formats: &'static [OutputFormat],
    pub dimension_controls: bool,
    pub quality_slider: bool,
    pub default_quality: f32,
    /// Prefix for decode/encode failures shown on this page
    pub failure_message: &'static str,
}

impl PageConfig {
    /// Get the built-in page configuration by name
    pub fn get(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "convert" => Ok(Self::convert()),
            "resize" => Ok(Self::resize()),
            "optimize" => Ok(Self::optimize()),
            other => Err(ImageToolkitError::unknown_page(other.to_string())),
        }
    }

    pub fn for_kind(kind: PageKind) -> Self {
        match kind {
            PageKind::Convert => Self::convert(),
            PageKind::Resize => Self::resize(),
            PageKind::Optimize => Self::optimize(),
        }
    }

    /// Convert page: pick any supported format, fixed quality 0.9,
    /// transparent areas flattened onto white for JPEG.
    pub fn convert() -> Self {
        Self {
            kind: PageKind::Convert,
            allowed_formats: &OutputFormat::ALL,
            dimension_controls: false,
            quality_slider: false,
            default_quality: 0.9,
            failure_message: "Failed to convert image",
        }
    }

    /// Resize page: width/height inputs, output keeps the source format.
    pub fn resize() -> Self {
        Self {
            kind: PageKind::Resize,
            allowed_formats: &[],
            dimension_controls: true,
            quality_slider: false,
            default_quality: DEFAULT_QUALITY,
            failure_message: "Failed to resize image",
        }
    }

    /// Optimize page: re-encode in the source format at quality 0.7.
    pub fn optimize() -> Self {
        Self {
            kind: PageKind::Optimize,
            allowed_formats: &[],
            dimension_controls: false,
            quality_slider: true,
            default_quality: 0.7,
            failure_message: "Failed to optimize image",
        }
    }

    pub fn keeps_source_format(&self) -> bool {
        self.allowed_formats.is_empty()
    }

    /// Formats offered to the user for a source of the given format.
    /// The convert page hides the format the source already has.
    pub fn target_choices(&self, source_format: Option<OutputFormat>) -> Vec<OutputFormat> {
        if self.keeps_source_format() {
            return source_format.into_iter().collect();
        }
        self.allowed_formats
            .iter()
            .copied()
            .filter(|format| Some(*format) != source_format)
            .collect()
    }

    /// Build a request from page input, rejecting controls this page does not have.
    pub fn build_request(
        &self,
        source_format: Option<OutputFormat>,
        options: &RequestOptions,
        base_name: Option<&str>,
    ) -> Result<TransformRequest> {
        let format = if self.keeps_source_format() {
            let source = source_format.ok_or_else(|| {
                ImageToolkitError::invalid_argument(
                    "format",
                    "unknown",
                    "the source format could not be determined",
                )
            })?;
            match options.format {
                Some(requested) if requested != source => {
                    return Err(ImageToolkitError::format_not_allowed(
                        requested.as_str(),
                        self.kind.as_str(),
                    ));
                }
                _ => source,
            }
        } else {
            let requested = options.format.ok_or_else(|| {
                ImageToolkitError::invalid_argument("format", "none", "select a target format")
            })?;
            if !self.allowed_formats.contains(&requested) {
                return Err(ImageToolkitError::format_not_allowed(
                    requested.as_str(),
                    self.kind.as_str(),
                ));
            }
            requested
        };

        let has_dimensions = options.width.is_some() || options.height.is_some();
        let operation = match self.kind {
            PageKind::Resize => Operation::Resize {
                width: options.width,
                height: options.height,
                maintain_aspect_ratio: options.maintain_aspect_ratio,
            },
            _ if has_dimensions => {
                return Err(ImageToolkitError::invalid_argument(
                    "dimensions",
                    format!("{:?}x{:?}", options.width, options.height),
                    format!("the {} page has no dimension controls", self.kind.as_str()),
                ));
            }
            PageKind::Convert => Operation::Convert,
            PageKind::Optimize => Operation::Optimize,
        };

        let quality = match options.quality {
            Some(q) if self.quality_slider => q,
            Some(q) => {
                return Err(ImageToolkitError::invalid_argument(
                    "quality",
                    q.to_string(),
                    format!("the {} page has no quality control", self.kind.as_str()),
                ));
            }
            None => self.default_quality,
        };

        let mut request = TransformRequest::new(operation, format).with_quality(quality);
        if let Some(name) = base_name {
            request = request.with_base_name(name);
        }
        request.validate()?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_format_parsing_is_case_insensitive() {
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("jpeg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("Png".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
        assert_eq!("WEBP".parse::<OutputFormat>().unwrap(), OutputFormat::WebP);
        assert!("gif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_canonical_extensions() {
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
        assert_eq!(OutputFormat::Png.extension(), "png");
        assert_eq!(OutputFormat::WebP.extension(), "webp");
    }

    #[test]
    fn test_from_mime() {
        assert_eq!(OutputFormat::from_mime("image/jpeg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_mime("IMAGE/PNG"), Some(OutputFormat::Png));
        assert_eq!(
            OutputFormat::from_mime("image/webp; charset=binary"),
            Some(OutputFormat::WebP)
        );
        assert_eq!(OutputFormat::from_mime("image/gif"), None);
        assert_eq!(OutputFormat::from_mime(""), None);
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(OutputFormat::from_extension(".JPEG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_extension("webp"), Some(OutputFormat::WebP));
        assert_eq!(OutputFormat::from_extension("bmp"), None);
    }

    #[test]
    fn test_alpha_support() {
        assert!(!OutputFormat::Jpeg.supports_alpha());
        assert!(OutputFormat::Png.supports_alpha());
        assert!(OutputFormat::WebP.supports_alpha());
    }

    #[test]
    fn test_validate_rejects_bad_quality() {
        for q in [-0.1, 1.01, f32::NAN, f32::INFINITY] {
            let err = TransformRequest::optimize(OutputFormat::Jpeg, q)
                .validate()
                .unwrap_err();
            assert_eq!(err.category(), ErrorCategory::InvalidRequest);
        }
        assert!(TransformRequest::optimize(OutputFormat::Jpeg, 0.0).validate().is_ok());
        assert!(TransformRequest::optimize(OutputFormat::Jpeg, 1.0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_or_missing_dimensions() {
        let zero = TransformRequest::resize(OutputFormat::Png, Some(0), None, true);
        assert!(matches!(
            zero.validate(),
            Err(ImageToolkitError::InvalidResizeDimensions { .. })
        ));
        let none = TransformRequest::resize(OutputFormat::Png, None, None, true);
        assert!(none.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_dimensions() {
        let huge = TransformRequest::resize(OutputFormat::Png, Some(u32::MAX), Some(u32::MAX), false);
        assert_eq!(huge.validate().unwrap_err().category(), ErrorCategory::InvalidRequest);
        let tall = TransformRequest::resize(OutputFormat::Png, None, Some(MAX_DIMENSION + 1), true);
        assert!(tall.validate().is_err());
        let edge = TransformRequest::resize(OutputFormat::Png, Some(MAX_DIMENSION), None, true);
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_page_lookup() {
        assert_eq!(PageConfig::get("Convert").unwrap().kind, PageKind::Convert);
        assert_eq!(PageConfig::get("resize").unwrap().kind, PageKind::Resize);
        assert_eq!(PageConfig::get("OPTIMIZE").unwrap().kind, PageKind::Optimize);
        assert!(matches!(
            PageConfig::get("crop"),
            Err(ImageToolkitError::UnknownPage { .. })
        ));
    }

    #[test]
    fn test_convert_page_hides_current_format() {
        let page = PageConfig::convert();
        assert_eq!(
            page.target_choices(Some(OutputFormat::Png)),
            vec![OutputFormat::Jpeg, OutputFormat::WebP]
        );
        assert_eq!(page.target_choices(None), OutputFormat::ALL.to_vec());
    }

    #[test]
    fn test_resize_page_keeps_source_format() {
        let page = PageConfig::resize();
        assert_eq!(
            page.target_choices(Some(OutputFormat::WebP)),
            vec![OutputFormat::WebP]
        );
        let request = page
            .build_request(
                Some(OutputFormat::WebP),
                &RequestOptions::dimensions(Some(200), None, true),
                Some("holiday"),
            )
            .unwrap();
        assert_eq!(request.format, OutputFormat::WebP);
        assert_eq!(request.quality, DEFAULT_QUALITY);
        assert_eq!(request.base_name.as_deref(), Some("holiday"));
        assert_eq!(
            request.operation,
            Operation::Resize {
                width: Some(200),
                height: None,
                maintain_aspect_ratio: true
            }
        );
    }

    #[test]
    fn test_convert_page_uses_fixed_quality() {
        let request = PageConfig::convert()
            .build_request(
                Some(OutputFormat::Png),
                &RequestOptions::format(OutputFormat::Jpeg),
                None,
            )
            .unwrap();
        assert_eq!(request.operation, Operation::Convert);
        assert_eq!(request.format, OutputFormat::Jpeg);
        assert!((request.quality - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_convert_page_requires_format() {
        let err = PageConfig::convert()
            .build_request(Some(OutputFormat::Png), &RequestOptions::default(), None)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidRequest);
    }

    #[test]
    fn test_optimize_page_defaults_and_slider() {
        let page = PageConfig::optimize();
        let default = page
            .build_request(Some(OutputFormat::Jpeg), &RequestOptions::default(), None)
            .unwrap();
        assert!((default.quality - 0.7).abs() < f32::EPSILON);
        assert_eq!(default.operation, Operation::Optimize);

        let custom = page
            .build_request(Some(OutputFormat::Jpeg), &RequestOptions::quality(0.4), None)
            .unwrap();
        assert!((custom.quality - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_pages_reject_missing_controls() {
        let dims = RequestOptions {
            format: Some(OutputFormat::Jpeg),
            ..RequestOptions::dimensions(Some(10), Some(10), false)
        };
        assert!(PageConfig::convert()
            .build_request(Some(OutputFormat::Png), &dims, None)
            .is_err());

        let quality = RequestOptions {
            format: Some(OutputFormat::Jpeg),
            quality: Some(0.5),
            ..RequestOptions::default()
        };
        assert!(PageConfig::convert()
            .build_request(Some(OutputFormat::Png), &quality, None)
            .is_err());
    }

    #[test]
    fn test_source_format_pages_reject_other_formats() {
        let options = RequestOptions {
            format: Some(OutputFormat::Png),
            ..RequestOptions::default()
        };
        let err = PageConfig::optimize()
            .build_request(Some(OutputFormat::Jpeg), &options, None)
            .unwrap_err();
        assert!(matches!(err, ImageToolkitError::FormatNotAllowed { .. }));
    }
}
