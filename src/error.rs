// src/error.rs
//
// Unified error handling for image-toolkit
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - InputRejected: pre-flight size/type check failed, never reaches the pipeline
// - InvalidRequest: bad transform parameters
// - DecodeError: unreadable or unsupported input
// - EncodeError: rendering or encoding the output failed
// - Cancelled: a newer request or selection superseded this one
// - Internal: library bugs (should not happen)

use std::borrow::Cow;
use thiserror::Error;

/// Message shown for every intake rejection, whatever the exact cause.
pub const INTAKE_REJECTED_MESSAGE: &str = "File too large (max 5MB) or invalid format";

/// Error categories, one per recovery path at the UI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Input failed the size/type pre-flight check
    InputRejected,
    /// Transform parameters are invalid
    InvalidRequest,
    /// Input bytes could not be decoded
    DecodeError,
    /// Output could not be rendered or encoded
    EncodeError,
    /// Superseded by a newer invocation
    Cancelled,
    /// Library bugs (should not happen)
    Internal,
}

impl ErrorCategory {
    /// Get string representation of error category
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InputRejected => "InputRejected",
            ErrorCategory::InvalidRequest => "InvalidRequest",
            ErrorCategory::DecodeError => "DecodeError",
            ErrorCategory::EncodeError => "EncodeError",
            ErrorCategory::Cancelled => "Cancelled",
            ErrorCategory::Internal => "Internal",
        }
    }
}

/// image-toolkit error types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ImageToolkitError {
    // Intake Errors
    #[error("Input size {size} bytes exceeds maximum {max} bytes")]
    InputTooLarge { size: u64, max: u64 },

    #[error("Unsupported input type '{mime}' for file '{filename}'")]
    UnsupportedInputType {
        mime: Cow<'static, str>,
        filename: Cow<'static, str>,
    },

    #[error("No file was selected")]
    EmptySelection,

    // Request Errors
    #[error("No image selected")]
    NoSelection,

    #[error("Invalid resize dimensions: width={width:?}, height={height:?}. {reason}")]
    InvalidResizeDimensions {
        width: Option<u32>,
        height: Option<u32>,
        reason: Cow<'static, str>,
    },

    #[error("Invalid quality factor {value}. Expected a value between 0 and 1")]
    InvalidQuality { value: f32 },

    #[error("Format {format} is not available on the {page} page")]
    FormatNotAllowed {
        format: Cow<'static, str>,
        page: Cow<'static, str>,
    },

    #[error("Unknown output format: '{format}'. Expected jpg, jpeg, png or webp")]
    UnknownFormat { format: Cow<'static, str> },

    #[error("Unknown page: '{name}'. Available: convert, resize, optimize")]
    UnknownPage { name: Cow<'static, str> },

    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Corrupted image data")]
    CorruptedImage,

    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    // Render/Encode Errors
    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Encoder produced no data for {format}")]
    EmptyOutput { format: Cow<'static, str> },

    // State Errors
    #[error("Transform was cancelled during {stage}")]
    Cancelled { stage: Cow<'static, str> },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

// Constructor Helpers
impl ImageToolkitError {
    pub fn input_too_large(size: u64, max: u64) -> Self {
        Self::InputTooLarge { size, max }
    }

    pub fn unsupported_input_type(
        mime: impl Into<Cow<'static, str>>,
        filename: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::UnsupportedInputType {
            mime: mime.into(),
            filename: filename.into(),
        }
    }

    pub fn empty_selection() -> Self {
        Self::EmptySelection
    }

    pub fn no_selection() -> Self {
        Self::NoSelection
    }

    pub fn invalid_resize_dimensions(
        width: Option<u32>,
        height: Option<u32>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidResizeDimensions {
            width,
            height,
            reason: reason.into(),
        }
    }

    pub fn invalid_quality(value: f32) -> Self {
        Self::InvalidQuality { value }
    }

    pub fn format_not_allowed(
        format: impl Into<Cow<'static, str>>,
        page: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::FormatNotAllowed {
            format: format.into(),
            page: page.into(),
        }
    }

    pub fn unknown_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnknownFormat {
            format: format.into(),
        }
    }

    pub fn unknown_page(name: impl Into<Cow<'static, str>>) -> Self {
        Self::UnknownPage { name: name.into() }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn corrupted_image() -> Self {
        Self::CorruptedImage
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn empty_output(format: impl Into<Cow<'static, str>>) -> Self {
        Self::EmptyOutput {
            format: format.into(),
        }
    }

    pub fn cancelled(stage: impl Into<Cow<'static, str>>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InputTooLarge { .. }
            | Self::UnsupportedInputType { .. }
            | Self::EmptySelection => ErrorCategory::InputRejected,

            Self::NoSelection
            | Self::InvalidResizeDimensions { .. }
            | Self::InvalidQuality { .. }
            | Self::FormatNotAllowed { .. }
            | Self::UnknownFormat { .. }
            | Self::UnknownPage { .. }
            | Self::InvalidArgument { .. } => ErrorCategory::InvalidRequest,

            // Oversized rasters are reported as decode failures: the pipeline
            // refuses to allocate them, so from the caller's side the input is unreadable.
            Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::CorruptedImage
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. } => ErrorCategory::DecodeError,

            Self::ResizeFailed { .. } | Self::EncodeFailed { .. } | Self::EmptyOutput { .. } => {
                ErrorCategory::EncodeError
            }

            Self::Cancelled { .. } => ErrorCategory::Cancelled,

            Self::InternalPanic { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether the user can fix this by changing the input or parameters.
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::InputRejected
            | ErrorCategory::InvalidRequest
            | ErrorCategory::DecodeError
            | ErrorCategory::Cancelled => true,
            ErrorCategory::EncodeError | ErrorCategory::Internal => false,
        }
    }

    /// Single-line message for display next to the page that failed.
    ///
    /// Intake rejections always use [`INTAKE_REJECTED_MESSAGE`]; request
    /// errors are shown as-is; everything else is prefixed with the page's
    /// failure message.
    pub fn user_message(&self, failure_message: &str) -> String {
        match self.category() {
            ErrorCategory::InputRejected => INTAKE_REJECTED_MESSAGE.to_string(),
            ErrorCategory::InvalidRequest => self.to_string(),
            _ => format!("{failure_message}: {self}"),
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, ImageToolkitError>;
