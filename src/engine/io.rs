// src/engine/io.rs
//
// Input and output image containers, and output file naming.

use crate::engine::api::TransformMetrics;
use crate::ops::OutputFormat;
use std::sync::Arc;

/// Base name used when neither the request nor the source provides one.
const FALLBACK_BASE_NAME: &str = "image";

/// A user-supplied image: encoded bytes plus what the user agent told us about it.
///
/// Cloning is cheap; the bytes are shared and never mutated.
#[derive(Clone, Debug)]
pub struct SourceImage {
    bytes: Arc<Vec<u8>>,
    mime_type: String,
    filename: String,
}

impl SourceImage {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        mime_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            bytes: Arc::new(bytes.into()),
            mime_type: mime_type.into(),
            filename: filename.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// File name without its last extension.
    pub fn base_name(&self) -> &str {
        strip_extension(&self.filename)
    }

    /// Extension of the file name, if any.
    pub fn extension(&self) -> Option<&str> {
        let base = self.base_name();
        if base.len() == self.filename.len() {
            None
        } else {
            Some(&self.filename[base.len() + 1..])
        }
    }

    /// Format declared by the MIME type, or by the extension when the MIME type is empty.
    pub fn declared_format(&self) -> Option<OutputFormat> {
        if self.mime_type.trim().is_empty() {
            self.extension().and_then(OutputFormat::from_extension)
        } else {
            OutputFormat::from_mime(&self.mime_type)
        }
    }
}

/// Remove the last `.ext` from a file name. A dot inside a directory component
/// does not count as an extension.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() && !name[idx + 1..].contains('/') => &name[..idx],
        _ => name,
    }
}

/// Output file name: `<base>.<canonical extension>`.
///
/// Blank `base` falls back to the source base name, then to `image`.
pub fn output_filename(base: Option<&str>, source: &SourceImage, format: OutputFormat) -> String {
    let base = base
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .or_else(|| Some(source.base_name().trim()).filter(|b| !b.is_empty()))
        .unwrap_or(FALLBACK_BASE_NAME);
    format!("{base}.{}", format.extension())
}

/// The result of one transform, ready to be offered as a download.
#[derive(Clone, Debug)]
pub struct OutputImage {
    bytes: Vec<u8>,
    format: OutputFormat,
    filename: String,
    width: u32,
    height: u32,
    metrics: TransformMetrics,
}

impl OutputImage {
    pub(crate) fn new(
        bytes: Vec<u8>,
        format: OutputFormat,
        filename: String,
        dimensions: (u32, u32),
        metrics: TransformMetrics,
    ) -> Self {
        Self {
            bytes,
            format,
            filename,
            width: dimensions.0,
            height: dimensions.1,
            metrics,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn metrics(&self) -> &TransformMetrics {
        &self.metrics
    }
}
