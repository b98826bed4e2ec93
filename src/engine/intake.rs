// src/engine/intake.rs
//
// Pre-flight checks applied to a selection before it may enter the pipeline.

use crate::engine::io::SourceImage;
use crate::error::ImageToolkitError;
use crate::ops::OutputFormat;
use tracing::{debug, warn};

/// 5 MiB input cap.
pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct IntakePolicy {
    pub max_bytes: u64,
    pub accepted_formats: Vec<OutputFormat>,
}

impl Default for IntakePolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            accepted_formats: OutputFormat::ALL.to_vec(),
        }
    }
}

impl IntakePolicy {
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_accepted_formats(mut self, formats: &[OutputFormat]) -> Self {
        self.accepted_formats = formats.to_vec();
        self
    }

    pub fn enforce_source_len(&self, len: usize) -> Result<(), ImageToolkitError> {
        let len_u64 = len as u64;
        if len_u64 > self.max_bytes {
            return Err(ImageToolkitError::input_too_large(len_u64, self.max_bytes));
        }
        Ok(())
    }

    pub fn enforce_type(&self, source: &SourceImage) -> Result<(), ImageToolkitError> {
        match source.declared_format() {
            Some(format) if self.accepted_formats.contains(&format) => Ok(()),
            _ => Err(ImageToolkitError::unsupported_input_type(
                source.mime_type().to_string(),
                source.filename().to_string(),
            )),
        }
    }

    /// Check a single file against the size cap and type allow-list.
    pub fn check(&self, source: &SourceImage) -> Result<(), ImageToolkitError> {
        self.enforce_source_len(source.len())
            .and_then(|_| self.enforce_type(source))
            .inspect_err(|err| {
                warn!(
                    filename = source.filename(),
                    mime = source.mime_type(),
                    bytes = source.len(),
                    %err,
                    "input rejected"
                );
            })
    }

    /// Collapse a selection to its first file and check it.
    pub fn select(&self, files: Vec<SourceImage>) -> Result<SourceImage, ImageToolkitError> {
        let total = files.len();
        let first = files
            .into_iter()
            .next()
            .ok_or_else(ImageToolkitError::empty_selection)?;
        if total > 1 {
            debug!(ignored = total - 1, "multi-file selection collapsed to first file");
        }
        self.check(&first)?;
        Ok(first)
    }
}
