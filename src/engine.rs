// src/engine.rs
//
// The core of image-toolkit. One pipeline that:
// 1. Decodes the source bytes (JPEG, PNG, WebP)
// 2. Resolves output dimensions and renders the raster onto them
// 3. Re-encodes to the target format at the requested quality
//
// This file is a facade that delegates to the decomposed modules in engine/

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA. Beyond this is likely malicious.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod api;
mod common;
mod decoder;
mod encoder;
mod intake;
mod io;
mod pipeline;
mod pool;
mod session;
mod tasks;

pub use api::{transform, TransformMetrics};
pub use common::EngineResult;
pub use decoder::{
    apply_orientation, check_dimensions, decode_image, decode_jpeg_mozjpeg, decode_png_zune,
    decode_webp_libwebp, decode_with_image_crate, detect_exif_orientation, detect_format,
};
pub use encoder::{encode, encode_jpeg, encode_png, encode_webp, QualitySettings};
pub use intake::{IntakePolicy, DEFAULT_MAX_BYTES};
pub use io::{output_filename, strip_extension, OutputImage, SourceImage};
pub use pipeline::{
    derive_dimensions, fast_resize, fast_resize_owned, flatten_alpha, render,
    resolve_output_dimensions, ResizeError, WHITE,
};
pub use session::{Completion, Session, SessionState, Ticket};
pub use tasks::{CancelToken, PendingTransform};
