// src/engine/common.rs
//
// Common utilities shared across engine modules.

use crate::error::ImageToolkitError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Result type used throughout the engine. Always carries ImageToolkitError so
/// the error category survives every stage.
pub type EngineResult<T> = std::result::Result<T, ImageToolkitError>;

/// Run a codec stage, converting any panic into an internal error.
///
/// The C codecs report fatal errors by unwinding, and a panic must never take
/// down the page that triggered the transform.
pub(crate) fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(stage, %message, "codec panicked");
            Err(ImageToolkitError::internal_panic(format!(
                "{stage} panicked: {message}"
            )))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
