// src/engine/tasks.rs
//
// Background transforms. A transform runs on the shared pool and hands its
// result back through a slot the caller can wait on or poll.

use crate::engine::api::transform_checked;
use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::io::{OutputImage, SourceImage};
use crate::engine::pool;
use crate::error::ImageToolkitError;
use crate::ops::TransformRequest;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cooperative cancellation flag shared between a caller and a running transform.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancelled; `stage` names where the check happened.
    pub fn check(&self, stage: &'static str) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(ImageToolkitError::cancelled(stage))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct Slot {
    result: Mutex<Option<EngineResult<OutputImage>>>,
    ready: Condvar,
}

impl Slot {
    fn fill(&self, result: EngineResult<OutputImage>) {
        let mut guard = self.result.lock();
        *guard = Some(result);
        self.ready.notify_all();
    }
}

/// A transform running on the pool.
///
/// Dropping it does not stop the work; call [`PendingTransform::cancel`] for that.
pub struct PendingTransform {
    slot: Arc<Slot>,
    token: CancelToken,
    generation: u64,
    taken: bool,
}

impl PendingTransform {
    /// Start `request` against `source` on the shared pool.
    pub fn spawn(source: SourceImage, request: TransformRequest, generation: u64) -> Self {
        let slot = Arc::new(Slot::default());
        let token = CancelToken::new();

        let worker_slot = Arc::clone(&slot);
        let worker_token = token.clone();
        pool::spawn(move || {
            let result = if worker_token.is_cancelled() {
                Err(ImageToolkitError::cancelled("queued"))
            } else {
                run_with_panic_policy("transform", || {
                    transform_checked(&source, &request, &worker_token)
                })
            };
            debug!(generation, ok = result.is_ok(), "background transform finished");
            worker_slot.fill(result);
        });

        Self {
            slot,
            token,
            generation,
            taken: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.taken || self.slot.result.lock().is_some()
    }

    /// Block until the transform finishes.
    pub fn wait(self) -> EngineResult<OutputImage> {
        if self.taken {
            return Err(ImageToolkitError::internal_panic("transform result already taken"));
        }
        let mut guard = self.slot.result.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            self.slot.ready.wait(&mut guard);
        }
    }

    /// Take the result if the transform has finished. Returns `None` while it is
    /// still running and after the result has been taken once.
    pub fn try_take(&mut self) -> Option<EngineResult<OutputImage>> {
        if self.taken {
            return None;
        }
        let result = self.slot.result.lock().take();
        if result.is_some() {
            self.taken = true;
        }
        result
    }
}

impl std::fmt::Debug for PendingTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTransform")
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}
