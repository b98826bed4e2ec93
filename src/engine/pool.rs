// src/engine/pool.rs
//
// Global thread pool for background transforms.
//
// A single pool is built lazily on first use and reused for every transform.
// The thread count follows the detected parallelism.

use rayon::ThreadPool;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Minimum number of worker threads
const MIN_THREADS: usize = 1;

static GLOBAL_THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

fn configured_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_THREADS)
        .max(MIN_THREADS)
}

/// The shared pool, or `None` when it could not be built. Callers then fall
/// back to rayon's global pool.
pub fn get_pool() -> Option<&'static ThreadPool> {
    GLOBAL_THREAD_POOL
        .get_or_init(|| {
            let num_threads = configured_threads();
            match rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|i| format!("image-toolkit-{i}"))
                .build()
            {
                Ok(pool) => {
                    debug!(num_threads, "transform pool initialized");
                    Some(pool)
                }
                Err(e) => {
                    warn!(error = %e, "failed to build transform pool, using rayon global pool");
                    None
                }
            }
        })
        .as_ref()
}

/// Run `f` on the transform pool without blocking the caller.
pub fn spawn<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match get_pool() {
        Some(pool) => pool.spawn(f),
        None => rayon::spawn(f),
    }
}
