//! Bare retry wrapper
//!
//! Retrying lives here and nowhere else: the protocol layer fails fast, and
//! callers wrap a whole exchange so a mid-sequence failure restarts from the
//! top. No backoff; a refused or timed-out poll already took its time.

use crate::error::Result;
use std::future::Future;
use tracing::debug;

/// Default attempt count for polling operations.
pub const DEFAULT_TRIES: u32 = 3;

/// Run `op` up to `times` times, returning the first success or the last
/// failure unchanged. Zero is treated as a single attempt.
pub async fn try_x_times<T, F, Fut>(times: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = times.max(1);
    for attempt in 1..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => debug!(attempt, error = %err, "attempt failed, retrying"),
        }
    }
    op().await
}

/// Blocking twin of [`try_x_times`].
pub fn try_x_times_blocking<T, F>(times: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = times.max(1);
    for attempt in 1..attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => debug!(attempt, error = %err, "attempt failed, retrying"),
        }
    }
    op()
}
