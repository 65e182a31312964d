//! Process-wide shutdown coordination.
//! Provides a flag set by signal handlers so batches can stop at the next file boundary,
//! plus a per-engine `CancelToken` for embedders that need finer control.
//!
//! Notes:
//! - Relaxed atomics are sufficient for a one-way "stop" flag.
//! - `request()` is safe to call from signal handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Request a cooperative shutdown (idempotent).
#[inline]
pub fn request() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Check whether a shutdown has been requested.
#[inline]
pub fn is_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// Cloneable cancellation handle; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once this token was cancelled or a process shutdown was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed) || is_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let t = CancelToken::new();
        let c = t.clone();
        assert!(!c.0.load(Ordering::Relaxed));
        t.cancel();
        assert!(c.is_cancelled());
    }
}
