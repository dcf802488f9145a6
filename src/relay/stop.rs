//! One-shot broadcast stop signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared by every worker of a relay. Fires at most once.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `false` if it had already fired.
    pub fn trigger(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
