use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative progress reporting and cancellation, polled by long-running
/// scans at record granularity. Cancellation is a request, not an error:
/// operations that observe it return early and clean up partial outputs.
pub trait Progress: Send + Sync {
    fn begin(&self, _total: Option<u64>) {}
    fn advance(&self, _delta: u64) {}
    fn cancelled(&self) -> bool {
        false
    }
}

/// Progress sink that reports nothing and never cancels.
pub struct NoProgress;

impl Progress for NoProgress {}

/// Shareable cancellation flag, mostly useful in tests and embedders that
/// drive cancellation from another thread.
#[derive(Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl Progress for CancelFlag {
    fn cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
