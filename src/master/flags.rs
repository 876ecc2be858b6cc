use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide cancellation and mode flags shared by every component.
///
/// Cloning shares the underlying flags.
#[derive(Debug, Clone, Default)]
pub struct ControlFlags {
    stop: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    test_mode: Arc<AtomicBool>,
}

impl ControlFlags {
    /// Fresh flags, all clear except `test_mode` as given.
    pub fn new(test_mode: bool) -> Self {
        let flags = Self::default();
        flags.test_mode.store(test_mode, Ordering::SeqCst);
        flags
    }

    /// Whether the global abort is raised.
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Raise the global abort.
    pub fn raise_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Lower the global abort.
    pub fn clear_abort(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }

    /// Whether the system is shutting down.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Mark the system as shutting down.
    pub fn raise_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether missing hardware is tolerated.
    pub fn test_mode(&self) -> bool {
        self.test_mode.load(Ordering::SeqCst)
    }

    /// Switch test mode on or off.
    pub fn set_test_mode(&self, on: bool) {
        self.test_mode.store(on, Ordering::SeqCst);
    }
}
