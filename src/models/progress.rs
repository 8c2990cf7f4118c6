use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared progress counters for the active stage.
///
/// Written by whichever stage is running and read by the
/// [`ProgressReporter`](crate::services::progress::ProgressReporter).
/// Values are advisory display state: relaxed atomics are enough and a
/// reader may observe a stale value.
#[derive(Debug)]
pub struct ProgressState {
    current: AtomicU64,
    maximum: AtomicU64,
    status: RwLock<String>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
            maximum: AtomicU64::new(100),
            status: RwLock::new(String::new()),
        }
    }

    /// Reset the counters for a new unit of work
    pub fn reset(&self, maximum: u64) {
        self.current.store(0, Ordering::Relaxed);
        self.maximum.store(maximum, Ordering::Relaxed);
    }

    pub fn set_current(&self, value: u64) {
        self.current.store(value, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn maximum(&self) -> u64 {
        self.maximum.load(Ordering::Relaxed)
    }

    /// Completed share as a whole percentage, truncated toward zero.
    ///
    /// A zero maximum reads as 0%.
    pub fn percent(&self) -> u64 {
        let maximum = self.maximum();
        if maximum == 0 {
            return 0;
        }
        (self.current() as f64 / maximum as f64 * 100.0) as u64
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let mut guard = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = status.into();
    }

    pub fn status(&self) -> String {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}
