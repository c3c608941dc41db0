//! Buffer of critical errors surfaced through `healthy()` checks.

use parking_lot::Mutex;

/// Collects critical errors until the next health check drains them.
#[derive(Debug, Default)]
pub struct HealthErrors {
    errors: Mutex<Vec<String>>,
}

impl HealthErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, err: impl Into<String>) {
        self.errors.lock().push(err.into());
    }

    /// Take every recorded error, leaving the buffer empty.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.errors.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}
