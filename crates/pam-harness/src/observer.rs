//! Observer that keeps every suppressed failure for later assertions

use std::sync::{Arc, Mutex, PoisonError};

use pam_core::{Failure, FailureObserver, FailureSite};

#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    failures: Arc<Mutex<Vec<Failure>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Failures recorded at one site
    pub fn count(&self, site: FailureSite) -> usize {
        self.failures().iter().filter(|f| f.site == site).count()
    }

    pub fn is_empty(&self) -> bool {
        self.failures().is_empty()
    }
}

impl FailureObserver for RecordingObserver {
    fn observe(&self, failure: Failure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }
}
