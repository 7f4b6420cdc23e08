//! Single-flight admission control.
//!
//! At most one run may be in spawn setup at any instant. The permit is held
//! only while the tool chain is being started, never for the run's whole
//! lifetime, so a second run can begin setup while the first run's
//! long-running stage is still executing.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Non-blocking, non-reentrant exclusion flag shared by all runs.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
}

/// Proof that the holder owns the gate. Dropping it releases the gate.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Try to take the gate without waiting. Returns `None` if it is held.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// Whether some run currently holds the gate.
    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionPermit {
    /// Release the gate explicitly.
    pub fn release(self) {}
}
