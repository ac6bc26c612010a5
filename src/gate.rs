//! In-process throttle for calls to the spreadsheet service.

use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Caps the number of spreadsheet calls in flight.
///
/// Callers beyond the cap wait in FIFO order until a permit is dropped.
#[derive(Clone)]
pub struct RequestGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl RequestGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RequestGate {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.permits.clone().acquire_owned().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}
