//! Capacity gate in front of the worker pool.

use crate::error::{ErrorKind, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting permit pool sized `workers + queue`.
///
/// Admission never waits: either a permit is free right now or the caller
/// is turned away. Every admitted upload holds exactly one [`Permit`] until
/// it finishes, however it finishes.
#[derive(Debug, Clone)]
pub struct Admission {
    permits: Arc<Semaphore>,
    capacity: usize,
}
impl Admission {
    pub fn new(workers: usize, queue: usize) -> Self {
        let capacity = workers + queue;
        Self { permits: Arc::new(Semaphore::new(capacity)), capacity }
    }

    /// Take a permit if one is free.
    ///
    /// # Errors
    ///
    /// Returns [`Rejected`](ErrorKind::Rejected) if all permits are held.
    pub fn try_admit(&self) -> Result<Permit> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Ok(Permit { _held: permit }),
            Err(_) => {
                tracing::debug!(capacity = self.capacity, "Admission rejected");
                exn::bail!(ErrorKind::Rejected)
            },
        }
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Proof of admission. Dropping it hands the slot back.
#[derive(Debug)]
pub struct Permit {
    _held: OwnedSemaphorePermit,
}
