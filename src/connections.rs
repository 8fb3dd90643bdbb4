//! Connection gate for concurrency limiting

use crate::error::ConfigError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting gate: at most `capacity` attempts in flight at once.
///
/// Waiters are served in FIFO order. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held connection slot. Dropping it is the release, so a slot is returned on success, error,
/// panic and cancellation alike.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionGate {
    /// Create a gate with `capacity` slots. Zero is a configuration error.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidConnections(capacity));
        }
        Ok(Self { semaphore: Arc::new(Semaphore::new(capacity)), capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> ConnectionPermit {
        match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => ConnectionPermit { _permit: permit },
            // the semaphore is private and never closed
            Err(_) => unreachable!("connection gate semaphore closed"),
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<ConnectionPermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(ConnectionPermit { _permit: permit })
    }

    /// Run `operation` while holding a slot.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> T
    where
        Fut: Future<Output = T>,
        Op: FnOnce() -> Fut,
    {
        let _permit = self.acquire().await;
        operation().await
    }
}
