/*!
 * Bounded pool of part buffers
 *
 * Every staged part holds one lease from the pool for as long as its bytes
 * are alive. The reader acquires a lease before reading, so a slow network
 * stalls the source instead of growing memory.
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{S3Error, S3Result};

/// Semaphore-backed buffer slots
#[derive(Clone)]
pub struct BufferPool {
    state: Arc<PoolState>,
}

struct PoolState {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl BufferPool {
    /// Create a pool with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Arc::new(PoolState {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                in_use: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> S3Result<BufferLease> {
        let permit = self
            .state
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| S3Error::Internal("Buffer pool closed".to_string()))?;

        let now = self.state.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);

        Ok(BufferLease {
            _permit: permit,
            state: self.state.clone(),
        })
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Slots currently leased
    pub fn in_use(&self) -> usize {
        self.state.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of slots leased at the same time
    pub fn peak_in_use(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Slots free right now
    pub fn available(&self) -> usize {
        self.state.semaphore.available_permits()
    }
}

/// One leased slot, released when dropped
pub struct BufferLease {
    _permit: OwnedSemaphorePermit,
    state: Arc<PoolState>,
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.state.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferLease").finish_non_exhaustive()
    }
}
