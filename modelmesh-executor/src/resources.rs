//! Fixed-size allocatable worker-slot set.
//!
//! Total slot count is fixed at construction (it mirrors `max_concurrency`
//! when owned by a [`crate::BatchExecutor`]). `allocate_batch` is atomic:
//! either it returns every slot it asked for or none of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("insufficient resources: requested {requested}, available {available}")]
    InsufficientResources { requested: usize, available: usize },
}

struct Inner {
    total: usize,
    free: Mutex<Vec<usize>>,
    allocated: AtomicUsize,
}

/// A single allocatable slot. Released back to the pool when dropped, so
/// callers never have to remember to call `release` explicitly.
pub struct ResourceSlot {
    pub id: usize,
    pool: Arc<Inner>,
}

impl std::fmt::Debug for ResourceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSlot").field("id", &self.id).finish()
    }
}

impl Drop for ResourceSlot {
    fn drop(&mut self) {
        self.pool.free.lock().push(self.id);
        self.pool.allocated.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-size pool of pre-allocated slots used to bound how many operations
/// may run concurrently.
#[derive(Clone)]
pub struct ResourcePool {
    inner: Arc<Inner>,
}

impl ResourcePool {
    pub fn new(total: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                total,
                free: Mutex::new((0..total).collect()),
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    pub fn total(&self) -> usize {
        self.inner.total
    }

    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::SeqCst)
    }

    /// Non-blocking single-slot allocation.
    pub fn allocate(&self) -> Result<ResourceSlot, ResourceError> {
        let mut free = self.inner.free.lock();
        let id = free.pop().ok_or(ResourceError::InsufficientResources {
            requested: 1,
            available: 0,
        })?;
        drop(free);
        self.inner.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(ResourceSlot {
            id,
            pool: self.inner.clone(),
        })
    }

    /// Atomically allocate `n` slots, or none at all.
    pub fn allocate_batch(&self, n: usize) -> Result<Vec<ResourceSlot>, ResourceError> {
        let mut free = self.inner.free.lock();
        if free.len() < n {
            return Err(ResourceError::InsufficientResources {
                requested: n,
                available: free.len(),
            });
        }
        let ids: Vec<usize> = (0..n).map(|_| free.pop().unwrap()).collect();
        drop(free);
        self.inner.allocated.fetch_add(n, Ordering::SeqCst);
        Ok(ids
            .into_iter()
            .map(|id| ResourceSlot {
                id,
                pool: self.inner.clone(),
            })
            .collect())
    }
}
