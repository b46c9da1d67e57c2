//! # Tenant Lock Module
//!
//! Mutual exclusion for token refreshes. Each tenant gets exactly one
//! `AsyncMutex`, created lazily on first use and kept for the life of the
//! process.
//!
//! ## Features
//!
//! - **FIFO Waiters**: Queued callers acquire in arrival order
//! - **Suspending Wait**: Waiting parks the task, never the worker thread
//! - **Cancellation**: A dropped `acquire()` future leaves the queue without disturbing the others
//! - **Scoped Release**: Ownership is returned when the guard drops, on every exit path
//!
//! `release()` takes the guard by value, so a second release of the same
//! acquisition does not compile.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use tracing::trace;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Suspend-aware mutex guarding one tenant's token refresh
#[derive(Debug, Default)]
pub struct AsyncMutex {
    inner: Arc<TokioMutex<()>>,
}

/// Exclusive ownership of an `AsyncMutex`, released on drop
#[derive(Debug)]
pub struct MutexGuard {
    _owned: OwnedMutexGuard<()>,
}

impl AsyncMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership.
    ///
    /// Returns immediately when the mutex is free. Otherwise the caller joins
    /// the back of the queue. Dropping the returned future before it completes
    /// removes the caller from the queue without acquiring.
    pub async fn acquire(&self) -> MutexGuard {
        let owned = Arc::clone(&self.inner).lock_owned().await;
        MutexGuard { _owned: owned }
    }

    /// Take ownership only if nobody holds the mutex and nobody is queued
    pub fn try_acquire(&self) -> Option<MutexGuard> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|owned| MutexGuard { _owned: owned })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

impl MutexGuard {
    /// Hand ownership to the next waiter, or mark the mutex free
    pub fn release(self) {
        drop(self);
    }
}

/// Map of tenant key to its single `AsyncMutex`
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<AsyncMutex>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex for `key`, created on first request. Keys are case-insensitive.
    pub fn mutex_for(&self, key: &str) -> Arc<AsyncMutex> {
        let key = key.to_ascii_lowercase();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = locks.get(&key) {
            return Arc::clone(existing);
        }

        trace!(tenant = %key, "Creating tenant mutex");
        let mutex = Arc::new(AsyncMutex::new());
        locks.insert(key, Arc::clone(&mutex));
        mutex
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
