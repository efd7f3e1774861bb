//! Non-blocking per-volume exclusion lock.
//!
//! Lifecycle calls for the same volume must not overlap, but queuing a
//! second caller would convert its failure into unbounded latency — the
//! orchestration caller has its own timeout and retry policy.  [`TryLock`]
//! therefore rejects contention instead of waiting: a failed
//! [`TryLock::try_acquire`] maps to
//! [`NodeError::OperationPending`](crate::error::NodeError::OperationPending).
//!
//! The lock hands out an RAII [`TryLockGuard`], so it is released on every
//! exit path of the critical section, including early error returns.

use std::sync::atomic::{AtomicBool, Ordering};

/// A single-holder, non-blocking lock.
#[derive(Debug, Default)]
pub struct TryLock {
    held: AtomicBool,
}

impl TryLock {
    /// Create a new, unheld lock.
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Attempt to take the lock without waiting.
    ///
    /// Returns `None` if another holder currently owns it.
    pub fn try_acquire(&self) -> Option<TryLockGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        Some(TryLockGuard { lock: self })
    }
}

/// Guard returned by [`TryLock::try_acquire`]; releases the lock on drop.
#[derive(Debug)]
pub struct TryLockGuard<'a> {
    lock: &'a TryLock,
}

impl Drop for TryLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
