//! Synchronization utilities for fault-handling context.
//!
//! This module provides the locking primitive shared by the entry pool and the diagnostic
//! record buffer. Both are mutated from arbitrary threads, including from inside an
//! exception dispatcher callback where the faulting thread's stack and registers are in an
//! unusual state. Blocking there on an operating system wait primitive can deadlock the
//! process, so the lock never blocks: it spins.
//!
//! # Key Components
//!
//! - [`SpinLock`] - A busy-wait lock around a value, owned by the acquiring thread
//! - [`SpinGuard`] - RAII access to the protected value; releases on drop
//!
//! # Design Principles
//!
//! - **No OS waits**: acquisition is a compare-exchange loop with a `spin_loop` backoff hint
//! - **No allocation**: neither acquisition nor release touches the heap
//! - **Reentrancy refusal**: a thread that already holds the lock gets `None` instead of
//!   spinning on itself forever, so a fault raised while the lock is held degrades into a
//!   declined operation rather than a deadlock

use std::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::ThreadId;

/// Owner value of an unlocked [`SpinLock`].
const UNLOCKED: u64 = 0;

/// Upper bound on the number of `spin_loop` hints issued between two acquisition attempts.
const MAX_BACKOFF: u32 = 64;

/// A busy-wait lock around a value of type `T`.
///
/// The lock word stores the raw [`ThreadId`] of its holder, which is how a second
/// acquisition from the same thread is detected and refused.
///
/// # Examples
///
/// ```rust,ignore
/// use faultline::utils::synchronization::SpinLock;
///
/// let lock = SpinLock::new(0_u32);
/// if let Some(mut value) = lock.lock() {
///     *value += 1;
/// }
/// assert_eq!(*lock.lock().unwrap(), 1);
/// ```
pub struct SpinLock<T> {
    /// Raw thread id of the holder, [`UNLOCKED`] when free
    owner: AtomicU64,
    /// The protected value
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized through `owner`; a value moved between threads
// only needs `T: Send`.
unsafe impl<T: Send> Send for SpinLock<T> {}
// SAFETY: see above; at most one guard exists at a time.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates an unlocked lock around `value`.
    pub const fn new(value: T) -> Self {
        SpinLock {
            owner: AtomicU64::new(UNLOCKED),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock for the calling thread, spinning while another thread holds it.
    ///
    /// # Returns
    ///
    /// * `Some(guard)` once the lock is held
    /// * `None` if the calling thread already holds the lock
    pub fn lock(&self) -> Option<SpinGuard<'_, T>> {
        self.lock_as(ThreadId::current())
    }

    /// Acquires the lock on behalf of `owner`.
    ///
    /// # Arguments
    ///
    /// * `owner` - Identity recorded as holder and compared for reentrancy
    pub fn lock_as(&self, owner: ThreadId) -> Option<SpinGuard<'_, T>> {
        let owner = owner.get();
        let mut backoff = 1;

        loop {
            match self
                .owner
                .compare_exchange_weak(UNLOCKED, owner, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return Some(SpinGuard { lock: self }),
                Err(current) if current == owner => return None,
                Err(_) => {
                    for _ in 0..backoff {
                        hint::spin_loop();
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// Whether any thread currently holds the lock.
    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != UNLOCKED
    }
}

/// Exclusive access to the value of a [`SpinLock`]; the lock is released on drop.
pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held by this thread.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held by this thread.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.owner.store(UNLOCKED, Ordering::Release);
    }
}
