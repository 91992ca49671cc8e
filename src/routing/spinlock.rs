//! A bare test-and-set spinlock (§5: "xchg-based"), used for per-bucket
//! routing-table locks instead of `spin::Mutex` so the lock really is the
//! single atomic `xchg` the spec calls out — not a general-purpose lock with
//! its own backoff policy layered on top.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

pub struct TasLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TasLock<T> {}
unsafe impl<T: Send> Sync for TasLock<T> {}

impl<T> TasLock<T> {
    pub const fn new(value: T) -> Self {
        Self { locked: AtomicBool::new(false), value: UnsafeCell::new(value) }
    }

    pub fn lock(&self) -> TasGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        TasGuard { lock: self }
    }
}

pub struct TasGuard<'a, T> {
    lock: &'a TasLock<T>,
}

impl<'a, T> Deref for TasGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T> DerefMut for TasGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> Drop for TasGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
