//! Lock-free single-producer/single-consumer ring (§4.1).
//!
//! Grounded on the sibling pack's `ringmpsc` SPSC core: unbounded sequence
//! numbers for `head`/`tail` (no ABA, wrap-around is effectively never),
//! cache-line-isolated producer/consumer state, and the
//! acquire/release protocol from the spec verbatim. Unlike `ringmpsc` this
//! ring is a fixed-capacity array embedded by value (no heap `Vec`), so it
//! can live inside a `#[repr(C)]` shared-memory region the way the real
//! user↔kernel rings must.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU64, Ordering};

/// Pads a value out to a cache line so producer and consumer state never
/// false-share.
#[repr(align(64))]
struct CacheAligned<T>(T);

/// A fixed-capacity SPSC ring of `T`, `CAP` slots (`CAP` must be a power of
/// two — debug-asserted in [`SpscRing::new`]).
///
/// One producer handle and one consumer handle are expected; the type
/// itself does not enforce that (it would need to own non-`Copy` tokens),
/// matching the spec's "one dedicated producer and one dedicated consumer"
/// contract, enforced by convention the way every ring in this crate is
/// used (Receiver is the only producer into Center's ring, etc).
pub struct SpscRing<T, const CAP: usize> {
    tail: CacheAligned<AtomicU64>,
    head: CacheAligned<AtomicU64>,
    slots: UnsafeCell<[MaybeUninit<T>; CAP]>,
}

unsafe impl<T: Send, const CAP: usize> Send for SpscRing<T, CAP> {}
unsafe impl<T: Send, const CAP: usize> Sync for SpscRing<T, CAP> {}

impl<T, const CAP: usize> SpscRing<T, CAP> {
    pub const fn new() -> Self {
        assert!(CAP.is_power_of_two(), "SpscRing capacity must be a power of two");
        Self {
            tail: CacheAligned(AtomicU64::new(0)),
            head: CacheAligned(AtomicU64::new(0)),
            slots: UnsafeCell::new(unsafe { MaybeUninit::uninit().assume_init() }),
        }
    }

    #[inline]
    fn mask(x: u64) -> usize {
        (x & (CAP as u64 - 1)) as usize
    }

    pub fn capacity(&self) -> usize {
        CAP
    }

    pub fn len(&self) -> usize {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= CAP
    }

    /// Producer side: attempts to push one item. Returns `Err(item)` if the
    /// ring is full (§4.1: "push fails, not blocks").
    pub fn push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail.wrapping_sub(head) as usize >= CAP {
            return Err(item);
        }
        let idx = Self::mask(tail);
        unsafe {
            (*self.slots.get())[idx].write(item);
        }
        // Full fence before publishing tail, as the spec allows in place of
        // a plain release store — makes the slot write visible first.
        core::sync::atomic::fence(Ordering::Release);
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer side: attempts to pop one item. Returns `None` if the ring
    /// is empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = Self::mask(head);
        let item = unsafe { (*self.slots.get())[idx].assume_init_read() };
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Pushes as many of `items` as fit, stopping at the first failure.
    /// Returns the number actually moved (§4.1 batch forms).
    pub fn push_batch(&self, items: impl IntoIterator<Item = T>) -> usize {
        let mut n = 0;
        for item in items {
            if self.push(item).is_err() {
                break;
            }
            n += 1;
        }
        n
    }

    /// Pops up to `max` items into `out`, stopping when the ring is empty.
    /// Returns the number actually moved.
    pub fn pop_batch(&self, out: &mut impl Extend<T>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.pop() {
                Some(item) => {
                    out.extend(core::iter::once(item));
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Busy-waits up to `retries` times for room, then pushes. Used at the
    /// Receiver/Center/Execution boundaries that the spec says retry with a
    /// bounded busy-wait before dropping (§4.3, §4.7).
    pub fn push_with_retry(&self, mut item: T, retries: usize) -> Result<(), T> {
        for _ in 0..retries {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(back) => {
                    item = back;
                    core::hint::spin_loop();
                }
            }
        }
        Err(item)
    }
}

impl<T, const CAP: usize> Default for SpscRing<T, CAP> {
    fn default() -> Self {
        Self::new()
    }
}
