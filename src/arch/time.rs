//! Monotonic time source abstraction.
//!
//! The core never reads `rdtsc` directly (grounded on the teacher's
//! `arch::x86_64::time::timer`, trimmed to the one thing a cooperative,
//! single-core scheduler actually needs: a monotonically non-decreasing
//! counter in TSC units). A [`TscSource`] backs the freestanding build；
//! hosted tests get a deterministic [`TestClock`] instead so scenarios don't
//! depend on wall-clock speed.

use core::sync::atomic::{AtomicU64, Ordering};

/// A monotonic counter in "TSC units" — the spec never requires converting
/// to wall-clock time, only comparing and differencing.
pub trait TimeSource: Send + Sync {
    fn now_tsc(&self) -> u64;
}

#[cfg(not(test))]
#[derive(Default)]
pub struct TscSource;

#[cfg(not(test))]
impl TimeSource for TscSource {
    #[inline]
    fn now_tsc(&self) -> u64 {
        unsafe { core::arch::x86_64::_rdtsc() }
    }
}

/// Deterministic, monotonically increasing clock for tests: every read
/// advances by one tick so ordering assertions don't race real time.
pub struct TestClock {
    ticks: AtomicU64,
}

impl TestClock {
    pub const fn new() -> Self {
        Self { ticks: AtomicU64::new(1) }
    }

    /// Advance the clock by `n` ticks without reading it (useful to push a
    /// task's `sleep_until` deadline into the past in a test).
    pub fn advance(&self, n: u64) {
        self.ticks.fetch_add(n, Ordering::Relaxed);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TestClock {
    fn now_tsc(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }
}

/// Convenience free function used where threading a `&dyn TimeSource`
/// through every call site would be noise (logging timestamps, etc).
#[cfg(not(test))]
pub fn now_tsc() -> u64 {
    TscSource.now_tsc()
}

#[cfg(test)]
static TEST_CLOCK: TestClock = TestClock::new();

#[cfg(test)]
pub fn now_tsc() -> u64 {
    TEST_CLOCK.now_tsc()
}
