//! Receiver: the admission point between user space and the routing core
//! (§4.3).

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::RING_PUSH_RETRIES;
use crate::event::payload::{split_op, FileOp, FileOpen, MemoryAlloc, MemoryOp};
use crate::event::{Event, EventType};
use crate::ring::SpscRing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownType,
    ZeroUserId,
    ForgedId,
    ZeroSizeAlloc,
    AllocTooLarge,
    PathDoesNotFit,
}

#[derive(Default)]
pub struct ReceiverStats {
    pub events_accepted: AtomicU64,
    pub events_rejected: AtomicU64,
    pub events_dropped_backpressure: AtomicU64,
}

/// Monotonic id allocator, starting at 1 (§4.3, invariant 4: "strictly
/// increasing").
pub struct IdCounter(AtomicU64);

impl IdCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Receiver {
    ids: IdCounter,
    pub stats: ReceiverStats,
}

/// Structural validation for a freshly-arrived, unstamped event. Separate
/// from id/timestamp stamping so it can be unit-tested without a clock.
fn validate(event: &Event) -> Result<(), RejectReason> {
    if event.id != 0 {
        return Err(RejectReason::ForgedId);
    }
    if event.user_id == 0 {
        return Err(RejectReason::ZeroUserId);
    }
    let kind = event.kind().ok_or(RejectReason::UnknownType)?;
    let Some((op, body)) = split_op(event.payload()) else {
        return Err(RejectReason::UnknownType);
    };
    match kind {
        EventType::Memory if MemoryOp::from_raw(op) == Some(MemoryOp::Alloc) => {
            let alloc = MemoryAlloc::decode(body).map_err(|_| RejectReason::ZeroSizeAlloc)?;
            if alloc.size == 0 {
                return Err(RejectReason::ZeroSizeAlloc);
            }
            if alloc.size > u32::MAX as u64 {
                return Err(RejectReason::AllocTooLarge);
            }
        }
        EventType::File if FileOp::from_raw(op) == Some(FileOp::Open) => {
            FileOpen::decode(body).map_err(|_| RejectReason::PathDoesNotFit)?;
        }
        _ => {}
    }
    Ok(())
}

impl Receiver {
    pub const fn new() -> Self {
        Self { ids: IdCounter::new(), stats: ReceiverStats::new() }
    }

    /// One iteration: pop at most one event from `user_ring`, validate and
    /// stamp it, then forward to `center_ring`. Returns whether it did any
    /// work, per §9's "did work?" worker contract.
    pub fn run_once<const UCAP: usize, const CCAP: usize>(
        &self,
        user_ring: &SpscRing<Event, UCAP>,
        center_ring: &SpscRing<Event, CCAP>,
        now_tsc: u64,
    ) -> bool {
        let Some(mut event) = user_ring.pop() else {
            return false;
        };
        if validate(&event).is_err() {
            self.stats.events_rejected.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        event.id = self.ids.next();
        event.timestamp = now_tsc;
        self.stats.events_accepted.fetch_add(1, Ordering::Relaxed);
        if center_ring.push_with_retry(event, RING_PUSH_RETRIES).is_err() {
            self.stats.events_dropped_backpressure.fetch_add(1, Ordering::Relaxed);
        }
        true
    }
}

impl ReceiverStats {
    const fn new() -> Self {
        Self {
            events_accepted: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            events_dropped_backpressure: AtomicU64::new(0),
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::payload::encode_op;

    fn alloc_event(user_id: u64, size: u64) -> Event {
        Event::new(EventType::Memory, user_id, &encode_op(MemoryOp::Alloc as u8, &MemoryAlloc::encode(size)))
    }

    #[test]
    fn forged_id_is_rejected() {
        let mut e = alloc_event(1, 4096);
        e.id = 7;
        assert_eq!(validate(&e), Err(RejectReason::ForgedId));
    }

    #[test]
    fn zero_user_id_is_rejected() {
        let e = alloc_event(0, 4096);
        assert_eq!(validate(&e), Err(RejectReason::ZeroUserId));
    }

    #[test]
    fn zero_size_alloc_is_rejected() {
        let e = alloc_event(1, 0);
        assert_eq!(validate(&e), Err(RejectReason::ZeroSizeAlloc));
    }

    #[test]
    fn valid_event_is_stamped_with_increasing_ids_and_forwarded() {
        let receiver = Receiver::new();
        let user_ring: SpscRing<Event, 8> = SpscRing::new();
        let center_ring: SpscRing<Event, 8> = SpscRing::new();

        user_ring.push(alloc_event(1, 4096)).unwrap();
        user_ring.push(alloc_event(1, 8192)).unwrap();

        assert!(receiver.run_once(&user_ring, &center_ring, 100));
        assert!(receiver.run_once(&user_ring, &center_ring, 101));
        assert!(!receiver.run_once(&user_ring, &center_ring, 102));

        let first = center_ring.pop().unwrap();
        let second = center_ring.pop().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(receiver.stats.events_accepted.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn oversized_alloc_passes_receiver_and_is_left_for_center_to_deny() {
        // Receiver only rejects size==0 or size>u32::MAX; the >1GiB policy
        // check is Center's job (§4.4 step 1), not Receiver's (§4.3).
        let receiver = Receiver::new();
        let user_ring: SpscRing<Event, 8> = SpscRing::new();
        let center_ring: SpscRing<Event, 8> = SpscRing::new();
        user_ring.push(alloc_event(1, 2 * 1024 * 1024 * 1024)).unwrap();
        assert!(receiver.run_once(&user_ring, &center_ring, 1));
        assert_eq!(receiver.stats.events_rejected.load(Ordering::Relaxed), 0);
        assert!(center_ring.pop().is_some());
    }
}
