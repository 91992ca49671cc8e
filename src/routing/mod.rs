//! The routing table: a bounded, open-addressed, bucketed map from
//! `event_id` to `RoutingEntry` (§3, §4.2).
//!
//! Per the spec's own design note (§9 "pointer-laden routing entries →
//! arena + indices"), the table owns a fixed arena of entries; everything
//! outside the table (deck queues, Guide's execution queue) carries a
//! [`RoutingId`] — a slot index plus a generation counter — rather than a
//! raw reference, so a queue entry that outlives its slot's reuse is
//! rejected instead of aliasing a different event.

mod spinlock;

use crate::config::{BUCKET_DEPTH, MAX_ROUTING_STEPS, RESULT_INLINE_SIZE, TABLE_SIZE};
use crate::event::{Event, ResponseStatus};
use spinlock::TasLock;

/// Which deck a routing step targets (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeckId {
    Storage = 0,
    Operations = 1,
    Hardware = 2,
    Network = 3,
}

pub const DECK_COUNT: usize = 4;

impl DeckId {
    pub const ALL: [DeckId; DECK_COUNT] =
        [DeckId::Storage, DeckId::Operations, DeckId::Hardware, DeckId::Network];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A completed deck's result, stashed inline (§3.1 memory-safety translation
/// — no result pointers, a capped inline buffer with a truncation flag).
#[derive(Clone, Copy)]
pub struct DeckResult {
    pub bytes: [u8; RESULT_INLINE_SIZE],
    pub len: usize,
    pub truncated: bool,
}

impl DeckResult {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut bytes = [0u8; RESULT_INLINE_SIZE];
        let n = data.len().min(RESULT_INLINE_SIZE);
        bytes[..n].copy_from_slice(&data[..n]);
        Self { bytes, len: n, truncated: data.len() > RESULT_INLINE_SIZE }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// The in-table record tracking one in-flight event (§3).
#[derive(Clone)]
pub struct RoutingEntry {
    pub event_id: u64,
    pub event_copy: Event,
    pub prefixes: [Option<DeckId>; MAX_ROUTING_STEPS],
    /// Bit `i` set means `prefixes[i]` has already been pushed into a deck
    /// queue and is awaiting that deck's completion — Guide consults this
    /// to avoid pushing the same step twice while it is still in flight
    /// (§4.5: "re-dispatch... is prevented").
    dispatched_mask: u8,
    pub deck_results: [Option<DeckResult>; DECK_COUNT],
    pub deck_timestamps: [u64; DECK_COUNT],
    pub completion_flags: u8,
    pub abort_flag: bool,
    pub error_code: u32,
    pub state: ResponseStatus,
    pub created_at: u64,
}

impl RoutingEntry {
    fn empty() -> Self {
        Self {
            event_id: 0,
            event_copy: Event::default(),
            prefixes: [None; MAX_ROUTING_STEPS],
            dispatched_mask: 0,
            deck_results: [None; DECK_COUNT],
            deck_timestamps: [0; DECK_COUNT],
            completion_flags: 0,
            abort_flag: false,
            error_code: 0,
            state: ResponseStatus::Processing,
            created_at: 0,
        }
    }

    /// Builds a fresh, unrouted entry for a just-admitted event (§4.2). The
    /// Center fills in `prefixes` via [`Self::set_route`] once it has
    /// decided which decks the event needs to visit.
    pub fn new(event: Event, created_at: u64) -> Self {
        let mut e = Self::empty();
        e.event_id = event.id;
        e.event_copy = event;
        e.created_at = created_at;
        e
    }

    /// Installs the deck sequence Center computed for this event. Unused
    /// trailing slots stay `None` (§4.4: "a route may use fewer than
    /// `MAX_ROUTING_STEPS` steps").
    pub fn set_route(&mut self, decks: &[DeckId]) {
        self.prefixes = [None; MAX_ROUTING_STEPS];
        self.dispatched_mask = 0;
        for (slot, deck) in self.prefixes.iter_mut().zip(decks.iter()) {
            *slot = Some(*deck);
        }
    }

    /// The deck the route should visit next, or `None` if the route is
    /// exhausted. Does not distinguish dispatched-but-pending steps from
    /// fresh ones; Guide uses [`Self::next_undispatched_step`] for that.
    pub fn next_step(&self) -> Option<DeckId> {
        self.prefixes.iter().flatten().next().copied()
    }

    /// The first populated prefix slot that Guide has not yet pushed to a
    /// deck queue, along with its index. `None` if the route is exhausted
    /// or its current step is already in flight.
    pub fn next_undispatched_step(&self) -> Option<(usize, DeckId)> {
        self.prefixes
            .iter()
            .enumerate()
            .find_map(|(i, slot)| slot.map(|deck| (i, deck)))
            .filter(|(i, _)| self.dispatched_mask & (1 << i) == 0)
    }

    /// Marks the step at `index` as pushed into a deck queue.
    pub fn mark_dispatched(&mut self, index: usize) {
        self.dispatched_mask |= 1 << index;
    }

    /// Undoes [`Self::mark_dispatched`]; used when the push into the deck
    /// queue itself failed, so the step is retried on the next scan.
    pub fn unmark_dispatched(&mut self, index: usize) {
        self.dispatched_mask &= !(1 << index);
    }

    /// Clears every remaining prefix slot without recording a result
    /// (§4.5: abort short-circuits the rest of the route).
    pub fn clear_remaining_prefixes(&mut self) {
        self.prefixes = [None; MAX_ROUTING_STEPS];
        self.dispatched_mask = 0;
    }

    /// Clears the first populated prefix slot (the one a deck just
    /// finished), the way §4.5/§4.6 say completion is signalled.
    fn clear_step(&mut self, deck: DeckId) {
        for (i, slot) in self.prefixes.iter_mut().enumerate() {
            if *slot == Some(deck) {
                *slot = None;
                self.dispatched_mask &= !(1 << i);
                return;
            }
        }
    }

    pub fn complete(&mut self, deck: DeckId, result: DeckResult, now: u64) {
        let idx = deck.index();
        self.deck_results[idx] = Some(result);
        self.deck_timestamps[idx] = now;
        self.completion_flags |= 1 << idx;
        self.clear_step(deck);
    }

    pub fn fail(&mut self, deck: DeckId, code: u32) {
        self.abort_flag = true;
        self.error_code = code;
        self.state = ResponseStatus::Error;
        self.clear_step(deck);
    }

    /// Last non-empty deck result, walked in reverse (§4.7 Execution contract).
    pub fn last_result(&self) -> Option<&DeckResult> {
        self.deck_results.iter().rev().find_map(|r| r.as_ref())
    }
}

/// Opaque handle to a live routing-table slot: bucket index, slot index and
/// a generation counter that is bumped every time the slot is freed and
/// reused, so a stale handle in a deck queue is detected rather than
/// silently aliasing whatever moved into that slot next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingId {
    pub bucket: u32,
    pub slot: u8,
    pub generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingError {
    BucketFull,
    NotFound,
    StaleGeneration,
}

struct Slot {
    entry: Option<RoutingEntry>,
    generation: u32,
}

impl Slot {
    const fn empty() -> Self {
        Self { entry: None, generation: 0 }
    }
}

struct Bucket {
    slots: [Slot; BUCKET_DEPTH],
    populated: usize,
}

impl Bucket {
    const fn new() -> Self {
        const EMPTY: Slot = Slot::empty();
        Self { slots: [EMPTY; BUCKET_DEPTH], populated: 0 }
    }
}

/// MurmurHash3-style 64-bit finalizer mixer (§4.2, §9: "retain a
/// MurmurHash-finalizer-style mixer on event_id").
#[inline]
fn mix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51afd7ed558ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
    k ^= k >> 33;
    k
}

pub struct RoutingTable {
    buckets: alloc::boxed::Box<[TasLock<Bucket>]>,
    collisions: core::sync::atomic::AtomicU64,
    /// Count of entries currently inserted, across every bucket. Lets a
    /// driver loop (`System::step`) know the table is not yet drained even
    /// while Guide's own per-call scan window holds no live entry — a
    /// per-bucket `populated` count alone can't answer "is the table empty"
    /// without locking every bucket.
    live_count: core::sync::atomic::AtomicUsize,
}

impl RoutingTable {
    pub fn new() -> Self {
        assert!(TABLE_SIZE.is_power_of_two());
        let buckets: alloc::vec::Vec<TasLock<Bucket>> =
            (0..TABLE_SIZE).map(|_| TasLock::new(Bucket::new())).collect();
        Self {
            buckets: buckets.into_boxed_slice(),
            collisions: core::sync::atomic::AtomicU64::new(0),
            live_count: core::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of routing entries currently live (inserted, not yet
    /// removed), summed across all buckets.
    pub fn live_count(&self) -> usize {
        self.live_count.load(core::sync::atomic::Ordering::Relaxed)
    }

    fn bucket_index(event_id: u64) -> usize {
        (mix64(event_id) as usize) & (TABLE_SIZE - 1)
    }

    pub fn collisions(&self) -> u64 {
        self.collisions.load(core::sync::atomic::Ordering::Relaxed)
    }

    /// Inserts a fresh entry, returning its handle or `BucketFull` on
    /// collision (§4.2: "a full bucket rejects the insert and increments a
    /// `collisions` counter").
    pub fn insert(&self, entry: RoutingEntry) -> Result<RoutingId, RoutingError> {
        let bucket_idx = Self::bucket_index(entry.event_id);
        let mut bucket = self.buckets[bucket_idx].lock();
        for (i, slot) in bucket.slots.iter_mut().enumerate() {
            if slot.entry.is_none() {
                let generation = slot.generation;
                slot.entry = Some(entry);
                bucket.populated += 1;
                self.live_count.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
                return Ok(RoutingId { bucket: bucket_idx as u32, slot: i as u8, generation });
            }
        }
        self.collisions.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        Err(RoutingError::BucketFull)
    }

    /// Finds a routing id for a live `event_id` by scanning its bucket.
    /// (Only Execution/Center need this; Guide and the decks carry the
    /// `RoutingId` directly once an entry has been inserted.)
    pub fn find(&self, event_id: u64) -> Option<RoutingId> {
        let bucket_idx = Self::bucket_index(event_id);
        let bucket = self.buckets[bucket_idx].lock();
        for (i, slot) in bucket.slots.iter().enumerate() {
            if let Some(e) = &slot.entry {
                if e.event_id == event_id {
                    return Some(RoutingId { bucket: bucket_idx as u32, slot: i as u8, generation: slot.generation });
                }
            }
        }
        None
    }

    /// Runs `f` with mutable access to the entry named by `id`, under the
    /// owning bucket's lock. Returns `StaleGeneration`/`NotFound` if the
    /// handle no longer points at a live entry.
    pub fn with_entry_mut<R>(&self, id: RoutingId, f: impl FnOnce(&mut RoutingEntry) -> R) -> Result<R, RoutingError> {
        let mut bucket = self.buckets[id.bucket as usize].lock();
        let slot = &mut bucket.slots[id.slot as usize];
        if slot.generation != id.generation {
            return Err(RoutingError::StaleGeneration);
        }
        match &mut slot.entry {
            Some(e) => Ok(f(e)),
            None => Err(RoutingError::NotFound),
        }
    }

    /// Read-only access, same staleness checks as [`Self::with_entry_mut`].
    pub fn with_entry<R>(&self, id: RoutingId, f: impl FnOnce(&RoutingEntry) -> R) -> Result<R, RoutingError> {
        let bucket = self.buckets[id.bucket as usize].lock();
        let slot = &bucket.slots[id.slot as usize];
        if slot.generation != id.generation {
            return Err(RoutingError::StaleGeneration);
        }
        match &slot.entry {
            Some(e) => Ok(f(e)),
            None => Err(RoutingError::NotFound),
        }
    }

    /// Removes the entry, bumping the slot's generation so any stale handle
    /// still in flight is rejected rather than aliasing whatever reuses the
    /// slot next.
    pub fn remove(&self, id: RoutingId) -> Result<RoutingEntry, RoutingError> {
        let mut bucket = self.buckets[id.bucket as usize].lock();
        let slot = &mut bucket.slots[id.slot as usize];
        if slot.generation != id.generation {
            return Err(RoutingError::StaleGeneration);
        }
        let entry = slot.entry.take().ok_or(RoutingError::NotFound)?;
        slot.generation = slot.generation.wrapping_add(1);
        bucket.populated -= 1;
        self.live_count.fetch_sub(1, core::sync::atomic::Ordering::Relaxed);
        Ok(entry)
    }

    /// Bucket count, for Guide's rotating scan.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Runs `f` against every live entry in one bucket, in array order
    /// (§4.5: "visited in array order; this is the tiebreak"), under a
    /// single hold of the bucket lock. `f` returns the action Guide decided
    /// on for that entry; callers act on the returned list after the lock
    /// is released, so a deck-queue push never happens while a bucket lock
    /// is held.
    pub fn for_each_in_bucket_mut<R>(
        &self,
        bucket_idx: usize,
        mut f: impl FnMut(RoutingId, &mut RoutingEntry) -> R,
    ) -> alloc::vec::Vec<R> {
        let mut bucket = self.buckets[bucket_idx].lock();
        let mut out = alloc::vec::Vec::new();
        for (i, slot) in bucket.slots.iter_mut().enumerate() {
            if let Some(entry) = &mut slot.entry {
                let id = RoutingId { bucket: bucket_idx as u32, slot: i as u8, generation: slot.generation };
                out.push(f(id, entry));
            }
        }
        out
    }

    pub fn populated_count(&self, bucket_idx: usize) -> usize {
        self.buckets[bucket_idx].lock().populated
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(event_id: u64) -> RoutingEntry {
        let mut e = RoutingEntry::empty();
        e.event_id = event_id;
        e.event_copy.id = event_id;
        e.prefixes[0] = Some(DeckId::Storage);
        e
    }

    #[test]
    fn insert_then_lookup_then_remove_round_trips() {
        let table = RoutingTable::new();
        let id = table.insert(sample_entry(42)).unwrap();
        table.with_entry(id, |e| assert_eq!(e.event_id, 42)).unwrap();
        let removed = table.remove(id).unwrap();
        assert_eq!(removed.event_id, 42);
        assert!(table.find(42).is_none());
    }

    #[test]
    fn bucket_full_increments_collisions_and_rejects_insert() {
        let table = RoutingTable::new();
        // Force all BUCKET_DEPTH ids into the same bucket by reusing one id's
        // bucket and relying on the table being otherwise empty: insert
        // BUCKET_DEPTH entries that hash into bucket 0 by brute force search.
        let mut ids_in_bucket_zero = alloc::vec::Vec::new();
        let mut candidate = 1u64;
        while ids_in_bucket_zero.len() < BUCKET_DEPTH + 1 {
            if RoutingTable::bucket_index(candidate) == RoutingTable::bucket_index(1) {
                ids_in_bucket_zero.push(candidate);
            }
            candidate += 1;
        }
        for &id in &ids_in_bucket_zero[..BUCKET_DEPTH] {
            table.insert(sample_entry(id)).unwrap();
        }
        let result = table.insert(sample_entry(ids_in_bucket_zero[BUCKET_DEPTH]));
        assert_eq!(result.unwrap_err(), RoutingError::BucketFull);
        assert_eq!(table.collisions(), 1);
    }

    #[test]
    fn removing_then_reinserting_rejects_stale_routing_id() {
        let table = RoutingTable::new();
        let id = table.insert(sample_entry(7)).unwrap();
        table.remove(id).unwrap();
        let new_id = table.insert(sample_entry(8)).unwrap();
        assert_eq!(id.bucket, new_id.bucket);
        assert_eq!(id.slot, new_id.slot);
        assert_ne!(id.generation, new_id.generation);
        assert_eq!(table.with_entry(id, |_| ()), Err(RoutingError::StaleGeneration));
    }

    #[test]
    fn insert_remove_restores_populated_count() {
        let table = RoutingTable::new();
        let bucket_idx = RoutingTable::bucket_index(123);
        let before = table.populated_count(bucket_idx);
        let id = table.insert(sample_entry(123)).unwrap();
        assert_eq!(table.populated_count(bucket_idx), before + 1);
        table.remove(id).unwrap();
        assert_eq!(table.populated_count(bucket_idx), before);
    }

    #[test]
    fn live_count_tracks_inserts_and_removes_across_buckets() {
        let table = RoutingTable::new();
        assert_eq!(table.live_count(), 0);
        let a = table.insert(sample_entry(1)).unwrap();
        let b = table.insert(sample_entry(2)).unwrap();
        assert_eq!(table.live_count(), 2);
        table.remove(a).unwrap();
        assert_eq!(table.live_count(), 1);
        table.remove(b).unwrap();
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn complete_clears_matching_prefix_and_records_result() {
        let mut e = sample_entry(1);
        e.prefixes[1] = Some(DeckId::Operations);
        e.complete(DeckId::Storage, DeckResult::from_bytes(b"ok"), 100);
        assert_eq!(e.prefixes[0], None);
        assert_eq!(e.prefixes[1], Some(DeckId::Operations));
        assert_eq!(e.deck_results[DeckId::Storage.index()].unwrap().as_slice(), b"ok");
        assert_eq!(e.next_step(), Some(DeckId::Operations));
    }
}
