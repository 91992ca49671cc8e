//! Guide: the dispatcher that turns routing-entry state into deck-queue
//! pushes (§4.5).

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::config::GUIDE_SCAN_BATCH;
use crate::deck_queue::DeckQueues;
use crate::event::ResponseStatus;
use crate::routing::{DeckId, RoutingEntry, RoutingId, RoutingTable};

/// The action Guide decided on for one entry, computed while the bucket
/// lock (or, for a `pending` recheck, the entry's own lock) is held and
/// acted on afterwards so a deck-queue/execution-queue push never happens
/// underneath a routing-table lock.
enum Decision {
    Dispatch(DeckId, usize),
    Complete,
    Wait,
}

/// What a `processing` entry needs next: dispatch its next undispatched
/// step, complete it (aborted, or route exhausted), or leave it alone
/// because its current step is already dispatched and still in flight in a
/// deck queue (§4.5: "a deck that has not yet cleared its prefix keeps the
/// entry in a deck queue").
fn decide(entry: &mut RoutingEntry) -> Decision {
    if entry.abort_flag {
        entry.clear_remaining_prefixes();
        entry.state = ResponseStatus::Error;
        Decision::Complete
    } else if let Some((idx, deck)) = entry.next_undispatched_step() {
        entry.mark_dispatched(idx);
        Decision::Dispatch(deck, idx)
    } else if entry.next_step().is_none() {
        if entry.state == ResponseStatus::Processing {
            entry.state = ResponseStatus::Success;
        }
        Decision::Complete
    } else {
        Decision::Wait
    }
}

fn try_dispatch(table: &RoutingTable, queues: &DeckQueues, id: RoutingId, deck: DeckId, idx: usize) {
    if queues.dispatch(deck, id).is_err() {
        // Deck queue is full; undo the dispatch mark so the entry is
        // retried instead of stranded mid-route.
        let _ = table.with_entry_mut(id, |e| e.unmark_dispatched(idx));
    }
}

pub struct Guide {
    scan_position: AtomicUsize,
    /// Entries dispatched by a previous call that have not yet completed.
    /// Rechecked directly (by id, not by bucket scan) on every subsequent
    /// call so completion is noticed as soon as the owning deck clears the
    /// prefix, instead of waiting for the rotating bucket scan to come
    /// back around to the same bucket — a full `TABLE_SIZE /
    /// GUIDE_SCAN_BATCH` revolution away in the worst case.
    pending: Mutex<Vec<RoutingId>>,
}

impl Guide {
    pub const fn new() -> Self {
        Self { scan_position: AtomicUsize::new(0), pending: Mutex::new(Vec::new()) }
    }

    /// Rechecks every entry this `Guide` has previously dispatched, without
    /// waiting for the bucket scan to revisit it. Dispatches the next step
    /// (multi-step routes), completes (route exhausted or aborted), or
    /// leaves it pending (still in flight in a deck queue).
    fn recheck_pending(&self, table: &RoutingTable, queues: &DeckQueues, execution_queue: &crate::execution::ExecutionQueue) -> bool {
        let mut did_work = false;
        let mut pending = self.pending.lock();
        pending.retain(|&id| {
            match table.with_entry_mut(id, decide) {
                Ok(Decision::Wait) => true,
                Ok(Decision::Dispatch(deck, idx)) => {
                    did_work = true;
                    try_dispatch(table, queues, id, deck, idx);
                    true
                }
                Ok(Decision::Complete) => {
                    did_work = true;
                    let _ = execution_queue.push(id);
                    false
                }
                // Stale/removed (e.g. Execution already drained it via the
                // bucket scan's own `Complete` path) — stop tracking it.
                Err(_) => false,
            }
        });
        did_work
    }

    /// Scans up to [`GUIDE_SCAN_BATCH`] buckets starting at the rotating
    /// `scan_position`, dispatching or completing every processing entry it
    /// finds, then rechecks every previously dispatched entry still
    /// pending. Returns whether any bucket held a live entry or any pending
    /// entry advanced.
    pub fn run_once(&self, table: &RoutingTable, queues: &DeckQueues, execution_queue: &crate::execution::ExecutionQueue) -> bool {
        let mut did_work = self.recheck_pending(table, queues, execution_queue);

        let bucket_count = table.bucket_count();
        if bucket_count == 0 {
            return did_work;
        }
        let batch = GUIDE_SCAN_BATCH.min(bucket_count);
        let start = self.scan_position.fetch_add(batch, Ordering::Relaxed) % bucket_count;

        for step in 0..batch {
            let bucket_idx = (start + step) % bucket_count;
            let actions = table.for_each_in_bucket_mut(bucket_idx, |id, entry| (id, decide(entry)));

            for (id, decision) in actions {
                match decision {
                    Decision::Wait => {}
                    Decision::Dispatch(deck, idx) => {
                        did_work = true;
                        try_dispatch(table, queues, id, deck, idx);
                        self.pending.lock().push(id);
                    }
                    Decision::Complete => {
                        did_work = true;
                        // A duplicate push (if Execution has already removed
                        // the entry) is harmless: Execution's `remove` call
                        // simply reports `NotFound` for the stale id.
                        let _ = execution_queue.push(id);
                    }
                }
            }
        }
        did_work
    }
}

impl Default for Guide {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::execution::ExecutionQueue;
    use crate::routing::RoutingEntry;

    fn entry_with_route(event_id: u64, decks: &[DeckId]) -> RoutingEntry {
        let mut event = Event::default();
        event.id = event_id;
        let mut e = RoutingEntry::new(event, 0);
        e.set_route(decks);
        e
    }

    #[test]
    fn dispatches_to_target_deck_exactly_once_while_in_flight() {
        let table = RoutingTable::new();
        let queues = DeckQueues::new();
        let execution_queue = ExecutionQueue::new();
        let guide = Guide::new();

        let id = table.insert(entry_with_route(1, &[DeckId::Storage])).unwrap();
        assert!(guide.run_once(&table, &queues, &execution_queue));
        assert_eq!(queues.drain(DeckId::Storage), Some(id));

        // Re-scanning before the deck clears the prefix must not re-dispatch.
        guide.run_once(&table, &queues, &execution_queue);
        assert!(queues.queue(DeckId::Storage).is_empty());
    }

    #[test]
    fn recheck_detects_completion_without_waiting_for_bucket_revisit() {
        let table = RoutingTable::new();
        let queues = DeckQueues::new();
        let execution_queue = ExecutionQueue::new();
        let guide = Guide::new();

        let id = table.insert(entry_with_route(1, &[DeckId::Storage])).unwrap();
        guide.run_once(&table, &queues, &execution_queue);
        assert_eq!(queues.drain(DeckId::Storage), Some(id));

        // Simulate the Storage deck finishing the step (what `decks::run_once`
        // does after popping `id` off its queue), without the bucket scan
        // ever coming back around to this entry's bucket.
        table
            .with_entry_mut(id, |e| e.complete(DeckId::Storage, crate::routing::DeckResult::from_bytes(b"ok"), 1))
            .unwrap();

        assert!(guide.run_once(&table, &queues, &execution_queue));
        assert_eq!(execution_queue.pop(), Some(id));
    }

    #[test]
    fn completes_entry_with_exhausted_route() {
        let table = RoutingTable::new();
        let queues = DeckQueues::new();
        let execution_queue = ExecutionQueue::new();
        let guide = Guide::new();

        let id = table.insert(entry_with_route(1, &[])).unwrap();
        guide.run_once(&table, &queues, &execution_queue);
        assert_eq!(execution_queue.pop(), Some(id));
        table.with_entry(id, |e| assert_eq!(e.state, ResponseStatus::Success)).unwrap();
    }

    #[test]
    fn aborted_entry_clears_remaining_prefixes_and_completes_as_error() {
        let table = RoutingTable::new();
        let queues = DeckQueues::new();
        let execution_queue = ExecutionQueue::new();
        let guide = Guide::new();

        let id = table.insert(entry_with_route(1, &[DeckId::Storage, DeckId::Operations])).unwrap();
        table.with_entry_mut(id, |e| e.abort_flag = true).unwrap();

        guide.run_once(&table, &queues, &execution_queue);
        assert_eq!(execution_queue.pop(), Some(id));
        table
            .with_entry(id, |e| {
                assert_eq!(e.state, ResponseStatus::Error);
                assert_eq!(e.next_step(), None);
            })
            .unwrap();
        assert!(queues.queue(DeckId::Storage).is_empty());
    }

    #[test]
    fn entries_in_same_bucket_are_visited_in_array_order() {
        let table = RoutingTable::new();
        let queues = DeckQueues::new();
        let execution_queue = ExecutionQueue::new();
        let guide = Guide::new();

        // Two single-step routes landing in whatever bucket event 1 hashes
        // to; insertion order determines slot order within the bucket.
        let a = table.insert(entry_with_route(1, &[DeckId::Hardware])).unwrap();
        let b = table.insert(entry_with_route(2, &[DeckId::Hardware])).unwrap();
        guide.run_once(&table, &queues, &execution_queue);
        if a.bucket == b.bucket {
            assert_eq!(queues.drain(DeckId::Hardware), Some(a));
            assert_eq!(queues.drain(DeckId::Hardware), Some(b));
        }
    }
}
