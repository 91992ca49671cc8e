//! Execution: response assembly and entry teardown (§4.7).

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::{DECK_QUEUE_CAPACITY, RING_PUSH_RETRIES};
use crate::event::{Response, ResponseStatus};
use crate::ring::SpscRing;
use crate::routing::{RoutingError, RoutingId, RoutingTable};

/// Carries completed entries from Guide to Execution; same capacity as a
/// deck queue since it sees at most one entry per completed route.
pub type ExecutionQueue = SpscRing<RoutingId, DECK_QUEUE_CAPACITY>;

#[derive(Default)]
pub struct ExecutionStats {
    pub responses_emitted: AtomicU64,
    pub responses_dropped_backpressure: AtomicU64,
}

pub struct Execution {
    pub stats: ExecutionStats,
}

impl Execution {
    pub const fn new() -> Self {
        Self { stats: ExecutionStats::new() }
    }

    /// One iteration: pop at most one completed entry, build its
    /// `Response`, push to `kernel_ring`, then remove the entry from
    /// `table`. Returns whether it did any work.
    ///
    /// Per §4.7's ordering guarantee, the entry is removed only *after* the
    /// response is pushed: a panic between the two leaks a routing-table
    /// slot rather than silently dropping a response the caller may already
    /// be relying on.
    pub fn run_once<const KCAP: usize>(
        &self,
        execution_queue: &ExecutionQueue,
        kernel_ring: &SpscRing<Response, KCAP>,
        table: &RoutingTable,
        now_tsc: u64,
    ) -> bool {
        let Some(id) = execution_queue.pop() else {
            return false;
        };

        let built = table.with_entry(id, |entry| {
            let result = entry.last_result();
            let status = if entry.abort_flag { ResponseStatus::Error } else { entry.state };
            let mut response = Response::new(entry.event_id, status, entry.error_code, now_tsc);
            if let Some(result) = result {
                response = response.with_result(result.as_slice());
            }
            response
        });

        match built {
            Ok(response) => {
                if kernel_ring.push_with_retry(response, RING_PUSH_RETRIES).is_ok() {
                    self.stats.responses_emitted.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.responses_dropped_backpressure.fetch_add(1, Ordering::Relaxed);
                }
                let _ = table.remove(id);
            }
            Err(RoutingError::StaleGeneration) | Err(RoutingError::NotFound) => {
                // Already completed by a prior, duplicate Guide push; nothing to do.
            }
            Err(RoutingError::BucketFull) => unreachable!("with_entry never inserts"),
        }
        true
    }
}

impl ExecutionStats {
    const fn new() -> Self {
        Self { responses_emitted: AtomicU64::new(0), responses_dropped_backpressure: AtomicU64::new(0) }
    }
}

impl Default for Execution {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::routing::{DeckId, DeckResult, RoutingEntry};

    #[test]
    fn completed_entry_yields_response_and_is_removed() {
        let table = RoutingTable::new();
        let execution_queue = ExecutionQueue::new();
        let kernel_ring: SpscRing<Response, 4> = SpscRing::new();
        let execution = Execution::new();

        let mut event = Event::default();
        event.id = 42;
        let mut entry = RoutingEntry::new(event, 0);
        entry.complete(DeckId::Storage, DeckResult::from_bytes(b"ok"), 1);
        entry.state = ResponseStatus::Success;
        let id = table.insert(entry).unwrap();
        execution_queue.push(id).unwrap();

        assert!(execution.run_once(&execution_queue, &kernel_ring, &table, 2));
        let response = kernel_ring.pop().unwrap();
        assert_eq!(response.event_id, 42);
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.result(), b"ok");
        assert!(table.find(42).is_none());
    }

    #[test]
    fn stale_routing_id_is_silently_ignored() {
        let table = RoutingTable::new();
        let execution_queue = ExecutionQueue::new();
        let kernel_ring: SpscRing<Response, 4> = SpscRing::new();
        let execution = Execution::new();

        let mut event = Event::default();
        event.id = 1;
        let id = table.insert(RoutingEntry::new(event, 0)).unwrap();
        table.remove(id).unwrap();
        execution_queue.push(id).unwrap();

        assert!(execution.run_once(&execution_queue, &kernel_ring, &table, 1));
        assert!(kernel_ring.pop().is_none());
    }
}
