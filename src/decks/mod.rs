//! The four decks (§4.6): Storage, Operations, Hardware, Network.
//!
//! All four share the same skeleton — pop one routing id, run a
//! deck-specific `process` closure against the entry's event, then record
//! the outcome back onto the entry. The skeleton lives here; the per-family
//! logic lives in the sibling modules.

pub mod hardware;
#[cfg(feature = "network-deck")]
pub mod network;
pub mod operations;
pub mod storage;

use alloc::vec::Vec;

use crate::deck_queue::DeckQueue;
use crate::event::Event;
use crate::routing::{DeckId, DeckResult, RoutingError, RoutingTable};

/// One iteration of a deck (§4.6): pop at most one [`crate::routing::RoutingId`]
/// from `queue`, invoke `process` against a copy of that entry's event, and
/// record the result. On `Ok`, `complete()`; on `Err(code)`, `error()` —
/// exactly the two outcomes §4.6 names. Returns whether it did any work.
pub fn run_once(
    queue: &DeckQueue,
    table: &RoutingTable,
    deck: DeckId,
    now: u64,
    process: impl FnOnce(&Event) -> Result<Vec<u8>, u32>,
) -> bool {
    let Some(id) = queue.pop() else {
        return false;
    };

    let event = match table.with_entry(id, |entry| entry.event_copy) {
        Ok(event) => event,
        Err(RoutingError::StaleGeneration) | Err(RoutingError::NotFound) => return true,
        Err(RoutingError::BucketFull) => unreachable!("with_entry never inserts"),
    };

    match process(&event) {
        Ok(bytes) => {
            let result = DeckResult::from_bytes(&bytes);
            let _ = table.with_entry_mut(id, |entry| entry.complete(deck, result, now));
        }
        Err(code) => {
            let _ = table.with_entry_mut(id, |entry| entry.fail(deck, code));
        }
    }
    true
}

/// Unknown or malformed op byte within a family — every deck uses the same
/// code so Execution's error responses are consistent across families.
pub const ERR_UNKNOWN_OP: u32 = 100;
/// The op's body failed to decode.
pub const ERR_BAD_PAYLOAD: u32 = 101;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::routing::RoutingEntry;

    #[test]
    fn run_once_completes_entry_on_ok() {
        let table = RoutingTable::new();
        let queue = DeckQueue::new();
        let mut event = Event::default();
        event.id = 1;
        let id = table.insert(RoutingEntry::new(event, 0)).unwrap();
        queue.push(id).unwrap();

        assert!(run_once(&queue, &table, DeckId::Storage, 5, |_e| Ok(alloc::vec![1, 2, 3])));
        table
            .with_entry(id, |entry| {
                assert_eq!(entry.deck_results[DeckId::Storage.index()].unwrap().as_slice(), &[1, 2, 3]);
            })
            .unwrap();
    }

    #[test]
    fn run_once_fails_entry_on_err() {
        let table = RoutingTable::new();
        let queue = DeckQueue::new();
        let mut event = Event::default();
        event.id = 1;
        event.kind = EventType::Memory as u8;
        let id = table.insert(RoutingEntry::new(event, 0)).unwrap();
        queue.push(id).unwrap();

        assert!(run_once(&queue, &table, DeckId::Storage, 5, |_e| Err(ERR_UNKNOWN_OP)));
        table
            .with_entry(id, |entry| {
                assert!(entry.abort_flag);
                assert_eq!(entry.error_code, ERR_UNKNOWN_OP);
            })
            .unwrap();
    }

    #[test]
    fn run_once_on_empty_queue_does_no_work() {
        let table = RoutingTable::new();
        let queue = DeckQueue::new();
        assert!(!run_once(&queue, &table, DeckId::Storage, 5, |_e| Ok(Vec::new())));
    }
}
