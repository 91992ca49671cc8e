//! The per-deck dispatch queues Guide feeds and a deck drains (§4.5).
//!
//! Each queue carries [`RoutingId`] handles rather than events or entries
//! directly — the entry itself stays put in the routing table's arena, and
//! a deck reaches it through [`crate::routing::RoutingTable::with_entry_mut`]
//! once it pops the handle, the same arena-and-index discipline the table
//! itself uses.

use crate::config::DECK_QUEUE_CAPACITY;
use crate::ring::SpscRing;
use crate::routing::{DeckId, RoutingId};

pub struct DeckQueue {
    ring: SpscRing<RoutingId, DECK_QUEUE_CAPACITY>,
}

impl DeckQueue {
    pub const fn new() -> Self {
        Self { ring: SpscRing::new() }
    }

    pub fn push(&self, id: RoutingId) -> Result<(), RoutingId> {
        self.ring.push(id)
    }

    pub fn pop(&self) -> Option<RoutingId> {
        self.ring.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }
}

impl Default for DeckQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// One queue per deck, indexed by [`DeckId`] (§4.5: "Guide, never a deck,
/// decides the next hop").
pub struct DeckQueues {
    queues: [DeckQueue; crate::routing::DECK_COUNT],
}

impl DeckQueues {
    pub const fn new() -> Self {
        Self { queues: [DeckQueue::new(), DeckQueue::new(), DeckQueue::new(), DeckQueue::new()] }
    }

    pub fn dispatch(&self, deck: DeckId, id: RoutingId) -> Result<(), RoutingId> {
        self.queues[deck.index()].push(id)
    }

    pub fn drain(&self, deck: DeckId) -> Option<RoutingId> {
        self.queues[deck.index()].pop()
    }

    pub fn queue(&self, deck: DeckId) -> &DeckQueue {
        &self.queues[deck.index()]
    }
}

impl Default for DeckQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_then_drain_returns_same_routing_id() {
        let queues = DeckQueues::new();
        let id = RoutingId { bucket: 3, slot: 1, generation: 0 };
        queues.dispatch(DeckId::Storage, id).unwrap();
        assert!(queues.drain(DeckId::Operations).is_none());
        assert_eq!(queues.drain(DeckId::Storage), Some(id));
    }

    #[test]
    fn queue_reports_emptiness_and_length() {
        let queues = DeckQueues::new();
        assert!(queues.queue(DeckId::Hardware).is_empty());
        queues.dispatch(DeckId::Hardware, RoutingId { bucket: 0, slot: 0, generation: 0 }).unwrap();
        assert_eq!(queues.queue(DeckId::Hardware).len(), 1);
    }
}
