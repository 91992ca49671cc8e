//! Center: pre-routing policy and route computation (§4.4).

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::{KernelConfig, RING_PUSH_RETRIES};
use crate::event::payload::{split_op, FileOp, MemoryAlloc, MemoryOp};
use crate::event::{Event, EventType, Response, ResponseStatus};
use crate::ring::SpscRing;
use crate::routing::{DeckId, RoutingEntry, RoutingError, RoutingTable};

/// Deny-list error codes surfaced on a denied `Response` (§7).
pub mod deny_code {
    pub const OVERSIZE_ALLOC: u32 = 1;
    pub const FORBIDDEN_PATH: u32 = 2;
}

#[derive(Default)]
pub struct CenterStats {
    pub denied: AtomicU64,
    pub routing_errors: AtomicU64,
    pub center_backpressure: AtomicU64,
}

pub struct Center {
    pub stats: CenterStats,
}

/// Pure route-determination function (§4.4 step 2): a total function of
/// `event.type`, unknown types default to Operations.
fn route_for(kind: EventType) -> DeckId {
    match kind {
        EventType::Memory | EventType::File | EventType::TagFile => DeckId::Storage,
        EventType::Process | EventType::Ipc => DeckId::Operations,
        EventType::Timer | EventType::Device => DeckId::Hardware,
        EventType::Network => DeckId::Network,
    }
}

/// Returns `Some(error_code)` if the event should be denied outright
/// (§4.4 step 1). Network and process families currently always allow.
fn deny_reason(event: &Event, config: &KernelConfig) -> Option<u32> {
    let kind = event.kind()?;
    let (op, body) = split_op(event.payload())?;
    match kind {
        EventType::Memory if MemoryOp::from_raw(op) == Some(MemoryOp::Alloc) => {
            let alloc = MemoryAlloc::decode(body).ok()?;
            if alloc.size > crate::config::MAX_MEMORY_ALLOC_BYTES as u64 {
                return Some(deny_code::OVERSIZE_ALLOC);
            }
        }
        EventType::File if FileOp::from_raw(op) == Some(FileOp::Open) => {
            if let Ok(open) = crate::event::payload::FileOpen::decode(body) {
                if Some(open.path) == config.forbidden_path {
                    return Some(deny_code::FORBIDDEN_PATH);
                }
            }
        }
        _ => {}
    }
    None
}

impl Center {
    pub const fn new() -> Self {
        Self { stats: CenterStats::new() }
    }

    /// One iteration: pop at most one event from `center_ring`. A denied
    /// event gets an immediate `Response` on `kernel_ring`; an admitted
    /// event becomes a `RoutingEntry` in `table`. Returns whether it did
    /// any work.
    pub fn run_once<const CCAP: usize, const KCAP: usize>(
        &self,
        center_ring: &SpscRing<Event, CCAP>,
        kernel_ring: &SpscRing<Response, KCAP>,
        table: &RoutingTable,
        config: &KernelConfig,
        now_tsc: u64,
    ) -> bool {
        let Some(event) = center_ring.pop() else {
            return false;
        };

        if let Some(code) = deny_reason(&event, config) {
            self.stats.denied.fetch_add(1, Ordering::Relaxed);
            let response = Response::new(event.id, ResponseStatus::Denied, code, now_tsc);
            if kernel_ring.push_with_retry(response, RING_PUSH_RETRIES).is_err() {
                self.stats.center_backpressure.fetch_add(1, Ordering::Relaxed);
            }
            return true;
        }

        let deck = event.kind().map(route_for).unwrap_or(DeckId::Operations);
        let mut entry = RoutingEntry::new(event, now_tsc);
        entry.set_route(&[deck]);
        if table.insert(entry) == Err(RoutingError::BucketFull) {
            self.stats.routing_errors.fetch_add(1, Ordering::Relaxed);
        }
        true
    }
}

impl CenterStats {
    const fn new() -> Self {
        Self { denied: AtomicU64::new(0), routing_errors: AtomicU64::new(0), center_backpressure: AtomicU64::new(0) }
    }
}

impl Default for Center {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::payload::{encode_op, FileOpen};

    fn alloc_event(size: u64) -> Event {
        let mut e = Event::new(EventType::Memory, 1, &encode_op(MemoryOp::Alloc as u8, &MemoryAlloc::encode(size)));
        e.id = 1;
        e
    }

    fn open_event(path: &str) -> Event {
        let mut e = Event::new(EventType::File, 1, &encode_op(FileOp::Open as u8, &FileOpen::encode(path)));
        e.id = 1;
        e
    }

    #[test]
    fn oversize_alloc_is_denied_with_no_routing_entry() {
        let center = Center::new();
        let center_ring: SpscRing<Event, 4> = SpscRing::new();
        let kernel_ring: SpscRing<Response, 4> = SpscRing::new();
        let table = RoutingTable::new();
        let config = KernelConfig::default();

        center_ring.push(alloc_event(2 * 1024 * 1024 * 1024)).unwrap();
        assert!(center.run_once(&center_ring, &kernel_ring, &table, &config, 1));

        let response = kernel_ring.pop().unwrap();
        assert_eq!(response.status, ResponseStatus::Denied);
        assert_eq!(response.error_code, deny_code::OVERSIZE_ALLOC);
        assert!(table.find(1).is_none());
    }

    #[test]
    fn forbidden_path_is_denied() {
        let center = Center::new();
        let center_ring: SpscRing<Event, 4> = SpscRing::new();
        let kernel_ring: SpscRing<Response, 4> = SpscRing::new();
        let table = RoutingTable::new();
        let mut config = KernelConfig::default();
        config.forbidden_path = Some("/etc/shadow");

        center_ring.push(open_event("/etc/shadow")).unwrap();
        center.run_once(&center_ring, &kernel_ring, &table, &config, 1);
        let response = kernel_ring.pop().unwrap();
        assert_eq!(response.status, ResponseStatus::Denied);
        assert_eq!(response.error_code, deny_code::FORBIDDEN_PATH);
    }

    #[test]
    fn admitted_memory_event_is_routed_to_storage() {
        let center = Center::new();
        let center_ring: SpscRing<Event, 4> = SpscRing::new();
        let kernel_ring: SpscRing<Response, 4> = SpscRing::new();
        let table = RoutingTable::new();
        let config = KernelConfig::default();

        center_ring.push(alloc_event(4096)).unwrap();
        center.run_once(&center_ring, &kernel_ring, &table, &config, 1);

        assert!(kernel_ring.pop().is_none());
        let id = table.find(1).unwrap();
        table.with_entry(id, |e| assert_eq!(e.next_step(), Some(DeckId::Storage))).unwrap();
    }

    #[test]
    fn unknown_event_family_defaults_to_operations() {
        assert_eq!(route_for(EventType::Network), DeckId::Network);
        assert_eq!(route_for(EventType::Timer), DeckId::Hardware);
    }
}
