//! `System`: owns one instance of every component and drives the pipeline
//! (§4, §9 "worker loop").
//!
//! Each stage's `run_once` already reports whether it did work; `step`
//! chains all of them plus the two out-of-band sweeps (`wake_expired_sleepers`
//! and `HardwareDeck::check_expired`) that can fire with no event in flight,
//! and folds the result with `|` so a caller driving `run_until_idle` only
//! stops once every stage is simultaneously dry. A pipeline stage's own
//! `did_work` only covers the slice of the routing table Guide happened to
//! scan this call, though, so `step` also folds in `RoutingTable::live_count`
//! — the table is never considered idle while it still holds an admitted
//! entry, even on a call where neither Guide's scan window nor any deck
//! queue had anything in it.

use alloc::boxed::Box;

use crate::center::Center;
use crate::config::{KernelConfig, INTERNAL_RING_CAPACITY, USER_RING_CAPACITY};
use crate::deck_queue::DeckQueues;
use crate::decks;
#[cfg(feature = "network-deck")]
use crate::decks::network::NetworkDeck;
use crate::decks::{hardware::HardwareDeck, operations::OperationsDeck, storage::StorageDeck};
use crate::event::{Event, Response};
use crate::execution::{Execution, ExecutionQueue};
use crate::guide::Guide;
use crate::ipc::IpcSystem;
use crate::mem::{BumpFrameAllocator, FrameAllocator, IdentityPageMapper, PageMapper};
use crate::receiver::Receiver;
use crate::ring::SpscRing;
use crate::routing::{DeckId, RoutingTable};
use crate::tagfs::TagFs;
use crate::task::group::TaskGroups;
use crate::task::health;
use crate::task::scheduler::{self, Scheduler};
use crate::task::TaskTable;

/// Frame pool handed to the default `BumpFrameAllocator` (§4.11 is out of
/// scope; this just needs to be large enough for the Storage deck's own
/// tests and seed scenarios to never see `ERR_OUT_OF_FRAMES` by surprise).
const DEFAULT_FRAME_POOL_BASE: u64 = 0x0010_0000;
const DEFAULT_FRAME_POOL_COUNT: u64 = 65_536;

/// The whole event-routed core, assembled once at boot (§4: Receiver →
/// Center → Guide → Decks → Execution) plus the Task/IPC/TagFS subsystems
/// every deck reaches into.
pub struct System {
    user_ring: SpscRing<Event, USER_RING_CAPACITY>,
    center_ring: SpscRing<Event, INTERNAL_RING_CAPACITY>,
    kernel_ring: SpscRing<Response, USER_RING_CAPACITY>,
    execution_queue: ExecutionQueue,

    table: RoutingTable,
    queues: DeckQueues,

    receiver: Receiver,
    center: Center,
    guide: Guide,
    execution: Execution,

    storage: StorageDeck,
    operations: OperationsDeck,
    hardware: HardwareDeck,
    #[cfg(feature = "network-deck")]
    network: NetworkDeck,

    frames: Box<dyn FrameAllocator>,
    mapper: Box<dyn PageMapper>,
    tagfs: TagFs,

    tasks: TaskTable,
    scheduler: Scheduler,
    groups: TaskGroups,
    ipc: IpcSystem,

    config: KernelConfig,
}

impl System {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            user_ring: SpscRing::new(),
            center_ring: SpscRing::new(),
            kernel_ring: SpscRing::new(),
            execution_queue: ExecutionQueue::new(),

            table: RoutingTable::new(),
            queues: DeckQueues::new(),

            receiver: Receiver::new(),
            center: Center::new(),
            guide: Guide::new(),
            execution: Execution::new(),

            storage: StorageDeck::new(),
            operations: OperationsDeck::new(),
            hardware: HardwareDeck::new(),
            #[cfg(feature = "network-deck")]
            network: NetworkDeck::new(),

            frames: Box::new(BumpFrameAllocator::new(DEFAULT_FRAME_POOL_BASE, DEFAULT_FRAME_POOL_COUNT)),
            mapper: Box::new(IdentityPageMapper::new()),
            tagfs: TagFs::format(config),

            tasks: TaskTable::new(),
            scheduler: Scheduler::new(),
            groups: TaskGroups::new(),
            ipc: IpcSystem::new(),

            config: *config,
        }
    }

    /// User-space submission: enqueues an unstamped event onto the user
    /// ring. Returns the event back on failure (ring full) per §4.1.
    pub fn push_event(&self, event: Event) -> Result<(), Event> {
        self.user_ring.push(event)
    }

    /// User-space retrieval: pops at most one completed `Response`.
    pub fn pop_response(&self) -> Option<Response> {
        self.kernel_ring.pop()
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn groups(&self) -> &TaskGroups {
        &self.groups
    }

    pub fn ipc(&self) -> &IpcSystem {
        &self.ipc
    }

    pub fn tagfs(&self) -> &TagFs {
        &self.tagfs
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Runs each deck's queue once, routing each family to its handler
    /// (§4.6). A deck with an empty queue contributes no work.
    fn run_decks_once(&self, now: u64) -> bool {
        let mut did_work = false;

        did_work |= decks::run_once(self.queues.queue(DeckId::Storage), &self.table, DeckId::Storage, now, |event| {
            self.storage.process(event, &self.tagfs, self.frames.as_ref(), self.mapper.as_ref(), now)
        });

        did_work |= decks::run_once(self.queues.queue(DeckId::Operations), &self.table, DeckId::Operations, now, |event| {
            self.operations.process(event, &self.tasks, &self.scheduler, now)
        });

        did_work |= decks::run_once(self.queues.queue(DeckId::Hardware), &self.table, DeckId::Hardware, now, |event| {
            self.hardware.process(event, &self.tasks, &self.scheduler, now)
        });

        #[cfg(feature = "network-deck")]
        {
            did_work |= decks::run_once(self.queues.queue(DeckId::Network), &self.table, DeckId::Network, now, |event| {
                self.network.process(event)
            });
        }
        #[cfg(not(feature = "network-deck"))]
        {
            // No deck compiled in; any Network-routed entry would otherwise
            // stall forever in its queue, so drain and fail it explicitly.
            did_work |= decks::run_once(self.queues.queue(DeckId::Network), &self.table, DeckId::Network, now, |_event| {
                Err(decks::ERR_UNKNOWN_OP)
            });
        }

        did_work
    }

    /// One full pass of the pipeline plus the sweeps that run independent of
    /// any single event (§4.8 sleep-deadline wake, health bucketing, and the
    /// Hardware deck's own timer expiry — see `HardwareDeck::check_expired`).
    /// Returns whether any stage did work, so callers can detect quiescence.
    pub fn step(&self) -> bool {
        let now = crate::arch::now_tsc();

        let mut did_work = false;
        did_work |= self.receiver.run_once(&self.user_ring, &self.center_ring, now);
        did_work |= self.center.run_once(&self.center_ring, &self.kernel_ring, &self.table, &self.config, now);
        did_work |= self.guide.run_once(&self.table, &self.queues, &self.execution_queue);
        did_work |= self.run_decks_once(now);
        did_work |= self.execution.run_once(&self.execution_queue, &self.kernel_ring, &self.table, now);

        did_work |= scheduler::wake_expired_sleepers(&self.tasks, &self.scheduler, now);
        health::update_all(&self.tasks, now);
        did_work |= self.hardware.check_expired(&self.tasks, &self.scheduler, now);

        // An admitted entry still in the routing table is outstanding work
        // even if this call's Guide scan window and every deck queue were
        // empty — otherwise `run_until_idle` can stop with a response still
        // owed (see the module doc comment above).
        did_work |= self.table.live_count() > 0;

        did_work
    }

    /// Drives `step` until a full pass finds nothing left to do — useful in
    /// tests and tools that push a batch of events and want every response
    /// drained before inspecting the kernel ring.
    pub fn run_until_idle(&self, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps && self.step() {
            steps += 1;
        }
        steps
    }
}
