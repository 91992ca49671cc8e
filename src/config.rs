//! Compile-time tunables for the event-routed core.
//!
//! These mirror the teacher's constant modules (`memory::layout`-style):
//! capacities are powers of two where the spec requires lock-free rings or
//! hash tables, everything else is a small fixed bound chosen to keep the
//! core's memory footprint static (no heap growth once `System` is built).

/// Size of an `Event`/`RoutingEntry` payload in bytes. A multiple of 8 so the
/// structures stay bulk-copyable between rings (§3 invariant).
pub const EVENT_DATA_SIZE: usize = 128;

/// Inline capacity for a deck result payload stashed in a `RoutingEntry`.
/// Larger results are truncated; `Response::result_truncated` records it.
pub const RESULT_INLINE_SIZE: usize = 192;

/// Capacity of both kernel↔user rings. Power of two (§4.1).
pub const USER_RING_CAPACITY: usize = 256;
/// Capacity of the internal Receiver→Center and Guide→Execution rings.
pub const INTERNAL_RING_CAPACITY: usize = 256;
/// Capacity of each deck's input queue.
pub const DECK_QUEUE_CAPACITY: usize = 128;

/// Number of buckets in the routing table. Power of two (§4.2).
pub const TABLE_SIZE: usize = 1024;
/// Entries per bucket before an insert is rejected as a collision.
pub const BUCKET_DEPTH: usize = 4;
/// Ordered steps a `RoutingEntry` can carry. Only one is populated today;
/// room is reserved for future fan-out (§4.4).
pub const MAX_ROUTING_STEPS: usize = 4;
/// Buckets Guide scans per `run_once` before yielding back to the
/// coordinator (§4.5: "a bounded batch (e.g. 16 buckets)").
pub const GUIDE_SCAN_BATCH: usize = 16;

/// Storage deck open file descriptor table size.
pub const MAX_OPEN_FILES: usize = 256;
/// Hardware deck timer slot table size.
pub const MAX_TIMERS: usize = 64;

/// Per-task mailbox depth (§3 `IPCQueue`).
pub const IPC_QUEUE_DEPTH: usize = 32;
/// Maximum number of subscribe/unsubscribe records tracked system-wide.
pub const MAX_SUBSCRIPTIONS: usize = 128;

/// Maximum concurrently-alive tasks.
pub const MAX_TASKS: usize = 256;
/// Maximum task groups.
pub const MAX_TASK_GROUPS: usize = 32;
/// Maximum task ids recorded per group.
pub const MAX_GROUP_MEMBERS: usize = 64;

/// TagFS on-disk block size (§6: 4096).
pub const BLOCK_SIZE: usize = 4096;
/// Direct block pointers per inode (§4.10).
pub const DIRECT_BLOCKS: usize = 12;
/// Block-number pointers that fit in one indirect block (4096 / 8; block
/// numbers are stored as 64-bit values — §4.10, §9 "preserved bit-for-bit").
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / core::mem::size_of::<u64>();
/// Largest logical block index addressable via direct + indirect + double-indirect.
pub const MAX_LOGICAL_BLOCK: usize =
    DIRECT_BLOCKS + PTRS_PER_BLOCK + PTRS_PER_BLOCK * PTRS_PER_BLOCK;
/// Maximum tags per inode.
pub const MAX_TAGS_PER_INODE: usize = 32;
/// Maximum length of a tag key/value, NUL included.
pub const TAG_KEY_LEN: usize = 32;
pub const TAG_VALUE_LEN: usize = 64;
/// Maximum distinct `(key,value)` tag-index entries tracked.
pub const TAG_INDEX_CAPACITY: usize = 4096;
/// Maximum tags in a `user_context` AND-filter.
pub const MAX_CONTEXT_TAGS: usize = 16;

/// Busy-wait retry budget before a Receiver/Center ring push is abandoned.
pub const RING_PUSH_RETRIES: usize = 1_000_000;

/// Security deny-list threshold: memory allocations above this are denied.
pub const MAX_MEMORY_ALLOC_BYTES: u64 = 1 << 30; // 1 GiB

/// Default per-task stack size handed out by `spawn` (bytes).
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;
/// TSC-unit threshold past which a task with no forward progress is marked
/// `stalled` by the health updater (§4.8).
pub const STALL_THRESHOLD_TICKS: u64 = 5_000_000;
/// Overall-health floor below which `auto_recover` kicks in for a stalled task.
pub const AUTO_RECOVER_HEALTH_FLOOR: u8 = 30;
/// Energy bump `auto_recover` applies.
pub const AUTO_RECOVER_ENERGY_BOOST: u8 = 20;

/// Runtime-overridable knobs a caller may pass to `System::new`.
///
/// Everything else above is a `const` because the spec pins it to the
/// on-wire/on-disk format; these few are genuinely a matter of policy.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    pub forbidden_path: Option<&'static str>,
    pub tagfs_total_blocks: usize,
    pub tagfs_total_inodes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            forbidden_path: None,
            tagfs_total_blocks: 4096,
            tagfs_total_inodes: 1024,
        }
    }
}
