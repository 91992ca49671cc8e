//! Memory-management interfaces the core consumes.
//!
//! The physical and virtual memory managers are out of scope (`SPEC_FULL.md`
//! §1/§4.11); this module only names the allocator/mapper traits the Storage
//! deck's `memory_alloc`/`memory_free`/`memory_map` handlers call through,
//! plus the global kernel heap setup the rest of the crate needs for
//! `alloc::vec::Vec`/`Box` in the freestanding build (grounded on the
//! teacher's `memory::heap`).

/// A physical frame handle. Opaque outside the allocator that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame(pub u64);

/// Stands in for the out-of-scope PMM.
pub trait FrameAllocator: Send + Sync {
    fn alloc(&self) -> Option<Frame>;
    fn free(&self, frame: Frame);
}

/// Stands in for the out-of-scope VMM. `map`/`unmap` operate on a task's
/// address space identified by an opaque `u64` handle (the `page_table`
/// field of a `Task`); the core treats it as a capability, never a pointer.
pub trait PageMapper: Send + Sync {
    fn map(&self, space: u64, virt_addr: u64, frame: Frame) -> Result<(), MapError>;
    fn unmap(&self, space: u64, virt_addr: u64) -> Result<Frame, MapError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    NotMapped,
    AlreadyMapped,
    OutOfFrames,
}

/// Bump allocator over a static arena. Adequate for a monoserver core whose
/// Non-goals exclude process memory isolation — every task shares the one
/// physical pool (grounded on the teacher's `memory::frame_alloc::FrameAllocator`,
/// simplified from a UEFI-memory-map walker to a single contiguous region
/// since boot-time memory discovery is out of scope here).
pub struct BumpFrameAllocator {
    inner: spin::Mutex<BumpState>,
}

struct BumpState {
    next_frame: u64,
    frame_count: u64,
    freed: alloc::vec::Vec<Frame>,
}

impl BumpFrameAllocator {
    /// `base` and `count` describe a pool of `count` 4 KiB frames starting at
    /// physical address `base`.
    pub fn new(base: u64, count: u64) -> Self {
        Self {
            inner: spin::Mutex::new(BumpState {
                next_frame: base,
                frame_count: count,
                freed: alloc::vec::Vec::new(),
            }),
        }
    }
}

const FRAME_SIZE: u64 = 4096;

impl FrameAllocator for BumpFrameAllocator {
    fn alloc(&self) -> Option<Frame> {
        let mut s = self.inner.lock();
        if let Some(f) = s.freed.pop() {
            return Some(f);
        }
        if s.frame_count == 0 {
            return None;
        }
        let addr = s.next_frame;
        s.next_frame += FRAME_SIZE;
        s.frame_count -= 1;
        Some(Frame(addr))
    }

    fn free(&self, frame: Frame) {
        self.inner.lock().freed.push(frame);
    }
}

/// Stands in for the out-of-scope VMM's page-table walker: records
/// `(space, virt_addr) -> Frame` in a hash map rather than walking real page
/// tables. Adequate for a monoserver whose Non-goals exclude process memory
/// isolation — every space is just a bookkeeping label, not a hardware
/// address space (grounded on the teacher's `memory::virt`, simplified from
/// x86-64 page-table manipulation to the bookkeeping the Storage deck
/// actually needs).
pub struct IdentityPageMapper {
    inner: spin::Mutex<hashbrown::HashMap<(u64, u64), Frame>>,
}

impl IdentityPageMapper {
    pub fn new() -> Self {
        Self { inner: spin::Mutex::new(hashbrown::HashMap::new()) }
    }
}

impl Default for IdentityPageMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl PageMapper for IdentityPageMapper {
    fn map(&self, space: u64, virt_addr: u64, frame: Frame) -> Result<(), MapError> {
        let mut inner = self.inner.lock();
        if inner.contains_key(&(space, virt_addr)) {
            return Err(MapError::AlreadyMapped);
        }
        inner.insert((space, virt_addr), frame);
        Ok(())
    }

    fn unmap(&self, space: u64, virt_addr: u64) -> Result<Frame, MapError> {
        self.inner.lock().remove(&(space, virt_addr)).ok_or(MapError::NotMapped)
    }
}

/// Global kernel heap, mapped ahead of time in the freestanding build
/// (grounded on the teacher's `memory::heap`: `linked_list_allocator` over a
/// fixed virtual range).
#[cfg(not(test))]
pub mod heap {
    use linked_list_allocator::LockedHeap;

    pub const HEAP_START: usize = 0x_4444_0000;
    pub const HEAP_SIZE: usize = 2 * 1024 * 1024;

    #[global_allocator]
    static KERNEL_HEAP: LockedHeap = LockedHeap::empty();

    /// # Safety
    /// Must be called exactly once, after the range `[HEAP_START, HEAP_START
    /// + HEAP_SIZE)` has been mapped RW by the (out-of-scope) VMM.
    pub unsafe fn init() {
        KERNEL_HEAP.lock().init(HEAP_START as *mut u8, HEAP_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocator_reuses_freed_frames_before_extending() {
        let allocator = BumpFrameAllocator::new(0x1000, 2);
        let a = allocator.alloc().unwrap();
        let b = allocator.alloc().unwrap();
        assert!(allocator.alloc().is_none());
        allocator.free(a);
        assert_eq!(allocator.alloc().unwrap(), a);
        let _ = b;
    }

    #[test]
    fn identity_mapper_rejects_double_map_and_round_trips_unmap() {
        let mapper = IdentityPageMapper::new();
        mapper.map(1, 0x2000, Frame(0x3000)).unwrap();
        assert_eq!(mapper.map(1, 0x2000, Frame(0x4000)), Err(MapError::AlreadyMapped));
        assert_eq!(mapper.unmap(1, 0x2000).unwrap(), Frame(0x3000));
        assert_eq!(mapper.unmap(1, 0x2000), Err(MapError::NotMapped));
    }
}
