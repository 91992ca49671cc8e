//! Storage deck (§4.6): memory allocation/mapping plus TagFS-backed file and
//! tagged-file operations. Two families share one deck because both are,
//! at bottom, "move bytes somewhere and hand back a handle" — the split the
//! spec draws is by event family (`Memory`/`File`/`TagFile`), not by deck.

use alloc::vec::Vec;

use spin::Mutex;

use crate::config::MAX_OPEN_FILES;
use crate::event::payload::{
    split_op, FileCreateTagged, FileOp, FileOpen, FileQuery, FileRead, FileTagEdit, FileTagGet, FileWrite,
    MemoryAlloc, MemoryFree, MemoryMap, MemoryOp, QueryMode,
};
use crate::event::{Event, EventType};
use crate::mem::{Frame, FrameAllocator, MapError, PageMapper};
use crate::tagfs::inode::Capabilities;
use crate::tagfs::tag::Tag;
use crate::tagfs::{TagFs, TagFsError};

use super::{ERR_BAD_PAYLOAD, ERR_UNKNOWN_OP};

/// TagFS has no path hierarchy (§4.10); `file_open` resolves a path by
/// querying for an inode carrying this tag, creating one if none exists.
const PATH_TAG_KEY: &str = "path";

/// `Event` carries no `guild_id` (§3); every Storage operation driven off
/// the event pipeline acts for guild 0 until a richer session model exists.
const DEFAULT_GUILD: u64 = 0;

const FRAME_SIZE: u64 = crate::config::BLOCK_SIZE as u64;

pub const ERR_NO_SPACE: u32 = 1;
pub const ERR_NOT_FOUND: u32 = 2;
pub const ERR_PERMISSION_DENIED: u32 = 3;
pub const ERR_INVALID_FD: u32 = 4;
pub const ERR_TOO_BIG: u32 = 5;
pub const ERR_TAG_INDEX_FULL: u32 = 6;
pub const ERR_OUT_OF_FRAMES: u32 = 7;
pub const ERR_MAP_CONFLICT: u32 = 8;

fn tagfs_error_code(e: TagFsError) -> u32 {
    match e {
        TagFsError::NoSpace => ERR_NO_SPACE,
        TagFsError::NotFound => ERR_NOT_FOUND,
        TagFsError::PermissionDenied => ERR_PERMISSION_DENIED,
        TagFsError::InvalidFd => ERR_INVALID_FD,
        TagFsError::TooBig => ERR_TOO_BIG,
        TagFsError::TagIndexFull => ERR_TAG_INDEX_FULL,
    }
}

fn map_error_code(e: MapError) -> u32 {
    match e {
        MapError::NotMapped => ERR_NOT_FOUND,
        MapError::AlreadyMapped => ERR_MAP_CONFLICT,
        MapError::OutOfFrames => ERR_OUT_OF_FRAMES,
    }
}

/// One Storage-deck file descriptor: `{fd, inode_id, path, size, position,
/// flags, in_use}` (§4.6). Keyed by TagFS's own fd integer rather than a
/// second id space — `TagFs::open` already hands out a small dense index.
#[derive(Clone)]
struct FdEntry {
    inode_id: u64,
    path: heapless::String<128>,
    size: u64,
    position: u64,
    flags: Capabilities,
    in_use: bool,
}

impl FdEntry {
    fn empty() -> Self {
        Self {
            inode_id: 0,
            path: heapless::String::new(),
            size: 0,
            position: 0,
            flags: Capabilities::empty(),
            in_use: false,
        }
    }
}

pub struct StorageDeck {
    fds: Mutex<[FdEntry; MAX_OPEN_FILES]>,
}

impl StorageDeck {
    pub fn new() -> Self {
        Self { fds: Mutex::new(core::array::from_fn(|_| FdEntry::empty())) }
    }

    pub fn process(
        &self,
        event: &Event,
        tagfs: &TagFs,
        frames: &dyn FrameAllocator,
        mapper: &dyn PageMapper,
        now: u64,
    ) -> Result<Vec<u8>, u32> {
        let kind = event.kind().ok_or(ERR_UNKNOWN_OP)?;
        let (op, body) = split_op(event.payload()).ok_or(ERR_BAD_PAYLOAD)?;
        match kind {
            EventType::Memory => self.process_memory(op, body, frames, mapper),
            EventType::File | EventType::TagFile => self.process_file(op, body, tagfs, event.user_id, now),
            _ => Err(ERR_UNKNOWN_OP),
        }
    }

    fn process_memory(
        &self,
        op: u8,
        body: &[u8],
        frames: &dyn FrameAllocator,
        mapper: &dyn PageMapper,
    ) -> Result<Vec<u8>, u32> {
        match MemoryOp::from_raw(op).ok_or(ERR_UNKNOWN_OP)? {
            MemoryOp::Alloc => {
                let req = MemoryAlloc::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                let frame_count = ((req.size + FRAME_SIZE - 1) / FRAME_SIZE).max(1);
                let first = frames.alloc().ok_or(ERR_OUT_OF_FRAMES)?;
                for _ in 1..frame_count {
                    frames.alloc().ok_or(ERR_OUT_OF_FRAMES)?;
                }
                Ok(first.0.to_le_bytes().to_vec())
            }
            MemoryOp::Free => {
                let req = MemoryFree::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                frames.free(Frame(req.address));
                Ok(Vec::new())
            }
            MemoryOp::Map => {
                let req = MemoryMap::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                mapper.map(req.space, req.virt_addr, Frame(req.frame_addr)).map_err(map_error_code)?;
                Ok(Vec::new())
            }
        }
    }

    fn process_file(&self, op: u8, body: &[u8], tagfs: &TagFs, user_id: u64, now: u64) -> Result<Vec<u8>, u32> {
        match FileOp::from_raw(op).ok_or(ERR_UNKNOWN_OP)? {
            FileOp::Open => {
                let req = FileOpen::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                self.open_by_path(tagfs, req.path, user_id, now)
            }
            FileOp::Close => {
                let req = FileTagGet::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                tagfs.close(req.fd).map_err(tagfs_error_code)?;
                let mut fds = self.fds.lock();
                if let Some(slot) = fds.get_mut(req.fd as usize) {
                    slot.in_use = false;
                }
                Ok(Vec::new())
            }
            FileOp::Read => {
                let req = FileRead::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                self.read(tagfs, req.fd, req.size, user_id)
            }
            FileOp::Write => {
                let req = FileWrite::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                self.write(tagfs, req.fd, req.bytes, user_id, now)
            }
            FileOp::Stat => {
                let req = FileTagGet::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                let inode = tagfs.stat(req.fd, user_id, DEFAULT_GUILD).map_err(tagfs_error_code)?;
                Ok(inode.size.to_le_bytes().to_vec())
            }
            FileOp::CreateTagged => {
                let req = FileCreateTagged::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                let mut tags = req.tags.clone();
                tags.push((PATH_TAG_KEY, req.path));
                let id = tagfs.create_tagged(user_id, DEFAULT_GUILD, now, &tags).map_err(tagfs_error_code)?;
                Ok(id.to_le_bytes().to_vec())
            }
            FileOp::Query => {
                let req = FileQuery::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                let tags: Vec<Tag> = req.tags.iter().map(|(k, v)| Tag::new(k, v)).collect();
                let ids = match req.mode {
                    QueryMode::And => tagfs.query_and(&tags),
                    QueryMode::Or => tagfs.query_or(&tags),
                    QueryMode::Not => tagfs.query_not(&tags),
                };
                let mut out = Vec::with_capacity(ids.len() * 8);
                for id in ids {
                    out.extend_from_slice(&id.to_le_bytes());
                }
                Ok(out)
            }
            FileOp::TagAdd => {
                let req = FileTagEdit::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                tagfs.tag_add(req.fd, user_id, DEFAULT_GUILD, req.key, req.value).map_err(tagfs_error_code)?;
                Ok(Vec::new())
            }
            FileOp::TagRemove => {
                let req = FileTagEdit::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                tagfs.tag_remove(req.fd, user_id, DEFAULT_GUILD, req.key, req.value).map_err(tagfs_error_code)?;
                Ok(Vec::new())
            }
            FileOp::TagGet => {
                let req = FileTagGet::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                let tags = tagfs.tag_get(req.fd).map_err(tagfs_error_code)?;
                let mut out = Vec::with_capacity(1 + tags.len() * 96);
                out.push(tags.len().min(255) as u8);
                for tag in tags.iter().take(255) {
                    crate::event::payload::encode_tag(&mut out, tag.key(), tag.value());
                }
                Ok(out)
            }
        }
    }

    /// Find-or-create the inode tagged `path == req.path`, then open it
    /// (§4.10: path is just another tag, not a hierarchy).
    fn open_by_path(&self, tagfs: &TagFs, path: &str, user_id: u64, now: u64) -> Result<Vec<u8>, u32> {
        let tag = Tag::new(PATH_TAG_KEY, path);
        let existing = tagfs.query_and(&[tag]);
        let inode_id = if let Some(&id) = existing.first() {
            id
        } else {
            tagfs.create_tagged(user_id, DEFAULT_GUILD, now, &[(PATH_TAG_KEY, path)]).map_err(tagfs_error_code)?
        };
        let cap = Capabilities::READ | Capabilities::WRITE | Capabilities::METADATA;
        let fd = tagfs.open(inode_id, user_id, DEFAULT_GUILD, cap).map_err(tagfs_error_code)?;

        let mut fds = self.fds.lock();
        let slot = fds.get_mut(fd as usize).ok_or(ERR_INVALID_FD)?;
        *slot = FdEntry {
            inode_id,
            path: heapless::String::try_from(path).unwrap_or_default(),
            size: 0,
            position: 0,
            flags: cap,
            in_use: true,
        };
        Ok(fd.to_le_bytes().to_vec())
    }

    /// TagFS's own `read` always starts at byte 0 (§4.10); this deck tracks
    /// a `position` cursor per fd and slices the tail itself.
    fn read(&self, tagfs: &TagFs, fd: i32, size: u64, user_id: u64) -> Result<Vec<u8>, u32> {
        let position = {
            let fds = self.fds.lock();
            let entry = fds.get(fd as usize).filter(|e| e.in_use).ok_or(ERR_INVALID_FD)?;
            entry.position
        };
        let upto = position.saturating_add(size);
        let all = tagfs.read(fd, user_id, DEFAULT_GUILD, upto).map_err(tagfs_error_code)?;
        let slice = if (position as usize) < all.len() { &all[position as usize..] } else { &[] };

        let mut fds = self.fds.lock();
        if let Some(entry) = fds.get_mut(fd as usize) {
            entry.position += slice.len() as u64;
        }
        Ok(slice.to_vec())
    }

    /// TagFS's own `write` always appends (§4.10); track the new size for
    /// `stat` without a second round trip.
    fn write(&self, tagfs: &TagFs, fd: i32, bytes: &[u8], user_id: u64, now: u64) -> Result<Vec<u8>, u32> {
        let new_size = tagfs.write(fd, user_id, DEFAULT_GUILD, bytes, now).map_err(tagfs_error_code)?;
        let mut fds = self.fds.lock();
        if let Some(entry) = fds.get_mut(fd as usize) {
            entry.size = new_size;
        }
        Ok(new_size.to_le_bytes().to_vec())
    }
}

impl Default for StorageDeck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::event::payload::encode_op;
    use crate::mem::{BumpFrameAllocator, IdentityPageMapper};

    fn fixture() -> (StorageDeck, TagFs, BumpFrameAllocator, IdentityPageMapper) {
        let fs = TagFs::format(&KernelConfig { tagfs_total_blocks: 64, tagfs_total_inodes: 16, ..KernelConfig::default() });
        (StorageDeck::new(), fs, BumpFrameAllocator::new(0x1000, 16), IdentityPageMapper::new())
    }

    fn file_event(user_id: u64, op: FileOp, body: Vec<u8>) -> Event {
        Event::new(EventType::File, user_id, &encode_op(op as u8, &body))
    }

    #[test]
    fn open_write_read_stat_round_trip_through_the_path_tag() {
        let (deck, fs, frames, mapper) = fixture();

        let open_ev = file_event(1, FileOp::Open, FileOpen::encode("/newfile"));
        let fd_bytes = deck.process(&open_ev, &fs, &frames, &mapper, 10).unwrap();
        let fd = i32::from_le_bytes(fd_bytes.try_into().unwrap());

        let write_ev = file_event(1, FileOp::Write, FileWrite::encode(fd, b"hello"));
        let size_bytes = deck.process(&write_ev, &fs, &frames, &mapper, 11).unwrap();
        assert_eq!(u64::from_le_bytes(size_bytes.try_into().unwrap()), 5);

        let read_ev = file_event(1, FileOp::Read, FileRead::encode(fd, 5));
        let read_bytes = deck.process(&read_ev, &fs, &frames, &mapper, 12).unwrap();
        assert_eq!(read_bytes, b"hello");

        let stat_ev = file_event(1, FileOp::Stat, FileTagGet::encode(fd));
        let stat_bytes = deck.process(&stat_ev, &fs, &frames, &mapper, 13).unwrap();
        assert_eq!(u64::from_le_bytes(stat_bytes.try_into().unwrap()), 5);
    }

    #[test]
    fn reopening_the_same_path_reuses_the_inode() {
        let (deck, fs, frames, mapper) = fixture();
        let first = deck.process(&file_event(1, FileOp::Open, FileOpen::encode("/a")), &fs, &frames, &mapper, 0).unwrap();
        let fd1 = i32::from_le_bytes(first.try_into().unwrap());
        deck.process(&file_event(1, FileOp::Write, FileWrite::encode(fd1, b"x")), &fs, &frames, &mapper, 1).unwrap();
        deck.process(&file_event(1, FileOp::Close, FileTagGet::encode(fd1)), &fs, &frames, &mapper, 1).unwrap();

        let second = deck.process(&file_event(1, FileOp::Open, FileOpen::encode("/a")), &fs, &frames, &mapper, 2).unwrap();
        let fd2 = i32::from_le_bytes(second.try_into().unwrap());
        let stat = deck.process(&file_event(1, FileOp::Stat, FileTagGet::encode(fd2)), &fs, &frames, &mapper, 3).unwrap();
        assert_eq!(u64::from_le_bytes(stat.try_into().unwrap()), 1);
    }

    #[test]
    fn create_tagged_is_queryable_by_its_seed_tags() {
        let (deck, fs, frames, mapper) = fixture();
        let body = FileCreateTagged::encode("/photos/a.jpg", &[("kind", "photo")]);
        let ev = file_event(1, FileOp::CreateTagged, body);
        let id_bytes = deck.process(&ev, &fs, &frames, &mapper, 0).unwrap();
        let id = u64::from_le_bytes(id_bytes.try_into().unwrap());

        let query_ev = file_event(1, FileOp::Query, FileQuery::encode(QueryMode::And, &[("kind", "photo")]));
        let out = deck.process(&query_ev, &fs, &frames, &mapper, 0).unwrap();
        let found = u64::from_le_bytes(out[..8].try_into().unwrap());
        assert_eq!(found, id);
    }

    #[test]
    fn memory_alloc_rounds_up_to_whole_frames_and_free_does_not_error() {
        let (deck, fs, frames, mapper) = fixture();
        let alloc_ev = Event::new(EventType::Memory, 1, &encode_op(MemoryOp::Alloc as u8, &MemoryAlloc::encode(1)));
        let addr_bytes = deck.process(&alloc_ev, &fs, &frames, &mapper, 0).unwrap();
        let addr = u64::from_le_bytes(addr_bytes.try_into().unwrap());

        let free_ev = Event::new(EventType::Memory, 1, &encode_op(MemoryOp::Free as u8, &MemoryFree::encode(addr)));
        assert!(deck.process(&free_ev, &fs, &frames, &mapper, 0).is_ok());
    }

    #[test]
    fn memory_map_then_duplicate_map_is_rejected() {
        let (deck, fs, frames, mapper) = fixture();
        let map_ev = Event::new(EventType::Memory, 1, &encode_op(MemoryOp::Map as u8, &MemoryMap::encode(1, 0x2000, 0x3000)));
        assert!(deck.process(&map_ev, &fs, &frames, &mapper, 0).is_ok());
        let dup = deck.process(&map_ev, &fs, &frames, &mapper, 0);
        assert_eq!(dup, Err(ERR_MAP_CONFLICT));
    }

    #[test]
    fn read_past_end_of_file_returns_only_whats_there() {
        let (deck, fs, frames, mapper) = fixture();
        let open = deck.process(&file_event(1, FileOp::Open, FileOpen::encode("/short")), &fs, &frames, &mapper, 0).unwrap();
        let fd = i32::from_le_bytes(open.try_into().unwrap());
        deck.process(&file_event(1, FileOp::Write, FileWrite::encode(fd, b"hi")), &fs, &frames, &mapper, 1).unwrap();
        let read = deck.process(&file_event(1, FileOp::Read, FileRead::encode(fd, 100)), &fs, &frames, &mapper, 2).unwrap();
        assert_eq!(read, b"hi");
    }
}
