//! TagFS: the tag-based filesystem (§4.10).
//!
//! Files are identified by a numeric inode id and described by a set of
//! `(key, value)` tags rather than a path hierarchy — `create_tagged` takes
//! the place of `mkdir -p` + `open(O_CREAT)`. One coarse spinlock protects
//! the whole store (§5), the same discipline the routing table and IPC
//! mailboxes use.

pub mod block;
pub mod disk;
pub mod tag;

pub mod inode;

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{
    BLOCK_SIZE, DIRECT_BLOCKS, KernelConfig, MAX_CONTEXT_TAGS, MAX_OPEN_FILES, MAX_TAGS_PER_INODE, PTRS_PER_BLOCK,
};

use block::{locate, Bitmap, BlockLocation};
use inode::{AccessScope, Capabilities, FileInode};
use tag::{Tag, TagIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFsError {
    NoSpace,
    NotFound,
    PermissionDenied,
    InvalidFd,
    TooBig,
    TagIndexFull,
}

struct OpenFile {
    inode_id: u64,
}

struct Inner {
    inodes: Vec<Option<FileInode>>,
    inode_bitmap: Bitmap,
    block_bitmap: Bitmap,
    blocks: Vec<[u8; BLOCK_SIZE]>,
    tag_index: TagIndex,
    open_files: arrayvec::ArrayVec<Option<OpenFile>, MAX_OPEN_FILES>,
}

impl Inner {
    fn new(total_blocks: usize, total_inodes: usize) -> Self {
        let mut block_bitmap = Bitmap::new(total_blocks);
        // Block 0 is the superblock; never hand it out as a data/indirect block.
        let _ = block_bitmap.alloc_first_clear();
        let mut open_files = arrayvec::ArrayVec::new();
        for _ in 0..MAX_OPEN_FILES {
            open_files.push(None);
        }
        Self {
            inodes: vec![None; total_inodes],
            inode_bitmap: Bitmap::new(total_inodes),
            block_bitmap,
            blocks: vec![[0u8; BLOCK_SIZE]; total_blocks],
            tag_index: TagIndex::new(),
            open_files,
        }
    }

    fn alloc_block(&mut self) -> Result<usize, TagFsError> {
        self.block_bitmap.alloc_first_clear().ok_or(TagFsError::NoSpace)
    }

    fn read_ptr(&self, container_block: usize, index: usize) -> Option<usize> {
        let off = index * 8;
        let v = u64::from_le_bytes(self.blocks[container_block][off..off + 8].try_into().unwrap());
        if v == 0 {
            None
        } else {
            Some(v as usize)
        }
    }

    fn write_ptr(&mut self, container_block: usize, index: usize, value: usize) {
        let off = index * 8;
        self.blocks[container_block][off..off + 8].copy_from_slice(&(value as u64).to_le_bytes());
    }

    /// Resolves (and lazily allocates) the physical block backing logical
    /// block `logical` of `inode_id`, walking the indirect chains as needed
    /// (§4.10 "indirect-block addressing").
    fn block_for_write(&mut self, inode_id: u64, logical: usize) -> Result<usize, TagFsError> {
        match locate(logical) {
            BlockLocation::TooBig => Err(TagFsError::TooBig),
            BlockLocation::Direct(i) => {
                let existing = self.inodes[inode_id as usize].as_ref().unwrap().direct_blocks[i];
                if let Some(b) = existing {
                    return Ok(b as usize);
                }
                let b = self.alloc_block()?;
                self.inodes[inode_id as usize].as_mut().unwrap().direct_blocks[i] = Some(b as u64);
                Ok(b)
            }
            BlockLocation::Indirect { index } => {
                let container = self.ensure_indirect_block(inode_id)?;
                self.ensure_ptr(container, index)
            }
            BlockLocation::DoubleIndirect { level1, level2 } => {
                let double = self.ensure_double_indirect_block(inode_id)?;
                let l1 = self.ensure_ptr(double, level1)?;
                self.ensure_ptr(l1, level2)
            }
        }
    }

    fn ensure_indirect_block(&mut self, inode_id: u64) -> Result<usize, TagFsError> {
        if let Some(b) = self.inodes[inode_id as usize].as_ref().unwrap().indirect_block {
            return Ok(b as usize);
        }
        let b = self.alloc_block()?;
        self.inodes[inode_id as usize].as_mut().unwrap().indirect_block = Some(b as u64);
        Ok(b)
    }

    fn ensure_double_indirect_block(&mut self, inode_id: u64) -> Result<usize, TagFsError> {
        if let Some(b) = self.inodes[inode_id as usize].as_ref().unwrap().double_indirect_block {
            return Ok(b as usize);
        }
        let b = self.alloc_block()?;
        self.inodes[inode_id as usize].as_mut().unwrap().double_indirect_block = Some(b as u64);
        Ok(b)
    }

    fn ensure_ptr(&mut self, container_block: usize, index: usize) -> Result<usize, TagFsError> {
        if let Some(b) = self.read_ptr(container_block, index) {
            return Ok(b);
        }
        let b = self.alloc_block()?;
        self.write_ptr(container_block, index, b);
        Ok(b)
    }

    fn block_for_read(&self, inode: &FileInode, logical: usize) -> Option<usize> {
        match locate(logical) {
            BlockLocation::Direct(i) => inode.direct_blocks[i].map(|b| b as usize),
            BlockLocation::Indirect { index } => self.read_ptr(inode.indirect_block? as usize, index),
            BlockLocation::DoubleIndirect { level1, level2 } => {
                let l1 = self.read_ptr(inode.double_indirect_block? as usize, level1)?;
                self.read_ptr(l1, level2)
            }
            BlockLocation::TooBig => None,
        }
    }

    fn write_bytes(&mut self, inode_id: u64, bytes: &[u8], now: u64) -> Result<u64, TagFsError> {
        let mut written = 0usize;
        while written < bytes.len() {
            let current_size = self.inodes[inode_id as usize].as_ref().unwrap().size as usize;
            let logical = current_size / BLOCK_SIZE;
            let in_block_off = current_size % BLOCK_SIZE;
            let block_no = self.block_for_write(inode_id, logical)?;
            let space = BLOCK_SIZE - in_block_off;
            let chunk = space.min(bytes.len() - written);
            self.blocks[block_no][in_block_off..in_block_off + chunk]
                .copy_from_slice(&bytes[written..written + chunk]);
            written += chunk;
            let inode = self.inodes[inode_id as usize].as_mut().unwrap();
            inode.size += chunk as u64;
            inode.mtime = now;
        }
        Ok(self.inodes[inode_id as usize].as_ref().unwrap().size)
    }

    fn read_bytes(&self, inode_id: u64, size: u64) -> Vec<u8> {
        let inode = self.inodes[inode_id as usize].as_ref().unwrap();
        let total = size.min(inode.size) as usize;
        let mut out = Vec::with_capacity(total);
        let mut read = 0;
        while read < total {
            let logical = read / BLOCK_SIZE;
            let in_block_off = read % BLOCK_SIZE;
            let Some(block_no) = self.block_for_read(inode, logical) else { break };
            let space = BLOCK_SIZE - in_block_off;
            let chunk = space.min(total - read);
            out.extend_from_slice(&self.blocks[block_no][in_block_off..in_block_off + chunk]);
            read += chunk;
        }
        out
    }

    fn free_ptr_block(&mut self, container_block: usize) {
        for i in 0..PTRS_PER_BLOCK {
            if let Some(b) = self.read_ptr(container_block, i) {
                self.block_bitmap.free(b);
            }
        }
    }

    /// Releases every block an inode owns: direct pointers, then the
    /// single- and double-indirect chains (§4.10 "inode free path").
    fn free_inode_blocks(&mut self, inode: &FileInode) {
        for b in inode.direct_blocks.iter().flatten() {
            self.block_bitmap.free(*b as usize);
        }
        if let Some(ib) = inode.indirect_block {
            self.free_ptr_block(ib as usize);
            self.block_bitmap.free(ib as usize);
        }
        if let Some(db) = inode.double_indirect_block {
            for i in 0..PTRS_PER_BLOCK {
                if let Some(l1) = self.read_ptr(db as usize, i) {
                    self.free_ptr_block(l1);
                    self.block_bitmap.free(l1);
                }
            }
            self.block_bitmap.free(db as usize);
        }
    }
}

/// A session's standing tag filter: only files whose tag set is a superset
/// of the context are visible to `query_in_context` (§4.10 "user_context",
/// capped at [`MAX_CONTEXT_TAGS`]).
#[derive(Default, Clone)]
pub struct UserContext {
    tags: arrayvec::ArrayVec<Tag, MAX_CONTEXT_TAGS>,
}

impl UserContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: Tag) -> bool {
        self.tags.try_push(tag).is_ok()
    }
}

pub struct TagFs {
    inner: Mutex<Inner>,
}

impl TagFs {
    /// `format`: builds a fresh, empty store sized by `config` (§4.10).
    pub fn format(config: &KernelConfig) -> Self {
        Self { inner: Mutex::new(Inner::new(config.tagfs_total_blocks, config.tagfs_total_inodes)) }
    }

    pub fn create_file(&self, owner_id: u64, guild_id: u64, now: u64) -> Result<u64, TagFsError> {
        self.create_tagged(owner_id, guild_id, now, &[])
    }

    /// `create_tagged`: allocates an inode and seeds its tag set, indexing
    /// each tag as it's added (§4.10).
    pub fn create_tagged(
        &self,
        owner_id: u64,
        guild_id: u64,
        now: u64,
        tags: &[(&str, &str)],
    ) -> Result<u64, TagFsError> {
        let mut inner = self.inner.lock();
        let id = inner.inode_bitmap.alloc_first_clear().ok_or(TagFsError::NoSpace)? as u64;
        let mut file_inode = FileInode::new(id, owner_id, guild_id, now);
        for (key, value) in tags.iter().take(MAX_TAGS_PER_INODE) {
            let _ = file_inode.tags.try_push(Tag::new(key, value));
        }
        let seeded: Vec<Tag> = file_inode.tags.iter().copied().collect();
        inner.inodes[id as usize] = Some(file_inode);
        for tag in seeded {
            inner.tag_index.add(tag, id).map_err(|_| TagFsError::TagIndexFull)?;
        }
        Ok(id)
    }

    /// `open`: checks `cap` against the inode's capability/scope gate before
    /// handing back a file descriptor (§4.10).
    pub fn open(&self, inode_id: u64, user_id: u64, guild_id: u64, cap: Capabilities) -> Result<i32, TagFsError> {
        let mut inner = self.inner.lock();
        if !inner.inodes.get(inode_id as usize).map(Option::is_some).unwrap_or(false) {
            return Err(TagFsError::NotFound);
        }
        let allowed = inner.inodes[inode_id as usize].as_ref().unwrap().check_capability(user_id, guild_id, cap);
        if !allowed {
            return Err(TagFsError::PermissionDenied);
        }
        let slot = inner.open_files.iter().position(Option::is_none).ok_or(TagFsError::NoSpace)?;
        inner.open_files[slot] = Some(OpenFile { inode_id });
        Ok(slot as i32)
    }

    pub fn close(&self, fd: i32) -> Result<(), TagFsError> {
        let mut inner = self.inner.lock();
        let slot = inner.open_files.get_mut(fd as usize).ok_or(TagFsError::InvalidFd)?;
        if slot.is_none() {
            return Err(TagFsError::InvalidFd);
        }
        *slot = None;
        Ok(())
    }

    fn resolve_fd(inner: &Inner, fd: i32) -> Result<u64, TagFsError> {
        inner
            .open_files
            .get(fd as usize)
            .and_then(|s| s.as_ref())
            .map(|f| f.inode_id)
            .ok_or(TagFsError::InvalidFd)
    }

    pub fn read(&self, fd: i32, user_id: u64, guild_id: u64, size: u64) -> Result<Vec<u8>, TagFsError> {
        let mut inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        let inode = inner.inodes[inode_id as usize].as_ref().unwrap();
        if !inode.check_capability(user_id, guild_id, Capabilities::READ) {
            return Err(TagFsError::PermissionDenied);
        }
        Ok(inner.read_bytes(inode_id, size))
    }

    /// `write`: always appends — there is no seek position in the wire
    /// protocol, so every write extends `size` monotonically (§4.10).
    pub fn write(&self, fd: i32, user_id: u64, guild_id: u64, bytes: &[u8], now: u64) -> Result<u64, TagFsError> {
        let mut inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        let allowed = inner.inodes[inode_id as usize].as_ref().unwrap().check_capability(user_id, guild_id, Capabilities::WRITE);
        if !allowed {
            return Err(TagFsError::PermissionDenied);
        }
        inner.write_bytes(inode_id, bytes, now)
    }

    pub fn stat(&self, fd: i32, user_id: u64, guild_id: u64) -> Result<FileInode, TagFsError> {
        let inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        let inode = inner.inodes[inode_id as usize].as_ref().unwrap();
        if !inode.check_capability(user_id, guild_id, Capabilities::METADATA) {
            return Err(TagFsError::PermissionDenied);
        }
        Ok(inode.clone())
    }

    pub fn tag_add(&self, fd: i32, user_id: u64, guild_id: u64, key: &str, value: &str) -> Result<(), TagFsError> {
        let mut inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        let allowed = inner.inodes[inode_id as usize].as_ref().unwrap().check_capability(user_id, guild_id, Capabilities::METADATA);
        if !allowed {
            return Err(TagFsError::PermissionDenied);
        }
        let tag = Tag::new(key, value);
        let file_inode = inner.inodes[inode_id as usize].as_mut().unwrap();
        if file_inode.has_tag(&tag) {
            return Ok(());
        }
        file_inode.tags.try_push(tag).map_err(|_| TagFsError::TagIndexFull)?;
        inner.tag_index.add(tag, inode_id).map_err(|_| TagFsError::TagIndexFull)
    }

    pub fn tag_remove(&self, fd: i32, user_id: u64, guild_id: u64, key: &str, value: &str) -> Result<(), TagFsError> {
        let mut inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        let allowed = inner.inodes[inode_id as usize].as_ref().unwrap().check_capability(user_id, guild_id, Capabilities::METADATA);
        if !allowed {
            return Err(TagFsError::PermissionDenied);
        }
        let tag = Tag::new(key, value);
        let file_inode = inner.inodes[inode_id as usize].as_mut().unwrap();
        if let Some(pos) = file_inode.tags.iter().position(|t| *t == tag) {
            file_inode.tags.remove(pos);
        }
        inner.tag_index.remove(&tag, inode_id);
        Ok(())
    }

    pub fn tag_get(&self, fd: i32) -> Result<Vec<Tag>, TagFsError> {
        let inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        Ok(inner.inodes[inode_id as usize].as_ref().unwrap().tags.iter().copied().collect())
    }

    /// `query`: delegates to the tag index's AND/OR/NOT combinators (§4.10).
    pub fn query_and(&self, tags: &[Tag]) -> Vec<u64> {
        self.inner.lock().tag_index.query_and(tags)
    }

    pub fn query_or(&self, tags: &[Tag]) -> Vec<u64> {
        self.inner.lock().tag_index.query_or(tags)
    }

    pub fn query_not(&self, tags: &[Tag]) -> Vec<u64> {
        self.inner.lock().tag_index.query_not(tags)
    }

    /// True if `inode_id` carries every tag in `context` (AND-filter).
    pub fn context_matches(&self, inode_id: u64, context: &UserContext) -> bool {
        let inner = self.inner.lock();
        let Some(Some(inode)) = inner.inodes.get(inode_id as usize) else {
            return false;
        };
        context.tags.iter().all(|t| inode.has_tag(t))
    }

    /// Soft erase: tags the file `trashed=true` rather than freeing it
    /// (§4.10 "erase... trash via a tag vs. hard-erase").
    pub fn trash(&self, fd: i32, user_id: u64, guild_id: u64, now: u64) -> Result<(), TagFsError> {
        let mut inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        let allowed = inner.inodes[inode_id as usize].as_ref().unwrap().check_capability(user_id, guild_id, Capabilities::DELETE);
        if !allowed {
            return Err(TagFsError::PermissionDenied);
        }
        let tag = Tag::new("trashed", "true");
        inner.inodes[inode_id as usize].as_mut().unwrap().mtime = now;
        let file_inode = inner.inodes[inode_id as usize].as_mut().unwrap();
        if !file_inode.has_tag(&tag) {
            let _ = file_inode.tags.try_push(tag);
            inner.tag_index.add(tag, inode_id).map_err(|_| TagFsError::TagIndexFull)?;
        }
        Ok(())
    }

    /// Hard erase: frees the inode's blocks and every tag-index reference,
    /// then returns the slot to the free pool (§4.10).
    pub fn erase(&self, fd: i32, user_id: u64, guild_id: u64) -> Result<(), TagFsError> {
        let mut inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        let allowed = inner.inodes[inode_id as usize].as_ref().unwrap().check_capability(user_id, guild_id, Capabilities::DELETE);
        if !allowed {
            return Err(TagFsError::PermissionDenied);
        }
        let inode = inner.inodes[inode_id as usize].take().unwrap();
        inner.free_inode_blocks(&inode);
        inner.tag_index.remove_inode_everywhere(inode_id);
        inner.inode_bitmap.free(inode_id as usize);
        if let Some(slot) = inner.open_files.iter_mut().find(|s| s.as_ref().map(|f| f.inode_id) == Some(inode_id)) {
            *slot = None;
        }
        Ok(())
    }

    /// Ownership/scope changes are gated on the current owner or the wizard
    /// uid, independent of the normal capability bits (§4.10).
    pub fn transfer_ownership(&self, fd: i32, requester: u64, new_owner: u64) -> Result<(), TagFsError> {
        let mut inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        let inode = inner.inodes[inode_id as usize].as_mut().unwrap();
        if !inode.may_administer(requester) {
            return Err(TagFsError::PermissionDenied);
        }
        inode.owner_id = new_owner;
        Ok(())
    }

    pub fn set_scope(&self, fd: i32, requester: u64, scope: AccessScope) -> Result<(), TagFsError> {
        let mut inner = self.inner.lock();
        let inode_id = Self::resolve_fd(&inner, fd)?;
        let inode = inner.inodes[inode_id as usize].as_mut().unwrap();
        if !inode.may_administer(requester) {
            return Err(TagFsError::PermissionDenied);
        }
        inode.access_scope = scope;
        Ok(())
    }

    /// Rebuilds the tag index from every live inode's tag set. A no-op on a
    /// freshly-formatted store, used after a crash-recovery load where the
    /// index block wasn't trusted (§4.10).
    pub fn index_rebuild(&self) {
        let mut inner = self.inner.lock();
        inner.tag_index.clear();
        let live: Vec<(u64, Vec<Tag>)> = inner
            .inodes
            .iter()
            .flatten()
            .map(|i| (i.inode_id, i.tags.iter().copied().collect()))
            .collect();
        for (inode_id, tags) in live {
            for tag in tags {
                let _ = inner.tag_index.add(tag, inode_id);
            }
        }
    }

    pub fn free_blocks(&self) -> usize {
        let inner = self.inner.lock();
        inner.block_bitmap.len() - inner.block_bitmap.count_set()
    }

    pub fn free_inodes(&self) -> usize {
        let inner = self.inner.lock();
        inner.inode_bitmap.len() - inner.inode_bitmap.count_set()
    }
}

#[cfg(feature = "tagfs-disk-sync")]
mod sync_impl {
    use super::*;
    use disk::{store_superblock, BlockDevice, DiskError, Superblock};

    const TAG_RECORD_SIZE: usize = crate::config::TAG_KEY_LEN + crate::config::TAG_VALUE_LEN;
    const INODE_RECORD_SIZE: usize = 8 * 6 + 1 + 1 + 4 + DIRECT_BLOCKS * 8 + 8 + 8 + 1 + MAX_TAGS_PER_INODE * TAG_RECORD_SIZE;

    fn encode_inode(inode: &FileInode) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        let mut w = 0usize;
        macro_rules! put_u64 {
            ($v:expr) => {{
                buf[w..w + 8].copy_from_slice(&($v as u64).to_le_bytes());
                w += 8;
            }};
        }
        put_u64!(inode.inode_id);
        put_u64!(inode.size);
        put_u64!(inode.ctime);
        put_u64!(inode.mtime);
        put_u64!(inode.owner_id);
        put_u64!(inode.guild_id);
        buf[w] = inode.capabilities.bits();
        w += 1;
        buf[w] = match inode.access_scope {
            AccessScope::Private => 0,
            AccessScope::Guild => 1,
            AccessScope::Public => 2,
        };
        w += 1;
        buf[w..w + 4].copy_from_slice(&inode.flags.to_le_bytes());
        w += 4;
        for slot in inode.direct_blocks.iter() {
            put_u64!(slot.unwrap_or(0));
        }
        put_u64!(inode.indirect_block.unwrap_or(0));
        put_u64!(inode.double_indirect_block.unwrap_or(0));
        buf[w] = inode.tags.len() as u8;
        w += 1;
        for tag in inode.tags.iter() {
            let bytes = tag.to_bytes();
            buf[w..w + bytes.len()].copy_from_slice(&bytes);
            w += bytes.len();
        }
        debug_assert!(w <= INODE_RECORD_SIZE);
        buf
    }

    fn decode_inode(buf: &[u8; BLOCK_SIZE]) -> FileInode {
        let mut r = 0usize;
        macro_rules! get_u64 {
            () => {{
                let v = u64::from_le_bytes(buf[r..r + 8].try_into().unwrap());
                r += 8;
                v
            }};
        }
        let inode_id = get_u64!();
        let size = get_u64!();
        let ctime = get_u64!();
        let mtime = get_u64!();
        let owner_id = get_u64!();
        let guild_id = get_u64!();
        let capabilities = Capabilities::from_bits_truncate(buf[r]);
        r += 1;
        let access_scope = match buf[r] {
            1 => AccessScope::Guild,
            2 => AccessScope::Public,
            _ => AccessScope::Private,
        };
        r += 1;
        let flags = u32::from_le_bytes(buf[r..r + 4].try_into().unwrap());
        r += 4;
        let mut direct_blocks = [None; DIRECT_BLOCKS];
        for slot in direct_blocks.iter_mut() {
            let v = get_u64!();
            *slot = if v == 0 { None } else { Some(v) };
        }
        let indirect = get_u64!();
        let double = get_u64!();
        let tag_count = buf[r] as usize;
        r += 1;
        let mut tags = arrayvec::ArrayVec::new();
        for _ in 0..tag_count {
            let tag = Tag::from_bytes(&buf[r..r + TAG_RECORD_SIZE]);
            r += TAG_RECORD_SIZE;
            let _ = tags.try_push(tag);
        }
        FileInode {
            inode_id,
            size,
            ctime,
            mtime,
            owner_id,
            guild_id,
            capabilities,
            access_scope,
            tags,
            direct_blocks,
            indirect_block: if indirect == 0 { None } else { Some(indirect) },
            double_indirect_block: if double == 0 { None } else { Some(double) },
            flags,
        }
    }

    impl TagFs {
        /// Persists the superblock, every live inode (one block each,
        /// ascending id), and every block the live bitmap marks in use
        /// (§6: "superblock first, then inode table ascending, then live
        /// data blocks").
        pub fn sync(&self, device: &dyn BlockDevice) -> Result<(), DiskError> {
            let inner = self.inner.lock();
            let inode_table_block = 1u64;
            let total_inodes = inner.inodes.len() as u64;
            let data_blocks_start = inode_table_block + total_inodes;
            let sb = Superblock::new(
                inner.block_bitmap.len() as u64,
                total_inodes,
                inode_table_block,
                data_blocks_start,
                0,
            );
            let mut sb = sb;
            sb.free_blocks = self.free_blocks() as u64;
            sb.free_inodes = self.free_inodes() as u64;
            store_superblock(device, &sb)?;

            for (i, slot) in inner.inodes.iter().enumerate() {
                if let Some(inode) = slot {
                    let buf = encode_inode(inode);
                    device.write_block(inode_table_block + i as u64, &buf)?;
                }
            }

            for block in 0..inner.block_bitmap.len() {
                if inner.block_bitmap.is_set(block) {
                    device.write_block(block as u64, &inner.blocks[block])?;
                }
            }
            Ok(())
        }

        pub fn load_inode_for_test(buf: &[u8; BLOCK_SIZE]) -> FileInode {
            decode_inode(buf)
        }

        pub fn encode_inode_for_test(inode: &FileInode) -> [u8; BLOCK_SIZE] {
            encode_inode(inode)
        }
    }
}

impl Default for TagFs {
    fn default() -> Self {
        Self::format(&KernelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SIZE as BS;

    fn fs() -> TagFs {
        TagFs::format(&KernelConfig { tagfs_total_blocks: 64, tagfs_total_inodes: 16, ..KernelConfig::default() })
    }

    #[test]
    fn create_open_write_read_round_trips() {
        let fs = fs();
        let id = fs.create_file(1, 0, 10).unwrap();
        let fd = fs.open(id, 1, 0, Capabilities::WRITE).unwrap();
        fs.write(fd, 1, 0, b"hello tagfs", 11).unwrap();
        let rd_fd = fs.open(id, 1, 0, Capabilities::READ).unwrap();
        let data = fs.read(rd_fd, 1, 0, 64).unwrap();
        assert_eq!(data, b"hello tagfs");
    }

    #[test]
    fn write_spans_multiple_blocks() {
        let fs = fs();
        let id = fs.create_file(1, 0, 0).unwrap();
        let fd = fs.open(id, 1, 0, Capabilities::WRITE).unwrap();
        let chunk = alloc::vec![7u8; BS + 10];
        fs.write(fd, 1, 0, &chunk, 1).unwrap();
        let rd = fs.open(id, 1, 0, Capabilities::READ).unwrap();
        let data = fs.read(rd, 1, 0, (BS + 10) as u64).unwrap();
        assert_eq!(data.len(), BS + 10);
        assert!(data.iter().all(|&b| b == 7));
    }

    #[test]
    fn other_users_are_denied_by_private_scope() {
        let fs = fs();
        let id = fs.create_file(1, 0, 0).unwrap();
        assert_eq!(fs.open(id, 2, 0, Capabilities::READ).unwrap_err(), TagFsError::PermissionDenied);
    }

    #[test]
    fn create_tagged_indexes_every_seed_tag() {
        let fs = fs();
        let id = fs.create_tagged(1, 0, 0, &[("kind", "photo"), ("year", "2024")]).unwrap();
        assert_eq!(fs.query_and(&[Tag::new("kind", "photo")]), alloc::vec![id]);
        assert_eq!(fs.query_and(&[Tag::new("kind", "photo"), Tag::new("year", "2024")]), alloc::vec![id]);
    }

    #[test]
    fn tag_add_then_remove_updates_the_index() {
        let fs = fs();
        let id = fs.create_file(1, 0, 0).unwrap();
        let fd = fs.open(id, 1, 0, Capabilities::METADATA).unwrap();
        fs.tag_add(fd, 1, 0, "kind", "photo").unwrap();
        assert_eq!(fs.query_and(&[Tag::new("kind", "photo")]), alloc::vec![id]);
        fs.tag_remove(fd, 1, 0, "kind", "photo").unwrap();
        assert!(fs.query_and(&[Tag::new("kind", "photo")]).is_empty());
    }

    #[test]
    fn trash_tags_without_freeing_blocks() {
        let fs = fs();
        let id = fs.create_file(1, 0, 0).unwrap();
        let fd = fs.open(id, 1, 0, Capabilities::WRITE | Capabilities::DELETE).unwrap();
        fs.write(fd, 1, 0, b"keepme", 1).unwrap();
        let before = fs.free_blocks();
        fs.trash(fd, 1, 0, 2).unwrap();
        assert_eq!(fs.free_blocks(), before);
        assert_eq!(fs.query_and(&[Tag::new("trashed", "true")]), alloc::vec![id]);
    }

    #[test]
    fn erase_frees_blocks_and_drops_tag_references() {
        let fs = fs();
        let id = fs.create_tagged(1, 0, 0, &[("kind", "photo")]).unwrap();
        let fd = fs.open(id, 1, 0, Capabilities::WRITE | Capabilities::DELETE).unwrap();
        fs.write(fd, 1, 0, b"bytes", 1).unwrap();
        let before = fs.free_blocks();
        fs.erase(fd, 1, 0).unwrap();
        assert!(fs.free_blocks() > before);
        assert!(fs.query_and(&[Tag::new("kind", "photo")]).is_empty());
    }

    #[test]
    fn transfer_ownership_requires_owner_or_wizard() {
        let fs = fs();
        let id = fs.create_file(1, 0, 0).unwrap();
        let fd = fs.open(id, 1, 0, Capabilities::READ).unwrap();
        assert_eq!(fs.transfer_ownership(fd, 2, 3).unwrap_err(), TagFsError::PermissionDenied);
        fs.transfer_ownership(fd, 1, 3).unwrap();
        assert_eq!(fs.stat(fd, 3, 0).unwrap().owner_id, 3);
    }

    #[test]
    fn context_matches_requires_every_tag_present() {
        let fs = fs();
        let id = fs.create_tagged(1, 0, 0, &[("kind", "photo")]).unwrap();
        let mut ctx = UserContext::new();
        ctx.push(Tag::new("kind", "photo"));
        ctx.push(Tag::new("year", "2024"));
        assert!(!fs.context_matches(id, &ctx));

        let fd = fs.open(id, 1, 0, Capabilities::METADATA).unwrap();
        fs.tag_add(fd, 1, 0, "year", "2024").unwrap();
        assert!(fs.context_matches(id, &ctx));
    }

    #[test]
    fn index_rebuild_restores_queries_after_a_clear() {
        let fs = fs();
        let id = fs.create_tagged(1, 0, 0, &[("kind", "photo")]).unwrap();
        fs.index_rebuild();
        assert_eq!(fs.query_and(&[Tag::new("kind", "photo")]), alloc::vec![id]);
    }
}

#[cfg(all(test, feature = "tagfs-disk-sync"))]
mod sync_tests {
    use super::*;
    use disk::{BlockDevice, InMemoryBlockDevice};

    #[test]
    fn sync_writes_a_valid_superblock_and_every_live_inode() {
        let fs = TagFs::format(&KernelConfig { tagfs_total_blocks: 64, tagfs_total_inodes: 16, ..KernelConfig::default() });
        let id = fs.create_file(1, 0, 0).unwrap();
        let fd = fs.open(id, 1, 0, Capabilities::WRITE).unwrap();
        fs.write(fd, 1, 0, b"hello disk", 1).unwrap();

        let device = InMemoryBlockDevice::new(64);
        fs.sync(&device).unwrap();

        let sb = disk::load_superblock(&device).unwrap();
        assert!(sb.is_valid());
        assert_eq!(sb.total_inodes, 16);

        let mut buf = [0u8; crate::config::BLOCK_SIZE];
        device.read_block(sb.inode_table_block, &mut buf).unwrap();
        let restored = TagFs::load_inode_for_test(&buf);
        assert_eq!(restored.inode_id, id);
        assert_eq!(restored.size, 10);
    }
}
