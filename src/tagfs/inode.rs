//! Inode shape and capability checks (§3 `FileInode`, §4.10 "Capabilities").

use bitflags::bitflags;

use crate::config::{DIRECT_BLOCKS, MAX_TAGS_PER_INODE};
use crate::tagfs::tag::Tag;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const SHARE = 1 << 3;
        const DELETE = 1 << 4;
        const METADATA = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    Private,
    Guild,
    Public,
}

/// Uid reserved for the administrator identity that can always manage
/// ownership/scope, regardless of capability bits (§4.10: "the wizard (uid 0)").
pub const WIZARD_UID: u64 = 0;

#[derive(Clone)]
pub struct FileInode {
    pub inode_id: u64,
    pub size: u64,
    pub ctime: u64,
    pub mtime: u64,
    pub owner_id: u64,
    pub guild_id: u64,
    pub capabilities: Capabilities,
    pub access_scope: AccessScope,
    pub tags: arrayvec::ArrayVec<Tag, MAX_TAGS_PER_INODE>,
    pub direct_blocks: [Option<u64>; DIRECT_BLOCKS],
    pub indirect_block: Option<u64>,
    pub double_indirect_block: Option<u64>,
    pub flags: u32,
}

impl FileInode {
    pub fn new(inode_id: u64, owner_id: u64, guild_id: u64, now: u64) -> Self {
        Self {
            inode_id,
            size: 0,
            ctime: now,
            mtime: now,
            owner_id,
            guild_id,
            capabilities: Capabilities::READ | Capabilities::WRITE | Capabilities::METADATA,
            access_scope: AccessScope::Private,
            tags: arrayvec::ArrayVec::new(),
            direct_blocks: [None; DIRECT_BLOCKS],
            indirect_block: None,
            double_indirect_block: None,
            flags: 0,
        }
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// `check_capability` (§4.10): the capability bit must be set *and* the
    /// scope must grant access to `(user, guild)`.
    pub fn check_capability(&self, user_id: u64, guild_id: u64, cap: Capabilities) -> bool {
        if !self.capabilities.contains(cap) {
            return false;
        }
        match self.access_scope {
            AccessScope::Private => user_id == self.owner_id,
            AccessScope::Guild => user_id == self.owner_id || guild_id == self.guild_id,
            AccessScope::Public => true,
        }
    }

    /// Ownership transfer and scope/guild changes are gated on the current
    /// owner or the wizard uid (§4.10).
    pub fn may_administer(&self, user_id: u64) -> bool {
        user_id == self.owner_id || user_id == WIZARD_UID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_scope_only_grants_owner() {
        let inode = FileInode::new(1, 42, 7, 0);
        assert!(inode.check_capability(42, 7, Capabilities::READ));
        assert!(!inode.check_capability(99, 7, Capabilities::READ));
    }

    #[test]
    fn guild_scope_grants_owner_or_matching_guild() {
        let mut inode = FileInode::new(1, 42, 7, 0);
        inode.access_scope = AccessScope::Guild;
        assert!(inode.check_capability(99, 7, Capabilities::READ));
        assert!(!inode.check_capability(99, 8, Capabilities::READ));
    }

    #[test]
    fn public_scope_grants_anyone_with_the_bit_set() {
        let mut inode = FileInode::new(1, 42, 7, 0);
        inode.access_scope = AccessScope::Public;
        assert!(inode.check_capability(1234, 999, Capabilities::READ));
        assert!(!inode.check_capability(1234, 999, Capabilities::DELETE));
    }

    #[test]
    fn only_owner_or_wizard_may_administer() {
        let inode = FileInode::new(1, 42, 7, 0);
        assert!(inode.may_administer(42));
        assert!(inode.may_administer(WIZARD_UID));
        assert!(!inode.may_administer(7));
    }
}
