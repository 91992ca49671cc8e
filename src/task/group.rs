//! Task groups (§4.8, §3 `TaskGroup`).

use spin::Mutex;

use crate::config::{MAX_GROUP_MEMBERS, MAX_TASK_GROUPS};

#[derive(Clone)]
pub struct TaskGroup {
    pub id: u32,
    pub name: heapless::String<32>,
    pub task_ids: arrayvec::ArrayVec<u64, MAX_GROUP_MEMBERS>,
    pub memory_limit: u64,
    pub memory_used: u64,
    pub energy_limit: u8,
    pub throttled: bool,
    pub creation_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupError {
    TableFull,
    NotFound,
    MembersFull,
}

struct Inner {
    groups: arrayvec::ArrayVec<Option<TaskGroup>, MAX_TASK_GROUPS>,
    next_id: u32,
}

/// Flat array of group descriptors, one coarse spinlock (§4.8, §5).
pub struct TaskGroups {
    inner: Mutex<Inner>,
}

impl TaskGroups {
    pub fn new() -> Self {
        let mut groups = arrayvec::ArrayVec::new();
        for _ in 0..MAX_TASK_GROUPS {
            groups.push(None);
        }
        Self { inner: Mutex::new(Inner { groups, next_id: 1 }) }
    }

    pub fn create(&self, name: &str, memory_limit: u64, energy_limit: u8, now: u64) -> Result<u32, GroupError> {
        let mut inner = self.inner.lock();
        let slot = inner.groups.iter().position(|g| g.is_none()).ok_or(GroupError::TableFull)?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.groups[slot] = Some(TaskGroup {
            id,
            name: heapless::String::try_from(name).unwrap_or_default(),
            task_ids: arrayvec::ArrayVec::new(),
            memory_limit,
            memory_used: 0,
            energy_limit,
            throttled: false,
            creation_time: now,
        });
        Ok(id)
    }

    pub fn add_member(&self, group_id: u32, task_id: u64) -> Result<(), GroupError> {
        let mut inner = self.inner.lock();
        let group = inner.groups.iter_mut().flatten().find(|g| g.id == group_id).ok_or(GroupError::NotFound)?;
        group.task_ids.try_push(task_id).map_err(|_| GroupError::MembersFull)
    }

    pub fn remove_member(&self, group_id: u32, task_id: u64) -> Result<(), GroupError> {
        let mut inner = self.inner.lock();
        let group = inner.groups.iter_mut().flatten().find(|g| g.id == group_id).ok_or(GroupError::NotFound)?;
        if let Some(pos) = group.task_ids.iter().position(|&id| id == task_id) {
            group.task_ids.remove(pos);
        }
        Ok(())
    }

    pub fn set_memory_limit(&self, group_id: u32, limit: u64) -> Result<(), GroupError> {
        let mut inner = self.inner.lock();
        let group = inner.groups.iter_mut().flatten().find(|g| g.id == group_id).ok_or(GroupError::NotFound)?;
        group.memory_limit = limit;
        Ok(())
    }

    /// Placeholder fan-out target list for `broadcast` (§4.8: "broadcast is
    /// a placeholder for the mailbox fan-out") — returns the member ids so
    /// the IPC layer can enqueue to each.
    pub fn members(&self, group_id: u32) -> Result<arrayvec::ArrayVec<u64, MAX_GROUP_MEMBERS>, GroupError> {
        let inner = self.inner.lock();
        inner.groups.iter().flatten().find(|g| g.id == group_id).map(|g| g.task_ids.clone()).ok_or(GroupError::NotFound)
    }
}

impl Default for TaskGroups {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_add_member_is_listed() {
        let groups = TaskGroups::new();
        let gid = groups.create("workers", 1 << 20, 100, 0).unwrap();
        groups.add_member(gid, 7).unwrap();
        assert_eq!(groups.members(gid).unwrap().as_slice(), &[7]);
    }

    #[test]
    fn remove_member_drops_it_from_the_list() {
        let groups = TaskGroups::new();
        let gid = groups.create("workers", 0, 100, 0).unwrap();
        groups.add_member(gid, 1).unwrap();
        groups.add_member(gid, 2).unwrap();
        groups.remove_member(gid, 1).unwrap();
        assert_eq!(groups.members(gid).unwrap().as_slice(), &[2]);
    }
}
