//! The Task subsystem: TCB, lifecycle, and the task table (§3, §4.8).
//!
//! Cooperative scheduling lives in [`scheduler`], health bookkeeping in
//! [`health`], and group membership in [`group`]. This module owns the TCB
//! shape and the table it lives in, since every other submodule operates on
//! slots in that same table.

pub mod group;
pub mod health;
pub mod scheduler;

use spin::Mutex;

use crate::config::{DEFAULT_STACK_SIZE, MAX_TASKS};
use health::Health;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Processing,
    WaitingIo,
    WaitingEvent,
    Drowsy,
    Sleeping,
    Hibernating,
    Throttled,
    Stalled,
    Dead,
}

/// Saved cooperative-switch state. The actual register save/restore is
/// arch-specific context-switch glue — out of scope here (§1) — so this is
/// the opaque handle the scheduler threads through `scheduler_yield`
/// without interpreting its contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskContext {
    pub stack_pointer: u64,
}

/// A task control block (§3 `Task`).
#[derive(Clone)]
pub struct Tcb {
    pub id: u64,
    pub name: heapless::String<32>,
    pub parent_id: u64,
    pub group_id: Option<u32>,

    pub energy_requested: u8,
    pub energy_allocated: u8,
    pub energy_efficiency: u8,

    pub state: TaskState,
    pub health: Health,

    pub creation_time: u64,
    pub last_run_time: u64,
    pub total_runtime: u64,
    pub sleep_until: u64,
    pub last_progress_time: u64,
    pub error_count: u32,
    pub run_count: u64,

    pub stack_base: u64,
    pub stack_size: usize,
    pub entry_point: u64,
    pub args: u64,
    pub page_table: Option<u64>,

    pub context: TaskContext,
    pub mailbox_id: u64,
}

impl Tcb {
    fn new(id: u64, name: &str, parent_id: u64, entry_point: u64, energy: u8, now: u64) -> Self {
        Self {
            id,
            name: heapless::String::try_from(name).unwrap_or_default(),
            parent_id,
            group_id: None,
            energy_requested: energy,
            energy_allocated: energy,
            energy_efficiency: 100,
            state: TaskState::Running,
            health: Health::perfect(),
            creation_time: now,
            last_run_time: now,
            total_runtime: 0,
            sleep_until: 0,
            last_progress_time: now,
            error_count: 0,
            run_count: 0,
            stack_base: 0,
            stack_size: DEFAULT_STACK_SIZE,
            entry_point,
            args: 0,
            page_table: None,
            context: TaskContext::default(),
            mailbox_id: id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    TableFull,
    NotFound,
}

struct TaskTableInner {
    slots: arrayvec::ArrayVec<Option<Tcb>, MAX_TASKS>,
    next_id: u64,
}

/// The system-wide task table: one coarse spinlock (§5: "Task table... each
/// has one coarse spinlock").
pub struct TaskTable {
    inner: Mutex<TaskTableInner>,
}

impl TaskTable {
    pub fn new() -> Self {
        let mut slots = arrayvec::ArrayVec::new();
        for _ in 0..MAX_TASKS {
            slots.push(None);
        }
        Self { inner: Mutex::new(TaskTableInner { slots, next_id: 1 }) }
    }

    /// Creates a task in `Running` state (§4.8: "Initial state `running`").
    pub fn spawn(&self, name: &str, parent_id: u64, entry_point: u64, energy: u8, now: u64) -> Result<u64, TaskError> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.iter().position(|s| s.is_none()).ok_or(TaskError::TableFull)?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots[slot] = Some(Tcb::new(id, name, parent_id, entry_point, energy, now));
        Ok(id)
    }

    pub fn with_task<R>(&self, id: u64, f: impl FnOnce(&Tcb) -> R) -> Result<R, TaskError> {
        let inner = self.inner.lock();
        inner.slots.iter().flatten().find(|t| t.id == id).map(f).ok_or(TaskError::NotFound)
    }

    pub fn with_task_mut<R>(&self, id: u64, f: impl FnOnce(&mut Tcb) -> R) -> Result<R, TaskError> {
        let mut inner = self.inner.lock();
        inner.slots.iter_mut().flatten().find(|t| t.id == id).map(f).ok_or(TaskError::NotFound)
    }

    /// Releases the task's table slot (§3: "kill... frees stack, mailbox, TCB").
    /// The stack and mailbox themselves are released by the caller (Operations
    /// deck / IPC), since this table does not own either.
    pub fn remove(&self, id: u64) -> Result<Tcb, TaskError> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.iter().position(|s| matches!(s, Some(t) if t.id == id)).ok_or(TaskError::NotFound)?;
        Ok(inner.slots[slot].take().unwrap())
    }

    pub fn for_each_mut(&self, mut f: impl FnMut(&mut Tcb)) {
        let mut inner = self.inner.lock();
        for task in inner.slots.iter_mut().flatten() {
            f(task);
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().slots.iter().flatten().count()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}
