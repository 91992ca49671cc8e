//! Cooperative round-robin scheduler (§4.8).
//!
//! The run queue is modelled as a flat ring of task ids rather than the
//! intrusive doubly linked list the spec describes — same FIFO rotation
//! semantics, without unsafe self-referential links in a `no_std` arena.

use spin::Mutex;

use crate::config::MAX_TASKS;
use crate::task::{TaskState, TaskTable};

struct RunQueueInner {
    queue: arrayvec::ArrayVec<u64, MAX_TASKS>,
}

pub struct Scheduler {
    run_queue: Mutex<RunQueueInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { run_queue: Mutex::new(RunQueueInner { queue: arrayvec::ArrayVec::new() }) }
    }

    /// Enqueues a runnable task at the tail. Spawning a task and waking a
    /// sleeping one both funnel through here.
    pub fn enqueue(&self, task_id: u64) {
        let mut inner = self.run_queue.lock();
        if !inner.queue.contains(&task_id) && inner.queue.try_push(task_id).is_err() {
            // Run queue at MAX_TASKS capacity already covers every live
            // task; this only trips on a double-enqueue bug upstream.
        }
    }

    pub fn remove(&self, task_id: u64) {
        let mut inner = self.run_queue.lock();
        if let Some(pos) = inner.queue.iter().position(|&id| id == task_id) {
            inner.queue.remove(pos);
        }
    }

    /// `scheduler_next`: pops the head, re-enqueues it at the tail (if still
    /// runnable), and returns it (§4.8).
    pub fn next(&self) -> Option<u64> {
        let mut inner = self.run_queue.lock();
        if inner.queue.is_empty() {
            return None;
        }
        let id = inner.queue.remove(0);
        let _ = inner.queue.try_push(id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.run_queue.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Wakes every sleeping task whose deadline has passed and re-enqueues it
/// (§4.8: "Sleeping tasks are wake-checked against TSC on each step").
/// Returns whether any task was woken, so a driver loop (`System::step`)
/// can treat a wake-up as work done rather than silently dropping it.
pub fn wake_expired_sleepers(table: &TaskTable, scheduler: &Scheduler, now: u64) -> bool {
    let mut woken = arrayvec::ArrayVec::<u64, MAX_TASKS>::new();
    table.for_each_mut(|task| {
        if task.state == TaskState::Sleeping && now >= task.sleep_until {
            task.state = TaskState::Running;
            let _ = woken.try_push(task.id);
        }
    });
    let any_woken = !woken.is_empty();
    for id in woken {
        scheduler.enqueue(id);
    }
    any_woken
}

/// `task_sleep`: suspends `task_id` until `wake_at`, unlinking it from the
/// run queue.
pub fn sleep(table: &TaskTable, scheduler: &Scheduler, task_id: u64, wake_at: u64) -> Result<(), crate::task::TaskError> {
    table.with_task_mut(task_id, |t| {
        t.state = TaskState::Sleeping;
        t.sleep_until = wake_at;
    })?;
    scheduler.remove(task_id);
    Ok(())
}

/// `task_wake`: explicit early wake, independent of TSC deadline.
pub fn wake(table: &TaskTable, scheduler: &Scheduler, task_id: u64) -> Result<(), crate::task::TaskError> {
    table.with_task_mut(task_id, |t| {
        if t.state == TaskState::Sleeping {
            t.state = TaskState::Running;
        }
    })?;
    scheduler.enqueue(task_id);
    Ok(())
}

/// `task_pause`: moves a running task to `throttled`, unlinked from the run
/// queue.
pub fn pause(table: &TaskTable, scheduler: &Scheduler, task_id: u64) -> Result<(), crate::task::TaskError> {
    table.with_task_mut(task_id, |t| t.state = TaskState::Throttled)?;
    scheduler.remove(task_id);
    Ok(())
}

/// `task_resume`: the inverse of [`pause`].
pub fn resume(table: &TaskTable, scheduler: &Scheduler, task_id: u64) -> Result<(), crate::task::TaskError> {
    table.with_task_mut(task_id, |t| {
        if t.state == TaskState::Throttled {
            t.state = TaskState::Running;
        }
    })?;
    scheduler.enqueue(task_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_next_rotates_to_tail() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(1);
        scheduler.enqueue(2);
        scheduler.enqueue(3);
        assert_eq!(scheduler.next(), Some(1));
        assert_eq!(scheduler.next(), Some(2));
        assert_eq!(scheduler.next(), Some(3));
        assert_eq!(scheduler.next(), Some(1));
    }

    #[test]
    fn sleeping_task_is_unlinked_then_rejoins_on_wake() {
        let table = TaskTable::new();
        let scheduler = Scheduler::new();
        let id = table.spawn("sleeper", 0, 0, 50, 0).unwrap();
        scheduler.enqueue(id);

        sleep(&table, &scheduler, id, 1000).unwrap();
        assert!(scheduler.is_empty());
        table.with_task(id, |t| assert_eq!(t.state, TaskState::Sleeping)).unwrap();

        assert!(!wake_expired_sleepers(&table, &scheduler, 500), "not due yet");
        assert!(scheduler.is_empty());

        assert!(wake_expired_sleepers(&table, &scheduler, 1500), "deadline passed");
        assert_eq!(scheduler.len(), 1);
        table.with_task(id, |t| assert_eq!(t.state, TaskState::Running)).unwrap();
    }

    #[test]
    fn pause_then_resume_relinks_task() {
        let table = TaskTable::new();
        let scheduler = Scheduler::new();
        let id = table.spawn("worker", 0, 0, 50, 0).unwrap();
        scheduler.enqueue(id);

        pause(&table, &scheduler, id).unwrap();
        assert!(scheduler.is_empty());
        resume(&table, &scheduler, id).unwrap();
        assert_eq!(scheduler.len(), 1);
    }
}
