//! Operations deck (§4.6): process lifecycle and (stubbed) IPC operations.
//!
//! Process ops carry no explicit caller-task field in most of their
//! payloads, so `event.user_id` doubles as the acting task's own id for
//! self-targeting ops (`Exit`, `Wait`, `GetPid`); `Kill`/`Signal` name an
//! explicit target via their own payload.

use alloc::vec::Vec;

use crate::event::payload::{split_op, ProcCreate, ProcSignal, ProcessOp, ProcWait, SignalOp, TaskIdPayload};
use crate::event::{Event, EventType};
use crate::task::scheduler::{self, Scheduler};
use crate::task::{TaskError, TaskState, TaskTable};

use super::{ERR_BAD_PAYLOAD, ERR_UNKNOWN_OP};

pub const ERR_TABLE_FULL: u32 = 1;
pub const ERR_NOT_FOUND: u32 = 2;
pub const ERR_ALREADY_DEAD: u32 = 3;

fn task_error_code(e: TaskError) -> u32 {
    match e {
        TaskError::TableFull => ERR_TABLE_FULL,
        TaskError::NotFound => ERR_NOT_FOUND,
    }
}

pub struct OperationsDeck;

impl OperationsDeck {
    pub fn new() -> Self {
        Self
    }

    pub fn process(&self, event: &Event, table: &TaskTable, scheduler: &Scheduler, now: u64) -> Result<Vec<u8>, u32> {
        let kind = event.kind().ok_or(ERR_UNKNOWN_OP)?;
        let (op, body) = split_op(event.payload()).ok_or(ERR_BAD_PAYLOAD)?;
        match kind {
            EventType::Process => self.process_task(op, body, table, scheduler, event.user_id, now),
            EventType::Ipc => {
                // IPC's own API (crate::ipc::IpcSystem) is complete and
                // separately tested; the event-pipeline surface for it is
                // not defined by the wire payload conventions this deck
                // decodes against, so every IPC event is acknowledged here
                // without touching a mailbox.
                let _ = IpcOpAck::from_raw(op);
                Ok(Vec::new())
            }
            _ => Err(ERR_UNKNOWN_OP),
        }
    }

    fn process_task(
        &self,
        op: u8,
        body: &[u8],
        table: &TaskTable,
        scheduler: &Scheduler,
        caller: u64,
        now: u64,
    ) -> Result<Vec<u8>, u32> {
        match ProcessOp::from_raw(op).ok_or(ERR_UNKNOWN_OP)? {
            ProcessOp::Create => {
                let req = ProcCreate::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                let id = table.spawn(req.name, caller, req.entry_address, req.energy, now).map_err(task_error_code)?;
                scheduler.enqueue(id);
                Ok(id.to_le_bytes().to_vec())
            }
            ProcessOp::Exit => {
                let task = table.remove(caller).map_err(task_error_code)?;
                scheduler.remove(task.id);
                Ok(Vec::new())
            }
            ProcessOp::Kill => {
                let req = TaskIdPayload::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                let task = table.remove(req.task_id).map_err(task_error_code)?;
                scheduler.remove(task.id);
                Ok(Vec::new())
            }
            ProcessOp::Wait => {
                let req = ProcWait::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                scheduler::sleep(table, scheduler, caller, now.saturating_add(req.duration_ticks))
                    .map_err(task_error_code)?;
                Ok(Vec::new())
            }
            ProcessOp::GetPid => Ok(caller.to_le_bytes().to_vec()),
            ProcessOp::Signal => {
                let req = ProcSignal::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                self.apply_signal(table, scheduler, req.task_id, req.op, req.value)
            }
        }
    }

    /// §4.8 control signals: pause/resume route through the scheduler
    /// (unlink/relink the run queue); boost/throttle/wake only touch the
    /// TCB's own fields.
    fn apply_signal(
        &self,
        table: &TaskTable,
        scheduler: &Scheduler,
        task_id: u64,
        op: SignalOp,
        value: u32,
    ) -> Result<Vec<u8>, u32> {
        match op {
            SignalOp::Pause => scheduler::pause(table, scheduler, task_id).map_err(task_error_code)?,
            SignalOp::Resume => scheduler::resume(table, scheduler, task_id).map_err(task_error_code)?,
            SignalOp::Wake => scheduler::wake(table, scheduler, task_id).map_err(task_error_code)?,
            SignalOp::Boost => table
                .with_task_mut(task_id, |t| t.energy_allocated = t.energy_allocated.saturating_add(value as u8).min(100))
                .map_err(task_error_code)?,
            SignalOp::Throttle => table
                .with_task_mut(task_id, |t| {
                    t.energy_allocated = t.energy_allocated.saturating_sub(value as u8);
                    if t.state == TaskState::Running {
                        t.state = TaskState::Throttled;
                    }
                })
                .map_err(task_error_code)?,
        }
        Ok(Vec::new())
    }
}

impl Default for OperationsDeck {
    fn default() -> Self {
        Self::new()
    }
}

/// Placeholder decode so a malformed IPC op byte still surfaces as a no-op
/// rather than panicking; §4.6 marks the IPC family a stub at this layer.
struct IpcOpAck;
impl IpcOpAck {
    fn from_raw(_op: u8) -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::payload::encode_op;

    fn fixture() -> (OperationsDeck, TaskTable, Scheduler) {
        (OperationsDeck::new(), TaskTable::new(), Scheduler::new())
    }

    fn process_event(user_id: u64, op: ProcessOp, body: Vec<u8>) -> Event {
        Event::new(EventType::Process, user_id, &encode_op(op as u8, &body))
    }

    #[test]
    fn create_spawns_a_runnable_task_and_enqueues_it() {
        let (deck, table, scheduler) = fixture();
        let ev = process_event(0, ProcessOp::Create, ProcCreate::encode("worker", 0x1000, 50));
        let id_bytes = deck.process(&ev, &table, &scheduler, 0).unwrap();
        let id = u64::from_le_bytes(id_bytes.try_into().unwrap());
        assert_eq!(scheduler.next(), Some(id));
        table.with_task(id, |t| assert_eq!(t.state, TaskState::Running)).unwrap();
    }

    #[test]
    fn exit_removes_the_callers_own_task() {
        let (deck, table, scheduler) = fixture();
        let id = table.spawn("self", 0, 0, 50, 0).unwrap();
        scheduler.enqueue(id);
        let ev = process_event(id, ProcessOp::Exit, Vec::new());
        assert!(deck.process(&ev, &table, &scheduler, 1).is_ok());
        assert_eq!(table.with_task(id, |_| ()), Err(TaskError::NotFound));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn kill_removes_an_explicit_target_task() {
        let (deck, table, scheduler) = fixture();
        let target = table.spawn("victim", 0, 0, 50, 0).unwrap();
        scheduler.enqueue(target);
        let ev = process_event(999, ProcessOp::Kill, TaskIdPayload::encode(target));
        assert!(deck.process(&ev, &table, &scheduler, 1).is_ok());
        assert_eq!(table.with_task(target, |_| ()), Err(TaskError::NotFound));
    }

    #[test]
    fn wait_sleeps_the_caller_until_duration_elapses() {
        let (deck, table, scheduler) = fixture();
        let id = table.spawn("waiter", 0, 0, 50, 0).unwrap();
        scheduler.enqueue(id);
        let ev = process_event(id, ProcessOp::Wait, ProcWait::encode(100));
        deck.process(&ev, &table, &scheduler, 10).unwrap();
        table.with_task(id, |t| assert_eq!(t.state, TaskState::Sleeping)).unwrap();
        assert!(scheduler.is_empty());

        scheduler::wake_expired_sleepers(&table, &scheduler, 111);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn get_pid_returns_the_callers_own_id() {
        let (deck, table, scheduler) = fixture();
        let ev = process_event(42, ProcessOp::GetPid, Vec::new());
        let bytes = deck.process(&ev, &table, &scheduler, 0).unwrap();
        assert_eq!(u64::from_le_bytes(bytes.try_into().unwrap()), 42);
    }

    #[test]
    fn signal_pause_then_resume_relinks_the_run_queue() {
        let (deck, table, scheduler) = fixture();
        let id = table.spawn("worker", 0, 0, 50, 0).unwrap();
        scheduler.enqueue(id);

        let pause_ev = process_event(0, ProcessOp::Signal, ProcSignal::encode(id, SignalOp::Pause, 0));
        deck.process(&pause_ev, &table, &scheduler, 0).unwrap();
        assert!(scheduler.is_empty());

        let resume_ev = process_event(0, ProcessOp::Signal, ProcSignal::encode(id, SignalOp::Resume, 0));
        deck.process(&resume_ev, &table, &scheduler, 0).unwrap();
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn signal_boost_raises_allocated_energy() {
        let (deck, table, scheduler) = fixture();
        let id = table.spawn("worker", 0, 0, 50, 0).unwrap();
        let ev = process_event(0, ProcessOp::Signal, ProcSignal::encode(id, SignalOp::Boost, 20));
        deck.process(&ev, &table, &scheduler, 0).unwrap();
        table.with_task(id, |t| assert_eq!(t.energy_allocated, 70)).unwrap();
    }

    #[test]
    fn ipc_events_are_acknowledged_without_error() {
        let (deck, table, scheduler) = fixture();
        let ev = Event::new(EventType::Ipc, 1, &encode_op(0, &[]));
        assert_eq!(deck.process(&ev, &table, &scheduler, 0), Ok(Vec::new()));
    }
}
