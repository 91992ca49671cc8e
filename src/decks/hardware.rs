//! Hardware deck (§4.6): the timer table plus (stubbed) device operations.
//!
//! Timers can expire with no new event arriving to drive them, so
//! `check_expired` is a second public entry point independent of
//! `process` — the coordinator (`System::step`) calls it once per tick
//! alongside `process`, the same way `scheduler::wake_expired_sleepers`
//! runs every tick regardless of queue state.

use alloc::vec::Vec;

use spin::Mutex;

use crate::config::MAX_TIMERS;
use crate::event::payload::{split_op, DeviceOp, TimerCreate, TimerId, TimerOp, TimerSleep};
use crate::event::{Event, EventType};
use crate::task::scheduler::{self, Scheduler};
use crate::task::TaskTable;

use super::{ERR_BAD_PAYLOAD, ERR_UNKNOWN_OP};

pub const ERR_TABLE_FULL: u32 = 1;
pub const ERR_NOT_FOUND: u32 = 2;

/// One Hardware-deck timer slot: `{id, owner_task_id, expiration_tsc,
/// interval_tsc, active}` (§4.6). `interval_tsc == 0` means one-shot.
#[derive(Clone, Copy)]
struct TimerSlot {
    id: u32,
    owner_task_id: u64,
    expiration_tsc: u64,
    interval_tsc: u64,
    active: bool,
}

impl TimerSlot {
    fn empty() -> Self {
        Self { id: 0, owner_task_id: 0, expiration_tsc: 0, interval_tsc: 0, active: false }
    }
}

pub struct HardwareDeck {
    timers: Mutex<[TimerSlot; MAX_TIMERS]>,
    next_id: Mutex<u32>,
}

impl HardwareDeck {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(core::array::from_fn(|_| TimerSlot::empty())),
            next_id: Mutex::new(1),
        }
    }

    pub fn process(&self, event: &Event, table: &TaskTable, scheduler: &Scheduler, now: u64) -> Result<Vec<u8>, u32> {
        let kind = event.kind().ok_or(ERR_UNKNOWN_OP)?;
        let (op, body) = split_op(event.payload()).ok_or(ERR_BAD_PAYLOAD)?;
        match kind {
            EventType::Timer => self.process_timer(op, body, table, scheduler, event.user_id, now),
            EventType::Device => self.process_device(op, body),
            _ => Err(ERR_UNKNOWN_OP),
        }
    }

    fn process_timer(
        &self,
        op: u8,
        body: &[u8],
        table: &TaskTable,
        scheduler: &Scheduler,
        owner: u64,
        now: u64,
    ) -> Result<Vec<u8>, u32> {
        match TimerOp::from_raw(op).ok_or(ERR_UNKNOWN_OP)? {
            TimerOp::Create => {
                let req = TimerCreate::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                let id = self.alloc_slot(owner, now + req.delay_ms, req.interval_ms)?;
                Ok(id.to_le_bytes().to_vec())
            }
            TimerOp::Cancel => {
                let req = TimerId::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                self.cancel(req.timer_id)?;
                Ok(Vec::new())
            }
            TimerOp::Sleep => {
                let req = TimerSleep::decode(body).map_err(|_| ERR_BAD_PAYLOAD)?;
                scheduler::sleep(table, scheduler, owner, now.saturating_add(req.delay_ticks))
                    .map_err(|_| ERR_NOT_FOUND)?;
                Ok(Vec::new())
            }
            TimerOp::GetTicks => Ok(now.to_le_bytes().to_vec()),
        }
    }

    fn process_device(&self, op: u8, _body: &[u8]) -> Result<Vec<u8>, u32> {
        // Device access is out of scope (§1); every op is acknowledged with
        // an empty result so callers observe a deterministic completion.
        DeviceOp::from_raw(op).ok_or(ERR_UNKNOWN_OP)?;
        Ok(Vec::new())
    }

    fn alloc_slot(&self, owner_task_id: u64, expiration_tsc: u64, interval_tsc: u64) -> Result<u32, u32> {
        let mut timers = self.timers.lock();
        let slot = timers.iter_mut().find(|t| !t.active).ok_or(ERR_TABLE_FULL)?;
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;
        *slot = TimerSlot { id, owner_task_id, expiration_tsc, interval_tsc, active: true };
        Ok(id)
    }

    fn cancel(&self, timer_id: u32) -> Result<(), u32> {
        let mut timers = self.timers.lock();
        let slot = timers.iter_mut().find(|t| t.active && t.id == timer_id).ok_or(ERR_NOT_FOUND)?;
        slot.active = false;
        Ok(())
    }

    /// Wakes every timer whose `expiration_tsc` has passed, waking its
    /// owning task (§4.8 treats a fired timer the same as an expired
    /// sleep deadline). One-shot timers deactivate; periodic timers
    /// reschedule for `now + interval_tsc`. Returns whether any timer
    /// fired, so a driver loop (`System::step`) can treat it as work done.
    pub fn check_expired(&self, table: &TaskTable, scheduler: &Scheduler, now: u64) -> bool {
        let mut fired = arrayvec::ArrayVec::<u64, MAX_TIMERS>::new();
        let mut timers = self.timers.lock();
        for slot in timers.iter_mut() {
            if slot.active && now >= slot.expiration_tsc {
                let _ = fired.try_push(slot.owner_task_id);
                if slot.interval_tsc == 0 {
                    slot.active = false;
                } else {
                    slot.expiration_tsc = now + slot.interval_tsc;
                }
            }
        }
        drop(timers);
        let any_fired = !fired.is_empty();
        for owner in fired {
            let _ = scheduler::wake(table, scheduler, owner);
        }
        any_fired
    }
}

impl Default for HardwareDeck {
    fn default() -> Self {
        Self::new()
    }
}
