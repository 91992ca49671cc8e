//! Health bookkeeping (§4.8).

use crate::config::{AUTO_RECOVER_ENERGY_BOOST, AUTO_RECOVER_HEALTH_FLOOR, STALL_THRESHOLD_TICKS};
use super::{TaskState, TaskTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub responsiveness: u8,
    pub efficiency: u8,
    pub stability: u8,
    pub progress: u8,
    pub overall: u8,
}

impl Health {
    pub const fn perfect() -> Self {
        Self { responsiveness: 100, efficiency: 100, stability: 100, progress: 100, overall: 100 }
    }
}

/// Buckets an elapsed-ticks value into a 0-100 score: the longer it has
/// been, the lower the score, floor at 0.
fn bucket(elapsed: u64, full_score_within: u64) -> u8 {
    if elapsed <= full_score_within {
        100
    } else {
        let over = elapsed - full_score_within;
        let penalty = (over / (full_score_within.max(1) / 10).max(1)).min(100);
        (100u64.saturating_sub(penalty)) as u8
    }
}

/// Recomputes `responsiveness`, `efficiency`, `stability` and `progress`
/// from raw counters, then sets `overall` to their arithmetic mean
/// (§4.8: "Overall health is the arithmetic mean").
pub fn recompute(
    now: u64,
    last_run_time: u64,
    last_progress_time: u64,
    energy_efficiency: u8,
    prior_efficiency: u8,
    error_rate_pct: u8,
) -> Health {
    let responsiveness = bucket(now.saturating_sub(last_run_time), STALL_THRESHOLD_TICKS / 5);
    let progress = bucket(now.saturating_sub(last_progress_time), STALL_THRESHOLD_TICKS);
    let efficiency = ((energy_efficiency as u16 + prior_efficiency as u16) / 2) as u8;
    let stability = 100u8.saturating_sub(error_rate_pct);
    let overall = ((responsiveness as u16 + efficiency as u16 + stability as u16 + progress as u16) / 4) as u8;
    Health { responsiveness, efficiency, stability, progress, overall }
}

/// Runs the health updater over every task in the table, marking tasks
/// `stalled` once `now - last_progress_time` exceeds the threshold, then
/// boosting energy for any `stalled` task whose overall health has fallen
/// below the recovery floor (§4.8: "`auto_recover`").
pub fn update_all(table: &TaskTable, now: u64) {
    table.for_each_mut(|task| {
        if task.state == TaskState::Dead {
            return;
        }
        let error_rate_pct = if task.run_count == 0 {
            0
        } else {
            ((task.error_count as u64 * 100) / task.run_count.max(1)).min(100) as u8
        };
        task.health = recompute(
            now,
            task.last_run_time,
            task.last_progress_time,
            task.energy_efficiency,
            task.health.efficiency,
            error_rate_pct,
        );

        if now.saturating_sub(task.last_progress_time) > STALL_THRESHOLD_TICKS
            && matches!(task.state, TaskState::Running | TaskState::Processing)
        {
            task.state = TaskState::Stalled;
        }

        if task.state == TaskState::Stalled && task.health.overall < AUTO_RECOVER_HEALTH_FLOOR {
            task.energy_allocated = task.energy_allocated.saturating_add(AUTO_RECOVER_ENERGY_BOOST).min(100);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_task_gets_perfect_health() {
        let h = recompute(100, 100, 100, 100, 100, 0);
        assert_eq!(h.overall, 100);
    }

    #[test]
    fn long_idle_task_loses_responsiveness_and_progress() {
        let h = recompute(10_000_000, 0, 0, 100, 100, 0);
        assert!(h.responsiveness < 100);
        assert!(h.progress < 100);
    }

    #[test]
    fn stalled_low_health_task_gets_energy_boost() {
        let table = TaskTable::new();
        let id = table.spawn("worker", 0, 0, 50, 0).unwrap();
        table
            .with_task_mut(id, |t| {
                t.last_progress_time = 0;
                t.last_run_time = 0;
                t.energy_allocated = 10;
                t.energy_efficiency = 0;
            })
            .unwrap();

        // Repeated updates let `efficiency` decay toward the current (low)
        // reading, driving `overall` below the recovery floor.
        for _ in 0..5 {
            update_all(&table, STALL_THRESHOLD_TICKS * 50);
        }

        table
            .with_task(id, |t| {
                assert_eq!(t.state, TaskState::Stalled);
                assert!(t.health.overall < AUTO_RECOVER_HEALTH_FLOOR);
                assert!(t.energy_allocated > 10);
            })
            .unwrap();
    }
}
