//! Scheduler telemetry: per-task statistics and per-cycle health flags.

use std::time::Duration;

use bitflags::bitflags;

use crate::error::TaskError;
use crate::sched::task::ExecutionRecord;

/// Weight of the newest sample in the rolling average.
const ROLLING_ALPHA: f64 = 0.2;

/// O(1) per-task execution statistics, updated on every run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStats {
    pub runs: u64,
    pub failures: u64,
    pub overruns: u64,
    pub last_duration: Duration,
    pub max_duration: Duration,
    /// Largest observed delay between due time and execution.
    pub max_lateness: Duration,
    /// Exponential moving average of execution time [ns].
    rolling_avg_ns: f64,
}

impl TaskStats {
    /// Record one execution.
    #[inline]
    pub fn record(&mut self, duration: Duration, lateness: Duration, failed: bool, overrun: bool) {
        let ns = duration.as_nanos() as f64;
        self.rolling_avg_ns = if self.runs == 0 {
            ns
        } else {
            self.rolling_avg_ns + ROLLING_ALPHA * (ns - self.rolling_avg_ns)
        };
        self.runs += 1;
        if failed {
            self.failures += 1;
        }
        if overrun {
            self.overruns += 1;
        }
        self.last_duration = duration;
        self.max_duration = self.max_duration.max(duration);
        self.max_lateness = self.max_lateness.max(lateness);
    }

    /// Rolling average execution time (zero before the first run).
    #[inline]
    pub fn avg_duration(&self) -> Duration {
        Duration::from_nanos(self.rolling_avg_ns.round() as u64)
    }
}

bitflags! {
    /// Summary of one scheduler cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CycleHealth: u8 {
        /// At least one task returned an error.
        const TASK_FAILED    = 0x01;
        /// At least one task panicked.
        const TASK_PANICKED  = 0x02;
        /// At least one task exceeded its budget.
        const BUDGET_OVERRUN = 0x04;
        /// The whole cycle exceeded the host cycle time (set by the runner).
        const CYCLE_OVERRUN  = 0x08;
    }
}

impl CycleHealth {
    /// Fold the records of one cycle.
    pub fn from_records(records: &[ExecutionRecord]) -> Self {
        records.iter().fold(Self::empty(), |mut health, rec| {
            match &rec.result {
                Ok(_) => {}
                Err(TaskError::Panicked(_)) => health |= Self::TASK_PANICKED,
                Err(_) => health |= Self::TASK_FAILED,
            }
            if rec.overrun {
                health |= Self::BUDGET_OVERRUN;
            }
            health
        })
    }

    #[inline]
    pub const fn is_healthy(&self) -> bool {
        self.is_empty()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
