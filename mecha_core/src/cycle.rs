//! Fixed-rate host loop around the scheduler.
//!
//! The kernel itself never sleeps or reads a global clock; this module is
//! the host-side driver that does both. Each cycle it reads the scheduler's
//! clock, runs one [`Scheduler::run_cycle_into`], measures the cycle, then
//! sleeps until the next cycle boundary.
//!
//! ## RT Setup Sequence
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)`: lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity`: pin to one CPU core.
//! 4. `sched_setscheduler(SCHED_FIFO, prio)`.
//!
//! Every step is a no-op without the `rt` feature.
//!
//! ## Pacing
//! Wake times advance by exactly one cycle time from the loop start. When a
//! cycle ends past its next boundary the schedule re-anchors on the current
//! time instead of bursting through the missed cycles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mecha_common::time::{Clock, MonotonicClock, Timestamp};
use tracing::{info, warn};

use crate::error::{ConfigError, RunnerError};
use crate::sched::{CycleHealth, ExecutionRecord, Scheduler};

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleStats {
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: u64,
    pub min_cycle_ns: u64,
    pub max_cycle_ns: u64,
    sum_cycle_ns: u128,
    /// Cycles longer than the configured cycle time.
    pub overruns: u64,
    /// Maximum wake-up latency [ns] (actual start minus scheduled start).
    pub max_latency_ns: u64,
    /// Cycles in which at least one task failed or panicked.
    pub unhealthy_cycles: u64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: u64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
            unhealthy_cycles: 0,
        }
    }

    /// Record a cycle. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: u64, latency_ns: u64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += u128::from(duration_ns);
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    /// Average cycle time [ns] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> u64 {
        if self.cycle_count == 0 {
            0
        } else {
            (self.sum_cycle_ns / u128::from(self.cycle_count)) as u64
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), RunnerError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| RunnerError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), RunnerError> {
    Ok(())
}

/// Touch 256 KiB of stack so the loop does not fault pages in later.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    buf.fill(0xFF);
    std::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), RunnerError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| RunnerError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| RunnerError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), RunnerError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), RunnerError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param for the calling thread (pid 0).
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(RunnerError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), RunnerError> {
    Ok(())
}

/// Prepare the calling thread for the cycle loop.
///
/// Call before [`CycleRunner::run`], on the thread that will run it.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), RunnerError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    info!(
        cpu_core,
        rt_priority,
        rt = cfg!(feature = "rt"),
        "real-time setup complete"
    );
    Ok(())
}

#[cfg(feature = "rt")]
fn sleep_for(d: Duration) {
    use nix::sys::time::TimeSpec;
    use nix::time::{ClockId, ClockNanosleepFlags, clock_nanosleep};

    let _ = clock_nanosleep(
        ClockId::CLOCK_MONOTONIC,
        ClockNanosleepFlags::empty(),
        &TimeSpec::from_duration(d),
    );
}

#[cfg(not(feature = "rt"))]
fn sleep_for(d: Duration) {
    std::thread::sleep(d);
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Drives a [`Scheduler`] at a fixed cycle time.
pub struct CycleRunner<C = MonotonicClock> {
    scheduler: Scheduler<C>,
    cycle_time: Duration,
    abort_on_overrun: bool,
    stop: Arc<AtomicBool>,
    stats: CycleStats,
    /// Reused record buffer.
    records: Vec<ExecutionRecord>,
}

impl<C: Clock> CycleRunner<C> {
    /// # Errors
    /// `InvalidCycleTime` for a zero cycle time.
    pub fn new(scheduler: Scheduler<C>, cycle_time: Duration) -> Result<Self, ConfigError> {
        if cycle_time.is_zero() {
            return Err(ConfigError::InvalidCycleTime);
        }
        let records = Vec::with_capacity(scheduler.len());
        Ok(Self {
            scheduler,
            cycle_time,
            abort_on_overrun: false,
            stop: Arc::new(AtomicBool::new(false)),
            stats: CycleStats::new(),
            records,
        })
    }

    /// Treat a cycle overrun as fatal instead of logging it.
    pub fn abort_on_overrun(mut self, abort: bool) -> Self {
        self.abort_on_overrun = abort;
        self
    }

    /// Use an externally owned stop flag (e.g. one set by a signal handler).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Shared flag; storing `true` ends [`run`](Self::run) after the
    /// current cycle.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run one cycle immediately.
    pub fn run_once(&mut self) -> Result<CycleHealth, RunnerError> {
        let now = self.scheduler.clock().now();
        self.cycle(now)
    }

    /// Cycle until the stop flag is set or `limit` has elapsed on the
    /// scheduler's clock. Returns the number of cycles run.
    ///
    /// # Errors
    /// `CycleOverrun` when configured with [`abort_on_overrun`](Self::abort_on_overrun).
    pub fn run(&mut self, limit: Option<Duration>) -> Result<u64, RunnerError> {
        let start = self.scheduler.clock().now();
        let mut next_wake = start;
        let mut cycles = 0u64;

        info!(
            cycle_time_us = self.cycle_time.as_micros() as u64,
            tasks = self.scheduler.len(),
            "cycle runner started"
        );

        while !self.stop.load(Ordering::Acquire) {
            if limit.is_some_and(|l| self.scheduler.clock().now().saturating_since(start) >= l) {
                break;
            }

            self.cycle(next_wake)?;
            cycles += 1;

            next_wake = next_wake.saturating_add(self.cycle_time);
            let now = self.scheduler.clock().now();
            if next_wake < now {
                next_wake = now;
            } else {
                let remaining = next_wake.saturating_since(now);
                if !remaining.is_zero() {
                    sleep_for(remaining);
                }
            }
        }

        info!(
            cycles,
            overruns = self.stats.overruns,
            avg_cycle_us = self.stats.avg_cycle_ns() / 1_000,
            max_cycle_us = self.stats.max_cycle_ns / 1_000,
            "cycle runner stopped"
        );
        Ok(cycles)
    }

    fn cycle(&mut self, scheduled: Timestamp) -> Result<CycleHealth, RunnerError> {
        let started = self.scheduler.clock().now();
        self.records.clear();
        let mut health = self.scheduler.run_cycle_into(started, &mut self.records);
        let duration = self.scheduler.clock().now().saturating_since(started);

        let duration_ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let latency_ns = started.saturating_since(scheduled).as_nanos() as u64;
        self.stats.record(duration_ns, latency_ns);
        if health.intersects(CycleHealth::TASK_FAILED | CycleHealth::TASK_PANICKED) {
            self.stats.unhealthy_cycles += 1;
        }

        if duration > self.cycle_time {
            self.stats.overruns += 1;
            health |= CycleHealth::CYCLE_OVERRUN;
            let budget_ns = self.cycle_time.as_nanos() as u64;
            if self.abort_on_overrun {
                return Err(RunnerError::CycleOverrun {
                    actual_ns: duration_ns,
                    budget_ns,
                });
            }
            warn!(
                actual_us = duration_ns / 1_000,
                budget_us = budget_ns / 1_000,
                "cycle overrun"
            );
        }
        Ok(health)
    }

    #[inline]
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Records of the most recent cycle.
    #[inline]
    pub fn last_records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    #[inline]
    pub fn scheduler(&self) -> &Scheduler<C> {
        &self.scheduler
    }

    #[inline]
    pub fn cycle_time(&self) -> Duration {
        self.cycle_time
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
