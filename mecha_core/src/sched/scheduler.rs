//! Priority-aware cooperative scheduler.
//!
//! Each cycle the caller supplies the current time. Every due task runs to
//! completion, in descending priority order, ties broken by descending
//! frequency and then registration order. A task failure (error or panic)
//! is recorded and the cycle carries on with the next task.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use mecha_common::consts::MAX_TASKS;
use mecha_common::time::{Clock, MonotonicClock, Timestamp};
use static_assertions::assert_impl_all;
use tracing::{debug, info, trace, warn};

use crate::error::{ConfigError, TaskError};
use crate::sched::stats::CycleHealth;
use crate::sched::task::{ExecutionRecord, TaskDescriptor};

/// Cooperative multi-rate scheduler.
///
/// `C` measures task execution time only; readiness is decided against the
/// `now` passed to [`Scheduler::run_cycle`].
pub struct Scheduler<C = MonotonicClock> {
    clock: C,
    tasks: heapless::Vec<TaskDescriptor, MAX_TASKS>,
    cycle_count: u64,
    sealed: bool,
}

impl Scheduler<MonotonicClock> {
    /// Scheduler timing tasks with the host monotonic clock.
    pub fn with_monotonic_clock() -> Self {
        Self::new(MonotonicClock::new())
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            tasks: heapless::Vec::new(),
            cycle_count: 0,
            sealed: false,
        }
    }

    /// Register a task. Its first run happens on the next cycle.
    ///
    /// # Errors
    /// - `RegistrationClosed` once the first cycle has run
    /// - `EmptyTaskName`, `DuplicateTask`
    /// - `InvalidFrequency` for non-finite, non-positive, or unrepresentable rates
    /// - `TooManyTasks` past [`MAX_TASKS`]
    pub fn add_task(&mut self, mut task: TaskDescriptor) -> Result<(), ConfigError> {
        if self.sealed {
            return Err(ConfigError::RegistrationClosed(task.name.to_string()));
        }
        if task.name.is_empty() {
            return Err(ConfigError::EmptyTaskName);
        }
        task.period = period_of(&task.name, task.frequency_hz)?;
        if self.tasks.iter().any(|t| t.name == task.name) {
            return Err(ConfigError::DuplicateTask(task.name.to_string()));
        }

        debug!(
            task = %task.name,
            frequency_hz = task.frequency_hz,
            priority = task.priority,
            period_us = task.period.as_micros() as u64,
            "task registered"
        );
        self.tasks
            .push(task)
            .map_err(|_| ConfigError::TooManyTasks(MAX_TASKS))?;

        // Stable: equal keys keep registration order.
        self.tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.frequency_hz.total_cmp(&a.frequency_hz))
        });
        Ok(())
    }

    /// Run every due task once and return one record per executed task,
    /// in execution order.
    pub fn run_cycle(&mut self, now: Timestamp) -> Vec<ExecutionRecord> {
        let mut records = Vec::with_capacity(self.tasks.len());
        self.run_cycle_into(now, &mut records);
        records
    }

    /// [`run_cycle`](Self::run_cycle) appending into a caller-owned buffer.
    /// Returns the health summary of the records appended by this call.
    pub fn run_cycle_into(&mut self, now: Timestamp, out: &mut Vec<ExecutionRecord>) -> CycleHealth {
        if !self.sealed {
            self.sealed = true;
            info!(tasks = self.tasks.len(), "task table sealed");
        }
        self.cycle_count += 1;
        let first = out.len();

        for task in self.tasks.iter_mut() {
            let Some(lateness) = task.due(now) else {
                continue;
            };

            let start = self.clock.now();
            let result = match panic::catch_unwind(AssertUnwindSafe(|| task.action.run())) {
                Ok(result) => result,
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
            };
            let duration = self.clock.now().saturating_since(start);

            task.last_run = Some(now);
            let overrun = task.budget.is_some_and(|budget| duration > budget);
            task.stats
                .record(duration, lateness, result.is_err(), overrun);

            match &result {
                Err(e) => warn!(task = %task.name, error = %e, "task failed"),
                Ok(_) if overrun => warn!(
                    task = %task.name,
                    duration_us = duration.as_micros() as u64,
                    budget_us = task.budget.unwrap_or_default().as_micros() as u64,
                    "task budget overrun"
                ),
                Ok(_) => trace!(
                    task = %task.name,
                    duration_us = duration.as_micros() as u64,
                    "task ran"
                ),
            }

            out.push(ExecutionRecord {
                task_name: task.name.clone(),
                priority: task.priority,
                started_at: now,
                duration,
                lateness,
                overrun,
                result,
            });
        }

        CycleHealth::from_records(&out[first..])
    }

    /// Earliest time any task becomes due. `None` when no task is registered.
    ///
    /// Hosts use this to sleep until there is work.
    pub fn next_due(&self, now: Timestamp) -> Option<Timestamp> {
        self.tasks
            .iter()
            .map(|t| t.next_due().unwrap_or(now))
            .min()
    }

    /// Number of `run_cycle` calls so far.
    #[inline]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Registered tasks in execution order.
    #[inline]
    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&TaskDescriptor> {
        self.tasks.iter().find(|t| &*t.name == name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `true` once the first cycle has run and registration is closed.
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C> std::fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks.as_slice())
            .field("cycle_count", &self.cycle_count)
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}

assert_impl_all!(Scheduler<MonotonicClock>: Send);

/// Task period for `frequency_hz`; rejects rates whose period is not a
/// representable non-zero `Duration`.
pub(crate) fn period_of(name: &str, frequency_hz: f64) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidFrequency {
        name: name.to_string(),
        frequency_hz,
    };
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return Err(invalid());
    }
    match Duration::try_from_secs_f64(1.0 / frequency_hz) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(invalid()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
