//! Task descriptors and the actions they run.

use std::sync::Arc;
use std::time::Duration;

use mecha_common::time::Timestamp;
use mecha_common::value::Value;

use crate::error::TaskError;
use crate::sched::stats::TaskStats;

/// Outcome of one task action: success with an optional payload, or failure.
pub type TaskResult = Result<Option<Value>, TaskError>;

/// Zero-argument callable run by the scheduler.
///
/// Implemented for every `FnMut() -> TaskResult + Send` closure.
pub trait TaskAction: Send {
    fn run(&mut self) -> TaskResult;
}

impl<F> TaskAction for F
where
    F: FnMut() -> TaskResult + Send,
{
    #[inline]
    fn run(&mut self) -> TaskResult {
        self()
    }
}

/// A registered periodic task.
///
/// Built with [`TaskDescriptor::new`], handed to
/// [`Scheduler::add_task`](crate::sched::Scheduler::add_task), which
/// validates the frequency and derives the period. Timing fields are owned
/// and updated by the scheduler.
pub struct TaskDescriptor {
    pub(crate) name: Arc<str>,
    pub(crate) frequency_hz: f64,
    pub(crate) priority: i32,
    pub(crate) budget: Option<Duration>,
    pub(crate) period: Duration,
    pub(crate) last_run: Option<Timestamp>,
    pub(crate) stats: TaskStats,
    pub(crate) action: Box<dyn TaskAction>,
}

impl TaskDescriptor {
    /// `priority`: higher runs first. `frequency_hz`: target rate, must be
    /// finite and > 0 (checked at registration).
    pub fn new<A>(name: impl Into<Arc<str>>, frequency_hz: f64, priority: i32, action: A) -> Self
    where
        A: TaskAction + 'static,
    {
        Self {
            name: name.into(),
            frequency_hz,
            priority,
            budget: None,
            period: Duration::ZERO,
            last_run: None,
            stats: TaskStats::default(),
            action: Box::new(action),
        }
    }

    /// Maximum expected execution time; longer runs are flagged as overruns.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[inline]
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// `1 / frequency`, set at registration.
    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[inline]
    pub fn last_run(&self) -> Option<Timestamp> {
        self.last_run
    }

    #[inline]
    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    /// Lateness past the due time if the task is due at `now`.
    ///
    /// A task that never ran is due immediately with zero lateness.
    pub fn due(&self, now: Timestamp) -> Option<Duration> {
        match self.last_run {
            None => Some(Duration::ZERO),
            Some(last) => now.saturating_since(last).checked_sub(self.period),
        }
    }

    /// Earliest time the task becomes due.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.last_run.map(|last| last + self.period)
    }
}

impl std::fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("frequency_hz", &self.frequency_hz)
            .field("priority", &self.priority)
            .field("budget", &self.budget)
            .field("last_run", &self.last_run)
            .finish_non_exhaustive()
    }
}

/// Per-task entry of a cycle's telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub task_name: Arc<str>,
    pub priority: i32,
    /// The cycle time the task ran at.
    pub started_at: Timestamp,
    /// Measured execution time.
    pub duration: Duration,
    /// How long after its due time the task ran.
    pub lateness: Duration,
    /// Execution exceeded the task budget.
    pub overrun: bool,
    pub result: TaskResult,
}

impl ExecutionRecord {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Execution time in milliseconds.
    #[inline]
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1_000.0
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TaskResult {
        Ok(None)
    }

    #[test]
    fn closures_are_actions() {
        let mut counter = 0;
        let mut action = move || -> TaskResult {
            counter += 1;
            Ok(Some(Value::Number(f64::from(counter))))
        };
        assert_eq!(TaskAction::run(&mut action), Ok(Some(Value::Number(1.0))));
        assert_eq!(TaskAction::run(&mut action), Ok(Some(Value::Number(2.0))));
    }

    #[test]
    fn never_run_task_is_due() {
        let t = TaskDescriptor::new("sense", 10.0, 1, noop);
        assert_eq!(t.due(Timestamp::ZERO), Some(Duration::ZERO));
        assert_eq!(t.next_due(), None);
    }

    #[test]
    fn due_after_period() {
        let mut t = TaskDescriptor::new("sense", 10.0, 1, noop);
        t.period = Duration::from_millis(100);
        t.last_run = Some(Timestamp::from_millis(1000));
        assert_eq!(t.due(Timestamp::from_millis(1099)), None);
        assert_eq!(t.due(Timestamp::from_millis(1100)), Some(Duration::ZERO));
        assert_eq!(
            t.due(Timestamp::from_millis(1130)),
            Some(Duration::from_millis(30))
        );
        assert_eq!(t.next_due(), Some(Timestamp::from_millis(1100)));
    }

    #[test]
    fn record_duration_ms() {
        let rec = ExecutionRecord {
            task_name: "regulate".into(),
            priority: 3,
            started_at: Timestamp::ZERO,
            duration: Duration::from_micros(1500),
            lateness: Duration::ZERO,
            overrun: false,
            result: Ok(None),
        };
        assert!((rec.duration_ms() - 1.5).abs() < 1e-12);
        assert!(rec.is_ok());
    }
}
