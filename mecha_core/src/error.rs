//! Kernel error taxonomy.
//!
//! Construction-time problems are fatal for the instance being built
//! ([`ConfigError`]). Runtime task failures are isolated per task and
//! reported through execution records ([`TaskError`]); they never leave
//! `run_cycle`. Guard evaluation failures
//! ([`mecha_common::value::ContextError`]) never leave the state machine:
//! they count as "guard not satisfied". Host loop failures are
//! [`RunnerError`].

use thiserror::Error;

/// Malformed configuration. Non-recoverable for the instance concerned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    // ── State machine table ──
    #[error("ambiguous transition table: {state} has more than one rule for {event}")]
    AmbiguousRule { state: String, event: String },

    #[error("override event {event} also appears as an ordinary rule from {state}")]
    OverrideShadowsRule { state: String, event: String },

    #[error("override event {0} registered twice")]
    DuplicateOverride(String),

    #[error("state {0} declares more than one timeout")]
    DuplicateTimeout(String),

    #[error("timeout for state {0} must be longer than zero")]
    ZeroTimeout(String),

    #[error("timeout event {event} in state {state} has no rule or override to handle it")]
    TimeoutWithoutRule { state: String, event: String },

    // ── Scheduler ──
    #[error("task '{name}': frequency must be finite and > 0 Hz, got {frequency_hz}")]
    InvalidFrequency { name: String, frequency_hz: f64 },

    #[error("task name cannot be empty")]
    EmptyTaskName,

    #[error("task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("scheduler is full ({0} tasks)")]
    TooManyTasks(usize),

    #[error("task '{0}' registered after cycling started")]
    RegistrationClosed(String),

    // ── PID ──
    #[error("PID parameter {name} must be finite, got {value}")]
    NonFinitePidParameter { name: &'static str, value: f64 },

    #[error("PID derivative filter time constant must be >= 0, got {0}")]
    NegativeDerivativeFilter(f64),

    #[error("PID output bounds inverted: min {min} > max {max}")]
    InvalidOutputBounds { min: f64, max: f64 },

    #[error("PID anti-windup: {0}")]
    InvalidAntiWindup(&'static str),

    // ── Host ──
    #[error("cycle time must be > 0")]
    InvalidCycleTime,

    #[error("plant model: {0}")]
    InvalidPlantParameter(&'static str),

    #[error(transparent)]
    File(#[from] mecha_common::config::ConfigError),
}

/// Failure of one task action during a scheduler cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The action reported failure.
    #[error("task failed: {0}")]
    Failed(String),

    /// The action panicked; the panic was contained at the task boundary.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// A shared component the task locks was poisoned by an earlier panic.
    #[error("shared resource poisoned: {0}")]
    Poisoned(&'static str),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Guard evaluation failure: a context field is missing or has the wrong type.
pub type GuardError = mecha_common::value::ContextError;

/// Fatal failure of the host cycle loop.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("real-time setup failed: {0}")]
    RtSetup(String),

    #[error("cycle overrun: {actual_ns} ns > {budget_ns} ns cycle time")]
    CycleOverrun { actual_ns: u64, budget_ns: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Rejected PID input. The regulator state is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PidError {
    #[error("non-finite PID {name}: {value}")]
    NonFiniteInput { name: &'static str, value: f64 },
}

// ─── Tests ──────────────────────────────────────────────────────────
