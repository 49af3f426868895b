//! Host configuration file: cycle time, PID gains, plant model, task table.
//!
//! ```toml
//! [shared]
//! service_name = "thermal-rig"
//!
//! [cycle]
//! cycle_time_us = 1000
//!
//! [pid]
//! kp = 4.0
//! ki = 0.4
//! kd = 0.0
//! setpoint = 60.0
//! output_min = 0.0
//! output_max = 100.0
//!
//! [[tasks]]
//! name = "regulate"
//! frequency_hz = 10.0
//! priority = 10
//! budget_us = 500
//! ```
//!
//! Loading goes through [`ConfigLoader::load_validated`]; semantic checks
//! reuse the same validation the kernel constructors run, so a file that
//! loads is a file the kernel accepts.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use mecha_common::config::{self as file, ConfigLoader, SharedConfig, Validate};
use mecha_common::consts::{DEFAULT_CYCLE_TIME_US, MAX_TASKS};
use serde::{Deserialize, Serialize};

use crate::control::pid::PidParams;
use crate::error::ConfigError;
use crate::plant::{ThermalParams, ThermalPlant};
use crate::sched::scheduler::period_of;
use crate::sched::{TaskAction, TaskDescriptor};

fn default_cycle_time_us() -> u64 {
    DEFAULT_CYCLE_TIME_US
}

/// `[cycle]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Host loop period [µs].
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u64,
    /// Stop the loop on the first cycle overrun.
    #[serde(default)]
    pub abort_on_overrun: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cycle_time_us: DEFAULT_CYCLE_TIME_US,
            abort_on_overrun: false,
        }
    }
}

impl CycleConfig {
    #[inline]
    pub fn cycle_time(&self) -> Duration {
        Duration::from_micros(self.cycle_time_us)
    }
}

/// One `[[tasks]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub frequency_hz: f64,
    #[serde(default)]
    pub priority: i32,
    /// Execution budget [µs]; absent means unbudgeted.
    #[serde(default)]
    pub budget_us: Option<u64>,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>, frequency_hz: f64, priority: i32) -> Self {
        Self {
            name: name.into(),
            frequency_hz,
            priority,
            budget_us: None,
        }
    }

    #[inline]
    pub fn budget(&self) -> Option<Duration> {
        self.budget_us.map(Duration::from_micros)
    }

    /// Descriptor running `action` with this entry's timing.
    pub fn descriptor<A>(&self, action: A) -> TaskDescriptor
    where
        A: TaskAction + 'static,
    {
        let task = TaskDescriptor::new(
            self.name.as_str(),
            self.frequency_hz,
            self.priority,
            action,
        );
        match self.budget() {
            Some(budget) => task.with_budget(budget),
            None => task,
        }
    }
}

/// The host configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    pub pid: PidParams,
    #[serde(default)]
    pub plant: ThermalParams,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl KernelConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Ok(<Self as ConfigLoader>::load_validated(path)?)
    }

    /// Kernel-level checks with structured errors.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.cycle.cycle_time_us == 0 {
            return Err(ConfigError::InvalidCycleTime);
        }
        self.pid.validate()?;
        ThermalPlant::new(self.plant)?;

        if self.tasks.len() > MAX_TASKS {
            return Err(ConfigError::TooManyTasks(MAX_TASKS));
        }
        let mut seen = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if task.name.is_empty() {
                return Err(ConfigError::EmptyTaskName);
            }
            period_of(&task.name, task.frequency_hz)?;
            if !seen.insert(task.name.as_str()) {
                return Err(ConfigError::DuplicateTask(task.name.clone()));
            }
        }
        Ok(())
    }

    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

impl Validate for KernelConfig {
    fn validate(&self) -> Result<(), file::ConfigError> {
        self.shared.validate()?;
        self.check()
            .map_err(|e| file::ConfigError::ValidationError(e.to_string()))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
