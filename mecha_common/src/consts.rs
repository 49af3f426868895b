//! Kernel-wide constants.
//!
//! Single source of truth for fixed capacities and default paths.

/// Maximum number of tasks one scheduler can hold.
pub const MAX_TASKS: usize = 32;

/// Number of transitions kept in a state machine's audit history.
pub const TRANSITION_HISTORY_LEN: usize = 32;

/// Default host cycle time in microseconds (1 kHz).
pub const DEFAULT_CYCLE_TIME_US: u64 = 1000;

/// Default host configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/kernel.toml";
