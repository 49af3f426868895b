//! Common re-exports.
//!
//! ```rust
//! use mecha_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig, Validate};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_CYCLE_TIME_US, MAX_TASKS, TRANSITION_HISTORY_LEN};

// ─── Time ───────────────────────────────────────────────────────────
pub use crate::time::{Clock, ManualClock, MonotonicClock, Timestamp};

// ─── Context ────────────────────────────────────────────────────────
pub use crate::value::{Context, ContextError, Value};
