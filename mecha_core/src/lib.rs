//! # Mechatronic Control Kernel
//!
//! Building blocks for embedded and industrial device control:
//!
//! 1. **[`state`]**: table-driven supervisory state machine with guards,
//!    entry/exit hooks, override (emergency) events, and timeouts
//! 2. **[`control::pid`]**: PID regulator with variable timestep,
//!    saturation, and opt-in anti-windup
//! 3. **[`sched`]**: cooperative multi-rate scheduler, priority-ordered,
//!    with per-task failure isolation
//!
//! Time is always injected: every time-dependent operation takes a
//! [`Timestamp`](mecha_common::time::Timestamp), and execution durations
//! are measured with a caller-supplied [`Clock`](mecha_common::time::Clock).
//! Tests drive everything from a
//! [`ManualClock`](mecha_common::time::ManualClock).
//!
//! Host-side pieces: [`cycle`] paces the scheduler on a real clock,
//! [`config`] reads the TOML host file, and [`plant`] simulates a thermal
//! process for demos and closed-loop tests.

#![deny(clippy::disallowed_types)]

pub mod config;
pub mod control;
pub mod cycle;
pub mod error;
pub mod plant;
pub mod sched;
pub mod state;
