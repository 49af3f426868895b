//! Mechatronic control kernel: shared types.
//!
//! Leaf crate used by every kernel component.
//!
//! # Module Structure
//!
//! - [`time`] - Monotonic timestamps and injectable clocks
//! - [`value`] - Context values queried by state machine guards
//! - [`config`] - TOML configuration loading traits and types
//! - [`consts`] - Fixed capacities and defaults
//! - [`prelude`] - Common re-exports for convenience

pub mod config;
pub mod consts;
pub mod prelude;
pub mod time;
pub mod value;
