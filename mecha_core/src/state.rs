//! Supervisory state machine.
//!
//! A table-driven finite-state controller: rules keyed by `(state, event)`,
//! override events checked ahead of the table, per-state entry/exit/during
//! hooks, and time-in-state timeouts synthesized by `tick`.
//!
//! ```rust
//! use std::time::Duration;
//! use mecha_common::time::Timestamp;
//! use mecha_common::value::Context;
//! use mecha_core::state::{StateMachineBuilder, TransitionOutcome};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Mode { Stopped, Starting, Running, Error }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Event { Start, StartupComplete, EmergencyStop }
//!
//! let mut sm = StateMachineBuilder::new(Mode::Stopped, ())
//!     .guarded_rule(Mode::Stopped, Event::Start, Mode::Starting, |ctx| ctx.bool("sensor_clear"))
//!     .rule(Mode::Starting, Event::StartupComplete, Mode::Running)
//!     .timeout(Mode::Starting, Duration::from_secs(2), Event::StartupComplete)
//!     .override_event(Event::EmergencyStop, Mode::Error)
//!     .build()
//!     .unwrap();
//!
//! let ctx = Context::new().with("sensor_clear", true);
//! sm.handle_event_at(Event::Start, &ctx, Timestamp::ZERO);
//! let fired = sm.tick(Timestamp::from_secs_f64(2.0));
//! assert_eq!(
//!     fired,
//!     Some(TransitionOutcome::Transitioned { from: Mode::Starting, to: Mode::Running })
//! );
//! ```

pub mod machine;
pub mod table;

pub use machine::{IgnoreReason, StateMachine, TransitionCause, TransitionOutcome, TransitionRecord};
pub use table::{During, Guard, Hook, MachineKey, StateMachineBuilder};
